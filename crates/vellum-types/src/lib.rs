//! Core data types shared across the vellum document-database engine.
//!
//! Foundation newtypes (sequences, remote IDs, document flags) live here,
//! together with the varint codec and the record-store seam that the
//! document layer persists through.

pub mod memstore;
pub mod record;
pub mod varint;

pub use memstore::{MemRecordStore, MemTransaction};
pub use record::{Record, RecordLite, RecordStore, StoreTransaction};

use std::fmt;

/// Monotonically increasing identifier of a document mutation within one
/// database connection.
///
/// Sequence 0 means "never saved"; the first committed change is sequence 1.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(transparent)]
pub struct Sequence(u64);

impl Sequence {
    /// The "never saved" sequence.
    pub const ZERO: Self = Self(0);

    /// Create a sequence from a raw u64.
    #[inline]
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    /// Get the raw u64 value.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Whether this is the "never saved" sequence.
    #[inline]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// The next sequence after this one.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Index of a peer a document revision is tracked against.
///
/// 0 is the local database itself; values >= 1 name indexed remote peers.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(transparent)]
pub struct RemoteId(u32);

impl RemoteId {
    /// The local database.
    pub const LOCAL: Self = Self(0);

    /// Create a remote ID from a raw index.
    #[inline]
    pub const fn new(n: u32) -> Self {
        Self(n)
    }

    /// Get the raw index.
    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Whether this is the local database.
    #[inline]
    pub const fn is_local(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_local() {
            f.write_str("local")
        } else {
            write!(f, "remote#{}", self.0)
        }
    }
}

/// How much of a record has been loaded from the store.
///
/// Ordered: each level includes everything below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ContentOption {
    /// Only the key, revision ID, sequence, and flags.
    MetaOnly,
    /// Metadata plus the current revision's body.
    CurrentRevOnly,
    /// Everything, including the remote-revision table.
    EntireBody,
}

bitflags::bitflags! {
    /// Persistent flags on a document or revision.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DocumentFlags: u8 {
        /// The revision is a deletion tombstone.
        const DELETED = 0x01;
        /// The document has unresolved conflicting revisions.
        const CONFLICTED = 0x02;
        /// The revision body references attachments.
        const HAS_ATTACHMENTS = 0x04;
        /// The current revision has been pushed to remote #1. Set by the
        /// replicator instead of rewriting the record body; repaired into
        /// the remote table the next time the document is loaded.
        const SYNCED = 0x08;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_ordering() {
        assert!(Sequence::ZERO < Sequence::new(1));
        assert_eq!(Sequence::new(7).next(), Sequence::new(8));
        assert!(Sequence::ZERO.is_zero());
        assert_eq!(Sequence::new(42).to_string(), "#42");
    }

    #[test]
    fn remote_id_display() {
        assert_eq!(RemoteId::LOCAL.to_string(), "local");
        assert_eq!(RemoteId::new(2).to_string(), "remote#2");
        assert!(RemoteId::LOCAL.is_local());
        assert!(!RemoteId::new(1).is_local());
    }

    #[test]
    fn content_option_ordering() {
        assert!(ContentOption::MetaOnly < ContentOption::CurrentRevOnly);
        assert!(ContentOption::CurrentRevOnly < ContentOption::EntireBody);
    }

    #[test]
    fn document_flags_bits() {
        let f = DocumentFlags::DELETED | DocumentFlags::CONFLICTED;
        assert!(f.contains(DocumentFlags::DELETED));
        assert!(!f.contains(DocumentFlags::SYNCED));
        assert_eq!(f.bits(), 0x03);
        assert_eq!(DocumentFlags::default(), DocumentFlags::empty());
    }
}
