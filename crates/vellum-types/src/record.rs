//! The record-store seam.
//!
//! The engine core never touches disk itself; it reads [`Record`]s from and
//! writes [`RecordLite`]s to an implementation of [`RecordStore`]. The store
//! owns sequence allocation and conflict detection; transactions are opaque
//! tokens threaded through unchanged.

use std::any::Any;

use vellum_error::Result;

use crate::{ContentOption, DocumentFlags, Sequence};

/// A record read from the store.
///
/// `body` holds the encoded current-revision properties, `extra` the encoded
/// remote-revision table. Either may be absent, both because the document
/// has none and because the requested [`ContentOption`] did not load them.
#[derive(Debug, Clone)]
pub struct Record {
    /// Document ID.
    pub key: Vec<u8>,
    /// Revision ID bytes (tree or version-vector form).
    pub version: Vec<u8>,
    /// Sequence of the last save; zero if never saved.
    pub sequence: Sequence,
    /// Document-level flags.
    pub flags: DocumentFlags,
    /// Encoded current-revision properties.
    pub body: Option<Vec<u8>>,
    /// Encoded remote-revision table.
    pub extra: Option<Vec<u8>>,
    /// Whether the record exists in the store at all.
    pub exists: bool,
    /// How much content was loaded.
    pub content: ContentOption,
}

impl Record {
    /// A record for a document that does not exist yet.
    pub fn not_found(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            version: Vec::new(),
            sequence: Sequence::ZERO,
            flags: DocumentFlags::empty(),
            body: None,
            extra: None,
            exists: false,
            content: ContentOption::EntireBody,
        }
    }
}

/// The fields of a record write.
///
/// Borrowed view; the store copies what it needs.
#[derive(Debug, Clone, Copy)]
pub struct RecordLite<'a> {
    /// Document ID.
    pub key: &'a [u8],
    /// Revision ID bytes.
    pub version: &'a [u8],
    /// Encoded current-revision properties; empty means none.
    pub body: &'a [u8],
    /// Encoded remote-revision table; empty means none.
    pub extra: &'a [u8],
    /// The sequence the caller last observed for this document.
    pub sequence: Sequence,
    /// Whether the store must allocate a fresh sequence for this write.
    pub update_sequence: bool,
    /// Document-level flags.
    pub flags: DocumentFlags,
}

/// Opaque transaction token passed through [`RecordStore::set`].
///
/// The engine never inspects it; a store downcasts to its own type.
pub trait StoreTransaction: Any {
    /// Upcast for store-side downcasting.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> StoreTransaction for T {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// The key-value store contract the document layer consumes.
///
/// Implementations use interior mutability; the engine holds the store by
/// shared reference for the lifetime of a document.
pub trait RecordStore {
    /// Fetch a record by document ID, loading at least `content`.
    ///
    /// A missing document is not an error; the result has `exists == false`.
    fn get(&self, doc_id: &[u8], content: ContentOption) -> Result<Record>;

    /// Fetch a record by its sequence number, loading at least `content`.
    ///
    /// Returns `exists == false` if no record currently has that sequence
    /// (the document has since been re-saved or purged).
    fn get_by_sequence(&self, sequence: Sequence, content: ContentOption) -> Result<Record>;

    /// Write a record.
    ///
    /// When `rec.update_sequence` is set the store must verify that the
    /// stored sequence still equals `rec.sequence` and allocate a fresh one;
    /// `None` signals that check failed (a conflict). When it is not set the
    /// record is updated in place keeping its sequence.
    fn set(&self, rec: &RecordLite<'_>, txn: &mut dyn StoreTransaction) -> Result<Option<Sequence>>;
}
