//! Versioned in-memory documents.
//!
//! A [`VersionedDocument`] is the mutable in-memory view of one stored
//! record: the current (local) revision plus an indexed table of revisions
//! known to remote peers. It supports progressive loading, copy-on-write
//! mutation, and a save protocol that generates deterministic revision IDs
//! and re-encodes the record with shared-subtree de-duplication.

pub mod document;
pub mod revision;

pub use document::{
    for_all_rev_ids, generate_rev_id, DocumentLink, SaveResult, VersionedDocument,
};
pub use revision::Revision;
