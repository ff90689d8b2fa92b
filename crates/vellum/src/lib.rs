//! Embedded document-database core.
//!
//! The two central pieces:
//!
//! * [`VersionedDocument`] — the in-memory representation of one document:
//!   its current revision, an indexed table of remote revisions, version
//!   vectors, and a save protocol with deterministic revision IDs.
//! * [`SequenceTracker`] — the per-connection change-notification engine:
//!   it orders mutations by sequence, coalesces database-level
//!   notifications, honors transaction boundaries, and fans committed
//!   changes in from sibling connections on the same file.
//!
//! The on-disk key-value store stays external; it is consumed through the
//! [`RecordStore`] trait.
//!
//! ```
//! use vellum::{
//!     ContentOption, DatabaseChangeNotifier, MemRecordStore, MemTransaction, Sequence,
//!     SequenceTracker, Value, VersionedDocument,
//! };
//!
//! let store = MemRecordStore::new();
//! let tracker = SequenceTracker::new();
//! let notifier = DatabaseChangeNotifier::new(&tracker, Sequence::ZERO, None);
//!
//! let mut doc = VersionedDocument::load(&store, b"greeting", ContentOption::EntireBody)?;
//! doc.mutable_properties()?.set("text", Value::string("hello"));
//!
//! tracker.begin_transaction();
//! let mut txn = MemTransaction;
//! doc.save(&mut txn)?;
//! tracker.document_changed(doc.doc_id(), doc.rev_id().as_bytes(), doc.sequence(), doc.doc_flags());
//! tracker.end_transaction(true);
//!
//! let batch = notifier.read_changes(10);
//! assert_eq!(batch.changes.len(), 1);
//! assert_eq!(batch.changes[0].doc_id, b"greeting");
//! # Ok::<(), vellum::VellumError>(())
//! ```

pub use vellum_doc::{
    for_all_rev_ids, generate_rev_id, DocumentLink, Revision, SaveResult, VersionedDocument,
};
pub use vellum_error::{ErrorCode, Result, VellumError};
pub use vellum_notify::{
    Change, ChangeBatch, DatabaseChangeCallback, DatabaseChangeNotifier, DocChangeCallback,
    DocChangeNotifier, SequenceTracker,
};
pub use vellum_types::{
    ContentOption, DocumentFlags, MemRecordStore, MemTransaction, Record, RecordLite, RecordStore,
    RemoteId, Sequence, StoreTransaction,
};
pub use vellum_value::{
    Array, DeepIterator, Dict, MutableArray, MutableDict, Scope, Value,
};
pub use vellum_vers::{Generation, PeerId, RevId, Version, VersionOrder, VersionVector};
