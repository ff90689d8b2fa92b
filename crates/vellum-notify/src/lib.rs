//! Change tracking and notification.
//!
//! A [`SequenceTracker`] keeps an ordered list of document changes for one
//! database connection and multiplexes them to per-document and
//! database-level observers. Observers hold their read position as a
//! *placeholder* entry in the same list, which makes database
//! notifications naturally coalescing: an observer is woken once when it
//! falls behind and not again until it reads.

mod entry;
pub mod notifier;
pub mod tracker;

pub use notifier::{
    Change, ChangeBatch, DatabaseChangeCallback, DatabaseChangeNotifier, DocChangeCallback,
    DocChangeNotifier,
};
pub use tracker::SequenceTracker;
