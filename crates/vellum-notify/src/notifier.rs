//! Observer handles.
//!
//! Both handle types register themselves with a tracker on construction and
//! deregister on drop, so their observation window is exactly their
//! lifetime. Callbacks run synchronously inside the mutation that triggered
//! them and are allowed to call back into the tracker (register or drop
//! other notifiers, read changes).

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use vellum_types::{DocumentFlags, Sequence};

use crate::entry::EntryRef;
use crate::tracker::{SequenceTracker, TrackerInner};

/// One change reported by [`DatabaseChangeNotifier::read_changes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    /// The changed document.
    pub doc_id: Vec<u8>,
    /// Its new revision ID; empty for a purge.
    pub rev_id: Vec<u8>,
    /// Its new sequence; zero for a purge.
    pub sequence: Sequence,
    /// Its flags.
    pub flags: DocumentFlags,
}

/// A batch of changes sharing one `external` flag.
#[derive(Debug, Default)]
pub struct ChangeBatch {
    /// The changes, oldest first.
    pub changes: Vec<Change>,
    /// Whether these changes were fanned in from another connection.
    pub external: bool,
}

/// Callback invoked when an observed document changes.
pub type DocChangeCallback = Box<dyn Fn(&[u8], Sequence)>;

/// Callback invoked when the database has changes to read.
pub type DatabaseChangeCallback = Box<dyn Fn()>;

pub(crate) struct DocObserverState {
    pub(crate) callback: DocChangeCallback,
    pub(crate) entry: Cell<Option<EntryRef>>,
    pub(crate) removed: Cell<bool>,
}

pub(crate) struct DbObserverState {
    pub(crate) callback: Option<DatabaseChangeCallback>,
    pub(crate) placeholder: Cell<Option<EntryRef>>,
    pub(crate) removed: Cell<bool>,
}

/// Observes changes to a single document.
///
/// The callback receives `(doc_id, sequence)` for every mutation of the
/// document, including intermediate mutations inside a transaction and the
/// synthetic reversion on abort.
pub struct DocChangeNotifier {
    inner: Rc<RefCell<TrackerInner>>,
    state: Rc<DocObserverState>,
}

impl DocChangeNotifier {
    /// Register an observer for `doc_id` on `tracker`.
    pub fn new(
        tracker: &SequenceTracker,
        doc_id: &[u8],
        callback: impl Fn(&[u8], Sequence) + 'static,
    ) -> Self {
        let state = Rc::new(DocObserverState {
            callback: Box::new(callback),
            entry: Cell::new(None),
            removed: Cell::new(false),
        });
        let inner = tracker.shared();
        inner.borrow_mut().add_doc_change_notifier(doc_id, &state);
        tracing::trace!(
            doc_id = %String::from_utf8_lossy(doc_id),
            "added doc change notifier"
        );
        Self { inner, state }
    }

    /// The observed document's ID.
    pub fn doc_id(&self) -> Vec<u8> {
        let inner = self.inner.borrow();
        inner.entry_doc_id(&self.state)
    }

    /// The observed document's latest known sequence.
    pub fn sequence(&self) -> Sequence {
        let inner = self.inner.borrow();
        inner.entry_sequence(&self.state)
    }
}

impl Drop for DocChangeNotifier {
    fn drop(&mut self) {
        self.state.removed.set(true);
        self.inner
            .borrow_mut()
            .remove_doc_change_notifier(&self.state);
    }
}

/// Observes all changes on a tracker from a starting sequence.
///
/// The callback coalesces: it fires once when the first change lands after
/// the notifier's read position, and not again until the position advances
/// via [`DatabaseChangeNotifier::read_changes`].
pub struct DatabaseChangeNotifier {
    inner: Rc<RefCell<TrackerInner>>,
    state: Rc<DbObserverState>,
}

impl DatabaseChangeNotifier {
    /// Register an observer whose read position starts after `after`.
    pub fn new(
        tracker: &SequenceTracker,
        after: Sequence,
        callback: Option<DatabaseChangeCallback>,
    ) -> Self {
        let state = Rc::new(DbObserverState {
            callback,
            placeholder: Cell::new(None),
            removed: Cell::new(false),
        });
        let inner = tracker.shared();
        inner.borrow_mut().add_placeholder_after(&state, after);
        tracing::debug!(after = after.get(), "created database change notifier");
        Self { inner, state }
    }

    /// Collect up to `max` changes past the read position and advance it.
    ///
    /// All returned changes share one `external` flag; a flag flip ends the
    /// batch early, and an immediate second call picks up the rest.
    pub fn read_changes(&self, max: usize) -> ChangeBatch {
        let (changes, external) = self.inner.borrow_mut().read_changes(&self.state, max);
        tracing::debug!(
            requested = max,
            returned = changes.len(),
            external,
            "read changes"
        );
        ChangeBatch { changes, external }
    }

    /// Whether any changes follow the read position.
    pub fn has_changes(&self) -> bool {
        self.inner.borrow().has_changes_after(&self.state)
    }
}

impl Drop for DatabaseChangeNotifier {
    fn drop(&mut self) {
        self.state.removed.set(true);
        self.inner.borrow_mut().remove_placeholder(&self.state);
    }
}
