//! The sequence tracker.
//!
//! Placeholders are interspersed with document entries in the ordered
//! change list. When a document changes, its entry splices to the tail;
//! any placeholders that were sitting directly before it were up to date,
//! so their observers get notified. Reading changes moves a placeholder
//! forward past what was read. Entries in front of the first placeholder
//! are invisible to every observer and get swept, either dropped outright
//! or parked on the idle list when document observers still reference them.
//!
//! An open transaction is marked by an internal placeholder appended at
//! begin time. Commit promotes the sequences recorded after it; abort
//! replays each entry at its previously committed sequence, producing
//! synthetic reversion notifications. A committing tracker hands the
//! entries after its transaction placeholder to each sibling tracker on
//! the same file via [`SequenceTracker::add_external_transaction`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use vellum_types::{DocumentFlags, Sequence};

use crate::entry::{Entry, EntryList, EntryRef, Which};
use crate::notifier::{Change, DbObserverState, DocObserverState};

/// Entries kept in the change list even when no placeholder needs them,
/// so late-registering observers can start in the recent past.
const DEFAULT_MIN_CHANGES_TO_KEEP: usize = 100;

/// Pending callbacks collected under the borrow, dispatched after it is
/// released so a callback can re-enter the tracker.
#[derive(Default)]
struct Dispatch {
    doc: Vec<(Rc<DocObserverState>, Vec<u8>, Sequence)>,
    db: Vec<Rc<DbObserverState>>,
}

impl Dispatch {
    fn is_empty(&self) -> bool {
        self.doc.is_empty() && self.db.is_empty()
    }
}

/// Orders document mutations and multiplexes change notifications for one
/// database connection. Single-threaded.
///
/// Clones are handles to the same tracker, so a callback can capture one
/// and call back in.
#[derive(Clone)]
pub struct SequenceTracker {
    inner: Rc<RefCell<TrackerInner>>,
}

impl Default for SequenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceTracker {
    /// A fresh tracker with no history.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(TrackerInner {
                list: EntryList::new(),
                by_doc_id: HashMap::new(),
                last_sequence: Sequence::ZERO,
                pre_transaction_last_sequence: Sequence::ZERO,
                transaction: None,
                num_placeholders: 0,
                num_doc_observers: 0,
                min_changes_to_keep: DEFAULT_MIN_CHANGES_TO_KEEP,
            })),
        }
    }

    pub(crate) fn shared(&self) -> Rc<RefCell<TrackerInner>> {
        self.inner.clone()
    }

    /// The sequence of the most recent change.
    pub fn last_sequence(&self) -> Sequence {
        self.inner.borrow().last_sequence
    }

    /// Whether a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.inner.borrow().in_transaction()
    }

    /// Lower the sweep threshold; tests use 0 to observe eviction.
    pub fn set_min_changes_to_keep(&self, min: usize) {
        self.inner.borrow_mut().min_changes_to_keep = min;
    }

    /// Open a transaction. Panics if one is already open.
    pub fn begin_transaction(&self) {
        self.inner.borrow_mut().begin_transaction();
    }

    /// Whether the open transaction has recorded any change.
    pub fn changed_during_transaction(&self) -> bool {
        self.inner.borrow().changed_during_transaction()
    }

    /// Record a document mutation inside the open transaction.
    ///
    /// `sequence` must exceed every previously recorded sequence. Document
    /// observers fire synchronously; database observers whose placeholders
    /// were up to date fire once (coalesced).
    pub fn document_changed(
        &self,
        doc_id: &[u8],
        rev_id: &[u8],
        sequence: Sequence,
        flags: DocumentFlags,
    ) {
        let dispatch = {
            let mut inner = self.inner.borrow_mut();
            assert!(inner.in_transaction(), "documentChanged outside a transaction");
            assert!(
                !doc_id.is_empty() && !rev_id.is_empty() && sequence > inner.last_sequence,
                "malformed change"
            );
            inner.last_sequence = sequence;
            inner.update_document(doc_id, rev_id, sequence, flags)
        };
        self.run_dispatch(dispatch);
    }

    /// Record a purge (removal without successor) inside the open
    /// transaction.
    pub fn document_purged(&self, doc_id: &[u8]) {
        let dispatch = {
            let mut inner = self.inner.borrow_mut();
            assert!(!doc_id.is_empty(), "purge needs a docID");
            assert!(inner.in_transaction(), "documentPurged outside a transaction");
            inner.update_document(doc_id, &[], Sequence::ZERO, DocumentFlags::empty())
        };
        self.run_dispatch(dispatch);
    }

    /// Close the open transaction, committing or aborting its changes.
    pub fn end_transaction(&self, commit: bool) {
        if commit {
            self.inner.borrow_mut().end_transaction_commit();
            return;
        }

        // Abort: rewind the sequence counter, then replay every entry after
        // the transaction placeholder at its previously committed sequence.
        // Each replay moves the entry and dispatches, so successors are
        // captured before every step.
        let (mut cursor, last) = {
            let mut inner = self.inner.borrow_mut();
            assert!(inner.in_transaction(), "not in a transaction");
            tracing::debug!(
                from = inner.last_sequence.get(),
                back_to = inner.pre_transaction_last_sequence.get(),
                "abort transaction"
            );
            inner.last_sequence = inner.pre_transaction_last_sequence;
            let placeholder = inner.transaction_placeholder();
            let last = inner
                .list
                .back(Which::Changes)
                .expect("transaction placeholder is linked");
            (placeholder, last)
        };
        loop {
            let (dispatch, next, done) = {
                let mut inner = self.inner.borrow_mut();
                let next = inner.list.next(cursor);
                let dispatch = if inner.list.get(cursor).is_placeholder() {
                    None
                } else {
                    let entry = inner.list.get(cursor);
                    let (doc_id, rev_id, sequence, flags) = (
                        entry.doc_id.clone(),
                        entry.rev_id.clone(),
                        entry.committed_sequence,
                        entry.flags,
                    );
                    Some(inner.update_document(&doc_id, &rev_id, sequence, flags))
                };
                (dispatch, next, cursor == last)
            };
            if let Some(dispatch) = dispatch {
                self.run_dispatch(dispatch);
            }
            if done {
                break;
            }
            cursor = next.expect("walk ends at the captured tail");
        }
        let mut inner = self.inner.borrow_mut();
        inner.discard_transaction_placeholder();
        inner.remove_obsolete_entries();
    }

    /// Ingest the entries of a peer tracker's open (committing) transaction
    /// as external changes.
    pub fn add_external_transaction(&self, other: &SequenceTracker) {
        assert!(
            !Rc::ptr_eq(&self.inner, &other.inner),
            "tracker cannot ingest its own transaction"
        );
        let should_replay = {
            let inner = self.inner.borrow();
            assert!(!inner.in_transaction(), "tracker is in a transaction");
            inner.list.len(Which::Changes) > 0 || inner.num_doc_observers > 0
        };
        let entries: Vec<(Vec<u8>, Vec<u8>, Sequence, DocumentFlags)> = {
            let other_inner = other.inner.borrow();
            assert!(
                other_inner.in_transaction(),
                "peer tracker is not committing"
            );
            if !should_replay {
                return;
            }
            let mut collected = Vec::new();
            let mut i = other_inner.list.next(other_inner.transaction_placeholder());
            while let Some(r) = i {
                let entry = other_inner.list.get(r);
                if !entry.is_placeholder() {
                    collected.push((
                        entry.doc_id.clone(),
                        entry.rev_id.clone(),
                        entry.sequence,
                        entry.flags,
                    ));
                }
                i = other_inner.list.next(r);
            }
            collected
        };
        tracing::debug!(count = entries.len(), "ingesting external transaction");
        for (doc_id, rev_id, sequence, flags) in entries {
            let dispatch = {
                let mut inner = self.inner.borrow_mut();
                if !sequence.is_zero() {
                    assert!(
                        sequence > inner.last_sequence,
                        "external sequence out of order"
                    );
                    inner.last_sequence = sequence;
                }
                inner.update_document(&doc_id, &rev_id, sequence, flags)
            };
            self.run_dispatch(dispatch);
        }
        self.inner.borrow_mut().remove_obsolete_entries();
    }

    /// The docID of the earliest change still in the list that is newer
    /// than `sequence`; `None` when the tracker has nothing newer.
    pub fn doc_id_at(&self, sequence: Sequence) -> Option<Vec<u8>> {
        let inner = self.inner.borrow();
        inner
            .since(sequence)
            .map(|r| inner.list.get(r).doc_id.clone())
    }

    /// Compact rendering of the list state, for logs and tests:
    /// placeholders are `*`, the open transaction `( ... )`, external
    /// changes suffixed `'`.
    pub fn dump(&self) -> String {
        let inner = self.inner.borrow();
        let txn_placeholder = inner
            .transaction
            .as_ref()
            .and_then(|state| state.placeholder.get());
        let mut out = String::from("[");
        let mut first = true;
        for r in inner.list.iter(Which::Changes) {
            if first {
                first = false;
            } else {
                out.push_str(", ");
            }
            let entry = inner.list.get(r);
            if entry.is_placeholder() {
                if txn_placeholder == Some(r) {
                    out.push('(');
                    first = true;
                } else {
                    out.push('*');
                }
            } else {
                out.push_str(&String::from_utf8_lossy(&entry.doc_id));
                out.push('@');
                out.push_str(&entry.sequence.get().to_string());
                if entry.external {
                    out.push('\'');
                }
            }
        }
        if inner.transaction.is_some() {
            out.push(')');
        }
        out.push(']');
        out
    }

    /// Verify internal bookkeeping consistency. Panics on violation.
    pub fn check_invariants(&self) {
        self.inner.borrow().check_invariants();
    }

    fn run_dispatch(&self, dispatch: Dispatch) {
        if dispatch.is_empty() {
            return;
        }
        for (observer, doc_id, sequence) in dispatch.doc {
            if !observer.removed.get() {
                (observer.callback)(&doc_id, sequence);
            }
        }
        let mut notified = false;
        for placeholder in dispatch.db {
            if !placeholder.removed.get() {
                if let Some(callback) = &placeholder.callback {
                    callback();
                }
                notified = true;
            }
        }
        if notified {
            self.inner.borrow_mut().remove_obsolete_entries();
        }
    }
}

pub(crate) struct TrackerInner {
    list: EntryList,
    by_doc_id: HashMap<Vec<u8>, EntryRef>,
    last_sequence: Sequence,
    pre_transaction_last_sequence: Sequence,
    /// The open transaction's marker: an owned observer state with no
    /// callback whose placeholder sits where the transaction began.
    transaction: Option<Rc<DbObserverState>>,
    num_placeholders: usize,
    num_doc_observers: usize,
    min_changes_to_keep: usize,
}

impl TrackerInner {
    fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    fn has_db_change_notifiers(&self) -> bool {
        self.num_placeholders > 0
    }

    fn transaction_placeholder(&self) -> EntryRef {
        self.transaction
            .as_ref()
            .expect("in a transaction")
            .placeholder
            .get()
            .expect("transaction placeholder is linked")
    }

    fn begin_transaction(&mut self) {
        assert!(!self.in_transaction(), "transaction already open");
        tracing::debug!(last_sequence = self.last_sequence.get(), "begin transaction");
        let state = Rc::new(DbObserverState {
            callback: None,
            placeholder: std::cell::Cell::new(None),
            removed: std::cell::Cell::new(false),
        });
        let r = self
            .list
            .push_back(Which::Changes, Entry::placeholder(Rc::downgrade(&state)));
        state.placeholder.set(Some(r));
        self.num_placeholders += 1;
        self.pre_transaction_last_sequence = self.last_sequence;
        self.transaction = Some(state);
    }

    fn changed_during_transaction(&self) -> bool {
        assert!(self.in_transaction(), "not in a transaction");
        if self.last_sequence > self.pre_transaction_last_sequence {
            return true;
        }
        let mut i = self.list.next(self.transaction_placeholder());
        while let Some(r) = i {
            if !self.list.get(r).is_placeholder() {
                return true;
            }
            i = self.list.next(r);
        }
        false
    }

    fn end_transaction_commit(&mut self) {
        assert!(self.in_transaction(), "not in a transaction");
        tracing::debug!(
            from = self.pre_transaction_last_sequence.get() + 1,
            to = self.last_sequence.get(),
            "commit transaction"
        );
        let mut housekeeping = false;
        let mut i = self.list.next(self.transaction_placeholder());
        while let Some(r) = i {
            i = self.list.next(r);
            let entry = self.list.get_mut(r);
            if !entry.is_placeholder() {
                entry.committed_sequence = entry.sequence;
                housekeeping = true;
            }
        }
        self.discard_transaction_placeholder();
        if housekeeping {
            self.remove_obsolete_entries();
        }
    }

    fn discard_transaction_placeholder(&mut self) {
        let state = self.transaction.take().expect("in a transaction");
        let r = state
            .placeholder
            .get()
            .expect("transaction placeholder is linked");
        state.removed.set(true);
        state.placeholder.set(None);
        self.list.remove(Which::Changes, r);
        self.num_placeholders -= 1;
    }

    /// The shared update path for local changes, abort replays, and
    /// external fan-in. Returns the callbacks to run once the borrow is
    /// released.
    fn update_document(
        &mut self,
        doc_id: &[u8],
        rev_id: &[u8],
        sequence: Sequence,
        flags: DocumentFlags,
    ) -> Dispatch {
        let mut list_changed = true;
        let r = match self.by_doc_id.get(doc_id).copied() {
            Some(r) => {
                // Move the existing entry to the end of the list.
                let is_idle = self.list.get(r).is_idle();
                if is_idle && !self.has_db_change_notifiers() {
                    // Nobody watches ordering; update in place.
                    list_changed = false;
                } else if is_idle {
                    self.list.move_to_back(Which::Idle, Which::Changes, r);
                    self.list.get_mut(r).idle = false;
                } else if self.list.next(r).is_some() {
                    self.list.move_to_back(Which::Changes, Which::Changes, r);
                } else {
                    list_changed = false; // already at the end
                }
                let entry = self.list.get_mut(r);
                entry.rev_id = rev_id.to_vec();
                entry.sequence = sequence;
                entry.flags = flags;
                r
            }
            None => {
                let r = self.list.push_back(
                    Which::Changes,
                    Entry::document(doc_id.to_vec(), rev_id.to_vec(), sequence, flags),
                );
                self.by_doc_id.insert(doc_id.to_vec(), r);
                r
            }
        };

        if !self.in_transaction() {
            // Outside a transaction this must be external fan-in.
            let entry = self.list.get_mut(r);
            entry.committed_sequence = sequence;
            entry.external = true;
        }

        let mut dispatch = Dispatch::default();
        for weak in &self.list.get(r).observers {
            if let Some(observer) = weak.upgrade() {
                dispatch.doc.push((observer, doc_id.to_vec(), sequence));
            }
        }

        if list_changed && self.num_placeholders > 0 {
            // Placeholders sitting directly before this change were up to
            // date; notify them. Walk backwards from the tail, skipping the
            // entry itself, capturing each predecessor before dispatch can
            // move anything.
            let tail = self.list.back(Which::Changes).expect("list is non-empty");
            let mut i = self.list.prev(tail);
            while let Some(r) = i {
                let entry = self.list.get(r);
                if !entry.is_placeholder() {
                    break;
                }
                let next = self.list.prev(r);
                if let Some(observer) = entry.db_observer.as_ref().and_then(std::rc::Weak::upgrade)
                {
                    dispatch.db.push(observer);
                }
                i = next;
            }
        }
        dispatch
    }

    /// The earliest position (scanning back from the tail) holding an entry
    /// newer than `since` or a purge; inserting a placeholder before it
    /// makes its window start right after `since`. `None` means the end of
    /// the list.
    fn since(&self, since: Sequence) -> Option<EntryRef> {
        if since >= self.last_sequence {
            return None;
        }
        let mut result = self.list.back(Which::Changes);
        let mut i = result;
        while let Some(r) = i {
            let entry = self.list.get(r);
            if entry.sequence > since || entry.is_purge() {
                result = Some(r);
            } else if !entry.is_placeholder() {
                break;
            }
            i = self.list.prev(r);
        }
        result
    }

    pub(crate) fn add_placeholder_after(
        &mut self,
        state: &Rc<DbObserverState>,
        since: Sequence,
    ) {
        self.num_placeholders += 1;
        let pos = self.since(since);
        let r = self
            .list
            .insert_before(Which::Changes, pos, Entry::placeholder(Rc::downgrade(state)));
        state.placeholder.set(Some(r));
    }

    pub(crate) fn remove_placeholder(&mut self, state: &DbObserverState) {
        let Some(r) = state.placeholder.get() else {
            return;
        };
        state.placeholder.set(None);
        self.list.remove(Which::Changes, r);
        self.num_placeholders -= 1;
        self.remove_obsolete_entries();
    }

    pub(crate) fn has_changes_after(&self, state: &DbObserverState) -> bool {
        let Some(placeholder) = state.placeholder.get() else {
            return false;
        };
        let mut i = self.list.next(placeholder);
        while let Some(r) = i {
            if !self.list.get(r).is_placeholder() {
                return true;
            }
            i = self.list.next(r);
        }
        false
    }

    pub(crate) fn read_changes(
        &mut self,
        state: &DbObserverState,
        max: usize,
    ) -> (Vec<Change>, bool) {
        let placeholder = state.placeholder.get().expect("placeholder is linked");
        let mut external = false;
        let mut changes = Vec::new();
        let mut i = self.list.next(placeholder);
        while let Some(r) = i {
            if changes.len() >= max {
                break;
            }
            let entry = self.list.get(r);
            if !entry.is_placeholder() {
                // Collect only changes sharing one `external` value.
                if changes.is_empty() {
                    external = entry.external;
                } else if entry.external != external {
                    break;
                }
                changes.push(Change {
                    doc_id: entry.doc_id.clone(),
                    rev_id: entry.rev_id.clone(),
                    sequence: entry.sequence,
                    flags: entry.flags,
                });
            }
            i = self.list.next(r);
        }
        if !changes.is_empty() {
            // Advance the read position to just before where we stopped.
            self.list.move_before(Which::Changes, placeholder, i);
            self.remove_obsolete_entries();
        }
        (changes, external)
    }

    /// Sweep unreachable entries off the front of the change list. No-op
    /// inside a transaction.
    fn remove_obsolete_entries(&mut self) {
        if self.in_transaction() {
            return;
        }
        let mut removed = 0usize;
        while self.list.len(Which::Changes) > self.min_changes_to_keep + self.num_placeholders {
            let front = self.list.front(Which::Changes).expect("list is non-empty");
            if self.list.get(front).is_placeholder() {
                break;
            }
            let has_observers = {
                let entry = self.list.get_mut(front);
                entry.observers.retain(|w| w.upgrade().is_some());
                !entry.observers.is_empty()
            };
            if has_observers {
                // Keep it alive for its document observers.
                self.list.move_to_back(Which::Changes, Which::Idle, front);
                self.list.get_mut(front).idle = true;
            } else {
                let entry = self.list.remove(Which::Changes, front);
                self.by_doc_id.remove(&entry.doc_id);
            }
            removed += 1;
        }
        if removed > 0 {
            tracing::trace!(
                removed,
                remaining = self.list.len(Which::Changes),
                idle = self.list.len(Which::Idle),
                indexed = self.by_doc_id.len(),
                "swept obsolete entries"
            );
        }
    }

    pub(crate) fn add_doc_change_notifier(
        &mut self,
        doc_id: &[u8],
        state: &Rc<DocObserverState>,
    ) {
        assert!(!doc_id.is_empty(), "doc change notifier needs a docID");
        let r = match self.by_doc_id.get(doc_id).copied() {
            Some(r) => r,
            None => {
                // Unknown document: park an entry on the idle list.
                let mut entry = Entry::document(
                    doc_id.to_vec(),
                    Vec::new(),
                    Sequence::ZERO,
                    DocumentFlags::empty(),
                );
                entry.idle = true;
                let r = self.list.push_back(Which::Idle, entry);
                self.by_doc_id.insert(doc_id.to_vec(), r);
                r
            }
        };
        self.list.get_mut(r).observers.push(Rc::downgrade(state));
        self.num_doc_observers += 1;
        state.entry.set(Some(r));
    }

    pub(crate) fn remove_doc_change_notifier(&mut self, state: &DocObserverState) {
        let Some(r) = state.entry.get() else {
            return;
        };
        state.entry.set(None);
        let mut found = false;
        {
            let entry = self.list.get_mut(r);
            entry.observers.retain(|weak| match weak.upgrade() {
                Some(observer) => {
                    if std::ptr::eq(Rc::as_ptr(&observer), state) {
                        found = true;
                        false
                    } else {
                        true
                    }
                }
                None => false,
            });
        }
        assert!(found, "unknown doc change notifier");
        self.num_doc_observers -= 1;
        let entry = self.list.get(r);
        if entry.observers.is_empty() && entry.is_idle() {
            let entry = self.list.remove(Which::Idle, r);
            self.by_doc_id.remove(&entry.doc_id);
        }
    }

    pub(crate) fn entry_doc_id(&self, state: &DocObserverState) -> Vec<u8> {
        state
            .entry
            .get()
            .map(|r| self.list.get(r).doc_id.clone())
            .unwrap_or_default()
    }

    pub(crate) fn entry_sequence(&self, state: &DocObserverState) -> Sequence {
        state
            .entry
            .get()
            .map_or(Sequence::ZERO, |r| self.list.get(r).sequence)
    }

    fn check_invariants(&self) {
        let mut placeholders = 0usize;
        let mut documents = 0usize;
        let mut seen = std::collections::HashSet::new();
        for r in self.list.iter(Which::Changes) {
            let entry = self.list.get(r);
            if entry.is_placeholder() {
                placeholders += 1;
                continue;
            }
            documents += 1;
            assert!(!entry.idle, "entry on the change list marked idle");
            assert!(
                entry.sequence <= self.last_sequence,
                "entry sequence beyond lastSequence"
            );
            assert!(seen.insert(entry.doc_id.clone()), "duplicate docID");
            assert_eq!(
                self.by_doc_id.get(&entry.doc_id).copied(),
                Some(r),
                "docID index points elsewhere"
            );
        }
        let mut idle = 0usize;
        for r in self.list.iter(Which::Idle) {
            let entry = self.list.get(r);
            idle += 1;
            assert!(entry.is_idle(), "entry on the idle list not marked idle");
            assert!(seen.insert(entry.doc_id.clone()), "duplicate docID");
            assert_eq!(
                self.by_doc_id.get(&entry.doc_id).copied(),
                Some(r),
                "docID index points elsewhere"
            );
        }
        assert_eq!(placeholders, self.num_placeholders, "placeholder count");
        assert_eq!(
            self.by_doc_id.len(),
            documents + idle,
            "docID index size mismatch"
        );
    }
}
