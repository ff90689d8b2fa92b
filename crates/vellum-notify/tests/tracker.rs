//! Tracker behavior: coalescing, transactions, external fan-in, sweeping.

use std::cell::RefCell;
use std::rc::Rc;

use vellum_notify::{DatabaseChangeNotifier, DocChangeNotifier, SequenceTracker};
use vellum_types::{DocumentFlags, Sequence};

fn seq(n: u64) -> Sequence {
    Sequence::new(n)
}

fn change(tracker: &SequenceTracker, doc: &[u8], rev: &[u8], n: u64) {
    tracker.document_changed(doc, rev, seq(n), DocumentFlags::empty());
}

/// Counter handle shared with a notifier callback.
fn counter() -> (Rc<RefCell<usize>>, impl Fn() + 'static) {
    let count = Rc::new(RefCell::new(0));
    let cb_count = count.clone();
    (count, move || *cb_count.borrow_mut() += 1)
}

#[test]
fn database_notification_coalesces() {
    let tracker = SequenceTracker::new();
    tracker.begin_transaction();
    let (count, cb) = counter();
    let notifier = DatabaseChangeNotifier::new(&tracker, seq(0), Some(Box::new(cb)));

    change(&tracker, b"A", b"1-aa", 1);
    assert_eq!(*count.borrow(), 1, "first change fires");
    change(&tracker, b"B", b"1-bb", 2);
    assert_eq!(*count.borrow(), 1, "second change is coalesced");
    tracker.end_transaction(true);
    assert_eq!(*count.borrow(), 1);

    let batch = notifier.read_changes(10);
    assert!(!batch.external);
    assert_eq!(batch.changes.len(), 2);
    assert_eq!(batch.changes[0].doc_id, b"A");
    assert_eq!(batch.changes[0].sequence, seq(1));
    assert_eq!(batch.changes[1].doc_id, b"B");
    assert_eq!(batch.changes[1].sequence, seq(2));
    tracker.check_invariants();

    // Having read, the notifier is armed again.
    tracker.begin_transaction();
    change(&tracker, b"C", b"1-cc", 3);
    tracker.end_transaction(true);
    assert_eq!(*count.borrow(), 2);
}

#[test]
fn repeated_change_keeps_only_latest_entry() {
    let tracker = SequenceTracker::new();
    tracker.begin_transaction();
    let notifier = DatabaseChangeNotifier::new(&tracker, seq(0), None);
    change(&tracker, b"A", b"1-aa", 1);
    change(&tracker, b"B", b"1-bb", 2);
    change(&tracker, b"A", b"2-aa", 3);
    tracker.end_transaction(true);

    let batch = notifier.read_changes(10);
    let ids: Vec<&[u8]> = batch.changes.iter().map(|c| c.doc_id.as_slice()).collect();
    assert_eq!(ids, vec![&b"B"[..], &b"A"[..]]);
    assert_eq!(batch.changes[1].rev_id, b"2-aa");
    assert_eq!(batch.changes[1].sequence, seq(3));
    assert_eq!(tracker.last_sequence(), seq(3));
    tracker.check_invariants();
}

#[test]
fn placeholder_starts_mid_history() {
    let tracker = SequenceTracker::new();
    tracker.begin_transaction();
    change(&tracker, b"A", b"1-aa", 1);
    change(&tracker, b"B", b"1-bb", 2);
    change(&tracker, b"C", b"1-cc", 3);
    tracker.end_transaction(true);

    let notifier = DatabaseChangeNotifier::new(&tracker, seq(1), None);
    assert!(notifier.has_changes());
    let batch = notifier.read_changes(10);
    let ids: Vec<&[u8]> = batch.changes.iter().map(|c| c.doc_id.as_slice()).collect();
    assert_eq!(ids, vec![&b"B"[..], &b"C"[..]]);
    assert!(!notifier.has_changes());

    // Fully caught-up observer sees nothing.
    let caught_up = DatabaseChangeNotifier::new(&tracker, seq(3), None);
    assert!(!caught_up.has_changes());
    assert_eq!(caught_up.read_changes(10).changes.len(), 0);
}

#[test]
fn read_changes_respects_max() {
    let tracker = SequenceTracker::new();
    tracker.begin_transaction();
    let notifier = DatabaseChangeNotifier::new(&tracker, seq(0), None);
    for n in 1..=5u64 {
        change(&tracker, format!("D{n}").as_bytes(), b"1-aa", n);
    }
    tracker.end_transaction(true);

    let first = notifier.read_changes(2);
    assert_eq!(first.changes.len(), 2);
    assert_eq!(first.changes[0].doc_id, b"D1");
    let rest = notifier.read_changes(10);
    assert_eq!(rest.changes.len(), 3);
    assert_eq!(rest.changes[0].doc_id, b"D3");
    tracker.check_invariants();
}

#[test]
fn external_transaction_fans_in() {
    let t1 = SequenceTracker::new();
    let t2 = SequenceTracker::new();
    let notifier = DatabaseChangeNotifier::new(&t2, seq(0), None);

    t1.begin_transaction();
    change(&t1, b"X", b"1-aa", 5);
    // Mid-commit: the database fans the transaction out to the sibling.
    t2.add_external_transaction(&t1);
    t1.end_transaction(true);

    assert_eq!(t2.last_sequence(), seq(5));
    let batch = notifier.read_changes(10);
    assert!(batch.external);
    assert_eq!(batch.changes.len(), 1);
    assert_eq!(batch.changes[0].doc_id, b"X");
    assert_eq!(batch.changes[0].sequence, seq(5));
    t1.check_invariants();
    t2.check_invariants();
}

#[test]
fn read_changes_splits_batches_on_external_flip() {
    let t1 = SequenceTracker::new();
    let t2 = SequenceTracker::new();
    let notifier = DatabaseChangeNotifier::new(&t2, seq(0), None);

    // A local committed change on t2...
    t2.begin_transaction();
    change(&t2, b"L", b"1-aa", 1);
    t2.end_transaction(true);

    // ...then an external one fanned in from t1.
    t1.begin_transaction();
    t1.document_changed(b"X", b"1-bb", seq(2), DocumentFlags::empty());
    t2.add_external_transaction(&t1);
    t1.end_transaction(true);

    let local = notifier.read_changes(10);
    assert!(!local.external);
    assert_eq!(local.changes.len(), 1);
    assert_eq!(local.changes[0].doc_id, b"L");

    // The held-back external entry arrives on the immediate next read.
    let external = notifier.read_changes(10);
    assert!(external.external);
    assert_eq!(external.changes.len(), 1);
    assert_eq!(external.changes[0].doc_id, b"X");
    t2.check_invariants();
}

#[test]
fn abort_reverts_sequences_and_notifies_reversion() {
    let tracker = SequenceTracker::new();
    let log = Rc::new(RefCell::new(Vec::new()));
    let cb_log = log.clone();
    let _observer = DocChangeNotifier::new(&tracker, b"A", move |_, sequence| {
        cb_log.borrow_mut().push(sequence.get());
    });

    tracker.begin_transaction();
    change(&tracker, b"A", b"1-aa", 1);
    change(&tracker, b"A", b"2-aa", 2);
    tracker.end_transaction(false);

    assert_eq!(tracker.last_sequence(), seq(0));
    assert_eq!(*log.borrow(), vec![1, 2, 0]);
    tracker.check_invariants();
}

#[test]
fn abort_restores_committed_sequence_of_prior_changes() {
    let tracker = SequenceTracker::new();
    tracker.begin_transaction();
    change(&tracker, b"A", b"1-aa", 1);
    tracker.end_transaction(true);

    let log = Rc::new(RefCell::new(Vec::new()));
    let cb_log = log.clone();
    let _observer = DocChangeNotifier::new(&tracker, b"A", move |_, sequence| {
        cb_log.borrow_mut().push(sequence.get());
    });

    tracker.begin_transaction();
    change(&tracker, b"A", b"2-aa", 2);
    tracker.end_transaction(false);

    // The reversion reports the previously committed sequence.
    assert_eq!(*log.borrow(), vec![2, 1]);
    assert_eq!(tracker.last_sequence(), seq(1));
    tracker.check_invariants();
}

#[test]
fn purge_reports_sequence_zero() {
    let tracker = SequenceTracker::new();
    tracker.begin_transaction();
    change(&tracker, b"A", b"1-aa", 1);
    tracker.end_transaction(true);

    let notifier = DatabaseChangeNotifier::new(&tracker, seq(1), None);
    tracker.begin_transaction();
    tracker.document_purged(b"A");
    tracker.end_transaction(true);

    let batch = notifier.read_changes(10);
    assert_eq!(batch.changes.len(), 1);
    assert_eq!(batch.changes[0].doc_id, b"A");
    assert_eq!(batch.changes[0].sequence, seq(0));
    assert!(batch.changes[0].rev_id.is_empty());
    assert_eq!(tracker.last_sequence(), seq(1), "purge advances nothing");
}

#[test]
fn doc_notifier_tracks_and_detaches() {
    let tracker = SequenceTracker::new();
    let (count, _) = counter();
    let cb_count = count.clone();
    let observer = DocChangeNotifier::new(&tracker, b"A", move |doc_id, _| {
        assert_eq!(doc_id, b"A");
        *cb_count.borrow_mut() += 1;
    });
    assert_eq!(observer.doc_id(), b"A");
    assert_eq!(observer.sequence(), seq(0));

    tracker.begin_transaction();
    change(&tracker, b"A", b"1-aa", 1);
    change(&tracker, b"B", b"1-bb", 2);
    tracker.end_transaction(true);
    assert_eq!(*count.borrow(), 1);
    assert_eq!(observer.sequence(), seq(1));

    drop(observer);
    tracker.begin_transaction();
    change(&tracker, b"A", b"2-aa", 3);
    tracker.end_transaction(true);
    assert_eq!(*count.borrow(), 1, "dropped observer stays silent");
    tracker.check_invariants();
}

#[test]
fn sweep_parks_observed_entries_on_the_idle_list() {
    let tracker = SequenceTracker::new();
    tracker.set_min_changes_to_keep(0);
    let (count, _) = counter();
    let cb_count = count.clone();
    let observer = DocChangeNotifier::new(&tracker, b"A", move |_, _| {
        *cb_count.borrow_mut() += 1;
    });

    tracker.begin_transaction();
    change(&tracker, b"A", b"1-aa", 1);
    change(&tracker, b"B", b"1-bb", 2);
    tracker.end_transaction(true);
    // With the threshold at zero and no placeholders, the commit sweep
    // evicted B and parked A (which has an observer) on the idle list.
    tracker.check_invariants();
    assert_eq!(observer.sequence(), seq(1));

    // The idle entry still feeds its observer on the next change.
    tracker.begin_transaction();
    change(&tracker, b"A", b"2-aa", 3);
    tracker.end_transaction(true);
    assert_eq!(*count.borrow(), 2);
    assert_eq!(observer.sequence(), seq(3));
    tracker.check_invariants();
}

#[test]
fn external_change_updates_idle_entry_in_place() {
    let t1 = SequenceTracker::new();
    let t2 = SequenceTracker::new();
    t2.set_min_changes_to_keep(0);

    let log = Rc::new(RefCell::new(Vec::new()));
    let cb_log = log.clone();
    let observer = DocChangeNotifier::new(&t2, b"X", move |_, sequence| {
        cb_log.borrow_mut().push(sequence.get());
    });

    // No placeholders on t2, so the fan-in takes the in-place idle path.
    t1.begin_transaction();
    change(&t1, b"X", b"1-aa", 7);
    t2.add_external_transaction(&t1);
    t1.end_transaction(true);

    assert_eq!(*log.borrow(), vec![7]);
    assert_eq!(observer.sequence(), seq(7));
    assert_eq!(t2.last_sequence(), seq(7));
    t2.check_invariants();
}

#[test]
fn quiescent_unobserved_tracker_ignores_external_transactions() {
    let t1 = SequenceTracker::new();
    let t2 = SequenceTracker::new();

    t1.begin_transaction();
    change(&t1, b"X", b"1-aa", 1);
    t2.add_external_transaction(&t1);
    t1.end_transaction(true);

    // Nothing was watching and nothing was buffered, so t2 ignored it.
    assert_eq!(t2.last_sequence(), seq(0));
    t2.check_invariants();
}

#[test]
fn changed_during_transaction_reports() {
    let tracker = SequenceTracker::new();
    tracker.begin_transaction();
    assert!(!tracker.changed_during_transaction());
    change(&tracker, b"A", b"1-aa", 1);
    assert!(tracker.changed_during_transaction());
    tracker.end_transaction(true);
}

#[test]
fn doc_id_at_finds_first_change_after() {
    let tracker = SequenceTracker::new();
    tracker.begin_transaction();
    change(&tracker, b"A", b"1-aa", 1);
    change(&tracker, b"B", b"1-bb", 2);
    change(&tracker, b"C", b"1-cc", 3);
    tracker.end_transaction(true);

    assert_eq!(tracker.doc_id_at(seq(2)), Some(b"C".to_vec()));
    assert_eq!(tracker.doc_id_at(seq(3)), None, "at lastSequence means end");
}

#[test]
fn callback_may_read_changes_reentrantly() {
    let tracker = SequenceTracker::new();
    tracker.begin_transaction();

    let seen = Rc::new(RefCell::new(Vec::new()));
    // Filled in after construction so the callback can reach its own
    // notifier; Weak breaks the cycle.
    let slot: Rc<RefCell<Option<std::rc::Weak<DatabaseChangeNotifier>>>> =
        Rc::new(RefCell::new(None));
    let cb_seen = seen.clone();
    let cb_slot = slot.clone();
    let handle = Rc::new(DatabaseChangeNotifier::new(
        &tracker,
        seq(0),
        Some(Box::new(move || {
            let notifier = cb_slot.borrow().as_ref().and_then(std::rc::Weak::upgrade);
            if let Some(notifier) = notifier {
                let batch = notifier.read_changes(10);
                cb_seen
                    .borrow_mut()
                    .extend(batch.changes.iter().map(|c| c.doc_id.clone()));
            }
        })),
    ));
    *slot.borrow_mut() = Some(Rc::downgrade(&handle));

    change(&tracker, b"A", b"1-aa", 1);
    change(&tracker, b"B", b"1-bb", 2);
    tracker.end_transaction(true);

    // The callback drained A from inside the first notification, which
    // advanced the placeholder, so B's arrival fired (and drained) again.
    assert_eq!(*seen.borrow(), vec![b"A".to_vec(), b"B".to_vec()]);
    drop(handle);
    tracker.check_invariants();
}

#[test]
fn callback_may_register_other_notifiers() {
    let tracker = SequenceTracker::new();
    tracker.begin_transaction();

    let registered: Rc<RefCell<Vec<DocChangeNotifier>>> = Rc::new(RefCell::new(Vec::new()));
    let cb_tracker = tracker.clone();
    let cb_registered = registered.clone();
    let _db = DatabaseChangeNotifier::new(
        &tracker,
        seq(0),
        Some(Box::new(move || {
            let observer = DocChangeNotifier::new(&cb_tracker, b"other", |_, _| {});
            cb_registered.borrow_mut().push(observer);
        })),
    );

    change(&tracker, b"A", b"1-aa", 1);
    tracker.end_transaction(true);
    assert_eq!(registered.borrow().len(), 1);
    tracker.check_invariants();
    registered.borrow_mut().clear();
    tracker.check_invariants();
}
