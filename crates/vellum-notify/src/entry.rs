//! Entry storage: a slot arena with two intrusive doubly-linked lists.
//!
//! Entries need stable identities while being spliced between the ordered
//! change list and the idle list, so they live in arena slots addressed by
//! [`EntryRef`] handles; links are part of the slot. Freed slots are
//! recycled through a free list.

use std::rc::Weak;

use smallvec::SmallVec;
use vellum_types::{DocumentFlags, Sequence};

use crate::notifier::{DbObserverState, DocObserverState};

/// Handle to an arena slot. Stable for the lifetime of the entry in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EntryRef(u32);

/// Which list an entry is linked into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Which {
    Changes,
    Idle,
}

impl Which {
    #[inline]
    const fn index(self) -> usize {
        match self {
            Self::Changes => 0,
            Self::Idle => 1,
        }
    }
}

/// One tracked document change, or a placeholder marking an observer's read
/// position (`doc_id` empty).
pub(crate) struct Entry {
    pub doc_id: Vec<u8>,
    pub sequence: Sequence,

    // Document entry fields:
    pub committed_sequence: Sequence,
    pub rev_id: Vec<u8>,
    pub flags: DocumentFlags,
    pub idle: bool,
    pub external: bool,
    pub observers: SmallVec<[Weak<DocObserverState>; 2]>,

    // Placeholder field:
    pub db_observer: Option<Weak<DbObserverState>>,
}

impl Entry {
    pub fn document(
        doc_id: Vec<u8>,
        rev_id: Vec<u8>,
        sequence: Sequence,
        flags: DocumentFlags,
    ) -> Self {
        assert!(!doc_id.is_empty(), "document entry needs a docID");
        Self {
            doc_id,
            sequence,
            committed_sequence: Sequence::ZERO,
            rev_id,
            flags,
            idle: false,
            external: false,
            observers: SmallVec::new(),
            db_observer: None,
        }
    }

    pub fn placeholder(observer: Weak<DbObserverState>) -> Self {
        Self {
            doc_id: Vec::new(),
            sequence: Sequence::ZERO,
            committed_sequence: Sequence::ZERO,
            rev_id: Vec::new(),
            flags: DocumentFlags::empty(),
            idle: false,
            external: false,
            observers: SmallVec::new(),
            db_observer: Some(observer),
        }
    }

    #[inline]
    pub fn is_placeholder(&self) -> bool {
        self.doc_id.is_empty()
    }

    /// A document removed without a successor revision.
    #[inline]
    pub fn is_purge(&self) -> bool {
        self.sequence.is_zero() && !self.is_placeholder()
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        self.idle && !self.is_placeholder()
    }
}

struct Node {
    entry: Entry,
    prev: Option<EntryRef>,
    next: Option<EntryRef>,
}

#[derive(Default)]
struct ListHead {
    head: Option<EntryRef>,
    tail: Option<EntryRef>,
    len: usize,
}

/// The arena plus both lists.
#[derive(Default)]
pub(crate) struct EntryList {
    slots: Vec<Option<Node>>,
    free: Vec<u32>,
    lists: [ListHead; 2],
}

impl EntryList {
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&self, r: EntryRef) -> &Node {
        self.slots[r.0 as usize].as_ref().expect("stale entry ref")
    }

    fn node_mut(&mut self, r: EntryRef) -> &mut Node {
        self.slots[r.0 as usize].as_mut().expect("stale entry ref")
    }

    pub fn get(&self, r: EntryRef) -> &Entry {
        &self.node(r).entry
    }

    pub fn get_mut(&mut self, r: EntryRef) -> &mut Entry {
        &mut self.node_mut(r).entry
    }

    pub fn next(&self, r: EntryRef) -> Option<EntryRef> {
        self.node(r).next
    }

    pub fn prev(&self, r: EntryRef) -> Option<EntryRef> {
        self.node(r).prev
    }

    pub fn front(&self, which: Which) -> Option<EntryRef> {
        self.lists[which.index()].head
    }

    pub fn back(&self, which: Which) -> Option<EntryRef> {
        self.lists[which.index()].tail
    }

    pub fn len(&self, which: Which) -> usize {
        self.lists[which.index()].len
    }

    fn alloc(&mut self, entry: Entry) -> EntryRef {
        if let Some(i) = self.free.pop() {
            self.slots[i as usize] = Some(Node {
                entry,
                prev: None,
                next: None,
            });
            EntryRef(i)
        } else {
            self.slots.push(Some(Node {
                entry,
                prev: None,
                next: None,
            }));
            let i = u32::try_from(self.slots.len() - 1).expect("entry arena overflow");
            EntryRef(i)
        }
    }

    fn link_back(&mut self, which: Which, r: EntryRef) {
        let tail = self.lists[which.index()].tail;
        {
            let node = self.node_mut(r);
            node.prev = tail;
            node.next = None;
        }
        match tail {
            Some(t) => self.node_mut(t).next = Some(r),
            None => self.lists[which.index()].head = Some(r),
        }
        self.lists[which.index()].tail = Some(r);
        self.lists[which.index()].len += 1;
    }

    fn link_before(&mut self, which: Which, r: EntryRef, before: Option<EntryRef>) {
        let Some(b) = before else {
            self.link_back(which, r);
            return;
        };
        debug_assert!(b != r);
        let prev = self.node(b).prev;
        {
            let node = self.node_mut(r);
            node.prev = prev;
            node.next = Some(b);
        }
        self.node_mut(b).prev = Some(r);
        match prev {
            Some(p) => self.node_mut(p).next = Some(r),
            None => self.lists[which.index()].head = Some(r),
        }
        self.lists[which.index()].len += 1;
    }

    fn unlink(&mut self, which: Which, r: EntryRef) {
        let (prev, next) = {
            let node = self.node(r);
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => self.lists[which.index()].head = next,
        }
        match next {
            Some(n) => self.node_mut(n).prev = prev,
            None => self.lists[which.index()].tail = prev,
        }
        {
            let node = self.node_mut(r);
            node.prev = None;
            node.next = None;
        }
        self.lists[which.index()].len -= 1;
    }

    /// Allocate a new entry at the back of `which`.
    pub fn push_back(&mut self, which: Which, entry: Entry) -> EntryRef {
        let r = self.alloc(entry);
        self.link_back(which, r);
        r
    }

    /// Allocate a new entry before `before` (`None` = at the end).
    pub fn insert_before(
        &mut self,
        which: Which,
        before: Option<EntryRef>,
        entry: Entry,
    ) -> EntryRef {
        let r = self.alloc(entry);
        self.link_before(which, r, before);
        r
    }

    /// Splice an existing entry from `from` to the back of `to`.
    pub fn move_to_back(&mut self, from: Which, to: Which, r: EntryRef) {
        self.unlink(from, r);
        self.link_back(to, r);
    }

    /// Splice an existing entry to just before `before` within `which`.
    pub fn move_before(&mut self, which: Which, r: EntryRef, before: Option<EntryRef>) {
        self.unlink(which, r);
        self.link_before(which, r, before);
    }

    /// Unlink and free an entry, returning its contents.
    pub fn remove(&mut self, which: Which, r: EntryRef) -> Entry {
        self.unlink(which, r);
        let node = self.slots[r.0 as usize].take().expect("stale entry ref");
        self.free.push(r.0);
        node.entry
    }

    /// Forward iteration over one list's refs, front to back.
    pub fn iter(&self, which: Which) -> impl Iterator<Item = EntryRef> + '_ {
        let mut cursor = self.front(which);
        std::iter::from_fn(move || {
            let r = cursor?;
            cursor = self.next(r);
            Some(r)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &[u8], seq: u64) -> Entry {
        Entry::document(
            id.to_vec(),
            b"r".to_vec(),
            Sequence::new(seq),
            DocumentFlags::empty(),
        )
    }

    fn ids(list: &EntryList, which: Which) -> Vec<Vec<u8>> {
        list.iter(which)
            .map(|r| list.get(r).doc_id.clone())
            .collect()
    }

    #[test]
    fn push_and_iterate() {
        let mut list = EntryList::new();
        list.push_back(Which::Changes, doc(b"a", 1));
        list.push_back(Which::Changes, doc(b"b", 2));
        list.push_back(Which::Changes, doc(b"c", 3));
        assert_eq!(ids(&list, Which::Changes), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(list.len(Which::Changes), 3);
    }

    #[test]
    fn move_to_back_reorders() {
        let mut list = EntryList::new();
        let a = list.push_back(Which::Changes, doc(b"a", 1));
        list.push_back(Which::Changes, doc(b"b", 2));
        list.move_to_back(Which::Changes, Which::Changes, a);
        assert_eq!(ids(&list, Which::Changes), vec![b"b".to_vec(), b"a".to_vec()]);
        assert_eq!(list.back(Which::Changes), Some(a));
    }

    #[test]
    fn splice_between_lists() {
        let mut list = EntryList::new();
        let a = list.push_back(Which::Changes, doc(b"a", 1));
        list.push_back(Which::Changes, doc(b"b", 2));
        list.move_to_back(Which::Changes, Which::Idle, a);
        assert_eq!(list.len(Which::Changes), 1);
        assert_eq!(list.len(Which::Idle), 1);
        assert_eq!(ids(&list, Which::Idle), vec![b"a".to_vec()]);
        list.move_to_back(Which::Idle, Which::Changes, a);
        assert_eq!(ids(&list, Which::Changes), vec![b"b".to_vec(), b"a".to_vec()]);
    }

    #[test]
    fn insert_before_and_move_before() {
        let mut list = EntryList::new();
        let a = list.push_back(Which::Changes, doc(b"a", 1));
        let c = list.push_back(Which::Changes, doc(b"c", 3));
        list.insert_before(Which::Changes, Some(c), doc(b"b", 2));
        assert_eq!(ids(&list, Which::Changes), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);

        list.move_before(Which::Changes, c, Some(a));
        assert_eq!(ids(&list, Which::Changes), vec![b"c".to_vec(), b"a".to_vec(), b"b".to_vec()]);
        list.move_before(Which::Changes, c, None);
        assert_eq!(ids(&list, Which::Changes), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn remove_recycles_slots() {
        let mut list = EntryList::new();
        let a = list.push_back(Which::Changes, doc(b"a", 1));
        let entry = list.remove(Which::Changes, a);
        assert_eq!(entry.doc_id, b"a");
        assert_eq!(list.len(Which::Changes), 0);
        // The freed slot is reused.
        let b = list.push_back(Which::Changes, doc(b"b", 2));
        assert_eq!(a, b);
    }

    #[test]
    #[should_panic(expected = "stale entry ref")]
    fn stale_ref_is_caught() {
        let mut list = EntryList::new();
        let a = list.push_back(Which::Changes, doc(b"a", 1));
        list.remove(Which::Changes, a);
        let _ = list.get(a);
    }
}
