//! HashMap-backed [`RecordStore`] used by tests and examples.

use std::cell::RefCell;
use std::collections::HashMap;

use vellum_error::Result;

use crate::record::{Record, RecordLite, RecordStore, StoreTransaction};
use crate::{ContentOption, DocumentFlags, Sequence};

/// Transaction token for [`MemRecordStore`]. Carries no state; the store
/// applies writes immediately.
#[derive(Debug, Default)]
pub struct MemTransaction;

#[derive(Debug, Clone)]
struct StoredDoc {
    version: Vec<u8>,
    sequence: Sequence,
    flags: DocumentFlags,
    body: Option<Vec<u8>>,
    extra: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct MemInner {
    docs: HashMap<Vec<u8>, StoredDoc>,
    by_sequence: HashMap<Sequence, Vec<u8>>,
    last_sequence: Sequence,
}

/// In-memory record store.
///
/// Sequence allocation and stale-write detection behave like the real
/// key-value store: a write with `update_sequence` set is rejected when the
/// caller's sequence no longer matches the stored one.
#[derive(Debug, Default)]
pub struct MemRecordStore {
    inner: RefCell<MemInner>,
}

impl MemRecordStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The highest sequence allocated so far.
    pub fn last_sequence(&self) -> Sequence {
        self.inner.borrow().last_sequence
    }

    /// Remove a document entirely (a purge).
    pub fn purge(&self, doc_id: &[u8]) -> bool {
        let mut inner = self.inner.borrow_mut();
        if let Some(doc) = inner.docs.remove(doc_id) {
            inner.by_sequence.remove(&doc.sequence);
            true
        } else {
            false
        }
    }

    fn record_from(key: &[u8], doc: &StoredDoc, content: ContentOption) -> Record {
        Record {
            key: key.to_vec(),
            version: doc.version.clone(),
            sequence: doc.sequence,
            flags: doc.flags,
            body: if content >= ContentOption::CurrentRevOnly {
                doc.body.clone()
            } else {
                None
            },
            extra: if content >= ContentOption::EntireBody {
                doc.extra.clone()
            } else {
                None
            },
            exists: true,
            content,
        }
    }
}

impl RecordStore for MemRecordStore {
    fn get(&self, doc_id: &[u8], content: ContentOption) -> Result<Record> {
        let inner = self.inner.borrow();
        Ok(match inner.docs.get(doc_id) {
            Some(doc) => Self::record_from(doc_id, doc, content),
            None => Record::not_found(doc_id),
        })
    }

    fn get_by_sequence(&self, sequence: Sequence, content: ContentOption) -> Result<Record> {
        let inner = self.inner.borrow();
        Ok(match inner
            .by_sequence
            .get(&sequence)
            .and_then(|key| inner.docs.get(key).map(|doc| (key, doc)))
        {
            Some((key, doc)) => Self::record_from(key, doc, content),
            None => Record::not_found(Vec::new()),
        })
    }

    fn set(&self, rec: &RecordLite<'_>, _txn: &mut dyn StoreTransaction) -> Result<Option<Sequence>> {
        let mut inner = self.inner.borrow_mut();
        let stored_sequence = inner.docs.get(rec.key).map(|d| d.sequence);

        let sequence = if rec.update_sequence {
            if let Some(stored) = stored_sequence {
                if stored != rec.sequence {
                    return Ok(None); // stale write
                }
                inner.by_sequence.remove(&stored);
            } else if !rec.sequence.is_zero() {
                return Ok(None); // caller thinks the doc exists but it doesn't
            }
            let seq = inner.last_sequence.next();
            inner.last_sequence = seq;
            seq
        } else {
            match stored_sequence {
                Some(stored) if stored == rec.sequence => stored,
                _ => return Ok(None),
            }
        };

        let none_if_empty = |b: &[u8]| {
            if b.is_empty() {
                None
            } else {
                Some(b.to_vec())
            }
        };
        inner.docs.insert(
            rec.key.to_vec(),
            StoredDoc {
                version: rec.version.to_vec(),
                sequence,
                flags: rec.flags,
                body: none_if_empty(rec.body),
                extra: none_if_empty(rec.extra),
            },
        );
        inner.by_sequence.insert(sequence, rec.key.to_vec());
        Ok(Some(sequence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lite<'a>(key: &'a [u8], version: &'a [u8], seq: Sequence, update: bool) -> RecordLite<'a> {
        RecordLite {
            key,
            version,
            body: b"body",
            extra: b"",
            sequence: seq,
            update_sequence: update,
            flags: DocumentFlags::empty(),
        }
    }

    #[test]
    fn set_allocates_sequences() {
        let store = MemRecordStore::new();
        let mut txn = MemTransaction;
        let s1 = store
            .set(&lite(b"a", b"1-aa", Sequence::ZERO, true), &mut txn)
            .unwrap()
            .unwrap();
        let s2 = store
            .set(&lite(b"b", b"1-bb", Sequence::ZERO, true), &mut txn)
            .unwrap()
            .unwrap();
        assert_eq!(s1, Sequence::new(1));
        assert_eq!(s2, Sequence::new(2));
        assert_eq!(store.last_sequence(), Sequence::new(2));
    }

    #[test]
    fn stale_write_conflicts() {
        let store = MemRecordStore::new();
        let mut txn = MemTransaction;
        let s1 = store
            .set(&lite(b"a", b"1-aa", Sequence::ZERO, true), &mut txn)
            .unwrap()
            .unwrap();
        // Writer who never saw s1:
        let conflict = store
            .set(&lite(b"a", b"2-cc", Sequence::ZERO, true), &mut txn)
            .unwrap();
        assert!(conflict.is_none());
        // Writer with the current sequence succeeds:
        let s2 = store.set(&lite(b"a", b"2-cc", s1, true), &mut txn).unwrap();
        assert_eq!(s2, Some(Sequence::new(2)));
    }

    #[test]
    fn get_honors_content_option() {
        let store = MemRecordStore::new();
        let mut txn = MemTransaction;
        let rec = RecordLite {
            key: b"a",
            version: b"1-aa",
            body: b"body",
            extra: b"extra",
            sequence: Sequence::ZERO,
            update_sequence: true,
            flags: DocumentFlags::DELETED,
        };
        store.set(&rec, &mut txn).unwrap().unwrap();

        let meta = store.get(b"a", ContentOption::MetaOnly).unwrap();
        assert!(meta.exists);
        assert!(meta.body.is_none() && meta.extra.is_none());
        assert_eq!(meta.flags, DocumentFlags::DELETED);

        let cur = store.get(b"a", ContentOption::CurrentRevOnly).unwrap();
        assert_eq!(cur.body.as_deref(), Some(&b"body"[..]));
        assert!(cur.extra.is_none());

        let full = store.get(b"a", ContentOption::EntireBody).unwrap();
        assert_eq!(full.extra.as_deref(), Some(&b"extra"[..]));
    }

    #[test]
    fn get_by_sequence_tracks_resaves() {
        let store = MemRecordStore::new();
        let mut txn = MemTransaction;
        let s1 = store
            .set(&lite(b"a", b"1-aa", Sequence::ZERO, true), &mut txn)
            .unwrap()
            .unwrap();
        assert!(store
            .get_by_sequence(s1, ContentOption::EntireBody)
            .unwrap()
            .exists);
        let s2 = store
            .set(&lite(b"a", b"2-bb", s1, true), &mut txn)
            .unwrap()
            .unwrap();
        // The old sequence no longer resolves.
        assert!(!store
            .get_by_sequence(s1, ContentOption::EntireBody)
            .unwrap()
            .exists);
        assert!(store
            .get_by_sequence(s2, ContentOption::EntireBody)
            .unwrap()
            .exists);
    }

    #[test]
    fn purge_removes_both_indexes() {
        let store = MemRecordStore::new();
        let mut txn = MemTransaction;
        let s1 = store
            .set(&lite(b"a", b"1-aa", Sequence::ZERO, true), &mut txn)
            .unwrap()
            .unwrap();
        assert!(store.purge(b"a"));
        assert!(!store.get(b"a", ContentOption::MetaOnly).unwrap().exists);
        assert!(!store
            .get_by_sequence(s1, ContentOption::MetaOnly)
            .unwrap()
            .exists);
        assert!(!store.purge(b"a"));
    }
}
