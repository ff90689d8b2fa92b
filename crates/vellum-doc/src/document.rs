//! The versioned document: construction, faulting, mutation, save.
//!
//! A stored record has two encoded columns:
//!
//! * `body` — the current revision's properties, a dict.
//! * `extra` — an array indexed by remote ID, each slot either null or a
//!   dict `{ "{": properties, "@": revID, "&": flags }`. Slot 0 belongs to
//!   the local revision and is usually null, since the local state lives in
//!   `body` and the record columns.
//!
//! Revisions at different remotes are frequently identical, so `extra` is
//! written through a de-duplicating encoder: repeated revision dicts (and
//! their property dicts, one level down) become shared references.

use std::any::Any;
use std::cell::Cell;
use std::rc::Rc;

use sha1::{Digest, Sha1};

use vellum_error::{Result, VellumError};
use vellum_types::{
    ContentOption, DocumentFlags, Record, RecordLite, RecordStore, RemoteId, Sequence,
    StoreTransaction,
};
use vellum_value::{
    decode, decode_scoped, dirty, to_canonical_json, Array, DedupEncoder, Dict, Encoder,
    MutableArray, MutableDict, Value,
};
use vellum_vers::RevId;

use crate::revision::Revision;

// Keys in revision dicts (deliberately short; they must stay out of any
// shared-keys table).
const META_PROPERTIES: &str = "{";
const META_REV_ID: &str = "@";
const META_FLAGS: &str = "&";

/// Outcome of [`VersionedDocument::save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveResult {
    /// Nothing was dirty; the store was not touched.
    NoSave,
    /// The store rejected the write; the caller's view is stale.
    Conflict,
    /// Saved in place without allocating a new sequence.
    NoNewSequence,
    /// Saved under a freshly allocated sequence.
    NewSequence,
}

/// Identity handle of the document owning a decoded value tree.
///
/// Stored as the decode scope of every body the document parses, so
/// [`VersionedDocument::containing`] can walk any live sub-value back to
/// the document it came from.
#[derive(Debug)]
pub struct DocumentLink {
    doc_id: Vec<u8>,
    sequence: Cell<Sequence>,
}

impl DocumentLink {
    /// The owning document's ID.
    pub fn doc_id(&self) -> &[u8] {
        &self.doc_id
    }

    /// The owning document's sequence as of its last load or save.
    pub fn sequence(&self) -> Sequence {
        self.sequence.get()
    }
}

/// In-memory view of one document record.
///
/// Single-threaded; owned by one database connection. Holds the store by
/// reference for faulting and saving.
pub struct VersionedDocument<'s> {
    store: &'s dyn RecordStore,
    doc_id: Vec<u8>,
    sequence: Sequence,
    rev_id: RevId,
    doc_flags: DocumentFlags,
    which_content: ContentOption,
    exists: bool,

    /// Raw encoded body bytes as of the last load/save.
    body_data: Option<Vec<u8>>,
    /// The decoded (pre-overlay) body root.
    body_root: Option<Dict>,
    /// The current revision's properties; may be a mutable overlay.
    current_properties: Dict,
    /// The current revision's flags.
    current_flags: DocumentFlags,

    /// The remote-revision table as decoded or mutated.
    revisions: Option<Array>,
    mutated_revisions: Option<MutableArray>,

    changed: bool,
    rev_id_changed: bool,

    link: Rc<DocumentLink>,
}

fn corrupt(detail: &str) -> VellumError {
    VellumError::corrupt(detail.to_owned())
}

impl<'s> VersionedDocument<'s> {
    /// Construct over a record previously fetched from `store`.
    ///
    /// A non-existent record yields a new document with an empty mutable
    /// properties dict and the full body considered loaded.
    pub fn from_record(store: &'s dyn RecordStore, rec: Record) -> Result<Self> {
        let link = Rc::new(DocumentLink {
            doc_id: rec.key.clone(),
            sequence: Cell::new(rec.sequence),
        });
        let mut doc = Self {
            store,
            doc_id: rec.key,
            sequence: rec.sequence,
            rev_id: RevId::from_bytes(rec.version),
            doc_flags: rec.flags,
            which_content: rec.content,
            exists: rec.exists,
            body_data: None,
            body_root: None,
            current_properties: Dict::empty(),
            current_flags: rec.flags - (DocumentFlags::CONFLICTED | DocumentFlags::SYNCED),
            revisions: None,
            mutated_revisions: None,
            changed: false,
            rev_id_changed: false,
            link,
        };
        if doc.exists {
            doc.read_record_body(rec.body.as_deref())?;
            doc.read_record_extra(rec.extra.as_deref())?;
        } else {
            // "Untitled" empty state: an empty mutable properties dict.
            doc.which_content = ContentOption::EntireBody;
            doc.current_properties = MutableDict::new().as_dict();
        }
        Ok(doc)
    }

    /// Fetch `doc_id` from the store and construct over the result.
    pub fn load(
        store: &'s dyn RecordStore,
        doc_id: &[u8],
        which: ContentOption,
    ) -> Result<Self> {
        Self::from_record(store, store.get(doc_id, which)?)
    }

    // -- Accessors ---------------------------------------------------------

    /// The document ID.
    pub fn doc_id(&self) -> &[u8] {
        &self.doc_id
    }

    /// The sequence of the last save; zero if never saved.
    pub fn sequence(&self) -> Sequence {
        self.sequence
    }

    /// The current revision ID.
    pub fn rev_id(&self) -> &RevId {
        &self.rev_id
    }

    /// Document-level flags (the union described by `update_doc_flags`).
    pub fn doc_flags(&self) -> DocumentFlags {
        self.doc_flags
    }

    /// Whether the record exists in the store.
    pub fn exists(&self) -> bool {
        self.exists
    }

    /// How much of the record is currently loaded.
    pub fn content_loaded(&self) -> ContentOption {
        self.which_content
    }

    /// The current revision as a value triple.
    pub fn current_revision(&self) -> Revision {
        Revision {
            properties: self.current_properties.clone(),
            rev_id: self.rev_id.clone(),
            flags: self.current_flags,
        }
    }

    /// The current revision's properties.
    pub fn properties(&self) -> Result<Dict> {
        self.require_body()?;
        Ok(self.current_properties.clone())
    }

    /// The decoded (pre-overlay) body dict.
    pub fn original_properties(&self) -> Result<Dict> {
        self.require_body()?;
        Ok(self.body_root.clone().unwrap_or_else(Dict::empty))
    }

    /// The raw encoded body bytes.
    pub fn current_revision_data(&self) -> Result<Option<&[u8]>> {
        self.require_body()?;
        Ok(self.body_data.as_deref())
    }

    /// Resolve a live value to the identity of the document whose decoded
    /// body it belongs to, walking mutable overlays back to their source.
    pub fn containing(value: &Value) -> Option<Rc<DocumentLink>> {
        let scope = value.scope()?;
        <Rc<dyn Any>>::downcast::<DocumentLink>(scope).ok()
    }

    /// This document's own identity handle.
    pub fn link(&self) -> &Rc<DocumentLink> {
        &self.link
    }

    // -- Loading -----------------------------------------------------------

    fn read_record_body(&mut self, body: Option<&[u8]>) -> Result<()> {
        match body.filter(|b| !b.is_empty()) {
            Some(bytes) => {
                let scope: Rc<dyn Any> = self.link.clone();
                let value = decode_scoped(bytes, Some(scope))?;
                let Value::Dict(props) = value else {
                    return Err(corrupt("record body is not a dict"));
                };
                self.body_data = Some(bytes.to_vec());
                self.body_root = Some(props.clone());
                self.current_properties = props;
            }
            None => {
                self.body_data = None;
                self.body_root = None;
                self.current_properties = Dict::empty();
            }
        }
        Ok(())
    }

    fn read_record_extra(&mut self, extra: Option<&[u8]>) -> Result<()> {
        self.mutated_revisions = None;
        self.revisions = match extra.filter(|e| !e.is_empty()) {
            Some(bytes) => {
                let value = decode(bytes)?;
                let Value::Array(arr) = value else {
                    return Err(corrupt("record extra is not an array"));
                };
                Some(arr)
            }
            None => None,
        };

        // The SYNCED flag means "current revision was pushed to remote #1",
        // recorded without rewriting the body. Repair that into the remote
        // table now, lazily.
        if self.doc_flags.contains(DocumentFlags::SYNCED) {
            let current = self.current_revision();
            self.set_remote_revision(RemoteId::new(1), Some(&current))?;
            self.doc_flags -= DocumentFlags::SYNCED;
            self.changed = false;
        }
        Ok(())
    }

    /// Fault in more of the record by sequence number.
    ///
    /// `Ok(false)` means the record no longer exists at this sequence.
    pub fn load_data(&mut self, which: ContentOption) -> Result<bool> {
        if !self.exists {
            return Ok(false);
        }
        if which <= self.which_content {
            return Ok(true);
        }
        let rec = self.store.get_by_sequence(self.sequence, which)?;
        if !rec.exists {
            return Ok(false);
        }
        tracing::debug!(
            doc_id = %String::from_utf8_lossy(&self.doc_id),
            ?which,
            "loading more record content"
        );
        let old_which = self.which_content;
        self.which_content = which;
        if which >= ContentOption::CurrentRevOnly && old_which < ContentOption::CurrentRevOnly {
            self.read_record_body(rec.body.as_deref())?;
        }
        if which == ContentOption::EntireBody && old_which < ContentOption::EntireBody {
            self.read_record_extra(rec.extra.as_deref())?;
        }
        Ok(true)
    }

    fn require_body(&self) -> Result<()> {
        if self.which_content < ContentOption::CurrentRevOnly {
            return Err(VellumError::unsupported("document body is not loaded"));
        }
        Ok(())
    }

    fn require_remotes(&self) -> Result<()> {
        if self.which_content < ContentOption::EntireBody {
            return Err(VellumError::unsupported(
                "document's other revisions are not loaded",
            ));
        }
        Ok(())
    }

    fn must_load_remotes(&mut self) -> Result<()> {
        if self.exists && !self.load_data(ContentOption::EntireBody)? {
            return Err(VellumError::Conflict);
        }
        Ok(())
    }

    // -- Remote revisions --------------------------------------------------

    /// The revision stored for `remote`, or `None` for an empty slot.
    pub fn remote_revision(&self, remote: RemoteId) -> Result<Option<Revision>> {
        if remote.is_local() {
            return Ok(Some(self.current_revision()));
        }
        self.require_remotes()?;
        let Some(rev_dict) = self.revision_dict_at(remote) else {
            return Ok(None);
        };
        let properties = rev_dict
            .get(META_PROPERTIES)
            .and_then(|v| v.as_dict().cloned())
            .unwrap_or_else(Dict::empty);
        let rev_id = rev_dict
            .get(META_REV_ID)
            .and_then(|v| v.as_data().map(<[u8]>::to_vec))
            .filter(|b| !b.is_empty())
            .ok_or_else(|| corrupt("remote revision has no revID"))?;
        let flags = DocumentFlags::from_bits_truncate(
            rev_dict
                .get(META_FLAGS)
                .and_then(|v| v.as_int())
                .unwrap_or(0) as u8,
        );
        Ok(Some(Revision {
            properties,
            rev_id: RevId::from_bytes(rev_id),
            flags,
        }))
    }

    /// Fault in the remote table if needed, then read a revision.
    pub fn load_remote_revision(&mut self, remote: RemoteId) -> Result<Option<Revision>> {
        if !remote.is_local() {
            self.must_load_remotes()?;
        }
        self.remote_revision(remote)
    }

    /// The next remote ID after `remote` with a non-empty slot. Returns the
    /// table length (an empty slot) when there is none.
    pub fn next_remote_id(&self, remote: RemoteId) -> RemoteId {
        let count = self.revisions.as_ref().map_or(0, Array::len);
        let mut i = remote.get() as usize + 1;
        while i < count {
            if self.revision_dict_at(RemoteId::new(i as u32)).is_some() {
                break;
            }
            i += 1;
        }
        RemoteId::new(i as u32)
    }

    /// Fault in the remote table if needed, then scan forward.
    pub fn load_next_remote_id(&mut self, remote: RemoteId) -> Result<RemoteId> {
        self.must_load_remotes()?;
        Ok(self.next_remote_id(remote))
    }

    fn revision_dict_at(&self, remote: RemoteId) -> Option<Dict> {
        self.revisions
            .as_ref()?
            .get(remote.get() as usize)?
            .as_dict()
            .cloned()
    }

    /// Make the revision table mutable (copy-on-first-write).
    fn mutate_revisions(&mut self) -> Result<()> {
        self.require_remotes()?;
        if self.mutated_revisions.is_none() {
            let mutated = match &self.revisions {
                Some(arr) => arr.mutable_copy(),
                None => MutableArray::new(),
            };
            self.revisions = Some(mutated.as_array());
            self.mutated_revisions = Some(mutated);
        }
        Ok(())
    }

    /// The mutable dict for a remote's slot, growing the table and
    /// replacing a null slot as needed.
    fn mutable_revision_dict(&mut self, remote: RemoteId) -> Result<MutableDict> {
        assert!(!remote.is_local());
        self.mutate_revisions()?;
        let mutated = self
            .mutated_revisions
            .as_ref()
            .expect("mutate_revisions populated the overlay");
        let index = remote.get() as usize;
        if mutated.len() <= index {
            mutated.resize(index + 1);
        }
        Ok(match mutated.mutable_dict_at(index) {
            Some(d) => d,
            None => {
                let d = MutableDict::new();
                mutated.set(index, Value::Dict(d.as_dict()));
                d
            }
        })
    }

    /// Create, update, or (with `None`) remove a remote's revision.
    ///
    /// `RemoteId::LOCAL` routes to the current revision, which cannot be
    /// removed.
    pub fn set_remote_revision(
        &mut self,
        remote: RemoteId,
        rev: Option<&Revision>,
    ) -> Result<()> {
        if remote.is_local() {
            let rev = rev.expect("the local revision cannot be removed");
            return self.set_current_revision(rev);
        }

        self.must_load_remotes()?;
        let mut changed_flags = false;
        if let Some(new_rev) = rev {
            // Creating or updating.
            let rev_dict = self.mutable_revision_dict(remote)?;
            let old_rev_id = rev_dict.get(META_REV_ID);
            let old_rev_id_bytes = old_rev_id.as_ref().and_then(Value::as_data);
            if old_rev_id_bytes != Some(new_rev.rev_id.as_bytes()) {
                if new_rev.rev_id.is_empty() {
                    return Err(corrupt("remote revision has no revID"));
                }
                rev_dict.set(META_REV_ID, Value::data(new_rev.rev_id.as_bytes()));
                self.changed = true;
            }
            let old_props = rev_dict.get(META_PROPERTIES);
            let props_identical = matches!(
                &old_props,
                Some(Value::Dict(d)) if d.ptr_token() == new_rev.properties.ptr_token()
            );
            if !props_identical {
                rev_dict.set(META_PROPERTIES, Value::Dict(new_rev.properties.clone()));
                self.changed = true;
            }
            let old_flags = rev_dict
                .get(META_FLAGS)
                .and_then(|v| v.as_int())
                .unwrap_or(0);
            if i64::from(new_rev.flags.bits()) != old_flags {
                if new_rev.flags.is_empty() {
                    rev_dict.remove(META_FLAGS);
                } else {
                    rev_dict.set(META_FLAGS, Value::Int(i64::from(new_rev.flags.bits())));
                }
                self.changed = true;
                changed_flags = true;
            }
        } else {
            let index = remote.get() as usize;
            let in_range = self.revisions.as_ref().is_some_and(|r| index < r.len());
            if in_range {
                // Null out the slot, then trim trailing empty slots.
                self.mutate_revisions()?;
                let mutated = self
                    .mutated_revisions
                    .as_ref()
                    .expect("mutate_revisions populated the overlay");
                mutated.set(index, Value::Null);
                let mut n = mutated.len();
                while n > 0
                    && mutated
                        .get(n - 1)
                        .map_or(true, |v| v.as_dict().is_none())
                {
                    n -= 1;
                }
                mutated.resize(n);
                self.changed = true;
                changed_flags = true;
            }
        }

        if changed_flags {
            self.update_doc_flags();
        }
        Ok(())
    }

    /// Recompute the document-level flags from the current revision and all
    /// remotes. Conflicted and HasAttachments are unions over all revisions;
    /// Synced is never derived here.
    fn update_doc_flags(&mut self) {
        let mut new_flags = self.doc_flags
            - (DocumentFlags::CONFLICTED | DocumentFlags::HAS_ATTACHMENTS);
        new_flags |= self.current_flags - DocumentFlags::SYNCED;
        if let Some(revs) = &self.revisions {
            for i in 0..revs.len() {
                let Some(rev_dict) = revs.get(i).and_then(|v| v.as_dict().cloned()) else {
                    continue;
                };
                let flags = DocumentFlags::from_bits_truncate(
                    rev_dict
                        .get(META_FLAGS)
                        .and_then(|v| v.as_int())
                        .unwrap_or(0) as u8,
                );
                if flags.contains(DocumentFlags::CONFLICTED) {
                    new_flags |= DocumentFlags::CONFLICTED;
                }
                if flags.contains(DocumentFlags::HAS_ATTACHMENTS) {
                    new_flags |= DocumentFlags::HAS_ATTACHMENTS;
                }
            }
        }
        self.doc_flags = new_flags;
    }

    // -- Local mutation ----------------------------------------------------

    /// Replace the entire current revision.
    pub fn set_current_revision(&mut self, rev: &Revision) -> Result<()> {
        self.set_rev_id(rev.rev_id.clone())?;
        self.set_properties(rev.properties.clone())?;
        self.set_flags(rev.flags)?;
        Ok(())
    }

    /// The mutable overlay of the current properties, created on first use.
    /// Caller-held handles stay valid across saves.
    pub fn mutable_properties(&mut self) -> Result<MutableDict> {
        self.require_body()?;
        if let Some(m) = self.current_properties.as_mutable() {
            return Ok(m);
        }
        let mutable = self.current_properties.mutable_copy();
        self.current_properties = mutable.as_dict();
        Ok(mutable)
    }

    /// Replace the current properties dict.
    pub fn set_properties(&mut self, properties: Dict) -> Result<()> {
        self.require_body()?;
        if properties.ptr_token() != self.current_properties.ptr_token() {
            self.current_properties = properties;
            self.changed = true;
        }
        Ok(())
    }

    /// Set the current revision ID. Empty IDs are invalid.
    pub fn set_rev_id(&mut self, rev_id: RevId) -> Result<()> {
        self.require_body()?;
        if rev_id.is_empty() {
            return Err(VellumError::invalid_parameter("empty revision ID"));
        }
        if rev_id != self.rev_id {
            self.rev_id = rev_id;
            self.changed = true;
            self.rev_id_changed = true;
        }
        Ok(())
    }

    /// Set the current revision's flags.
    pub fn set_flags(&mut self, flags: DocumentFlags) -> Result<()> {
        self.require_body()?;
        if flags != self.current_flags {
            self.current_flags = flags;
            self.changed = true;
            self.update_doc_flags();
        }
        Ok(())
    }

    // -- Dirtiness ---------------------------------------------------------

    /// Whether anything needs saving.
    pub fn changed(&self) -> bool {
        self.changed || self.properties_changed()
    }

    /// Whether any mutable overlay under the current properties is dirty.
    fn properties_changed(&self) -> bool {
        dirty::any_changed(&Value::Dict(self.current_properties.clone()))
    }

    fn clear_properties_changed(&self) {
        dirty::clear_changed(&Value::Dict(self.current_properties.clone()));
    }

    // -- Saving ------------------------------------------------------------

    /// Persist the document.
    ///
    /// Generates a revision ID when the properties changed without the
    /// caller supplying one, encodes body and extra, writes through the
    /// store, and re-seats the in-memory view on the freshly encoded bytes
    /// while keeping any caller-held mutable overlay live.
    pub fn save(&mut self, txn: &mut dyn StoreTransaction) -> Result<SaveResult> {
        self.require_remotes()?;
        let new_revision = self.rev_id.is_empty() || self.properties_changed();
        if !new_revision && !self.changed {
            return Ok(SaveResult::NoSave);
        }

        // The properties changed but the caller didn't pick a revID: derive
        // one from the parent revID and the new body.
        if new_revision && !self.rev_id_changed {
            let generated =
                generate_rev_id(&self.current_properties, &self.rev_id, self.current_flags)?;
            tracing::debug!(rev_id = %generated, "generated revision ID");
            self.set_rev_id(generated)?;
        }

        let (body, extra) = self.encode_record()?;
        let update_sequence = self.sequence.is_zero() || self.rev_id_changed;
        assert!(!self.rev_id.is_empty());
        let rec = RecordLite {
            key: &self.doc_id,
            version: self.rev_id.as_bytes(),
            body: &body,
            extra: &extra,
            sequence: self.sequence,
            update_sequence,
            flags: self.doc_flags,
        };
        let Some(sequence) = self.store.set(&rec, txn)? else {
            return Ok(SaveResult::Conflict);
        };

        self.sequence = sequence;
        self.exists = true;
        self.link.sequence.set(sequence);
        self.changed = false;
        self.rev_id_changed = false;

        // Re-seat on the saved bytes. A caller may still hold references to
        // the mutable overlay, so keep it installed as the current
        // properties with its dirty bits cleared.
        let mutable_props = self.current_properties.as_mutable();
        self.read_record_body(Some(&body))?;
        self.read_record_extra(Some(&extra))?;
        if let Some(m) = mutable_props {
            self.current_properties = m.as_dict();
            self.clear_properties_changed();
        }

        Ok(if update_sequence {
            SaveResult::NewSequence
        } else {
            SaveResult::NoNewSequence
        })
    }

    fn encode_record(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut body = Vec::new();
        if !self.current_properties.is_empty() {
            let mut enc = Encoder::new();
            enc.write_value(&Value::Dict(self.current_properties.clone()));
            body = enc.finish();
        }

        let mut extra = Vec::new();
        let n_revs = self.revisions.as_ref().map_or(0, Array::len);
        if n_revs > 0 {
            let revs = self.revisions.clone().expect("n_revs > 0");
            let mut enc = Encoder::new();
            if n_revs == 1 {
                enc.write_value(&Value::Array(revs));
            } else {
                // Re-added revision dicts won't be node-identical even when
                // equal, so match them by revID bytes first and reuse the
                // earlier node. (Quadratic, but the table is small.)
                let mut elems = revs.to_items();
                for i in 0..n_revs {
                    let Some(rev_id) = revision_id_of(&elems[i]) else {
                        continue;
                    };
                    for j in 0..i {
                        if elems[j].is_identical(&elems[i])
                            || revision_id_of(&elems[j]).as_deref() == Some(rev_id.as_slice())
                        {
                            assert!(
                                elems[j] == elems[i],
                                "revIDs match but revisions differ"
                            );
                            elems[i] = elems[j].clone();
                            break;
                        }
                    }
                }
                // Depth 3: the table itself, each revision dict, and each
                // revision's property dict all become shareable.
                let mut dd = DedupEncoder::new(&mut enc);
                dd.write_value(&Value::Array(Array::from_items(elems)), 3);
            }
            extra = enc.finish();
        }

        Ok((body, extra))
    }

    // -- Inspection --------------------------------------------------------

    /// Compact one-line rendering of the revision table, for logs and
    /// tests.
    pub fn dump(&self) -> String {
        use std::fmt::Write;
        let mut out = format!(
            "\"{}\" {} ",
            String::from_utf8_lossy(&self.doc_id),
            self.sequence
        );
        let n_revs = self.revisions.as_ref().map_or(0, Array::len).max(1);
        for i in 0..n_revs {
            let Ok(Some(rev)) = self.remote_revision(RemoteId::new(i as u32)) else {
                continue;
            };
            if i > 0 {
                write!(out, "; R{i}@").expect("write to String");
            }
            if rev.rev_id.is_empty() {
                out.push_str("--");
            } else {
                write!(out, "{}", rev.rev_id).expect("write to String");
            }
            if !rev.flags.is_empty() {
                out.push('(');
                if rev.is_deleted() {
                    out.push('D');
                }
                if rev.is_conflicted() {
                    out.push('C');
                }
                if rev.has_attachments() {
                    out.push('A');
                }
                out.push(')');
            }
        }
        out
    }
}

fn revision_id_of(value: &Value) -> Option<Vec<u8>> {
    value
        .as_dict()?
        .get(META_REV_ID)?
        .as_data()
        .map(<[u8]>::to_vec)
}

/// Enumerate every revision ID in an encoded record without constructing a
/// document: the local one, then each populated remote slot.
pub fn for_all_rev_ids(
    rec: &RecordLite<'_>,
    mut callback: impl FnMut(&[u8], RemoteId),
) -> Result<()> {
    callback(rec.version, RemoteId::LOCAL);
    if !rec.extra.is_empty() {
        let value = decode(rec.extra)?;
        let arr = value
            .as_array()
            .ok_or_else(|| corrupt("record extra is not an array"))?;
        for n in 1..arr.len() {
            let Some(rev_dict) = arr.get(n).and_then(|v| v.as_dict().cloned()) else {
                continue;
            };
            if let Some(Value::Data(rev_id)) = rev_dict.get(META_REV_ID) {
                callback(&rev_id, RemoteId::new(n as u32));
            }
        }
    }
    Ok(())
}

/// Derive a deterministic revision ID for a mutated body.
///
/// SHA-1 over the length-prefixed parent revID, a deletion byte, and the
/// canonical JSON of the body; the generation is the parent's plus one.
pub fn generate_rev_id(body: &Dict, parent: &RevId, flags: DocumentFlags) -> Result<RevId> {
    let json = to_canonical_json(&Value::Dict(body.clone()))?;
    let parent_bytes = parent.as_bytes();
    let parent_bytes = &parent_bytes[..parent_bytes.len().min(255)];
    let mut hasher = Sha1::new();
    hasher.update([parent_bytes.len() as u8]);
    hasher.update(parent_bytes);
    hasher.update([u8::from(flags.contains(DocumentFlags::DELETED))]);
    hasher.update(&json);
    let digest = hasher.finalize();
    let generation = if parent.is_empty() {
        1
    } else {
        parent.generation() + 1
    };
    Ok(RevId::tree(generation, &digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_types::MemRecordStore;

    #[test]
    fn generate_rev_id_is_deterministic() {
        let props = MutableDict::new();
        props.set("answer", Value::Int(42));
        let parent = RevId::parse_ascii(b"1-cafe").unwrap();
        let a = generate_rev_id(&props.as_dict(), &parent, DocumentFlags::empty()).unwrap();
        let b = generate_rev_id(&props.as_dict(), &parent, DocumentFlags::empty()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.generation(), 2);
        assert_eq!(a.digest().unwrap().len(), 20);

        // The deletion flag participates in the digest.
        let deleted =
            generate_rev_id(&props.as_dict(), &parent, DocumentFlags::DELETED).unwrap();
        assert_ne!(a, deleted);

        // So does the parent revID.
        let other_parent = RevId::parse_ascii(b"1-beef").unwrap();
        let c = generate_rev_id(&props.as_dict(), &other_parent, DocumentFlags::empty()).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn generate_rev_id_digest_matches_reference() {
        // The digest input layout is [len(parent)][parent][deleted][json].
        let props = MutableDict::new();
        props.set("k", Value::string("v"));
        let parent = RevId::parse_ascii(b"2-aabb").unwrap();
        let generated =
            generate_rev_id(&props.as_dict(), &parent, DocumentFlags::empty()).unwrap();

        let mut hasher = Sha1::new();
        hasher.update([parent.as_bytes().len() as u8]);
        hasher.update(parent.as_bytes());
        hasher.update([0u8]);
        hasher.update(br#"{"k":"v"}"#);
        assert_eq!(generated.digest().unwrap(), hasher.finalize().as_slice());
        assert_eq!(generated.generation(), 3);
    }

    #[test]
    fn new_document_starts_with_mutable_properties() {
        let store = MemRecordStore::new();
        let doc = VersionedDocument::load(&store, b"fresh", ContentOption::EntireBody).unwrap();
        assert!(!doc.exists());
        assert!(doc.sequence().is_zero());
        assert!(doc.rev_id().is_empty());
        assert!(doc.properties().unwrap().as_mutable().is_some());
        assert!(!doc.changed());
    }

    #[test]
    fn meta_only_rejects_body_access() {
        let store = MemRecordStore::new();
        let mut txn = vellum_types::MemTransaction;
        let mut doc =
            VersionedDocument::load(&store, b"doc", ContentOption::EntireBody).unwrap();
        doc.mutable_properties().unwrap().set("a", Value::Int(1));
        doc.save(&mut txn).unwrap();

        let doc = VersionedDocument::load(&store, b"doc", ContentOption::MetaOnly).unwrap();
        assert!(matches!(
            doc.properties(),
            Err(VellumError::UnsupportedOperation { .. })
        ));
        assert!(matches!(
            doc.remote_revision(RemoteId::new(1)),
            Err(VellumError::UnsupportedOperation { .. })
        ));
    }
}
