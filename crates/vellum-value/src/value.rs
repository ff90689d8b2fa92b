//! The value model: shared immutable nodes and mutable overlays.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Opaque per-decode context attached to every composite node of a decoded
/// tree. The document layer stores its backlink here so a caller holding an
/// arbitrary sub-value can resolve the owning document.
pub type Scope = Rc<dyn Any>;

/// A document property value.
///
/// Clones are cheap: strings, data, and containers are reference-counted.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(Rc<str>),
    Data(Rc<[u8]>),
    Array(Array),
    Dict(Dict),
}

impl Value {
    /// Convenience constructor for string values.
    pub fn string(s: impl AsRef<str>) -> Self {
        Self::String(Rc::from(s.as_ref()))
    }

    /// Convenience constructor for data values.
    pub fn data(d: impl AsRef<[u8]>) -> Self {
        Self::Data(Rc::from(d.as_ref()))
    }

    /// The dict inside this value, if it is one.
    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            Self::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// The array inside this value, if it is one.
    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    /// The data bytes inside this value, if it is one.
    pub fn as_data(&self) -> Option<&[u8]> {
        match self {
            Self::Data(d) => Some(d),
            _ => None,
        }
    }

    /// The integer inside this value, if it is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Identity comparison: scalars by value, everything reference-counted
    /// by pointer.
    pub fn is_identical(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::String(a), Self::String(b)) => Rc::ptr_eq(a, b),
            (Self::Data(a), Self::Data(b)) => Rc::ptr_eq(a, b),
            (Self::Array(a), Self::Array(b)) => a.ptr_token() == b.ptr_token(),
            (Self::Dict(a), Self::Dict(b)) => a.ptr_token() == b.ptr_token(),
            _ => false,
        }
    }

    /// The scope of the decoded tree this value belongs to, walking a
    /// mutable overlay back to its source.
    pub fn scope(&self) -> Option<Scope> {
        match self {
            Self::Dict(d) => d.scope(),
            Self::Array(a) => a.scope(),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Data(a), Self::Data(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Dict(a), Self::Dict(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Data(d) => write!(f, "data({} bytes)", d.len()),
            Self::Array(a) => f.debug_list().entries(a.to_items()).finish(),
            Self::Dict(d) => f.debug_map().entries(d.to_entries()).finish(),
        }
    }
}

// ---------------------------------------------------------------------------
// Dict
// ---------------------------------------------------------------------------

pub(crate) struct SharedDict {
    pub(crate) entries: BTreeMap<String, Value>,
    pub(crate) scope: Option<Scope>,
}

/// A string-keyed map value: either a shared decoded node or a mutable
/// overlay.
#[derive(Clone)]
pub struct Dict {
    repr: DictRepr,
}

#[derive(Clone)]
enum DictRepr {
    Shared(Rc<SharedDict>),
    Mutable(MutableDict),
}

impl Dict {
    /// An empty immutable dict.
    pub fn empty() -> Self {
        Self::shared(BTreeMap::new(), None)
    }

    pub(crate) fn shared(entries: BTreeMap<String, Value>, scope: Option<Scope>) -> Self {
        Self {
            repr: DictRepr::Shared(Rc::new(SharedDict { entries, scope })),
        }
    }

    /// Look up a key.
    pub fn get(&self, key: &str) -> Option<Value> {
        match &self.repr {
            DictRepr::Shared(s) => s.entries.get(key).cloned(),
            DictRepr::Mutable(m) => m.get(key),
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        match &self.repr {
            DictRepr::Shared(s) => s.entries.len(),
            DictRepr::Mutable(m) => m.len(),
        }
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the entries in key order.
    pub fn to_entries(&self) -> Vec<(String, Value)> {
        match &self.repr {
            DictRepr::Shared(s) => s
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            DictRepr::Mutable(m) => m.to_entries(),
        }
    }

    /// The mutable overlay handle, if this dict is one.
    pub fn as_mutable(&self) -> Option<MutableDict> {
        match &self.repr {
            DictRepr::Mutable(m) => Some(m.clone()),
            DictRepr::Shared(_) => None,
        }
    }

    /// Make a mutable overlay copied from this dict.
    pub fn mutable_copy(&self) -> MutableDict {
        MutableDict::copy_of(self)
    }

    /// Stable identity token for the underlying node.
    pub fn ptr_token(&self) -> usize {
        match &self.repr {
            DictRepr::Shared(s) => Rc::as_ptr(s) as usize,
            DictRepr::Mutable(m) => Rc::as_ptr(&m.inner) as usize,
        }
    }

    /// The decode scope, walking a mutable overlay to its source.
    pub fn scope(&self) -> Option<Scope> {
        match &self.repr {
            DictRepr::Shared(s) => s.scope.clone(),
            DictRepr::Mutable(m) => m.inner.source.as_ref().and_then(Dict::scope),
        }
    }
}

impl PartialEq for Dict {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_token() == other.ptr_token() || self.to_entries() == other.to_entries()
    }
}

impl fmt::Debug for Dict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.to_entries()).finish()
    }
}

/// A mutable dict overlay. Clones share the same underlying node, so every
/// holder of the handle observes every mutation.
#[derive(Clone)]
pub struct MutableDict {
    inner: Rc<MutableDictInner>,
}

struct MutableDictInner {
    entries: RefCell<BTreeMap<String, Value>>,
    changed: Cell<bool>,
    source: Option<Dict>,
}

impl MutableDict {
    /// A fresh empty mutable dict.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(MutableDictInner {
                entries: RefCell::new(BTreeMap::new()),
                changed: Cell::new(false),
                source: None,
            }),
        }
    }

    /// A shallow mutable copy of `source`: entries are copied, the values
    /// in them stay shared.
    pub fn copy_of(source: &Dict) -> Self {
        Self {
            inner: Rc::new(MutableDictInner {
                entries: RefCell::new(source.to_entries().into_iter().collect()),
                changed: Cell::new(false),
                source: Some(source.clone()),
            }),
        }
    }

    /// View this overlay as a [`Dict`].
    pub fn as_dict(&self) -> Dict {
        Dict {
            repr: DictRepr::Mutable(self.clone()),
        }
    }

    /// Look up a key.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.entries.borrow().get(key).cloned()
    }

    /// Set a key, marking the overlay changed.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.inner.entries.borrow_mut().insert(key.into(), value);
        self.inner.changed.set(true);
    }

    /// Remove a key; marks the overlay changed if it was present.
    pub fn remove(&self, key: &str) -> Option<Value> {
        let removed = self.inner.entries.borrow_mut().remove(key);
        if removed.is_some() {
            self.inner.changed.set(true);
        }
        removed
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inner.entries.borrow().len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the entries in key order.
    pub fn to_entries(&self) -> Vec<(String, Value)> {
        self.inner
            .entries
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Promote the dict stored under `key` to a mutable overlay, in place,
    /// and return it. `None` if the key is absent or not a dict. Promotion
    /// itself does not mark this overlay changed.
    pub fn mutable_dict_for_key(&self, key: &str) -> Option<MutableDict> {
        let existing = self.get(key)?;
        let dict = existing.as_dict()?;
        if let Some(m) = dict.as_mutable() {
            return Some(m);
        }
        let promoted = dict.mutable_copy();
        self.inner
            .entries
            .borrow_mut()
            .insert(key.to_owned(), Value::Dict(promoted.as_dict()));
        Some(promoted)
    }

    /// The dirty bit.
    pub fn is_changed(&self) -> bool {
        self.inner.changed.get()
    }

    /// Set or clear the dirty bit.
    pub fn set_changed(&self, changed: bool) {
        self.inner.changed.set(changed);
    }

    /// The dict this overlay was copied from, if any.
    pub fn source(&self) -> Option<&Dict> {
        self.inner.source.as_ref()
    }
}

impl Default for MutableDict {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MutableDict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.to_entries()).finish()
    }
}

// ---------------------------------------------------------------------------
// Array
// ---------------------------------------------------------------------------

pub(crate) struct SharedArray {
    pub(crate) items: Vec<Value>,
    pub(crate) scope: Option<Scope>,
}

/// An ordered list value: either a shared decoded node or a mutable overlay.
#[derive(Clone)]
pub struct Array {
    repr: ArrayRepr,
}

#[derive(Clone)]
enum ArrayRepr {
    Shared(Rc<SharedArray>),
    Mutable(MutableArray),
}

impl Array {
    /// An empty immutable array.
    pub fn empty() -> Self {
        Self::shared(Vec::new(), None)
    }

    pub(crate) fn shared(items: Vec<Value>, scope: Option<Scope>) -> Self {
        Self {
            repr: ArrayRepr::Shared(Rc::new(SharedArray { items, scope })),
        }
    }

    /// Build an immutable array from items.
    pub fn from_items(items: Vec<Value>) -> Self {
        Self::shared(items, None)
    }

    /// The item at `index`.
    pub fn get(&self, index: usize) -> Option<Value> {
        match &self.repr {
            ArrayRepr::Shared(s) => s.items.get(index).cloned(),
            ArrayRepr::Mutable(m) => m.get(index),
        }
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        match &self.repr {
            ArrayRepr::Shared(s) => s.items.len(),
            ArrayRepr::Mutable(m) => m.len(),
        }
    }

    /// Whether there are no items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the items.
    pub fn to_items(&self) -> Vec<Value> {
        match &self.repr {
            ArrayRepr::Shared(s) => s.items.clone(),
            ArrayRepr::Mutable(m) => m.to_items(),
        }
    }

    /// The mutable overlay handle, if this array is one.
    pub fn as_mutable(&self) -> Option<MutableArray> {
        match &self.repr {
            ArrayRepr::Mutable(m) => Some(m.clone()),
            ArrayRepr::Shared(_) => None,
        }
    }

    /// Make a mutable overlay copied from this array.
    pub fn mutable_copy(&self) -> MutableArray {
        MutableArray::copy_of(self)
    }

    /// Stable identity token for the underlying node.
    pub fn ptr_token(&self) -> usize {
        match &self.repr {
            ArrayRepr::Shared(s) => Rc::as_ptr(s) as usize,
            ArrayRepr::Mutable(m) => Rc::as_ptr(&m.inner) as usize,
        }
    }

    /// The decode scope, walking a mutable overlay to its source.
    pub fn scope(&self) -> Option<Scope> {
        match &self.repr {
            ArrayRepr::Shared(s) => s.scope.clone(),
            ArrayRepr::Mutable(m) => m.inner.source.as_ref().and_then(Array::scope),
        }
    }
}

impl PartialEq for Array {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_token() == other.ptr_token() || self.to_items() == other.to_items()
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.to_items()).finish()
    }
}

/// A mutable array overlay with shared-handle semantics like
/// [`MutableDict`].
#[derive(Clone)]
pub struct MutableArray {
    inner: Rc<MutableArrayInner>,
}

struct MutableArrayInner {
    items: RefCell<Vec<Value>>,
    changed: Cell<bool>,
    source: Option<Array>,
}

impl MutableArray {
    /// A fresh empty mutable array.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(MutableArrayInner {
                items: RefCell::new(Vec::new()),
                changed: Cell::new(false),
                source: None,
            }),
        }
    }

    /// A shallow mutable copy of `source`.
    pub fn copy_of(source: &Array) -> Self {
        Self {
            inner: Rc::new(MutableArrayInner {
                items: RefCell::new(source.to_items()),
                changed: Cell::new(false),
                source: Some(source.clone()),
            }),
        }
    }

    /// View this overlay as an [`Array`].
    pub fn as_array(&self) -> Array {
        Array {
            repr: ArrayRepr::Mutable(self.clone()),
        }
    }

    /// The item at `index`.
    pub fn get(&self, index: usize) -> Option<Value> {
        self.inner.items.borrow().get(index).cloned()
    }

    /// Replace the item at `index`, marking the overlay changed.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range; use [`MutableArray::resize`]
    /// first.
    pub fn set(&self, index: usize, value: Value) {
        self.inner.items.borrow_mut()[index] = value;
        self.inner.changed.set(true);
    }

    /// Append an item, marking the overlay changed.
    pub fn push(&self, value: Value) {
        self.inner.items.borrow_mut().push(value);
        self.inner.changed.set(true);
    }

    /// Grow (with nulls) or shrink to exactly `len` items, marking the
    /// overlay changed if the length changes.
    pub fn resize(&self, len: usize) {
        let mut items = self.inner.items.borrow_mut();
        if items.len() != len {
            items.resize(len, Value::Null);
            self.inner.changed.set(true);
        }
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.inner.items.borrow().len()
    }

    /// Whether there are no items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the items.
    pub fn to_items(&self) -> Vec<Value> {
        self.inner.items.borrow().clone()
    }

    /// Promote the dict at `index` to a mutable overlay, in place, and
    /// return it. `None` if the slot does not hold a dict. Promotion itself
    /// does not mark this overlay changed.
    pub fn mutable_dict_at(&self, index: usize) -> Option<MutableDict> {
        let existing = self.get(index)?;
        let dict = existing.as_dict()?;
        if let Some(m) = dict.as_mutable() {
            return Some(m);
        }
        let promoted = dict.mutable_copy();
        self.inner.items.borrow_mut()[index] = Value::Dict(promoted.as_dict());
        Some(promoted)
    }

    /// The dirty bit.
    pub fn is_changed(&self) -> bool {
        self.inner.changed.get()
    }

    /// Set or clear the dirty bit.
    pub fn set_changed(&self, changed: bool) {
        self.inner.changed.set(changed);
    }

    /// The array this overlay was copied from, if any.
    pub fn source(&self) -> Option<&Array> {
        self.inner.source.as_ref()
    }
}

impl Default for MutableArray {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MutableArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.to_items()).finish()
    }
}
