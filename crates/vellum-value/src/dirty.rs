//! Dirty-bit scanning over mutable overlays.
//!
//! An immutable node can never contain a mutable child, so the scan skips
//! the children of anything immutable.

use crate::iter::DeepIterator;
use crate::value::Value;

/// Whether any mutable overlay anywhere under `root` has its dirty bit set.
pub fn any_changed(root: &Value) -> bool {
    let mut it = DeepIterator::new(root);
    while let Some(v) = it.value() {
        match &v {
            Value::Dict(d) => match d.as_mutable() {
                Some(m) => {
                    if m.is_changed() {
                        return true;
                    }
                }
                None => it.skip_children(),
            },
            Value::Array(a) => match a.as_mutable() {
                Some(m) => {
                    if m.is_changed() {
                        return true;
                    }
                }
                None => it.skip_children(),
            },
            _ => {}
        }
        it.advance();
    }
    false
}

/// Clear the dirty bit on every mutable overlay under `root`.
pub fn clear_changed(root: &Value) {
    let mut it = DeepIterator::new(root);
    while let Some(v) = it.value() {
        match &v {
            Value::Dict(d) => match d.as_mutable() {
                Some(m) => m.set_changed(false),
                None => it.skip_children(),
            },
            Value::Array(a) => match a.as_mutable() {
                Some(m) => m.set_changed(false),
                None => it.skip_children(),
            },
            _ => {}
        }
        it.advance();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Dict, MutableDict, Value};

    #[test]
    fn fresh_overlay_is_clean() {
        let m = MutableDict::new();
        assert!(!any_changed(&Value::Dict(m.as_dict())));
    }

    #[test]
    fn nested_mutation_is_found_and_cleared() {
        let root = MutableDict::new();
        let child = MutableDict::new();
        root.set("child", Value::Dict(child.as_dict()));
        root.set_changed(false); // pretend the structure itself is saved
        assert!(!any_changed(&Value::Dict(root.as_dict())));

        child.set("x", Value::Int(1));
        let v = Value::Dict(root.as_dict());
        assert!(any_changed(&v));

        clear_changed(&v);
        assert!(!any_changed(&v));
        assert!(!child.is_changed());
    }

    #[test]
    fn immutable_tree_is_never_dirty() {
        let v = Value::Dict(Dict::empty());
        assert!(!any_changed(&v));
        clear_changed(&v); // no-op
    }
}
