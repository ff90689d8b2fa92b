//! Depth-first traversal over a value tree.

use crate::value::Value;

/// Visits a value and all of its descendants, depth-first, with the option
/// to skip the children of the value currently in view.
///
/// ```
/// # use vellum_value::{DeepIterator, MutableDict, Value};
/// let root = MutableDict::new();
/// root.set("a", Value::Int(1));
/// let mut it = DeepIterator::new(&Value::Dict(root.as_dict()));
/// let mut seen = 0;
/// while let Some(_v) = it.value() {
///     seen += 1;
///     it.advance();
/// }
/// assert_eq!(seen, 2); // the dict and the int
/// ```
pub struct DeepIterator {
    current: Option<Value>,
    stack: Vec<std::vec::IntoIter<Value>>,
    skip: bool,
}

impl DeepIterator {
    /// Start at `root`. The root itself is the first value visited.
    pub fn new(root: &Value) -> Self {
        Self {
            current: Some(root.clone()),
            stack: Vec::new(),
            skip: false,
        }
    }

    /// The value currently in view, or `None` once the walk is done.
    pub fn value(&self) -> Option<Value> {
        self.current.clone()
    }

    /// Do not descend into the current value's children on the next
    /// [`DeepIterator::advance`].
    pub fn skip_children(&mut self) {
        self.skip = true;
    }

    /// Move to the next value in depth-first order.
    pub fn advance(&mut self) {
        if let Some(current) = self.current.take() {
            if !self.skip {
                match &current {
                    Value::Array(a) => self.stack.push(a.to_items().into_iter()),
                    Value::Dict(d) => {
                        let children: Vec<Value> =
                            d.to_entries().into_iter().map(|(_, v)| v).collect();
                        self.stack.push(children.into_iter());
                    }
                    _ => {}
                }
            }
            self.skip = false;
        }
        while let Some(top) = self.stack.last_mut() {
            if let Some(next) = top.next() {
                self.current = Some(next);
                return;
            }
            self.stack.pop();
        }
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Array, MutableDict};

    fn tree() -> Value {
        let root = MutableDict::new();
        root.set("n", Value::Int(1));
        root.set(
            "arr",
            Value::Array(Array::from_items(vec![Value::Int(2), Value::Int(3)])),
        );
        let child = MutableDict::new();
        child.set("deep", Value::Int(4));
        root.set("child", Value::Dict(child.as_dict()));
        Value::Dict(root.as_dict())
    }

    #[test]
    fn visits_every_value() {
        let mut it = DeepIterator::new(&tree());
        let mut ints = Vec::new();
        while let Some(v) = it.value() {
            if let Value::Int(i) = v {
                ints.push(i);
            }
            it.advance();
        }
        ints.sort_unstable();
        assert_eq!(ints, vec![1, 2, 3, 4]);
    }

    #[test]
    fn skip_children_prunes_subtree() {
        let mut it = DeepIterator::new(&tree());
        let mut ints = Vec::new();
        while let Some(v) = it.value() {
            match v {
                Value::Array(_) => it.skip_children(),
                Value::Int(i) => ints.push(i),
                _ => {}
            }
            it.advance();
        }
        ints.sort_unstable();
        assert_eq!(ints, vec![1, 4]);
    }

    #[test]
    fn scalar_root() {
        let mut it = DeepIterator::new(&Value::Int(9));
        assert_eq!(it.value(), Some(Value::Int(9)));
        it.advance();
        assert!(it.value().is_none());
    }
}
