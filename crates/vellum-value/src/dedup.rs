//! De-duplicating encoder.
//!
//! Wraps an [`Encoder`] and detects repeated array/dict/data values,
//! writing them only once; later appearances become back-references. This
//! turns the encoded tree into a DAG, which is invisible to readers since
//! the data is immutable. Arrays and dicts are matched by node identity,
//! data byte-by-byte; the base encoder already de-duplicates strings.

use std::collections::HashMap;

use crate::codec::Encoder;
use crate::value::Value;

/// See module docs.
pub struct DedupEncoder<'a> {
    enc: &'a mut Encoder,
    written: HashMap<usize, u64>,
    written_data: HashMap<Vec<u8>, u64>,
}

impl<'a> DedupEncoder<'a> {
    /// Wrap an encoder.
    pub fn new(enc: &'a mut Encoder) -> Self {
        Self {
            enc,
            written: HashMap::new(),
            written_data: HashMap::new(),
        }
    }

    /// Write `value`, substituting a back-reference if it has already been
    /// written through this wrapper.
    ///
    /// `depth` is how many levels of nesting to check for duplicates: 0
    /// means just this value, 1 includes its children, and so on.
    pub fn write_value(&mut self, value: &Value, depth: u32) {
        match value {
            Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::String(_) => {
                self.enc.write_value(value);
            }
            Value::Data(d) => {
                if let Some(&offset) = self.written_data.get(d.as_ref()) {
                    self.enc.write_ref(offset);
                } else {
                    let offset = self.enc.write_data_raw(d);
                    self.written_data.insert(d.to_vec(), offset);
                }
            }
            Value::Array(a) => {
                if let Some(&offset) = self.written.get(&a.ptr_token()) {
                    self.enc.write_ref(offset);
                    return;
                }
                let items = a.to_items();
                let offset = self.enc.begin_array(items.len());
                for item in &items {
                    self.write_child(item, depth);
                }
                self.written.insert(a.ptr_token(), offset);
            }
            Value::Dict(d) => {
                if let Some(&offset) = self.written.get(&d.ptr_token()) {
                    self.enc.write_ref(offset);
                    return;
                }
                let entries = d.to_entries();
                let offset = self.enc.begin_dict(entries.len());
                for (key, item) in &entries {
                    self.enc.write_key(key);
                    self.write_child(item, depth);
                }
                self.written.insert(d.ptr_token(), offset);
            }
        }
    }

    fn write_child(&mut self, value: &Value, depth: u32) {
        if depth > 0 {
            self.write_value(value, depth - 1);
        } else {
            self.enc.write_value(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode;
    use crate::value::{Array, MutableDict};

    fn encode_array(items: Vec<Value>, depth: u32) -> Value {
        let mut enc = Encoder::new();
        {
            let mut dd = DedupEncoder::new(&mut enc);
            dd.write_value(&Value::Array(Array::from_items(items)), depth);
        }
        decode(&enc.finish()).unwrap()
    }

    #[test]
    fn repeated_dict_becomes_shared() {
        let rev = MutableDict::new();
        rev.set("body", Value::string("payload"));
        let rev_value = Value::Dict(rev.as_dict());

        let decoded = encode_array(vec![rev_value.clone(), rev_value.clone()], 3);
        let arr = decoded.as_array().unwrap();
        assert_eq!(arr.len(), 2);
        let a = arr.get(0).unwrap();
        let b = arr.get(1).unwrap();
        assert!(a.is_identical(&b), "second write should be a back-reference");
        assert_eq!(a, rev_value);
    }

    #[test]
    fn repeated_data_matched_by_bytes() {
        let d1 = Value::data([9u8, 9, 9]);
        let d2 = Value::data([9u8, 9, 9]); // distinct Rc, same bytes
        assert!(!d1.is_identical(&d2));

        let decoded = encode_array(vec![d1, d2], 1);
        let arr = decoded.as_array().unwrap();
        assert!(arr.get(0).unwrap().is_identical(&arr.get(1).unwrap()));
    }

    #[test]
    fn depth_limits_child_dedup() {
        let inner = Value::Array(Array::from_items(vec![Value::Int(1), Value::Int(2)]));
        let outer1 = Value::Array(Array::from_items(vec![inner.clone()]));
        let outer2 = Value::Array(Array::from_items(vec![inner]));

        // Depth 1: the outers are checked, their shared child is not.
        let shallow = encode_array(vec![outer1.clone(), outer2.clone()], 1);
        let arr = shallow.as_array().unwrap();
        let c1 = arr.get(0).unwrap().as_array().unwrap().get(0).unwrap();
        let c2 = arr.get(1).unwrap().as_array().unwrap().get(0).unwrap();
        assert_eq!(c1, c2);
        assert!(!c1.is_identical(&c2));

        // Depth 2: the shared child collapses to one node.
        let deep = encode_array(vec![outer1, outer2], 2);
        let arr = deep.as_array().unwrap();
        let c1 = arr.get(0).unwrap().as_array().unwrap().get(0).unwrap();
        let c2 = arr.get(1).unwrap().as_array().unwrap().get(0).unwrap();
        assert!(c1.is_identical(&c2));
    }
}
