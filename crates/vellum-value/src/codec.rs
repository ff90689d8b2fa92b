//! Binary codec for value trees.
//!
//! Values are tagged; integers use zigzag varints, lengths and counts plain
//! varints. Tag `REF` encodes a previously-written value as a varint offset
//! into the same buffer; decoding one returns the node decoded at that
//! offset, so shared subtrees stay shared in memory.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::rc::Rc;

use vellum_error::{Result, VellumError};
use vellum_types::varint::{read_uvarint, write_uvarint, zigzag_decode, zigzag_encode};

use crate::value::{Array, Dict, Scope, Value};

const TAG_NULL: u8 = 0x00;
const TAG_FALSE: u8 = 0x01;
const TAG_TRUE: u8 = 0x02;
const TAG_INT: u8 = 0x03;
const TAG_FLOAT: u8 = 0x04;
const TAG_STRING: u8 = 0x05;
const TAG_DATA: u8 = 0x06;
const TAG_ARRAY: u8 = 0x07;
const TAG_DICT: u8 = 0x08;
const TAG_REF: u8 = 0x09;

/// Streaming encoder for value trees.
///
/// String values are de-duplicated automatically (byte-by-byte); composite
/// values only through [`crate::DedupEncoder`].
#[derive(Default)]
pub struct Encoder {
    buf: Vec<u8>,
    written_strings: HashMap<Rc<str>, u64>,
}

impl Encoder {
    /// A fresh encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current write position.
    pub(crate) fn offset(&self) -> u64 {
        self.buf.len() as u64
    }

    /// Finish and take the encoded bytes.
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }

    /// Encode a value recursively. Returns the offset it was written at.
    pub fn write_value(&mut self, value: &Value) -> u64 {
        let start = self.offset();
        match value {
            Value::Null => self.buf.push(TAG_NULL),
            Value::Bool(false) => self.buf.push(TAG_FALSE),
            Value::Bool(true) => self.buf.push(TAG_TRUE),
            Value::Int(i) => {
                self.buf.push(TAG_INT);
                write_uvarint(&mut self.buf, zigzag_encode(*i));
            }
            Value::Float(x) => {
                self.buf.push(TAG_FLOAT);
                self.buf.extend_from_slice(&x.to_le_bytes());
            }
            Value::String(s) => return self.write_string(s),
            Value::Data(d) => {
                self.buf.push(TAG_DATA);
                write_uvarint(&mut self.buf, d.len() as u64);
                self.buf.extend_from_slice(d);
            }
            Value::Array(a) => {
                let items = a.to_items();
                self.begin_array(items.len());
                for item in &items {
                    self.write_value(item);
                }
            }
            Value::Dict(d) => {
                let entries = d.to_entries();
                self.begin_dict(entries.len());
                for (key, item) in &entries {
                    self.write_key(key);
                    self.write_value(item);
                }
            }
        }
        start
    }

    fn write_string(&mut self, s: &Rc<str>) -> u64 {
        if let Some(&offset) = self.written_strings.get(s) {
            let start = self.offset();
            self.write_ref(offset);
            return start;
        }
        let start = self.offset();
        self.buf.push(TAG_STRING);
        write_uvarint(&mut self.buf, s.len() as u64);
        self.buf.extend_from_slice(s.as_bytes());
        self.written_strings.insert(s.clone(), start);
        start
    }

    pub(crate) fn begin_array(&mut self, count: usize) -> u64 {
        let start = self.offset();
        self.buf.push(TAG_ARRAY);
        write_uvarint(&mut self.buf, count as u64);
        start
    }

    pub(crate) fn begin_dict(&mut self, count: usize) -> u64 {
        let start = self.offset();
        self.buf.push(TAG_DICT);
        write_uvarint(&mut self.buf, count as u64);
        start
    }

    pub(crate) fn write_key(&mut self, key: &str) {
        write_uvarint(&mut self.buf, key.len() as u64);
        self.buf.extend_from_slice(key.as_bytes());
    }

    pub(crate) fn write_data_raw(&mut self, data: &[u8]) -> u64 {
        let start = self.offset();
        self.buf.push(TAG_DATA);
        write_uvarint(&mut self.buf, data.len() as u64);
        self.buf.extend_from_slice(data);
        start
    }

    pub(crate) fn write_ref(&mut self, offset: u64) {
        self.buf.push(TAG_REF);
        write_uvarint(&mut self.buf, offset);
    }
}

/// Decode a buffer into a value tree with no scope attached.
pub fn decode(data: &[u8]) -> Result<Value> {
    decode_scoped(data, None)
}

/// Decode a buffer, stamping `scope` onto every composite node.
///
/// The whole buffer must be consumed; trailing bytes are corruption.
pub fn decode_scoped(data: &[u8], scope: Option<Scope>) -> Result<Value> {
    let mut decoder = Decoder {
        data,
        pos: 0,
        seen: HashMap::new(),
        scope,
    };
    let value = decoder.read_value()?;
    if decoder.pos != data.len() {
        return Err(corrupt("trailing bytes after value"));
    }
    Ok(value)
}

fn corrupt(detail: &str) -> VellumError {
    VellumError::corrupt(detail.to_owned())
}

struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
    /// Offset -> decoded node, for resolving back-references to the same
    /// shared `Rc`.
    seen: HashMap<u64, Value>,
    scope: Option<Scope>,
}

impl<'a> Decoder<'a> {
    fn read_byte(&mut self) -> Result<u8> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or_else(|| corrupt("unexpected end of data"))?;
        self.pos += 1;
        Ok(b)
    }

    fn read_uvarint(&mut self) -> Result<u64> {
        let (v, n) =
            read_uvarint(&self.data[self.pos..]).ok_or_else(|| corrupt("bad varint"))?;
        self.pos += n;
        Ok(v)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&e| e <= self.data.len())
            .ok_or_else(|| corrupt("length overruns data"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_value(&mut self) -> Result<Value> {
        let start = self.pos as u64;
        let tag = self.read_byte()?;
        let value = match tag {
            TAG_NULL => Value::Null,
            TAG_FALSE => Value::Bool(false),
            TAG_TRUE => Value::Bool(true),
            TAG_INT => Value::Int(zigzag_decode(self.read_uvarint()?)),
            TAG_FLOAT => {
                let bytes: [u8; 8] = self
                    .read_bytes(8)?
                    .try_into()
                    .expect("read_bytes returned 8 bytes");
                Value::Float(f64::from_le_bytes(bytes))
            }
            TAG_STRING => {
                let len = self.read_uvarint()? as usize;
                let text = std::str::from_utf8(self.read_bytes(len)?)
                    .map_err(|_| corrupt("string is not UTF-8"))?;
                let value = Value::String(Rc::from(text));
                self.seen.insert(start, value.clone());
                value
            }
            TAG_DATA => {
                let len = self.read_uvarint()? as usize;
                let value = Value::Data(Rc::from(self.read_bytes(len)?));
                self.seen.insert(start, value.clone());
                value
            }
            TAG_ARRAY => {
                let count = self.read_uvarint()? as usize;
                if count > self.data.len() - self.pos {
                    return Err(corrupt("array count overruns data"));
                }
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.read_value()?);
                }
                let value = Value::Array(Array::shared(items, self.scope.clone()));
                self.seen.insert(start, value.clone());
                value
            }
            TAG_DICT => {
                let count = self.read_uvarint()? as usize;
                if count > self.data.len() - self.pos {
                    return Err(corrupt("dict count overruns data"));
                }
                let mut entries = BTreeMap::new();
                for _ in 0..count {
                    let key_len = self.read_uvarint()? as usize;
                    let key = std::str::from_utf8(self.read_bytes(key_len)?)
                        .map_err(|_| corrupt("dict key is not UTF-8"))?
                        .to_owned();
                    let item = self.read_value()?;
                    entries.insert(key, item);
                }
                let value = Value::Dict(Dict::shared(entries, self.scope.clone()));
                self.seen.insert(start, value.clone());
                value
            }
            TAG_REF => {
                let offset = self.read_uvarint()?;
                self.seen
                    .get(&offset)
                    .cloned()
                    .ok_or_else(|| corrupt("dangling back-reference"))?
            }
            _ => return Err(corrupt("unknown value tag")),
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::MutableDict;

    fn roundtrip(v: &Value) -> Value {
        let mut enc = Encoder::new();
        enc.write_value(v);
        decode(&enc.finish()).unwrap()
    }

    #[test]
    fn scalar_roundtrip() {
        for v in [
            Value::Null,
            Value::Bool(true),
            Value::Bool(false),
            Value::Int(0),
            Value::Int(-12345),
            Value::Int(i64::MAX),
            Value::Float(3.25),
            Value::string("hello"),
            Value::data([1u8, 2, 3]),
        ] {
            assert_eq!(roundtrip(&v), v);
        }
    }

    #[test]
    fn nested_roundtrip() {
        let m = MutableDict::new();
        m.set("name", Value::string("doc"));
        m.set(
            "tags",
            Value::Array(Array::from_items(vec![
                Value::string("a"),
                Value::string("b"),
            ])),
        );
        let v = Value::Dict(m.as_dict());
        assert_eq!(roundtrip(&v), v);
    }

    #[test]
    fn repeated_strings_share_after_decode() {
        let m = MutableDict::new();
        let s = Value::string("repeated");
        m.set("a", s.clone());
        m.set("b", s);
        let decoded = roundtrip(&Value::Dict(m.as_dict()));
        let d = decoded.as_dict().unwrap();
        let a = d.get("a").unwrap();
        let b = d.get("b").unwrap();
        assert!(a.is_identical(&b), "decoded strings should alias");
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode(&[]).is_err());
        assert!(decode(&[0xFE]).is_err());
        assert!(decode(&[TAG_STRING, 0x05, b'a']).is_err());
        assert!(decode(&[TAG_REF, 0x00]).is_err());
        // Trailing bytes after a valid value.
        assert!(decode(&[TAG_NULL, TAG_NULL]).is_err());
        // Array that claims more items than the buffer can hold.
        assert!(decode(&[TAG_ARRAY, 0xFF, 0x7F]).is_err());
    }

    #[test]
    fn scope_is_stamped_on_all_composites() {
        let m = MutableDict::new();
        let inner = MutableDict::new();
        inner.set("x", Value::Int(1));
        m.set("inner", Value::Dict(inner.as_dict()));
        let mut enc = Encoder::new();
        enc.write_value(&Value::Dict(m.as_dict()));
        let scope: Scope = Rc::new("owner".to_owned());
        let decoded = decode_scoped(&enc.finish(), Some(scope)).unwrap();
        let d = decoded.as_dict().unwrap();
        assert!(d.scope().is_some());
        let child = d.get("inner").unwrap();
        let child_scope = child.scope().unwrap();
        assert_eq!(*child_scope.downcast::<String>().unwrap(), "owner");
    }
}
