//! Canonical JSON rendering.
//!
//! Revision-ID digests hash the JSON form of a body, so it must be
//! deterministic: dict keys are emitted in sorted order (serde_json's
//! default map is ordered) and binary data is rendered as lowercase hex.

use vellum_error::{Result, VellumError};

use crate::value::Value;

/// Render `value` as canonical JSON bytes.
///
/// Fails on non-finite floats, which have no JSON representation.
pub fn to_canonical_json(value: &Value) -> Result<Vec<u8>> {
    let json = to_json_value(value)?;
    serde_json::to_vec(&json).map_err(|e| VellumError::internal(format!("JSON encoding: {e}")))
}

fn to_json_value(value: &Value) -> Result<serde_json::Value> {
    use serde_json::Value as Json;
    Ok(match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::Number((*i).into()),
        Value::Float(x) => serde_json::Number::from_f64(*x)
            .map(Json::Number)
            .ok_or_else(|| {
                VellumError::invalid_parameter("non-finite float has no JSON form")
            })?,
        Value::String(s) => Json::String(s.to_string()),
        Value::Data(d) => {
            let mut hex = String::with_capacity(d.len() * 2);
            for b in d.iter() {
                use std::fmt::Write;
                write!(hex, "{b:02x}").expect("write to String");
            }
            Json::String(hex)
        }
        Value::Array(a) => Json::Array(
            a.to_items()
                .iter()
                .map(to_json_value)
                .collect::<Result<_>>()?,
        ),
        Value::Dict(d) => {
            let mut map = serde_json::Map::new();
            for (k, v) in d.to_entries() {
                map.insert(k, to_json_value(&v)?);
            }
            Json::Object(map)
        }
    })
}
