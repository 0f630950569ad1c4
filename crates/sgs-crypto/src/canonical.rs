//! Canonical JSON encoding of object payloads.
//!
//! The canonical form has object keys sorted by code point, no whitespace,
//! array order preserved and strings escaped the way `serde_json` escapes
//! them. Integral floats within the exactly representable range are written
//! as integers, so `1.0`, `1e0` and `1` share one canonical form. Other
//! numbers use `serde_json`'s round-trip form.

use serde_json::{Map, Number, Value};

use crate::hasher::HasherError;

/// Payload key that carries an object's own id. Excluded from hashing.
pub const ID_KEY: &str = "id";

/// Largest integer an `f64` holds without rounding (2^53 - 1).
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Parse a textual payload into a JSON value.
pub fn parse_payload(text: &str) -> Result<Value, HasherError> {
    serde_json::from_str(text).map_err(|e| HasherError::Malformed(e.to_string()))
}

/// Canonical bytes of any JSON value.
pub fn canonical_bytes(value: &Value) -> Result<Vec<u8>, HasherError> {
    let mut out = Vec::new();
    write_value(&mut out, value)?;
    Ok(out)
}

/// Canonical bytes of an object payload, ready for hashing.
///
/// The payload must be a JSON object. Its top-level [`ID_KEY`] entry is left
/// out so that a payload hashes the same before and after the store stamps
/// the assigned id into it.
pub fn normalize_payload(payload: &Value) -> Result<Vec<u8>, HasherError> {
    let map = payload.as_object().ok_or(HasherError::NotAnObject {
        found: json_type_name(payload),
    })?;
    let mut out = Vec::new();
    write_object(&mut out, map, Some(ID_KEY))?;
    Ok(out)
}

fn write_value(out: &mut Vec<u8>, value: &Value) -> Result<(), HasherError> {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => write_number(out, n),
        Value::String(s) => write_string(out, s)?,
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(out, item)?;
            }
            out.push(b']');
        }
        Value::Object(map) => write_object(out, map, None)?,
    }
    Ok(())
}

fn write_object(
    out: &mut Vec<u8>,
    map: &Map<String, Value>,
    skip: Option<&str>,
) -> Result<(), HasherError> {
    let mut keys: Vec<&String> = map
        .keys()
        .filter(|k| Some(k.as_str()) != skip)
        .collect();
    keys.sort();

    out.push(b'{');
    for (i, key) in keys.into_iter().enumerate() {
        if i > 0 {
            out.push(b',');
        }
        write_string(out, key)?;
        out.push(b':');
        write_value(out, &map[key])?;
    }
    out.push(b'}');
    Ok(())
}

fn write_number(out: &mut Vec<u8>, n: &Number) {
    if n.is_f64() {
        if let Some(f) = n.as_f64() {
            if f.is_finite() && f.fract() == 0.0 && f.abs() <= MAX_EXACT_INTEGER {
                // `-0.0` lands here too and is written as `0`.
                out.extend_from_slice((f as i64).to_string().as_bytes());
                return;
            }
        }
    }
    out.extend_from_slice(n.to_string().as_bytes());
}

fn write_string(out: &mut Vec<u8>, s: &str) -> Result<(), HasherError> {
    serde_json::to_writer(&mut *out, s).map_err(|e| HasherError::Malformed(e.to_string()))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
