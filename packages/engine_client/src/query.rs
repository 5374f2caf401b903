//! Query strings from serializable parameter objects.

use serde::Serialize;
use serde_json::Value;
use std::fmt::Write;

use crate::error::{EngineError, Result};

/// Serialize a flat parameter struct into `k=v&k=v`.
///
/// `None` fields are skipped. Nested maps and arrays are sent as JSON, which
/// is how the daemon expects `filters`.
pub fn to_query_string<Q: Serialize + ?Sized>(params: &Q) -> Result<String> {
    let value = serde_json::to_value(params)?;
    let map = match value {
        Value::Object(map) => map,
        Value::Null => return Ok(String::new()),
        other => {
            return Err(EngineError::InvalidArgument(format!(
                "query parameters must serialize to an object, got {other}"
            )));
        }
    };

    let mut entries: Vec<(String, Value)> = map.into_iter().collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut out = String::new();
    for (key, value) in entries {
        let value = match value {
            Value::Null => continue,
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => s,
            nested @ (Value::Array(_) | Value::Object(_)) => nested.to_string(),
        };
        if !out.is_empty() {
            out.push('&');
        }
        out.push_str(&encode_component(&key));
        out.push('=');
        out.push_str(&encode_component(&value));
    }
    Ok(out)
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
pub fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => {
                let _ = write!(out, "%{byte:02X}");
            }
        }
    }
    out
}
