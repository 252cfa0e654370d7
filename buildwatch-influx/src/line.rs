//! InfluxDB line protocol rendering of build and task documents.
//!
//! String values become tags, numbers and booleans become fields. Keys listed
//! in [`FLOAT_FIELDS`] are parsed into float fields instead of tags.

use buildwatch::publisher::documents::Document;
use serde_json::Value;

/// String-valued document keys that are written as float fields.
pub const FLOAT_FIELDS: &[&str] = &["cacheRatio"];

// Every escape set contains the space. Line breaks cannot be escaped in the
// protocol and are written as an escaped space.
fn escape(value: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        let c = if matches!(c, '\n' | '\r') { ' ' } else { c };
        if c == '\\' || special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

pub fn escape_measurement(value: &str) -> String {
    escape(value, &[',', ' '])
}

/// Tag keys, tag values and field keys.
pub fn escape_key(value: &str) -> String {
    escape(value, &[',', '=', ' '])
}

/// Render one point. `None` when the document has no field, which the
/// protocol does not allow.
pub fn to_line(
    measurement: &str,
    document: &Document,
    timestamp_ms: Option<u64>,
) -> Option<String> {
    let mut tags = Vec::new();
    let mut fields = Vec::new();
    for (key, value) in document {
        match value {
            Value::String(s) if FLOAT_FIELDS.contains(&key.as_str()) => {
                if let Ok(number) = s.parse::<f64>() {
                    fields.push(format!("{}={}", escape_key(key), number));
                }
            }
            Value::String(s) if !s.is_empty() => {
                tags.push(format!("{}={}", escape_key(key), escape_key(s)));
            }
            Value::Number(n) if n.is_u64() || n.is_i64() => {
                fields.push(format!("{}={}i", escape_key(key), n));
            }
            Value::Number(n) => fields.push(format!("{}={}", escape_key(key), n)),
            Value::Bool(b) => fields.push(format!("{}={}", escape_key(key), b)),
            _ => {}
        }
    }
    if fields.is_empty() {
        return None;
    }

    let mut line = escape_measurement(measurement);
    for tag in tags {
        line.push(',');
        line.push_str(&tag);
    }
    line.push(' ');
    line.push_str(&fields.join(","));
    if let Some(ts) = timestamp_ms {
        line.push(' ');
        line.push_str(&ts.to_string());
    }
    Some(line)
}
