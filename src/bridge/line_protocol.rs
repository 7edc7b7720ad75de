//! InfluxDB line-protocol encoder.
//!
//! A pure, deterministic function: same input always produces the same
//! line, tags and fields always in lexicographic key order, no I/O.

use crate::error::HubError;
use std::collections::BTreeMap;

/// A single field value. Line protocol distinguishes these by suffix/quoting
/// on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
}

/// Encode one line-protocol row. Tags and fields are `BTreeMap`s so
/// iteration order is lexicographic by key without an explicit sort.
///
/// Fails with [`HubError::InvalidMetric`] if `measurement` is empty, `fields`
/// is empty, or (defensively — the type system already rules this out for
/// callers building a `FieldValue`) a field fails to render.
pub fn encode_line(
    measurement: &str,
    tags: &BTreeMap<String, String>,
    fields: &BTreeMap<String, FieldValue>,
    timestamp_ns: i64,
) -> Result<String, HubError> {
    if measurement.is_empty() {
        return Err(HubError::InvalidMetric("measurement name is empty".into()));
    }
    if fields.is_empty() {
        return Err(HubError::InvalidMetric("field map is empty".into()));
    }

    let mut line = escape_key(measurement);

    for (key, value) in tags {
        if value.is_empty() {
            continue;
        }
        line.push(',');
        line.push_str(&escape_key(key));
        line.push('=');
        line.push_str(&escape_key(value));
    }

    line.push(' ');
    let rendered: Vec<String> = fields
        .iter()
        .map(|(key, value)| format!("{}={}", escape_key(key), render_field(value)))
        .collect();
    line.push_str(&rendered.join(","));

    line.push(' ');
    line.push_str(&timestamp_ns.to_string());
    line.push('\n');

    Ok(line)
}

fn render_field(value: &FieldValue) -> String {
    match value {
        FieldValue::Int(i) => format!("{i}i"),
        FieldValue::Float(f) => render_float(*f),
        FieldValue::Bool(b) => b.to_string(),
        FieldValue::String(s) => format!("\"{}\"", escape_string_field(s)),
    }
}

/// Decimal notation without exponent.
fn render_float(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

/// Escapes space, comma, and `=` — used for measurement, tag keys, tag
/// values, and field keys alike.
pub fn escape_key(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, ' ' | ',' | '=') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Escapes backslash and double-quote inside a quoted string field value.
pub fn escape_string_field(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
