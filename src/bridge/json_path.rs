//! Dotted-path JSON extraction.
//!
//! Deliberately not a full JSONPath implementation: the registry only ever
//! stores plain `a.b.c` paths (e.g. `DS18B20.Temperature`), so a
//! `.`-split walk over `serde_json::Value` is the whole requirement.

use serde_json::Value;

/// Resolve `path` (dot-separated object keys) against `value`, returning
/// `None` if any segment is missing or the value isn't an object at that
/// point.
pub fn resolve<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |cur, segment| cur.get(segment))
}

/// Render a terminal JSON scalar to the string form a sensor value takes
/// downstream: numbers use the shortest round-trippable
/// decimal with no unneeded trailing zeros (`23.0` -> `"23"`, `23.5` ->
/// `"23.5"`), strings pass through as-is, bools as `true`/`false`.
/// Returns `None` for non-scalar (object/array/null) terminals.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(format_number(n)),
        Value::Null | Value::Object(_) | Value::Array(_) => None,
    }
}

fn format_number(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    let f = n.as_f64().unwrap_or(0.0);
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        let mut s = format!("{f}");
        if s.contains('e') || s.contains('E') {
            s = format!("{f:.10}");
            while s.ends_with('0') {
                s.pop();
            }
            if s.ends_with('.') {
                s.pop();
            }
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_dotted_path() {
        let payload = json!({"Time": "…", "DS18B20": {"Id": "x", "Temperature": 23.0}});
        let v = resolve(&payload, "DS18B20.Temperature").unwrap();
        assert_eq!(scalar_to_string(v).unwrap(), "23");
    }

    #[test]
    fn test_resolve_missing_path_is_none() {
        let payload = json!({"a": 1});
        assert!(resolve(&payload, "a.b.c").is_none());
    }

    #[test]
    fn test_float_with_fraction_keeps_digits() {
        assert_eq!(scalar_to_string(&json!(23.5)).unwrap(), "23.5");
    }

    #[test]
    fn test_whole_float_drops_trailing_zero() {
        assert_eq!(scalar_to_string(&json!(23.0)).unwrap(), "23");
    }

    #[test]
    fn test_string_scalar_passthrough() {
        assert_eq!(scalar_to_string(&json!("ON")).unwrap(), "ON");
    }

    #[test]
    fn test_object_terminal_is_none() {
        assert!(scalar_to_string(&json!({"a": 1})).is_none());
    }
}
