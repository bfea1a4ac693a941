use serde_json::{Map, Value};

use crate::errors::{HooklineError, Result};

/// Serializes a value to pretty JSON with canonical error handling.
pub fn to_pretty_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|err| HooklineError::SerializationError(err.to_string()))
}

/// Parses an inbound event body.
///
/// Bodies without parseable structure become an empty object; JSON that is
/// not an object is wrapped under `_raw` so dotted paths still apply.
pub fn payload_from_bytes(input: &[u8]) -> Value {
    match serde_json::from_slice::<Value>(input) {
        Ok(Value::Object(map)) => Value::Object(map),
        Ok(other) => {
            let mut map = Map::new();
            map.insert("_raw".to_string(), other);
            Value::Object(map)
        }
        Err(_) => Value::Object(Map::new()),
    }
}

/// Returns the object map of `value`, wrapping non-objects under `key`.
pub fn into_object(value: Value, key: &str) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert(key.to_string(), other);
            map
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pretty_json_is_parseable() {
        let value = json!({"key": "value"});
        let text = to_pretty_json(&value).expect("serialize");
        let decoded: Value = serde_json::from_str(&text).expect("deserialize");
        assert_eq!(decoded["key"], "value");
    }

    #[test]
    fn malformed_body_becomes_empty_object() {
        assert_eq!(payload_from_bytes(b"not json {"), json!({}));
        assert_eq!(payload_from_bytes(b""), json!({}));
    }

    #[test]
    fn scalar_body_is_wrapped() {
        assert_eq!(payload_from_bytes(b"[1,2]"), json!({"_raw": [1, 2]}));
        assert_eq!(payload_from_bytes(br#"{"a":1}"#), json!({"a": 1}));
    }
}
