//! Deterministic JSON serialization.
//!
//! Object keys are emitted in lexicographic order with no insignificant
//! whitespace, so equal documents always hash equally regardless of how
//! their maps were built.

use serde_json::Value;

/// Canonical JSON string of `value`: sorted keys, compact separators, UTF-8.
/// Numbers round-trip through `serde_json` untouched, so integers stay
/// integers.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

/// Canonical JSON as bytes, the form hashing and fingerprinting consume.
pub fn canonical_json_bytes(value: &Value) -> Vec<u8> {
    canonical_json(value).into_bytes()
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {
            // Scalars already have a single JSON rendering.
            out.push_str(&value.to_string());
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                if let Some(v) = map.get(key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn keys_are_sorted_and_compact() {
        let value = json!({"b": 1, "a": {"z": true, "m": [1, 2]}});
        assert_eq!(canonical_json(&value), r#"{"a":{"m":[1,2],"z":true},"b":1}"#);
    }

    #[test]
    fn integers_stay_integers() {
        let value = json!({"count": 42, "ratio": 0.5});
        let rendered = canonical_json(&value);
        assert!(rendered.contains("\"count\":42"));
        assert!(!rendered.contains("42.0"));
    }

    #[test]
    fn strings_are_escaped_like_serde() {
        let value = json!({"msg": "line\n\"quote\""});
        assert_eq!(canonical_json(&value), r#"{"msg":"line\n\"quote\""}"#);
    }

    proptest! {
        #[test]
        fn canonical_form_reparses_to_the_same_value(
            keys in proptest::collection::vec("[a-z]{1,8}", 0..6),
            nums in proptest::collection::vec(any::<i64>(), 0..6),
        ) {
            let mut map = serde_json::Map::new();
            for (k, n) in keys.iter().zip(nums.iter()) {
                map.insert(k.clone(), json!(n));
            }
            let value = Value::Object(map);
            let canon = canonical_json(&value);
            let reparsed: Value = serde_json::from_str(&canon).unwrap();
            prop_assert_eq!(reparsed, value);
        }
    }
}
