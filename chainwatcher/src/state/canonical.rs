// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Canonical JSON encoding for state payloads.
//!
//! Two writers of the same logical state must emit byte-identical payloads,
//! so object keys are emitted in sorted order and arrays of entities (every
//! element an object carrying an `"id"`) are sorted by that id. The encoder
//! never relies on `serde_json`'s map ordering.

use serde_json::Value;

/// Rebuild `value` with sorted object keys and entity arrays sorted by `"id"`.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Array(items) => {
            let mut items: Vec<Value> = items.iter().map(canonicalize).collect();
            if is_entity_array(&items) {
                items.sort_by(|a, b| entity_id(a).cmp(&entity_id(b)));
            }
            Value::Array(items)
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = serde_json::Map::new();
            for key in keys {
                out.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

/// Serialize to canonical bytes: sorted keys, sorted entity arrays, no
/// insignificant whitespace.
pub fn canonical_json_bytes(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    write_value(&canonicalize(value), &mut out);
    out
}

fn is_entity_array(items: &[Value]) -> bool {
    !items.is_empty()
        && items
            .iter()
            .all(|item| item.as_object().map(|o| o.contains_key("id")).unwrap_or(false))
}

fn entity_id(value: &Value) -> String {
    match &value["id"] {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn write_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Object(map) => {
            out.push(b'{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(&Value::String((*key).clone()), out);
                out.push(b':');
                write_value(&map[*key], out);
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, out);
            }
            out.push(b']');
        }
        // Scalars reuse serde_json's escaping and number formatting.
        scalar => out.extend_from_slice(
            serde_json::to_string(scalar)
                .expect("scalar JSON serialization cannot fail")
                .as_bytes(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_keys_are_sorted() {
        let value = json!({"zebra": 1, "apple": 2, "mango": {"b": 1, "a": 2}});
        let bytes = canonical_json_bytes(&value);
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"apple":2,"mango":{"a":2,"b":1},"zebra":1}"#
        );
    }

    #[test]
    fn entity_arrays_sort_by_id() {
        let value = json!({"Transfer": [
            {"id": "b", "value": 2},
            {"id": "a", "value": 1},
        ]});
        let bytes = canonical_json_bytes(&value);
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"Transfer":[{"id":"a","value":1},{"id":"b","value":2}]}"#
        );
    }

    #[test]
    fn non_entity_arrays_keep_their_order() {
        let value = json!({"topics": ["0xb", "0xa"]});
        let bytes = canonical_json_bytes(&value);
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"topics":["0xb","0xa"]}"#
        );
    }

    #[test]
    fn insertion_order_does_not_change_encoding() {
        let mut first = serde_json::Map::new();
        first.insert("alpha".into(), json!(1));
        first.insert("beta".into(), json!(2));

        let mut second = serde_json::Map::new();
        second.insert("beta".into(), json!(2));
        second.insert("alpha".into(), json!(1));

        assert_eq!(
            canonical_json_bytes(&Value::Object(first)),
            canonical_json_bytes(&Value::Object(second))
        );
    }
}
