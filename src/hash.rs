//! Content hashing and canonical JSON serialization.
//!
//! `content_hash` is DJB2 over the canonical
//! serialization of a document's fields. `stable_hash_to_u32` (§4.5) reuses
//! the same primitive for bucket assignment, since the spec only requires
//! it be "a fixed function independent of process/runtime," not a distinct
//! algorithm from the content hasher.

use std::collections::BTreeMap;

use serde_json::Value;

/// DJB2 hash (Bernstein's `hash * 33 + c`), seeded at `5381`.
#[must_use]
pub fn djb2(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 5381;
    for &b in bytes {
        hash = hash.wrapping_mul(33).wrapping_add(u32::from(b));
    }
    hash
}

/// Stable, process/runtime-independent hash used for bucket assignment.
#[must_use]
pub fn stable_hash_to_u32(s: &str) -> u32 {
    djb2(s.as_bytes())
}

/// Renders a 32-bit hash as 8 lowercase hex digits.
#[must_use]
pub fn to_hex(value: u32) -> String {
    format!("{value:08x}")
}

/// The content hash of an already-canonicalized value: DJB2 over its
/// canonical JSON string, rendered as lowercase hex.
#[must_use]
pub fn content_hash(value: &Value) -> String {
    to_hex(djb2(canonical_json(value).as_bytes()))
}

/// Canonical JSON serialization: object keys sorted lexicographically
/// (recursively), arrays kept in literal order, no insignificant
/// whitespace. Numeric/string canonicalization follows `serde_json`'s own
/// `Display` for numbers and its standard string escaping.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) => {
            out.push_str(&value.to_string());
        }
        Value::String(s) => {
            out.push_str(&serde_json::to_string(s).expect("string serialization cannot fail"));
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
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (i, (key, val)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).expect("string serialization cannot fail"));
                out.push(':');
                write_canonical(val, out);
            }
            out.push('}');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_sorts_object_keys() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(canonical_json(&a), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn canonical_json_preserves_array_order() {
        let v = json!([3, 1, 2]);
        assert_eq!(canonical_json(&v), "[3,1,2]");
    }

    #[test]
    fn hash_determinism_round_trip() {
        let v = json!({"title": "hello", "count": 3, "nested": {"z": 1, "a": 2}});
        let h1 = content_hash(&v);

        let serialized = serde_json::to_string(&v).unwrap();
        let deserialized: Value = serde_json::from_str(&serialized).unwrap();
        let h2 = content_hash(&deserialized);

        assert_eq!(h1, h2);
    }

    #[test]
    fn bucket_hash_is_stable_across_calls() {
        let id = "doc-123";
        assert_eq!(stable_hash_to_u32(id), stable_hash_to_u32(id));
    }

    #[test]
    fn hex_rendering_is_lowercase_and_fixed_width() {
        let hex = to_hex(0xAB);
        assert_eq!(hex, "000000ab");
        assert_eq!(hex.len(), 8);
    }
}
