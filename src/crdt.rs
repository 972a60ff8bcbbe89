//! The CRDT document model: field-level last-writer-wins values keyed by
//! [`Hlc`], wrapped/unwrapped against plain JSON documents, with
//! deterministic merge.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::hash::content_hash;
use crate::hlc::{Clock, Hlc, TimeSource};

/// A single CRDT-annotated field: its value plus the HLC of the write that
/// produced it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CrdtField {
    pub value: Value,
    pub hlc: Hlc,
}

/// A CRDT document: a content hash plus a map of CRDT fields. Field order
/// in `fields` is insertion order but is not semantically meaningful.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CrdtDocument {
    pub hash: String,
    pub fields: IndexMap<String, CrdtField>,

    /// Unknown top-level keys, preserved verbatim for forward compatibility.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CrdtDocument {
    /// Recomputes `hash` from the current `fields`, per the invariant
    /// `d.hash == hasher(canonical_serialize(d.fields))`.
    pub fn recompute_hash(&mut self) {
        self.hash = content_hash(&fields_as_value(&self.fields));
    }
}

fn fields_as_value(fields: &IndexMap<String, CrdtField>) -> Value {
    let map: Map<String, Value> = fields
        .iter()
        .map(|(k, f)| {
            (
                k.clone(),
                serde_json::json!({ "value": f.value, "hlc": f.hlc.to_string() }),
            )
        })
        .collect();
    Value::Object(map)
}

/// Wraps a plain document into a fresh CRDT document: every field gets a
/// new tick from `clock`.
pub fn wrap<T: TimeSource>(plain: &Map<String, Value>, clock: &Clock<T>) -> CrdtDocument {
    let mut fields = IndexMap::with_capacity(plain.len());
    for (key, value) in plain {
        fields.insert(
            key.clone(),
            CrdtField {
                value: value.clone(),
                hlc: clock.tick(),
            },
        );
    }
    let mut doc = CrdtDocument {
        hash: String::new(),
        fields,
        extra: Map::new(),
    };
    doc.recompute_hash();
    doc
}

/// Recursively extracts plain values from a CRDT tree: a node with both
/// `value` and `hlc` keys contributes its (recursively unwrapped) `value`;
/// any other object/array is walked structurally.
#[must_use]
pub fn unwrap_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            if map.len() == 2 && map.contains_key("value") && map.contains_key("hlc") {
                unwrap_value(&map["value"])
            } else {
                Value::Object(map.iter().map(|(k, v)| (k.clone(), unwrap_value(v))).collect())
            }
        }
        Value::Array(items) => Value::Array(items.iter().map(unwrap_value).collect()),
        other => other.clone(),
    }
}

/// Unwraps a CRDT document into its plain field map.
#[must_use]
pub fn unwrap(doc: &CrdtDocument) -> Map<String, Value> {
    doc.fields
        .iter()
        .map(|(k, f)| (k.clone(), unwrap_value(&f.value)))
        .collect()
}

/// Applies a partial update: fields named in `partial` get fresh HLCs from
/// `clock`; all other fields are retained unchanged. Recomputes `hash`.
pub fn partial_update<T: TimeSource>(
    prior: &CrdtDocument,
    partial: &Map<String, Value>,
    clock: &Clock<T>,
) -> CrdtDocument {
    let mut fields = prior.fields.clone();
    for (key, value) in partial {
        fields.insert(
            key.clone(),
            CrdtField {
                value: value.clone(),
                hlc: clock.tick(),
            },
        );
    }
    let mut doc = CrdtDocument {
        hash: String::new(),
        fields,
        extra: prior.extra.clone(),
    };
    doc.recompute_hash();
    doc
}

/// Returns the field with the greater HLC. Ties (which shouldn't occur in
/// practice since nonces are random) defensively resolve to `a`; callers
/// must not rely on this tie-break.
#[must_use]
pub fn field_merge<'a>(a: &'a CrdtField, b: &'a CrdtField) -> &'a CrdtField {
    if b.hlc > a.hlc {
        b
    } else {
        a
    }
}

/// Merges two CRDT documents field-by-field, observing every remote HLC
/// encountered into `clock`. Commutative, associative, and idempotent over
/// documents whose HLCs form a strict total order.
pub fn merge<T: TimeSource>(a: &CrdtDocument, b: &CrdtDocument, clock: &Clock<T>) -> CrdtDocument {
    let mut fields = a.fields.clone();

    for (key, remote_field) in &b.fields {
        clock.observe(&remote_field.hlc);
        match fields.get(key) {
            Some(local_field) => {
                let winner = field_merge(local_field, remote_field).clone();
                fields.insert(key.clone(), winner);
            }
            None => {
                fields.insert(key.clone(), remote_field.clone());
            }
        }
    }

    let mut extra = a.extra.clone();
    for (k, v) in &b.extra {
        extra.entry(k.clone()).or_insert_with(|| v.clone());
    }

    let mut merged = CrdtDocument {
        hash: String::new(),
        fields,
        extra,
    };
    merged.recompute_hash();
    merged
}
