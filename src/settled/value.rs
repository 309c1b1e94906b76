//! Deep copy and merge helpers for JSON-like values.
//!
//! Snapshots are copied at every boundary where a reference would otherwise
//! leak mutability: entering a save, starting a draft, returning reads. The
//! copy is an explicit structural recursion over `serde_json::Value`, which
//! by construction holds no functions or cycles, so the recursion always
//! terminates.

use serde_json::{Map, Value};

/// A settings document: string keys at the root, JSON-like sub-trees below.
pub type Snapshot = Map<String, Value>;

/// Recursively copy a JSON-like value. Scalars are cloned, arrays and
/// objects are rebuilt node by node.
pub fn deep_copy(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(deep_copy).collect()),
        Value::Object(entries) => Value::Object(deep_copy_map(entries)),
        scalar => scalar.clone(),
    }
}

/// Deep-copy an object node. Used for whole-snapshot copies, where the root
/// is always a mapping.
pub fn deep_copy_map(entries: &Map<String, Value>) -> Map<String, Value> {
    entries
        .iter()
        .map(|(key, value)| (key.clone(), deep_copy(value)))
        .collect()
}

/// Merge `overlay` onto `base`, recursing where both sides are objects and
/// otherwise taking the overlay value (arrays and scalars replace
/// wholesale, `null` overwrites).
pub fn deep_merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            let mut merged = deep_copy_map(base_map);
            for (key, overlay_value) in overlay_map {
                let value = match merged.get(key) {
                    Some(existing) => deep_merge(existing, overlay_value),
                    None => deep_copy(overlay_value),
                };
                merged.insert(key.clone(), value);
            }
            Value::Object(merged)
        }
        _ => deep_copy(overlay),
    }
}

/// Human-readable type name of a value, for validation warnings.
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
