//! Snapshot diffing and patch application.
//!
//! [`compute_delta`] walks two snapshots and produces a flat [`Patch`]:
//! encoded dot-path → new value, with `null` as the deletion tombstone. A
//! literal `null` leaf therefore cannot be distinguished from a removal on
//! the wire; writers express "cleared" settings as removals and validation
//! restores their defaults on the next load. Arrays are opaque; any
//! difference replaces the whole array, because element order is meaningful
//! and per-index patches would not be worth the complexity.
//!
//! Patches are path-disjoint by construction: a path and its ancestor never
//! both appear, so [`apply_patch`] may process entries in any order.

use crate::path::KeyPath;
use crate::value::{deep_copy, deep_copy_map, Snapshot};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A flat set of changes keyed by encoded dot-path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Patch {
    entries: BTreeMap<String, Value>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `path = value`. `Value::Null` means "delete this key".
    pub fn insert(&mut self, path: &KeyPath, value: Value) {
        self.entries.insert(path.encode(), value);
    }

    pub fn get(&self, path: &KeyPath) -> Option<&Value> {
        self.entries.get(&path.encode())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Decoded entries. Paths are parsed from the wire form here and
    /// nowhere else.
    pub fn iter(&self) -> impl Iterator<Item = (KeyPath, &Value)> {
        self.entries.iter().map(|(k, v)| (KeyPath::parse(k), v))
    }

    /// The raw wire form.
    pub fn entries(&self) -> &BTreeMap<String, Value> {
        &self.entries
    }
}

impl FromIterator<(KeyPath, Value)> for Patch {
    fn from_iter<I: IntoIterator<Item = (KeyPath, Value)>>(iter: I) -> Self {
        let mut patch = Patch::new();
        for (path, value) in iter {
            patch.insert(&path, value);
        }
        patch
    }
}

/// Diff two snapshots into a patch.
///
/// Returns `None` when there is no baseline to diff against; that signals
/// "full save required", not "no changes". An empty patch means the
/// snapshots are equal.
pub fn compute_delta(old: Option<&Snapshot>, new: &Snapshot) -> Option<Patch> {
    let old = old?;
    let mut patch = Patch::new();
    diff_objects(old, new, &KeyPath::new(), &mut patch);
    Some(patch)
}

fn diff_objects(
    old: &Map<String, Value>,
    new: &Map<String, Value>,
    prefix: &KeyPath,
    patch: &mut Patch,
) {
    for (key, old_value) in old {
        let path = prefix.child(key);
        match new.get(key) {
            None => patch.insert(&path, Value::Null),
            Some(new_value) => diff_value(Some(old_value), new_value, &path, patch),
        }
    }
    for (key, new_value) in new {
        if !old.contains_key(key) {
            diff_value(None, new_value, &prefix.child(key), patch);
        }
    }
}

fn diff_value(old: Option<&Value>, new: &Value, path: &KeyPath, patch: &mut Patch) {
    if old == Some(new) {
        return;
    }
    match new {
        // Arrays replace wholesale, never element-wise.
        Value::Array(_) => patch.insert(path, deep_copy(new)),
        Value::Object(new_map) => match old {
            Some(Value::Object(old_map)) => diff_objects(old_map, new_map, path, patch),
            // Old side absent or not an object: walk the new subtree against
            // an empty one, so unrelated siblings pre-existing at this path
            // in the document being patched survive. An empty new object has
            // no leaves to walk and must be materialized directly.
            _ if new_map.is_empty() => patch.insert(path, Value::Object(Map::new())),
            _ => {
                let empty = Map::new();
                diff_objects(&empty, new_map, path, patch);
            }
        },
        _ => patch.insert(path, deep_copy(new)),
    }
}

/// Apply a patch to a snapshot, returning the patched copy. The base is
/// never mutated; callers with no base pass an empty snapshot.
///
/// Intermediate path segments are created as objects on demand; a
/// non-object intermediate is overwritten. At the final segment a tombstone
/// deletes the key, anything else is set.
pub fn apply_patch(base: &Snapshot, patch: &Patch) -> Snapshot {
    let mut result = deep_copy_map(base);
    for (path, value) in patch.iter() {
        apply_entry(&mut result, path.segments(), value);
    }
    result
}

fn apply_entry(node: &mut Map<String, Value>, segments: &[String], value: &Value) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    if rest.is_empty() {
        if value.is_null() {
            node.remove(head);
        } else {
            node.insert(head.clone(), deep_copy(value));
        }
        return;
    }

    let child = node
        .entry(head.clone())
        .or_insert_with(|| Value::Object(Map::new()));
    if !child.is_object() {
        *child = Value::Object(Map::new());
    }
    if let Value::Object(child_map) = child {
        apply_entry(child_map, rest, value);
    }
}
