//! Draft transactions.
//!
//! A draft buffers a form's edits away from the live snapshot until the
//! caller commits or discards them. At most one draft exists at a time;
//! the store tracks it as a [`DraftState`].

use std::collections::BTreeMap;

use serde_json::Value;

use crate::value::deep_copy;

/// One form's uncommitted edits.
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    form_id: String,
    /// What the tracked keys held when the draft began. `None` marks a
    /// key that was absent.
    baseline: BTreeMap<String, Option<Value>>,
    edits: BTreeMap<String, Value>,
}

impl Draft {
    pub fn new(form_id: &str, baseline: BTreeMap<String, Option<Value>>) -> Self {
        Self {
            form_id: form_id.to_string(),
            baseline,
            edits: BTreeMap::new(),
        }
    }

    pub fn form_id(&self) -> &str {
        &self.form_id
    }

    /// Stages a value for `key`. Keys outside the tracked set are
    /// allowed; their baseline counts as absent.
    pub fn set(&mut self, key: &str, value: Value) {
        self.edits.insert(key.to_string(), value);
    }

    /// Staged value for `key`, falling back to the baseline.
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.edits
            .get(key)
            .or_else(|| self.baseline.get(key).and_then(|original| original.as_ref()))
    }

    /// Whether any staged value differs from its baseline. Editing a key
    /// back to its original value makes the draft clean again.
    pub fn has_changes(&self) -> bool {
        self.edits
            .iter()
            .any(|(key, value)| self.differs_from_baseline(key, value))
    }

    /// Every staged pair, ready to apply to the live snapshot. A commit
    /// applies all of them; pairs equal to the current live value are
    /// filtered out by the mutation path, not here.
    pub fn staged_entries(&self) -> Vec<(String, Value)> {
        self.edits
            .iter()
            .map(|(key, value)| (key.clone(), deep_copy(value)))
            .collect()
    }

    fn differs_from_baseline(&self, key: &str, value: &Value) -> bool {
        match self.baseline.get(key) {
            Some(Some(original)) => original != value,
            // Absent at begin, or never tracked: any value is a change.
            _ => true,
        }
    }
}

/// Whether a draft is in progress.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum DraftState {
    #[default]
    NoDraft,
    Active(Draft),
}

impl DraftState {
    pub fn as_active(&self) -> Option<&Draft> {
        match self {
            DraftState::Active(draft) => Some(draft),
            DraftState::NoDraft => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, DraftState::Active(_))
    }
}
