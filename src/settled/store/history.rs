//! Undo history.

use std::collections::VecDeque;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

/// One undoable change to a top-level key. `None` values mark the key
/// as absent on that side of the change.
#[derive(Debug, Clone)]
pub struct HistoryRecord {
    pub key: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    label: Option<String>,
    at: Instant,
}

impl HistoryRecord {
    fn describe(&self, verb: &str) -> String {
        match &self.label {
            Some(label) => label.clone(),
            None => format!("{verb} change to {}", self.key),
        }
    }
}

/// Bounded undo/redo stacks over top-level key changes.
///
/// Rapid changes to the same key merge into a single record, keeping the
/// first old value and the last new one, so a slider drag undoes in one
/// step instead of dozens.
#[derive(Debug)]
pub struct History {
    limit: usize,
    group_window: Duration,
    undo: VecDeque<HistoryRecord>,
    redo: Vec<HistoryRecord>,
}

impl History {
    pub fn new(limit: usize, group_window: Duration) -> Self {
        Self {
            limit,
            group_window,
            undo: VecDeque::new(),
            redo: Vec::new(),
        }
    }

    /// Records a change and clears the redo stack. Changes that do not
    /// change anything are not recorded, and a zero limit disables
    /// recording entirely. `label` overrides the derived description.
    pub fn record(
        &mut self,
        key: &str,
        old_value: Option<Value>,
        new_value: Option<Value>,
        label: Option<String>,
    ) {
        if self.limit == 0 || old_value == new_value {
            return;
        }
        self.redo.clear();
        let now = Instant::now();

        if let Some(last) = self.undo.back_mut() {
            if last.key == key && now.duration_since(last.at) <= self.group_window {
                last.new_value = new_value;
                if label.is_some() {
                    last.label = label;
                }
                last.at = now;
                // A merged record can net out to nothing (1 -> 2 -> 1).
                if last.old_value == last.new_value {
                    self.undo.pop_back();
                }
                return;
            }
        }

        self.undo.push_back(HistoryRecord {
            key: key.to_string(),
            old_value,
            new_value,
            label,
            at: now,
        });
        while self.undo.len() > self.limit {
            self.undo.pop_front();
        }
    }

    /// Pops the newest record for undoing; it becomes redoable.
    pub fn undo(&mut self) -> Option<HistoryRecord> {
        let record = self.undo.pop_back()?;
        self.redo.push(record.clone());
        Some(record)
    }

    /// Pops the newest undone record for redoing; it becomes undoable
    /// again.
    pub fn redo(&mut self) -> Option<HistoryRecord> {
        let record = self.redo.pop()?;
        self.undo.push_back(record.clone());
        Some(record)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    /// Human-readable description of what `undo` would do next.
    pub fn undo_description(&self) -> Option<String> {
        self.undo.back().map(|record| record.describe("Undo"))
    }

    /// Human-readable description of what `redo` would do next.
    pub fn redo_description(&self) -> Option<String> {
        self.redo.last().map(|record| record.describe("Redo"))
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }
}
