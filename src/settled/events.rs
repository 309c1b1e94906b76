//! Events delivered to store subscribers.

use serde_json::Value;

/// Everything a subscriber can observe. Mutations carry the changed
/// top-level key and its new value; the remaining variants mark lifecycle
/// transitions (load, save, conflict, reset, draft), so consumers can
/// pattern-match exhaustively.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsEvent {
    /// A top-level key took a new value (set, update, toggle, draft
    /// commit, undo, redo).
    Mutated { key: String, value: Value },
    /// The initial load finished successfully.
    Loaded,
    /// A save pipeline leg began.
    SaveStarted,
    /// A save pipeline leg finished, successfully or not.
    SaveEnded,
    /// A delta save was rejected because the backend document moved on.
    VersionConflict { message: String },
    /// The live snapshot was replaced by schema defaults.
    Reset,
    /// The active draft's values changed.
    DraftChanged { form_id: String, has_changes: bool },
    /// The active draft was dropped without touching the live snapshot.
    DraftDiscarded { form_id: String },
}

impl SettingsEvent {
    /// Short variant name, for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            SettingsEvent::Mutated { .. } => "mutated",
            SettingsEvent::Loaded => "loaded",
            SettingsEvent::SaveStarted => "save_started",
            SettingsEvent::SaveEnded => "save_ended",
            SettingsEvent::VersionConflict { .. } => "version_conflict",
            SettingsEvent::Reset => "reset",
            SettingsEvent::DraftChanged { .. } => "draft_changed",
            SettingsEvent::DraftDiscarded { .. } => "draft_discarded",
        }
    }
}

/// Handle returned by `subscribe`; pass back to `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub(crate) fn raw(&self) -> u64 {
        self.0
    }
}
