//! Store tuning knobs.

use std::time::Duration;

use tracing::warn;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);
pub const DEFAULT_SAVE_WAIT_INTERVAL: Duration = Duration::from_millis(50);
pub const DEFAULT_SAVE_WAIT_RETRIES: u32 = 100;
pub const DEFAULT_HISTORY_LIMIT: usize = 20;
pub const DEFAULT_HISTORY_GROUP_WINDOW: Duration = Duration::from_millis(100);

/// Timing and history configuration for a [`SettingsStore`].
///
/// The defaults suit an interactive client: mutations made within half a
/// second coalesce into one save, and `save_now` tolerates an in-flight
/// save of up to five seconds before reporting a timeout.
///
/// [`SettingsStore`]: crate::store::SettingsStore
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    /// Quiet period before a scheduled save fires.
    pub debounce: Duration,
    /// Poll interval while `save_now` waits for an in-flight save.
    pub save_wait_interval: Duration,
    /// Poll attempts before `save_now` gives up with a timeout.
    pub save_wait_retries: u32,
    /// Undo history depth. Zero disables history recording entirely.
    pub history_limit: usize,
    /// Mutations of the same key within this window merge into a single
    /// undo record.
    pub history_group_window: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            save_wait_interval: DEFAULT_SAVE_WAIT_INTERVAL,
            save_wait_retries: DEFAULT_SAVE_WAIT_RETRIES,
            history_limit: DEFAULT_HISTORY_LIMIT,
            history_group_window: DEFAULT_HISTORY_GROUP_WINDOW,
        }
    }
}

impl StoreOptions {
    /// Clamps values the store cannot operate with, warning about each
    /// adjustment. A zero poll interval would spin, and zero retries
    /// would make every `save_now` against an in-flight save time out
    /// without looking at it once.
    pub fn normalized(mut self) -> Self {
        if self.save_wait_interval.is_zero() {
            warn!(
                clamped_to_ms = 1,
                "save_wait_interval of zero would busy-poll"
            );
            self.save_wait_interval = Duration::from_millis(1);
        }
        if self.save_wait_retries == 0 {
            warn!(clamped_to = 1, "save_wait_retries of zero cannot observe completion");
            self.save_wait_retries = 1;
        }
        self
    }
}
