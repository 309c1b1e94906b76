//! The settings store.
//!
//! [`SettingsStore`] owns the live snapshot and orchestrates everything
//! around it: mutations validate synchronously and notify listeners,
//! persistence happens later on the store's own schedule. The rules:
//!
//! - Mutations never fail. Invalid values are replaced by schema
//!   defaults before they reach the snapshot.
//! - At most one save is in flight. Save requests that arrive during a
//!   save set a pending flag, and the running pipeline drains it with an
//!   immediate follow-up pass before letting go of the guard.
//! - Saves prefer a delta against the last synced snapshot and fall
//!   back to a full save when the backend rejects the delta for any
//!   reason other than a version conflict.
//! - A version conflict is surfaced, never retried. Local state keeps
//!   the user's changes; the caller decides what reconciliation means.
//!
//! The store schedules background work on the ambient Tokio runtime, so
//! its methods must be called from within one. Cloning a store yields
//! another handle to the same state.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, debug_span, trace, warn, Instrument, Span};
use uuid::Uuid;

use crate::backend::SettingsBackend;
use crate::config::StoreOptions;
use crate::debounce::TaskSlot;
use crate::delta::compute_delta;
use crate::error::{Result, SettledError};
use crate::events::{ListenerId, SettingsEvent};
use crate::schema::{validate_full, validate_partial, Schema, ValidationWarning};
use crate::value::{deep_copy, deep_copy_map, Snapshot};

use self::draft::{Draft, DraftState};
use self::history::History;

pub mod draft;
pub mod history;

pub type Listener = Arc<dyn Fn(&SettingsEvent) + Send + Sync>;

/// What `load` observed. Loading never fails the caller; a backend
/// error leaves the store on schema defaults and retryable.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOutcome {
    pub success: bool,
    pub error: Option<String>,
    pub warnings: Vec<ValidationWarning>,
}

impl LoadOutcome {
    fn succeeded(warnings: Vec<ValidationWarning>) -> Self {
        Self {
            success: true,
            error: None,
            warnings,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            success: false,
            error: Some(error),
            warnings: Vec::new(),
        }
    }
}

pub struct SettingsStore<B: SettingsBackend> {
    core: Arc<StoreCore<B>>,
}

impl<B: SettingsBackend> Clone for SettingsStore<B> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

struct StoreCore<B> {
    backend: B,
    schema: Schema,
    options: StoreOptions,
    state: Mutex<StoreState>,
    listeners: Mutex<BTreeMap<u64, Listener>>,
    next_listener: AtomicU64,
    slot: TaskSlot,
    span: Span,
}

struct StoreState {
    settings: Snapshot,
    /// Last snapshot known to match the backend; delta baseline.
    last_synced: Option<Snapshot>,
    version: u64,
    loaded: bool,
    is_saving: bool,
    /// A save was requested while one was in flight.
    pending_save: bool,
    /// Outcome of the most recently finished pipeline, replayed to
    /// `save_now` callers that waited on it.
    last_save_result: Option<Result<()>>,
    /// Message of the most recent load or save failure; cleared by the
    /// next success.
    last_error: Option<String>,
    history: History,
    draft: DraftState,
    destroyed: bool,
}

impl<B: SettingsBackend + 'static> SettingsStore<B> {
    pub fn new(backend: B, schema: Schema) -> Self {
        Self::with_options(backend, schema, StoreOptions::default())
    }

    pub fn with_options(backend: B, schema: Schema, options: StoreOptions) -> Self {
        let options = options.normalized();
        let settings = schema.defaults();
        let history = History::new(options.history_limit, options.history_group_window);
        let core = Arc::new(StoreCore {
            backend,
            schema,
            options,
            state: Mutex::new(StoreState {
                settings,
                last_synced: None,
                version: 0,
                loaded: false,
                is_saving: false,
                pending_save: false,
                last_save_result: None,
                last_error: None,
                history,
                draft: DraftState::default(),
                destroyed: false,
            }),
            listeners: Mutex::new(BTreeMap::new()),
            next_listener: AtomicU64::new(1),
            slot: TaskSlot::new(),
            span: debug_span!("settings_store", store_id = %Uuid::new_v4()),
        });
        Self { core }
    }

    /// Fetches the persisted snapshot and merges it over schema
    /// defaults. A second call after success is a no-op; after a failure
    /// the store stays on defaults and `load` can be retried.
    pub async fn load(&self) -> LoadOutcome {
        let core = &self.core;
        let span = core.span.clone();
        async move {
            if core.state.lock().loaded {
                return LoadOutcome::succeeded(Vec::new());
            }
            match core.backend.load().await {
                Ok(loaded) => {
                    let validated = validate_full(&loaded.settings, &core.schema);
                    for warning in &validated.warnings {
                        warn!(%warning, "stored setting replaced by default");
                    }
                    {
                        let mut state = core.state.lock();
                        state.settings = deep_copy_map(&validated.settings);
                        state.last_synced = Some(validated.settings);
                        state.version = loaded.version;
                        state.loaded = true;
                        state.last_error = None;
                        state.history.clear();
                    }
                    debug!(version = loaded.version, "settings loaded");
                    core.notify(&SettingsEvent::Loaded);
                    LoadOutcome::succeeded(validated.warnings)
                }
                Err(err) => {
                    warn!(error = %err, "load failed; keeping schema defaults");
                    let message = err.to_string();
                    core.state.lock().last_error = Some(message.clone());
                    LoadOutcome::failed(message)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Current value of a top-level key.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.core.state.lock().settings.get(key).map(deep_copy)
    }

    /// Copy of the whole snapshot.
    pub fn get_all(&self) -> Snapshot {
        deep_copy_map(&self.core.state.lock().settings)
    }

    pub fn schema(&self) -> &Schema {
        &self.core.schema
    }

    pub fn is_loaded(&self) -> bool {
        self.core.state.lock().loaded
    }

    pub fn is_saving(&self) -> bool {
        self.core.state.lock().is_saving
    }

    /// Version of the last snapshot synced with the backend. Zero means
    /// never synced.
    pub fn version(&self) -> u64 {
        self.core.state.lock().version
    }

    /// Whether a save request arrived while one was in flight and is
    /// waiting for the pipeline's follow-up pass.
    pub fn has_pending_changes(&self) -> bool {
        self.core.state.lock().pending_save
    }

    /// Message of the most recent load or save failure. Cleared by the
    /// next successful load or save.
    pub fn last_error(&self) -> Option<String> {
        self.core.state.lock().last_error.clone()
    }

    /// Sets one top-level key and schedules a save. Invalid values are
    /// replaced by the key's default; listeners fire only when the
    /// stored value actually changed.
    pub fn set(&self, key: &str, value: Value) {
        let mut partial = Snapshot::new();
        partial.insert(key.to_string(), value);
        self.mutate(partial, true, None);
    }

    /// Applies several keys at once; otherwise behaves like [`set`].
    ///
    /// [`set`]: SettingsStore::set
    pub fn update(&self, partial: Snapshot) {
        self.mutate(partial, true, None);
    }

    /// Like [`set`], but leaves persistence alone. Used when echoing a
    /// change that is already stored elsewhere.
    ///
    /// [`set`]: SettingsStore::set
    pub fn set_local(&self, key: &str, value: Value) {
        let mut partial = Snapshot::new();
        partial.insert(key.to_string(), value);
        self.mutate(partial, false, None);
    }

    /// Like [`update`], but leaves persistence alone.
    ///
    /// [`update`]: SettingsStore::update
    pub fn update_local(&self, partial: Snapshot) {
        self.mutate(partial, false, None);
    }

    /// Flips the boolean at `settings[map_key][entry_key]`, treating a
    /// missing entry as `false`.
    pub fn toggle_enabled(&self, map_key: &str, entry_key: &str) {
        let current = {
            let state = self.core.state.lock();
            state
                .settings
                .get(map_key)
                .and_then(Value::as_object)
                .and_then(|entries| entries.get(entry_key))
                .and_then(Value::as_bool)
                .unwrap_or(false)
        };
        self.write_enabled(map_key, entry_key, !current, format!("Toggle {entry_key}"));
    }

    /// Sets the boolean at `settings[map_key][entry_key]`, creating the
    /// map if needed.
    pub fn set_enabled(&self, map_key: &str, entry_key: &str, enabled: bool) {
        self.write_enabled(
            map_key,
            entry_key,
            enabled,
            format!("Set {entry_key} to {enabled}"),
        );
    }

    fn write_enabled(&self, map_key: &str, entry_key: &str, enabled: bool, label: String) {
        let mut entries = {
            let state = self.core.state.lock();
            state
                .settings
                .get(map_key)
                .and_then(Value::as_object)
                .map(deep_copy_map)
                .unwrap_or_default()
        };
        entries.insert(entry_key.to_string(), Value::Bool(enabled));
        let mut partial = Snapshot::new();
        partial.insert(map_key.to_string(), Value::Object(entries));
        self.mutate(partial, true, Some(label));
    }

    /// Replaces the snapshot with schema defaults and schedules a save.
    /// History and any active draft are left alone; the reset itself is
    /// not undoable.
    pub fn reset(&self) {
        self.reset_with(true);
    }

    /// Like [`reset`], but leaves persistence alone.
    ///
    /// [`reset`]: SettingsStore::reset
    pub fn reset_local(&self) {
        self.reset_with(false);
    }

    fn reset_with(&self, persist: bool) {
        {
            let mut state = self.core.state.lock();
            state.settings = self.core.schema.defaults();
        }
        self.core.notify(&SettingsEvent::Reset);
        if persist {
            self.save();
        }
    }

    /// Requests a debounced save. Repeated calls within the debounce
    /// window coalesce into one.
    pub fn save(&self) {
        StoreCore::schedule_save(&self.core);
    }

    /// Saves immediately, skipping the debounce. If a save is already in
    /// flight this queues one follow-up pass, waits for the pipeline to
    /// finish, and returns its outcome rather than starting a competing
    /// save.
    pub async fn save_now(&self) -> Result<()> {
        let core = &self.core;
        let span = core.span.clone();
        async move {
            core.slot.cancel();
            if core.state.lock().destroyed {
                return Ok(());
            }
            match core.run_save_pipeline().await {
                Some(outcome) => outcome,
                None => core.await_in_flight().await,
            }
        }
        .instrument(span)
        .await
    }

    pub fn subscribe(&self, listener: impl Fn(&SettingsEvent) + Send + Sync + 'static) -> ListenerId {
        let id = self.core.next_listener.fetch_add(1, Ordering::Relaxed);
        self.core.listeners.lock().insert(id, Arc::new(listener));
        ListenerId::new(id)
    }

    /// Removes a listener; returns whether it was still registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.core.listeners.lock().remove(&id.raw()).is_some()
    }

    /// Reverts the most recent recorded change. Returns `false` when
    /// there is nothing to undo.
    pub fn undo(&self) -> bool {
        let record = self.core.state.lock().history.undo();
        match record {
            Some(record) => {
                self.apply_history(record.key, record.old_value);
                true
            }
            None => false,
        }
    }

    /// Re-applies the most recently undone change. Returns `false` when
    /// there is nothing to redo.
    pub fn redo(&self) -> bool {
        let record = self.core.state.lock().history.redo();
        match record {
            Some(record) => {
                self.apply_history(record.key, record.new_value);
                true
            }
            None => false,
        }
    }

    pub fn can_undo(&self) -> bool {
        self.core.state.lock().history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.core.state.lock().history.can_redo()
    }

    /// Description of what [`undo`] would revert, for menu items and
    /// tooltips. `None` when there is nothing to undo.
    ///
    /// [`undo`]: SettingsStore::undo
    pub fn undo_description(&self) -> Option<String> {
        self.core.state.lock().history.undo_description()
    }

    /// Description of what [`redo`] would re-apply. `None` when there is
    /// nothing to redo.
    ///
    /// [`redo`]: SettingsStore::redo
    pub fn redo_description(&self) -> Option<String> {
        self.core.state.lock().history.redo_description()
    }

    /// Drops both history stacks.
    pub fn clear_history(&self) {
        self.core.state.lock().history.clear();
    }

    /// Starts a draft for `form_id`, capturing the current values of
    /// `keys` as the baseline. An already active draft is discarded
    /// first.
    pub fn begin_draft<K: AsRef<str>>(&self, form_id: &str, keys: &[K]) {
        let mut events = Vec::new();
        {
            let mut state = self.core.state.lock();
            if let DraftState::Active(old) = std::mem::take(&mut state.draft) {
                events.push(SettingsEvent::DraftDiscarded {
                    form_id: old.form_id().to_string(),
                });
            }
            let mut baseline = BTreeMap::new();
            for key in keys {
                let key = key.as_ref();
                baseline.insert(key.to_string(), state.settings.get(key).map(deep_copy));
            }
            state.draft = DraftState::Active(Draft::new(form_id, baseline));
        }
        events.push(SettingsEvent::DraftChanged {
            form_id: form_id.to_string(),
            has_changes: false,
        });
        for event in &events {
            self.core.notify(event);
        }
    }

    /// Stages a value on the active draft without touching the live
    /// snapshot. A no-op when no draft is active.
    pub fn set_draft_value(&self, key: &str, value: Value) {
        let event = {
            let mut state = self.core.state.lock();
            let DraftState::Active(draft) = &mut state.draft else {
                return;
            };
            draft.set(key, value);
            SettingsEvent::DraftChanged {
                form_id: draft.form_id().to_string(),
                has_changes: draft.has_changes(),
            }
        };
        self.core.notify(&event);
    }

    /// Staged value for `key`, falling back to the draft baseline and
    /// then the live snapshot. `None` when no draft is active.
    pub fn draft_value(&self, key: &str) -> Option<Value> {
        let state = self.core.state.lock();
        let draft = state.draft.as_active()?;
        draft
            .value(key)
            .map(deep_copy)
            .or_else(|| state.settings.get(key).map(deep_copy))
    }

    pub fn has_draft(&self) -> bool {
        self.core.state.lock().draft.is_active()
    }

    pub fn draft_form_id(&self) -> Option<String> {
        self.core
            .state
            .lock()
            .draft
            .as_active()
            .map(|draft| draft.form_id().to_string())
    }

    pub fn draft_has_changes(&self) -> bool {
        self.core
            .state
            .lock()
            .draft
            .as_active()
            .is_some_and(Draft::has_changes)
    }

    /// Applies every staged draft pair to the live snapshot and
    /// schedules a save. Returns `false` when no draft was active.
    pub fn commit_draft(&self) -> bool {
        let (form_id, staged) = {
            let mut state = self.core.state.lock();
            let DraftState::Active(draft) = std::mem::take(&mut state.draft) else {
                return false;
            };
            (draft.form_id().to_string(), draft.staged_entries())
        };
        if !staged.is_empty() {
            let mut partial = Snapshot::new();
            for (key, value) in staged {
                partial.insert(key, value);
            }
            self.mutate(partial, true, None);
        }
        self.core.notify(&SettingsEvent::DraftChanged {
            form_id,
            has_changes: false,
        });
        true
    }

    /// Drops the active draft without applying it. Returns `false` when
    /// no draft was active.
    pub fn discard_draft(&self) -> bool {
        let form_id = {
            let mut state = self.core.state.lock();
            let DraftState::Active(draft) = std::mem::take(&mut state.draft) else {
                return false;
            };
            draft.form_id().to_string()
        };
        self.core
            .notify(&SettingsEvent::DraftDiscarded { form_id });
        true
    }

    /// Cancels pending persistence and drops listeners, history, and any
    /// draft. Later mutations still change the in-memory snapshot but
    /// nothing is persisted or delivered.
    pub fn destroy(&self) {
        self.core.slot.cancel();
        {
            let mut state = self.core.state.lock();
            state.destroyed = true;
            state.pending_save = false;
            state.draft = DraftState::default();
            state.history.clear();
        }
        self.core.listeners.lock().clear();
        let _guard = self.core.span.enter();
        debug!("store destroyed");
    }

    /// Validates a partial, applies what changed, notifies per changed
    /// key, and optionally schedules a save. `label` names the change in
    /// undo descriptions.
    fn mutate(&self, partial: Snapshot, persist: bool, label: Option<String>) {
        if partial.is_empty() {
            return;
        }
        let validated = validate_partial(&partial, &self.core.schema);
        if !validated.warnings.is_empty() {
            let _guard = self.core.span.enter();
            for warning in &validated.warnings {
                warn!(%warning, "rejected value replaced by default");
            }
        }
        let mut events = Vec::new();
        {
            let mut state = self.core.state.lock();
            for (key, value) in validated.settings {
                let old = state.settings.get(&key).map(deep_copy);
                if old.as_ref() == Some(&value) {
                    continue;
                }
                state
                    .history
                    .record(&key, old, Some(deep_copy(&value)), label.clone());
                state.settings.insert(key.clone(), deep_copy(&value));
                events.push(SettingsEvent::Mutated { key, value });
            }
        }
        if events.is_empty() {
            return;
        }
        for event in &events {
            self.core.notify(event);
        }
        if persist {
            self.save();
        }
    }

    /// Writes an undo/redo value straight to the snapshot, bypassing
    /// history recording. `None` removes the key.
    fn apply_history(&self, key: String, value: Option<Value>) {
        let event = {
            let mut state = self.core.state.lock();
            match value {
                Some(value) => {
                    state.settings.insert(key.clone(), deep_copy(&value));
                    SettingsEvent::Mutated { key, value }
                }
                None => {
                    state.settings.remove(&key);
                    SettingsEvent::Mutated {
                        key,
                        value: Value::Null,
                    }
                }
            }
        };
        self.core.notify(&event);
        self.save();
    }
}

impl<B: SettingsBackend + 'static> StoreCore<B> {
    fn schedule_save(core: &Arc<Self>) {
        {
            let state = core.state.lock();
            if state.destroyed {
                return;
            }
        }
        let weak = Arc::downgrade(core);
        core.slot.schedule(core.options.debounce, async move {
            if let Some(core) = weak.upgrade() {
                let span = core.span.clone();
                let _ = core.run_save_pipeline().instrument(span).await;
            }
        });
        let _guard = core.span.enter();
        trace!(debounce_ms = core.options.debounce.as_millis() as u64, "save scheduled");
    }

    /// Runs the save pipeline, looping while follow-up passes are
    /// pending. Returns `None` when another pipeline already holds the
    /// guard; the request is then queued behind it.
    async fn run_save_pipeline(&self) -> Option<Result<()>> {
        {
            let mut state = self.state.lock();
            if state.destroyed {
                return Some(Ok(()));
            }
            if state.is_saving {
                state.pending_save = true;
                debug!("save already in flight; queued a follow-up pass");
                return None;
            }
            state.is_saving = true;
        }
        let outcome = loop {
            let leg = self.save_leg().await;
            let mut state = self.state.lock();
            if state.pending_save {
                state.pending_save = false;
                drop(state);
                debug!("flushing queued save");
                continue;
            }
            state.is_saving = false;
            state.last_error = leg.as_ref().err().map(ToString::to_string);
            state.last_save_result = Some(leg.clone());
            break leg;
        };
        Some(outcome)
    }

    /// One pass over the snapshot: delta against the baseline when one
    /// exists, full save otherwise, with a single full-save fallback
    /// when a delta fails for a reason other than a conflict.
    async fn save_leg(&self) -> Result<()> {
        self.notify(&SettingsEvent::SaveStarted);
        let (to_save, baseline, base_version) = {
            let state = self.state.lock();
            (
                deep_copy_map(&state.settings),
                state.last_synced.as_ref().map(deep_copy_map),
                state.version,
            )
        };
        let result = match compute_delta(baseline.as_ref(), &to_save) {
            None => self.save_full_leg(&to_save).await,
            Some(patch) if patch.is_empty() => {
                debug!("nothing changed since last sync; skipping save");
                Ok(())
            }
            Some(patch) => match self.backend.save_delta(&patch, base_version).await {
                Ok(version) => {
                    self.adopt(&to_save, version);
                    Ok(())
                }
                Err(err) if err.is_conflict() => {
                    let message = err.to_string();
                    warn!(error = %message, "delta rejected; keeping local changes");
                    self.notify(&SettingsEvent::VersionConflict {
                        message: message.clone(),
                    });
                    Err(SettledError::VersionConflict { message })
                }
                Err(err) => {
                    warn!(error = %err, "delta save failed; falling back to a full save");
                    self.save_full_leg(&to_save).await
                }
            },
        };
        if let Err(err) = &result {
            debug!(error = %err, "save pass failed");
        }
        self.notify(&SettingsEvent::SaveEnded);
        result
    }

    async fn save_full_leg(&self, to_save: &Snapshot) -> Result<()> {
        match self.backend.save_full(to_save).await {
            Ok(version) => {
                self.adopt(to_save, version);
                Ok(())
            }
            Err(err) => Err(SettledError::Save {
                message: err.to_string(),
            }),
        }
    }

    /// Marks `to_save` as the synced baseline. Only what was actually
    /// written is adopted; mutations made during the save stay dirty.
    fn adopt(&self, to_save: &Snapshot, version: u64) {
        let mut state = self.state.lock();
        state.last_synced = Some(deep_copy_map(to_save));
        state.version = version;
        debug!(version, "snapshot synced");
    }

    /// Polls until the in-flight pipeline lets go of the guard, then
    /// replays its recorded outcome. Bounded by the configured retries.
    async fn await_in_flight(&self) -> Result<()> {
        if let Some(outcome) = self.finished_outcome() {
            return outcome;
        }
        for _ in 0..self.options.save_wait_retries {
            tokio::time::sleep(self.options.save_wait_interval).await;
            if let Some(outcome) = self.finished_outcome() {
                return outcome;
            }
        }
        warn!("in-flight save did not finish in time");
        Err(SettledError::SaveTimeout)
    }

    fn finished_outcome(&self) -> Option<Result<()>> {
        let state = self.state.lock();
        if state.is_saving {
            return None;
        }
        Some(state.last_save_result.clone().unwrap_or(Ok(())))
    }

    /// Delivers an event to every listener, outside all locks so a
    /// listener can call back into the store. A panicking listener is
    /// logged and skipped, not propagated.
    fn notify(&self, event: &SettingsEvent) {
        let listeners: Vec<Listener> = self.listeners.lock().values().cloned().collect();
        if listeners.is_empty() {
            return;
        }
        let _guard = self.span.enter();
        trace!(kind = event.kind(), count = listeners.len(), "notifying listeners");
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                warn!(kind = event.kind(), "listener panicked");
            }
        }
    }
}
