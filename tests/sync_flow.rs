//! End-to-end persistence flows, driven on a paused Tokio clock.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};

use settled::backend::harness::{FlakyBackend, GatedBackend};
use settled::backend::memory::MemoryBackend;
use settled::backend::BackendError;
use settled::config::StoreOptions;
use settled::error::SettledError;
use settled::events::SettingsEvent;
use settled::schema::{Schema, SettingSchema};
use settled::store::SettingsStore;
use settled::value::Snapshot;

fn schema() -> Schema {
    Schema::new()
        .with("theme", SettingSchema::string("dark"))
        .with("volume", SettingSchema::number(50).with_range(0.0, 100.0))
        .with("enabledCards", SettingSchema::object(json!({})))
}

fn snapshot(value: Value) -> Snapshot {
    value.as_object().expect("object literal").clone()
}

fn record_events<B: settled::backend::SettingsBackend + 'static>(
    store: &SettingsStore<B>,
) -> Arc<Mutex<Vec<SettingsEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    store.subscribe(move |event| sink.lock().push(event.clone()));
    events
}

fn event_kinds(events: &Arc<Mutex<Vec<SettingsEvent>>>) -> Vec<&'static str> {
    events.lock().iter().map(SettingsEvent::kind).collect()
}

/// Lets spawned tasks run without advancing the clock.
async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

async fn wait_until(condition: impl Fn() -> bool, what: &str) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("timed out waiting for {what}");
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[tokio::test(start_paused = true)]
async fn test_first_save_without_baseline_is_full() {
    init_tracing();
    let backend = MemoryBackend::new();
    let store = SettingsStore::new(backend.clone(), schema());

    // Never loaded: there is no baseline to diff against.
    store.set("theme", json!("light"));
    store.save_now().await.unwrap();

    assert_eq!(backend.full_saves(), 1);
    assert_eq!(backend.delta_saves(), 0);
    let stored = backend.snapshot();
    assert_eq!(stored["theme"], json!("light"));
    // The full snapshot went out, defaults included.
    assert_eq!(stored["volume"], json!(50));
    assert_eq!(store.version(), backend.version());
}

#[tokio::test(start_paused = true)]
async fn test_debounced_saves_coalesce_into_one_delta() {
    init_tracing();
    let backend = MemoryBackend::new();
    let store = SettingsStore::new(backend.clone(), schema());
    store.load().await;

    store.set("theme", json!("light"));
    store.set("volume", json!(30));
    store.set("volume", json!(35));

    tokio::time::advance(Duration::from_millis(499)).await;
    settle().await;
    assert_eq!(backend.delta_saves(), 0);

    tokio::time::advance(Duration::from_millis(2)).await;
    settle().await;
    assert_eq!(backend.delta_saves(), 1);
    assert_eq!(backend.full_saves(), 0);

    let stored = backend.snapshot();
    assert_eq!(stored["theme"], json!("light"));
    assert_eq!(stored["volume"], json!(35));
}

#[tokio::test(start_paused = true)]
async fn test_save_now_skips_the_debounce() {
    init_tracing();
    let backend = MemoryBackend::new();
    let store = SettingsStore::new(backend.clone(), schema());
    store.load().await;

    store.set("theme", json!("light"));
    store.save_now().await.unwrap();
    assert_eq!(backend.delta_saves(), 1);

    // The debounced task was cancelled; nothing fires later.
    tokio::time::advance(Duration::from_secs(2)).await;
    settle().await;
    assert_eq!(backend.delta_saves(), 1);

    // Nothing changed since: the next flush never touches the backend.
    store.save_now().await.unwrap();
    assert_eq!(backend.delta_saves(), 1);
    assert_eq!(backend.full_saves(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_clean_snapshot_save_emits_events_but_no_network() {
    init_tracing();
    let backend = MemoryBackend::new();
    let store = SettingsStore::new(backend.clone(), schema());
    store.load().await;
    let events = record_events(&store);

    store.save_now().await.unwrap();

    assert_eq!(backend.delta_saves(), 0);
    assert_eq!(backend.full_saves(), 0);
    assert_eq!(event_kinds(&events), ["save_started", "save_ended"]);
}

#[tokio::test(start_paused = true)]
async fn test_custom_debounce_window() {
    init_tracing();
    let backend = MemoryBackend::new();
    let options = StoreOptions {
        debounce: Duration::from_millis(50),
        ..StoreOptions::default()
    };
    let store = SettingsStore::with_options(backend.clone(), schema(), options);
    store.load().await;

    store.set("theme", json!("light"));
    tokio::time::advance(Duration::from_millis(60)).await;
    settle().await;
    assert_eq!(backend.delta_saves(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_version_conflict_surfaces_and_keeps_local_changes() {
    init_tracing();
    let backend = MemoryBackend::with_settings(snapshot(json!({"theme": "tungsten"})));
    let store = SettingsStore::new(backend.clone(), schema());
    store.load().await;
    assert_eq!(store.version(), 1);

    store.set("theme", json!("light"));
    // Another client writes first.
    backend.write_externally(snapshot(json!({"theme": "solarized"})));

    let events = record_events(&store);
    let outcome = store.save_now().await;
    assert!(matches!(
        outcome,
        Err(SettledError::VersionConflict { .. })
    ));

    assert!(event_kinds(&events).contains(&"version_conflict"));
    assert!(store.last_error().is_some());
    // Local changes and the stale baseline both stay put.
    assert_eq!(store.get("theme"), Some(json!("light")));
    assert_eq!(store.version(), 1);
    assert_eq!(backend.full_saves(), 0);
    assert_eq!(backend.snapshot()["theme"], json!("solarized"));

    // The conflict is not resolved behind the caller's back: flushing
    // again just reports it again.
    let outcome = store.save_now().await;
    assert!(matches!(
        outcome,
        Err(SettledError::VersionConflict { .. })
    ));
    assert_eq!(backend.delta_saves(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_delta_failure_falls_back_to_one_full_save() {
    init_tracing();
    let memory = MemoryBackend::new();
    let flaky = FlakyBackend::new(memory.clone());
    let store = SettingsStore::new(flaky.clone(), schema());
    store.load().await;

    store.set("theme", json!("light"));
    flaky.fail_next_save_delta(BackendError::Backend("write failed mid-flight".into()));

    store.save_now().await.unwrap();

    // The failed delta never reached the document; the fallback did.
    assert_eq!(memory.delta_saves(), 0);
    assert_eq!(memory.full_saves(), 1);
    assert_eq!(memory.snapshot()["theme"], json!("light"));
    assert_eq!(store.version(), memory.version());
}

#[tokio::test(start_paused = true)]
async fn test_full_save_failure_is_reported() {
    init_tracing();
    let memory = MemoryBackend::new();
    let flaky = FlakyBackend::new(memory.clone());
    let store = SettingsStore::new(flaky.clone(), schema());

    store.set("theme", json!("light"));
    flaky.fail_next_save_full(BackendError::Backend("disk full".into()));

    let outcome = store.save_now().await;
    assert!(matches!(outcome, Err(SettledError::Save { .. })));
    assert_eq!(memory.full_saves(), 0);
    assert!(store.last_error().is_some());

    // The changes are still dirty; the next flush saves them.
    store.save_now().await.unwrap();
    assert_eq!(memory.snapshot()["theme"], json!("light"));
    assert_eq!(store.last_error(), None);
}

#[tokio::test(start_paused = true)]
async fn test_mutation_during_save_triggers_a_followup_pass() {
    init_tracing();
    let memory = MemoryBackend::new();
    let gated = GatedBackend::new(memory.clone());
    let store = SettingsStore::new(gated.clone(), schema());
    store.load().await;
    let events = record_events(&store);

    store.set("theme", json!("light"));
    let saver = {
        let store = store.clone();
        tokio::spawn(async move { store.save_now().await })
    };
    wait_until(|| gated.waiting() == 1, "the save to reach the gate").await;

    // A mutation lands while the save is in flight; its debounced save
    // fires into the busy pipeline and gets queued.
    store.set("volume", json!(30));
    tokio::time::advance(Duration::from_millis(501)).await;
    settle().await;
    assert!(store.has_pending_changes());

    gated.release(1);
    wait_until(|| gated.waiting() == 1, "the follow-up to reach the gate").await;
    gated.release(1);

    saver.await.unwrap().unwrap();
    assert!(!store.is_saving());
    assert!(!store.has_pending_changes());
    assert_eq!(memory.delta_saves(), 2);
    assert_eq!(memory.snapshot()["theme"], json!("light"));
    assert_eq!(memory.snapshot()["volume"], json!(30));

    let kinds = event_kinds(&events);
    let starts = kinds.iter().filter(|kind| **kind == "save_started").count();
    assert_eq!(starts, 2);
}

#[tokio::test(start_paused = true)]
async fn test_save_now_during_save_waits_for_that_pipeline() {
    init_tracing();
    let memory = MemoryBackend::new();
    let gated = GatedBackend::new(memory.clone());
    let store = SettingsStore::new(gated.clone(), schema());
    store.load().await;

    store.set("theme", json!("light"));
    let first = {
        let store = store.clone();
        tokio::spawn(async move { store.save_now().await })
    };
    wait_until(|| gated.waiting() == 1, "the save to reach the gate").await;

    let second = {
        let store = store.clone();
        tokio::spawn(async move { store.save_now().await })
    };
    settle().await;

    gated.release(2);
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    // One delta carried the change; the queued pass found nothing new
    // and never touched the backend.
    assert_eq!(memory.delta_saves(), 1);
    assert_eq!(memory.full_saves(), 0);
    assert_eq!(memory.snapshot()["theme"], json!("light"));
}

#[tokio::test(start_paused = true)]
async fn test_save_now_times_out_on_a_stuck_save() {
    init_tracing();
    let memory = MemoryBackend::new();
    let gated = GatedBackend::new(memory.clone());
    let store = SettingsStore::new(gated.clone(), schema());
    store.load().await;

    store.set("theme", json!("light"));
    let stuck = {
        let store = store.clone();
        tokio::spawn(async move { store.save_now().await })
    };
    wait_until(|| gated.waiting() == 1, "the save to reach the gate").await;

    // The gate never opens; polling runs out of retries.
    let outcome = store.save_now().await;
    assert!(matches!(outcome, Err(SettledError::SaveTimeout)));
    assert!(store.is_saving());

    stuck.abort();
}

#[tokio::test(start_paused = true)]
async fn test_committed_draft_persists_after_the_debounce() {
    init_tracing();
    let backend = MemoryBackend::new();
    let store = SettingsStore::new(backend.clone(), schema());
    store.load().await;

    store.begin_draft("appearance", &["theme"]);
    store.set_draft_value("theme", json!("light"));
    assert!(store.commit_draft());

    tokio::time::advance(Duration::from_millis(501)).await;
    settle().await;

    assert_eq!(backend.delta_saves(), 1);
    assert_eq!(backend.snapshot()["theme"], json!("light"));
}

#[tokio::test(start_paused = true)]
async fn test_undo_persists_the_restored_value() {
    init_tracing();
    let backend = MemoryBackend::new();
    let store = SettingsStore::new(backend.clone(), schema());
    store.load().await;

    store.set("theme", json!("light"));
    store.save_now().await.unwrap();
    assert_eq!(backend.snapshot()["theme"], json!("light"));

    assert!(store.undo());
    store.save_now().await.unwrap();
    assert_eq!(backend.snapshot()["theme"], json!("dark"));
    assert_eq!(backend.delta_saves(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_event_sequence_for_a_full_cycle() {
    init_tracing();
    let store = SettingsStore::new(MemoryBackend::new(), schema());
    let events = record_events(&store);

    store.load().await;
    store.set("theme", json!("light"));
    store.save_now().await.unwrap();

    assert_eq!(
        event_kinds(&events),
        ["loaded", "mutated", "save_started", "save_ended"]
    );
}
