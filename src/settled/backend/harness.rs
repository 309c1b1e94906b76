//! Backends that misbehave on demand.
//!
//! Store behavior worth testing mostly lives on the failure and timing
//! paths, so these wrappers make a well-behaved backend flaky or slow
//! under test control.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use super::{BackendError, LoadedSettings, SettingsBackend};
use crate::delta::Patch;
use crate::value::Snapshot;

/// Wraps a backend and injects scripted failures.
///
/// Each `fail_next_*` call queues one error; the matching operation pops
/// and returns it instead of delegating. Once a queue is empty the
/// operation behaves normally again.
#[derive(Clone)]
pub struct FlakyBackend<B> {
    inner: B,
    script: Arc<Mutex<FailureScript>>,
}

#[derive(Default)]
struct FailureScript {
    load: VecDeque<BackendError>,
    save_full: VecDeque<BackendError>,
    save_delta: VecDeque<BackendError>,
}

impl<B> FlakyBackend<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            script: Arc::new(Mutex::new(FailureScript::default())),
        }
    }

    pub fn fail_next_load(&self, error: BackendError) {
        self.script.lock().load.push_back(error);
    }

    pub fn fail_next_save_full(&self, error: BackendError) {
        self.script.lock().save_full.push_back(error);
    }

    pub fn fail_next_save_delta(&self, error: BackendError) {
        self.script.lock().save_delta.push_back(error);
    }
}

#[async_trait]
impl<B: SettingsBackend> SettingsBackend for FlakyBackend<B> {
    async fn load(&self) -> Result<LoadedSettings, BackendError> {
        if let Some(error) = self.script.lock().load.pop_front() {
            return Err(error);
        }
        self.inner.load().await
    }

    async fn save_full(&self, snapshot: &Snapshot) -> Result<u64, BackendError> {
        if let Some(error) = self.script.lock().save_full.pop_front() {
            return Err(error);
        }
        self.inner.save_full(snapshot).await
    }

    async fn save_delta(&self, patch: &Patch, base_version: u64) -> Result<u64, BackendError> {
        if let Some(error) = self.script.lock().save_delta.pop_front() {
            return Err(error);
        }
        self.inner.save_delta(patch, base_version).await
    }
}

/// Wraps a backend and holds every save at a gate until released.
///
/// The gate starts closed. Each save consumes one permit before
/// delegating, so `release(1)` lets exactly one save through. Loads are
/// not gated.
#[derive(Clone)]
pub struct GatedBackend<B> {
    inner: B,
    gate: Arc<Semaphore>,
    waiting: Arc<AtomicUsize>,
}

impl<B> GatedBackend<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            gate: Arc::new(Semaphore::new(0)),
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Lets `saves` blocked or future saves proceed.
    pub fn release(&self, saves: usize) {
        self.gate.add_permits(saves);
    }

    /// Number of saves currently blocked at the gate.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    async fn pass_gate(&self) -> Result<(), BackendError> {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let outcome = self.gate.acquire().await;
        self.waiting.fetch_sub(1, Ordering::SeqCst);
        let permit = outcome.map_err(|_| BackendError::Backend("save gate closed".into()))?;
        permit.forget();
        Ok(())
    }
}

#[async_trait]
impl<B: SettingsBackend> SettingsBackend for GatedBackend<B> {
    async fn load(&self) -> Result<LoadedSettings, BackendError> {
        self.inner.load().await
    }

    async fn save_full(&self, snapshot: &Snapshot) -> Result<u64, BackendError> {
        self.pass_gate().await?;
        self.inner.save_full(snapshot).await
    }

    async fn save_delta(&self, patch: &Patch, base_version: u64) -> Result<u64, BackendError> {
        self.pass_gate().await?;
        self.inner.save_delta(patch, base_version).await
    }
}
