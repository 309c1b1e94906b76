//! In-process backend.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{BackendError, LoadedSettings, SettingsBackend};
use crate::delta::{apply_patch, Patch};
use crate::value::{deep_copy_map, Snapshot};

/// A versioned settings document held in memory.
///
/// Cloning yields another handle to the same document, so a test can
/// keep one clone for inspection and hand the other to a store. The
/// backend also counts operations, which is how tests assert that the
/// store coalesced saves or skipped the network on an empty diff.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<MemoryDocument>>,
}

#[derive(Debug, Default)]
struct MemoryDocument {
    settings: Snapshot,
    version: u64,
    loads: u64,
    full_saves: u64,
    delta_saves: u64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts with `settings` already stored, at version one.
    pub fn with_settings(settings: Snapshot) -> Self {
        let backend = Self::new();
        {
            let mut doc = backend.inner.lock();
            doc.settings = settings;
            doc.version = 1;
        }
        backend
    }

    /// Copy of the stored document.
    pub fn snapshot(&self) -> Snapshot {
        deep_copy_map(&self.inner.lock().settings)
    }

    pub fn version(&self) -> u64 {
        self.inner.lock().version
    }

    /// Replaces the document as a concurrent writer would, bumping the
    /// version so in-flight patches built before this call conflict.
    pub fn write_externally(&self, settings: Snapshot) {
        let mut doc = self.inner.lock();
        doc.settings = settings;
        doc.version += 1;
    }

    pub fn loads(&self) -> u64 {
        self.inner.lock().loads
    }

    pub fn full_saves(&self) -> u64 {
        self.inner.lock().full_saves
    }

    pub fn delta_saves(&self) -> u64 {
        self.inner.lock().delta_saves
    }
}

#[async_trait]
impl SettingsBackend for MemoryBackend {
    async fn load(&self) -> Result<LoadedSettings, BackendError> {
        let mut doc = self.inner.lock();
        doc.loads += 1;
        Ok(LoadedSettings {
            settings: deep_copy_map(&doc.settings),
            version: doc.version,
        })
    }

    async fn save_full(&self, snapshot: &Snapshot) -> Result<u64, BackendError> {
        let mut doc = self.inner.lock();
        doc.full_saves += 1;
        doc.settings = deep_copy_map(snapshot);
        doc.version += 1;
        Ok(doc.version)
    }

    async fn save_delta(&self, patch: &Patch, base_version: u64) -> Result<u64, BackendError> {
        let mut doc = self.inner.lock();
        doc.delta_saves += 1;
        // Version zero means the writer has never synced; only a writer
        // that has seen a concrete version can be stale.
        if base_version > 0 && base_version < doc.version {
            return Err(BackendError::VersionConflict(format!(
                "patch built against version {base_version}, document is at version {}",
                doc.version
            )));
        }
        doc.settings = apply_patch(&doc.settings, patch);
        doc.version += 1;
        Ok(doc.version)
    }
}
