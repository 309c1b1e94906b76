//! File-backed backend.
//!
//! Stores the settings document as pretty-printed JSON at a fixed path.
//! The document's version rides inside the file under the reserved
//! top-level key `_version`, stamped from the wall clock in milliseconds
//! and forced monotonic, so any writer that can read the file can detect
//! staleness. Settings documents are small, so reads and writes use
//! blocking `std::fs` directly.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;

use super::{BackendError, LoadedSettings, SettingsBackend};
use crate::delta::{apply_patch, Patch};
use crate::value::Snapshot;

/// Top-level key the backend claims for itself inside the file.
pub const VERSION_KEY: &str = "_version";

pub struct FileBackend {
    path: PathBuf,
    // Serializes read-modify-write cycles between clones of the same
    // process; writers in other processes are caught by the version.
    lock: Mutex<()>,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the file into a snapshot and its version. A missing file is
    /// an empty document at version zero.
    fn read_document(&self) -> Result<(Snapshot, u64), BackendError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok((Snapshot::new(), 0));
            }
            Err(err) => return Err(BackendError::Io(err)),
        };
        let value: Value = serde_json::from_str(&raw)?;
        let Value::Object(mut document) = value else {
            return Err(BackendError::Backend(format!(
                "settings file {} does not hold a JSON object",
                self.path.display()
            )));
        };
        let version = document
            .remove(VERSION_KEY)
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        Ok((document, version))
    }

    fn write_document(&self, settings: &Snapshot, version: u64) -> Result<(), BackendError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut document = settings.clone();
        document.insert(VERSION_KEY.to_string(), Value::from(version));
        let raw = serde_json::to_string_pretty(&Value::Object(document))?;
        fs::write(&self.path, raw)?;
        Ok(())
    }

    /// Wall-clock stamp, forced past `current` so versions stay strictly
    /// increasing even when the clock stalls or steps backwards.
    fn next_version(current: u64) -> u64 {
        now_millis().max(current + 1)
    }
}

fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

#[async_trait]
impl SettingsBackend for FileBackend {
    async fn load(&self) -> Result<LoadedSettings, BackendError> {
        let _guard = self.lock.lock();
        let (settings, version) = self.read_document()?;
        Ok(LoadedSettings { settings, version })
    }

    async fn save_full(&self, snapshot: &Snapshot) -> Result<u64, BackendError> {
        if snapshot.contains_key(VERSION_KEY) {
            return Err(BackendError::Backend(format!(
                "top-level key {VERSION_KEY:?} is reserved"
            )));
        }
        let _guard = self.lock.lock();
        // A corrupt document must not block replacing it wholesale.
        let current = match self.read_document() {
            Ok((_, version)) => version,
            Err(_) => 0,
        };
        let version = Self::next_version(current);
        self.write_document(snapshot, version)?;
        Ok(version)
    }

    async fn save_delta(&self, patch: &Patch, base_version: u64) -> Result<u64, BackendError> {
        for (path, _) in patch.iter() {
            if path.segments().first().map(String::as_str) == Some(VERSION_KEY) {
                return Err(BackendError::Backend(format!(
                    "patch touches reserved key {VERSION_KEY:?}"
                )));
            }
        }
        let _guard = self.lock.lock();
        let (settings, current) = self.read_document()?;
        if base_version > 0 && base_version < current {
            return Err(BackendError::VersionConflict(format!(
                "patch built against version {base_version}, file is at version {current}"
            )));
        }
        let updated = apply_patch(&settings, patch);
        let version = Self::next_version(current);
        self.write_document(&updated, version)?;
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::KeyPath;
    use serde_json::json;

    fn snapshot(value: Value) -> Snapshot {
        value.as_object().expect("object literal").clone()
    }

    #[tokio::test]
    async fn missing_file_loads_as_empty_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = FileBackend::new(dir.path().join("settings.json"));

        let loaded = backend.load().await.expect("load");
        assert!(loaded.settings.is_empty());
        assert_eq!(loaded.version, 0);
    }

    #[tokio::test]
    async fn save_full_round_trips_and_creates_parents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = FileBackend::new(dir.path().join("nested/dir/settings.json"));

        let version = backend
            .save_full(&snapshot(json!({"theme": "dark", "panel": {"width": 320}})))
            .await
            .expect("save");
        assert!(version > 0);

        let loaded = backend.load().await.expect("load");
        assert_eq!(
            loaded.settings,
            snapshot(json!({"theme": "dark", "panel": {"width": 320}}))
        );
        assert_eq!(loaded.version, version);
    }

    #[tokio::test]
    async fn versions_strictly_increase() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = FileBackend::new(dir.path().join("settings.json"));

        let first = backend
            .save_full(&snapshot(json!({"a": 1})))
            .await
            .expect("save");
        let second = backend
            .save_full(&snapshot(json!({"a": 2})))
            .await
            .expect("save");
        assert!(second > first);
    }

    #[tokio::test]
    async fn delta_patches_the_file_in_place() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = FileBackend::new(dir.path().join("settings.json"));

        let base = backend
            .save_full(&snapshot(json!({"theme": "dark", "panel": {"width": 320}})))
            .await
            .expect("save");

        let mut patch = Patch::new();
        patch.insert(&KeyPath::parse("panel.width"), json!(480));
        let version = backend.save_delta(&patch, base).await.expect("delta");
        assert!(version > base);

        let loaded = backend.load().await.expect("load");
        assert_eq!(
            loaded.settings,
            snapshot(json!({"theme": "dark", "panel": {"width": 480}}))
        );
    }

    #[tokio::test]
    async fn stale_delta_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        let backend = FileBackend::new(&path);

        let base = backend
            .save_full(&snapshot(json!({"theme": "dark"})))
            .await
            .expect("save");

        // Another writer moves the file forward.
        let other = FileBackend::new(&path);
        other
            .save_full(&snapshot(json!({"theme": "light"})))
            .await
            .expect("save");

        let mut patch = Patch::new();
        patch.insert(&KeyPath::parse("theme"), json!("solarized"));
        let err = backend.save_delta(&patch, base).await.expect_err("conflict");
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn version_key_is_reserved() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = FileBackend::new(dir.path().join("settings.json"));

        let err = backend
            .save_full(&snapshot(json!({"_version": 9})))
            .await
            .expect_err("reserved");
        assert!(matches!(err, BackendError::Backend(_)));

        let mut patch = Patch::new();
        patch.insert(&KeyPath::parse("_version"), json!(9));
        let err = backend.save_delta(&patch, 0).await.expect_err("reserved");
        assert!(matches!(err, BackendError::Backend(_)));
    }

    #[tokio::test]
    async fn version_key_is_stripped_from_loads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"_version": 42, "theme": "dark"}"#).expect("write");

        let backend = FileBackend::new(&path);
        let loaded = backend.load().await.expect("load");
        assert_eq!(loaded.version, 42);
        assert_eq!(loaded.settings, snapshot(json!({"theme": "dark"})));
    }

    #[tokio::test]
    async fn non_object_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        fs::write(&path, "[1, 2, 3]").expect("write");

        let backend = FileBackend::new(&path);
        assert!(backend.load().await.is_err());
    }
}
