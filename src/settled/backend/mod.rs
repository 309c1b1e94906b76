//! Persistence backends.
//!
//! The store is generic over [`SettingsBackend`] and never knows where
//! bytes actually land. Two implementations ship with the crate:
//!
//! - [`memory::MemoryBackend`]: an in-process document with version
//!   counting, used in tests and as the reference for conflict rules.
//! - [`fs::FileBackend`]: a JSON file on disk.
//!
//! Backends are versioned. Every successful save returns the version the
//! document now has, and `save_delta` must reject a patch whose
//! `base_version` is older than the stored document. That rejection is
//! the only conflict signal the store gets, so backends must report it
//! as [`BackendError::VersionConflict`] and nothing else.

use async_trait::async_trait;
use thiserror::Error;

use crate::delta::Patch;
use crate::value::Snapshot;

pub mod fs;
#[cfg(any(test, feature = "test_utils"))]
pub mod harness;
pub mod memory;

/// Errors a backend can produce.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The patch was built against a version the backend has moved past.
    #[error("version conflict: {0}")]
    VersionConflict(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Anything else the backend wants to surface.
    #[error("{0}")]
    Backend(String),
}

impl BackendError {
    /// Whether this failure is a version conflict, which the store
    /// surfaces to the caller instead of retrying.
    pub fn is_conflict(&self) -> bool {
        matches!(self, BackendError::VersionConflict(_))
    }
}

/// A snapshot together with the version the backend stored it under.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedSettings {
    pub settings: Snapshot,
    pub version: u64,
}

/// Where settings snapshots are persisted.
///
/// Implementations must be safe to call from concurrent tasks; the store
/// itself never issues overlapping saves, but `load` may race a save
/// when a caller retries eagerly.
#[async_trait]
pub trait SettingsBackend: Send + Sync {
    /// Reads the current document. A backend with no document yet
    /// returns an empty snapshot at version zero rather than an error.
    async fn load(&self) -> Result<LoadedSettings, BackendError>;

    /// Replaces the whole document and returns its new version.
    async fn save_full(&self, snapshot: &Snapshot) -> Result<u64, BackendError>;

    /// Applies `patch` on top of the document at `base_version` and
    /// returns the new version. Must fail with
    /// [`BackendError::VersionConflict`] when the stored document is
    /// newer than `base_version`.
    async fn save_delta(&self, patch: &Patch, base_version: u64) -> Result<u64, BackendError>;
}
