use thiserror::Error;

/// Store-level errors.
///
/// Variants carry plain strings rather than error sources so an outcome can
/// be recorded once by the save pipeline and cloned back to every
/// `save_now` waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettledError {
    #[error("Version conflict: {message}")]
    VersionConflict { message: String },

    #[error("Save failed: {message}")]
    Save { message: String },

    #[error("Timed out waiting for the in-flight save to finish")]
    SaveTimeout,
}

pub type Result<T> = std::result::Result<T, SettledError>;
