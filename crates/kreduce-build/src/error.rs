//! Build and cache error types.

use std::path::PathBuf;

/// Errors that can occur while producing or adopting an artifact.
///
/// Every variant is `Clone`: one failed build is reported to every caller
/// that was waiting on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BuildError {
    /// The external build tool exited with non-zero status (or could not be
    /// started). `diagnostic` carries its captured output.
    #[error("build failed for {key}: {diagnostic}")]
    BuildFailed { key: String, diagnostic: String },

    /// The build reported success but the artifact cannot be used.
    #[error("artifact for {key} at {path} is unloadable: {detail}")]
    ArtifactUnloadable {
        key: String,
        path: PathBuf,
        detail: String,
    },

    /// Artifact store I/O error.
    #[error("artifact store error at {path}: {detail}")]
    Store { path: PathBuf, detail: String },

    /// Configuration could not be read or is incomplete.
    #[error("invalid configuration: {detail}")]
    Config { detail: String },
}

impl BuildError {
    /// Whether a later attempt for the same key may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, BuildError::Config { .. })
    }
}

/// Result type alias for build operations.
pub type Result<T> = std::result::Result<T, BuildError>;
