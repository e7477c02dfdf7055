//! Engine error types.

use kreduce_build::BuildError;
use kreduce_core::FormulaError;
use kreduce_ffi::InvokeError;

/// Any failure on the way from a formula to a kernel result.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// The formula or its aliases were rejected.
    #[error(transparent)]
    Formula(#[from] FormulaError),

    /// Building, adopting or recording the artifact failed.
    #[error(transparent)]
    Build(#[from] BuildError),

    /// Loading or calling the kernel failed.
    #[error(transparent)]
    Invoke(#[from] InvokeError),
}

impl EngineError {
    /// Whether the same request may succeed if repeated.
    ///
    /// Malformed input, shape mismatches and missing symbols are permanent;
    /// build and load failures are not cached and may succeed next time.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Formula(_) => false,
            EngineError::Build(e) => e.is_retryable(),
            EngineError::Invoke(InvokeError::ArtifactUnloadable { .. }) => true,
            EngineError::Invoke(_) => false,
        }
    }

    /// Whether the artifact exists but cannot be used, which warrants one
    /// rebuild before giving up.
    pub(crate) fn is_unloadable(&self) -> bool {
        matches!(
            self,
            EngineError::Build(BuildError::ArtifactUnloadable { .. })
                | EngineError::Invoke(InvokeError::ArtifactUnloadable { .. })
        )
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
