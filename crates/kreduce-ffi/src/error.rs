//! Kernel invocation error types.

use std::path::PathBuf;

/// Errors raised while loading or calling a compiled kernel.
///
/// Every validation error is raised before the native entry point runs.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvokeError {
    /// The library could not be mapped into the process.
    #[error("cannot load artifact {}: {detail}", path.display())]
    ArtifactUnloadable { path: PathBuf, detail: String },

    /// The library has no symbol with the requested name.
    #[error("symbol '{symbol}' not found in {}", path.display())]
    SymbolNotFound { symbol: String, path: PathBuf },

    /// An argument disagrees with the kernel's layout. `index` is the
    /// parameter position in the native calling convention.
    #[error("argument {index} ({parameter}): expected {expected}, found {actual}")]
    ArgumentShapeMismatch {
        index: usize,
        parameter: String,
        expected: String,
        actual: String,
    },

    /// Wrong number of scalars, inputs or outputs.
    #[error("expected {expected} {what} argument(s), found {actual}")]
    ArgumentCountMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A layout or array that cannot describe a valid call.
    #[error("invalid layout: {detail}")]
    InvalidLayout { detail: String },

    /// Array data that does not match its declared shape.
    #[error("invalid array: {detail}")]
    InvalidArray { detail: String },

    /// An extent does not fit the native 32-bit integer parameter.
    #[error("extent {symbol} = {value} does not fit in a 32-bit integer")]
    DimensionOverflow { symbol: String, value: usize },

    /// A scalar that cannot be passed (non-finite or out of range).
    #[error("invalid scalar {name}: {detail}")]
    InvalidScalar { name: String, detail: String },

    /// The kernel's element type has no host representation.
    #[error("kernels of dtype {dtype} cannot be invoked from host buffers")]
    UnsupportedDType { dtype: kreduce_core::DType },

    /// The native entry point returned a nonzero status.
    #[error("kernel '{symbol}' failed with status {status}")]
    KernelFailed { symbol: String, status: i32 },
}

/// Result type alias for invocation operations.
pub type Result<T> = std::result::Result<T, InvokeError>;
