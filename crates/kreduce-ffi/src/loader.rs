//! Dynamic loading of compiled artifacts.

use std::path::Path;
use std::sync::Arc;

use libloading::Library;
use tracing::debug;

use crate::error::{InvokeError, Result};
use crate::kernel::{BoundKernel, EntryPoint};
use crate::layout::Layout;

/// Map the library at `path` and bind `entry_point` under `layout`.
///
/// The library stays mapped for as long as the returned kernel lives.
pub fn load(path: &Path, entry_point: &str, layout: Layout) -> Result<BoundKernel> {
    // Safety: loading runs the library's initializers; artifacts are produced
    // by the compilation driver from trusted sources.
    let library = unsafe { Library::new(path) }.map_err(|e| InvokeError::ArtifactUnloadable {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;

    // Safety: every artifact exports its entry point with the calling
    // convention its target kind declares.
    let entry = unsafe { EntryPoint::resolve(&library, entry_point, layout.convention(), layout.dtype()) }
        .map_err(|_| InvokeError::SymbolNotFound {
            symbol: entry_point.to_string(),
            path: path.to_path_buf(),
        })?;

    debug!(
        event = "kernel_loaded",
        symbol = entry_point,
        path = %path.display(),
        dtype = %layout.dtype(),
    );
    Ok(BoundKernel::from_library(Arc::new(library), path, entry_point, entry, layout))
}
