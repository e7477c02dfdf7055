//! Compilation and caching of formula-specialized kernels.
//!
//! Turns a [`kreduce_core::CacheKey`] into a loadable shared library:
//!
//! - [`config`]: `kreduce.toml` and toolchain discovery
//! - [`params`]: structured specialization parameters
//! - [`tool`]: the external build tool boundary
//! - [`driver`]: two-phase configure/build protocol
//! - [`store`]: durable, atomically written artifact store
//! - [`cache`]: single-flight in-process build cache
//!
//! # Deployment contract
//!
//! Every key builds in its own build root (`<cache root>/build/<digest>`),
//! so builds of distinct keys may run in parallel. Builds of the same key are
//! serialized within a process by [`BuildCache`]; across processes the store
//! only guarantees that readers never see a partially written artifact.

pub mod artifact;
pub mod cache;
pub mod config;
pub mod driver;
pub mod error;
pub mod params;
pub mod store;
pub mod tool;

pub use artifact::{check_library, Artifact, LibraryFormat};
pub use cache::{BuildCache, CacheStats};
pub use config::{find_build_tool, CacheConfig, KreduceConfig, ToolchainConfig};
pub use driver::CompilationDriver;
pub use error::{BuildError, Result};
pub use params::SpecializationParams;
pub use store::{ArtifactManifest, ArtifactStore};
pub use tool::{BuildTool, CommandTool, ToolOutput};
