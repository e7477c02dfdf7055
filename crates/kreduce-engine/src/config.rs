//! Engine configuration.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use kreduce_build::{KreduceConfig, ToolchainConfig};

use crate::error::Result;

/// Everything the engine needs to build and load kernels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub toolchain: ToolchainConfig,
    /// Root of the artifact store.
    pub cache_root: PathBuf,
    /// Whether compiled entry points may run on several threads at once.
    pub reentrant: bool,
}

impl EngineConfig {
    pub fn new(toolchain: ToolchainConfig, cache_root: impl Into<PathBuf>) -> Self {
        EngineConfig {
            toolchain,
            cache_root: cache_root.into(),
            reentrant: true,
        }
    }

    /// Engine settings from a loaded `kreduce.toml`.
    pub fn from_config(config: &KreduceConfig) -> Result<Self> {
        Ok(Self::new(config.toolchain.clone(), config.cache_root()?))
    }

    /// Look for `kreduce.toml` from `start` upwards, apply environment
    /// overrides and fall back to defaults when no file exists. A bare build
    /// tool name is resolved against `PATH`.
    pub fn discover(start: &Path) -> Result<Self> {
        Self::discover_with(start, std::env::var_os("PATH"))
    }

    /// [`EngineConfig::discover`] with an explicit tool search list.
    pub fn discover_with(start: &Path, path_var: Option<OsString>) -> Result<Self> {
        let config = match KreduceConfig::find_and_load(start)? {
            Some((config, _)) => config,
            None => KreduceConfig::default(),
        };
        Self::from_config(&config.with_env_overrides().with_resolved_toolchain(path_var))
    }

    pub fn with_reentrant(mut self, reentrant: bool) -> Self {
        self.reentrant = reentrant;
        self
    }
}
