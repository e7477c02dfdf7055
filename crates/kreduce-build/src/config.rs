//! `kreduce.toml` configuration and toolchain discovery.
//!
//! Toolchain discovery is an explicit operation ([`find_build_tool`]) whose
//! result is stored in [`ToolchainConfig::cmake`]; nothing is searched for
//! as a side effect of constructing the engine.
//!
//! ```toml
//! [toolchain]
//! cmake = "/usr/bin/cmake"
//! source_dir = "/opt/kreduce/kernels"
//! build_type = "Release"
//!
//! [cache]
//! root = "/var/cache/kreduce"
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BuildError, Result};

/// Configuration file name searched for by [`KreduceConfig::find_and_load`].
pub const CONFIG_FILE: &str = "kreduce.toml";

/// Environment variable overriding the build tool path.
pub const CMAKE_ENV: &str = "KREDUCE_CMAKE";

/// Environment variable overriding the cache root.
pub const CACHE_DIR_ENV: &str = "KREDUCE_CACHE_DIR";

/// Path fragments identifying shims that shadow the real build tool.
const SHADOWING_SHIMS: &[&str] = &["pyenv", "shims"];

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KreduceConfig {
    #[serde(default)]
    pub toolchain: ToolchainConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

/// How to invoke the external build tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainConfig {
    /// Resolved path of the build tool executable.
    #[serde(default = "default_cmake")]
    pub cmake: PathBuf,
    /// Directory containing the kernel build scripts (passed to configure).
    #[serde(default)]
    pub source_dir: PathBuf,
    /// `CMAKE_BUILD_TYPE`.
    #[serde(default = "default_build_type")]
    pub build_type: String,
    /// Language/runtime tag forwarded to the build scripts.
    #[serde(default = "default_lang")]
    pub lang: String,
    /// Executable path forwarded to the build scripts.
    #[serde(default)]
    pub executable: Option<PathBuf>,
    /// Ask the build tool for verbose output.
    #[serde(default)]
    pub verbose: bool,
    /// Extra configure arguments appended verbatim.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

/// Where artifacts are stored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache root; defaults to `~/.kreduce/cache`.
    #[serde(default)]
    pub root: Option<PathBuf>,
}

fn default_cmake() -> PathBuf {
    PathBuf::from("cmake")
}

fn default_build_type() -> String {
    "Release".to_string()
}

fn default_lang() -> String {
    "rust".to_string()
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        ToolchainConfig {
            cmake: default_cmake(),
            source_dir: PathBuf::new(),
            build_type: default_build_type(),
            lang: default_lang(),
            executable: None,
            verbose: false,
            extra_args: Vec::new(),
        }
    }
}

impl ToolchainConfig {
    /// Toolchain using the build scripts in `source_dir` and a build tool
    /// found on `PATH` (falling back to the bare name).
    pub fn discover(source_dir: impl Into<PathBuf>) -> Self {
        ToolchainConfig {
            source_dir: source_dir.into(),
            ..ToolchainConfig::default()
        }
        .resolve_build_tool(std::env::var_os("PATH"))
    }

    /// Replace a bare tool name such as `cmake` with the first real match on
    /// `path_var`, skipping shims. Paths with a directory are kept as given,
    /// and so is the bare name when nothing is found.
    pub fn resolve_build_tool(mut self, path_var: Option<OsString>) -> Self {
        let bare = self.cmake.components().count() == 1 && !self.cmake.has_root();
        if !bare {
            return self;
        }
        let name = self.cmake.to_string_lossy().into_owned();
        if let Some(found) = find_build_tool(&name, path_var) {
            self.cmake = found;
        }
        self
    }

    /// Executable path forwarded to the build scripts; defaults to the
    /// current executable.
    pub fn executable_path(&self) -> PathBuf {
        self.executable
            .clone()
            .or_else(|| std::env::current_exe().ok())
            .unwrap_or_default()
    }

    /// Check that the configuration names a build script directory.
    pub fn validate(&self) -> Result<()> {
        if self.source_dir.as_os_str().is_empty() {
            return Err(BuildError::Config {
                detail: "toolchain.source_dir is not set".to_string(),
            });
        }
        if self.cmake.as_os_str().is_empty() {
            return Err(BuildError::Config {
                detail: "toolchain.cmake is empty".to_string(),
            });
        }
        Ok(())
    }
}

impl KreduceConfig {
    /// Parse configuration from TOML text.
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| BuildError::Config {
            detail: format!("parsing {CONFIG_FILE}: {e}"),
        })
    }

    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| BuildError::Config {
            detail: format!("reading {}: {e}", path.display()),
        })?;
        let mut config = Self::parse(&text)?;
        // Relative source dirs are relative to the config file.
        if config.toolchain.source_dir.is_relative() {
            if let Some(dir) = path.parent() {
                config.toolchain.source_dir = dir.join(&config.toolchain.source_dir);
            }
        }
        Ok(config)
    }

    /// Search `start` and its ancestors for `kreduce.toml`.
    pub fn find_and_load(start: &Path) -> Result<Option<(Self, PathBuf)>> {
        let mut dir = Some(start);
        while let Some(d) = dir {
            let candidate = d.join(CONFIG_FILE);
            if candidate.is_file() {
                return Ok(Some((Self::load(&candidate)?, d.to_path_buf())));
            }
            dir = d.parent();
        }
        Ok(None)
    }

    /// Apply `KREDUCE_CMAKE` / `KREDUCE_CACHE_DIR` overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(cmake) = std::env::var_os(CMAKE_ENV) {
            self.toolchain.cmake = PathBuf::from(cmake);
        }
        if let Some(root) = std::env::var_os(CACHE_DIR_ENV) {
            self.cache.root = Some(PathBuf::from(root));
        }
        self
    }

    /// Resolve the build tool against `path_var`; see
    /// [`ToolchainConfig::resolve_build_tool`].
    pub fn with_resolved_toolchain(mut self, path_var: Option<OsString>) -> Self {
        self.toolchain = self.toolchain.resolve_build_tool(path_var);
        self
    }

    /// Effective cache root.
    pub fn cache_root(&self) -> Result<PathBuf> {
        if let Some(root) = &self.cache.root {
            return Ok(root.clone());
        }
        std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".kreduce").join("cache"))
            .ok_or_else(|| BuildError::Config {
                detail: "no cache root configured and HOME is not set".to_string(),
            })
    }
}

/// Find `name` on a `PATH`-style search list, skipping shims that shadow the
/// real tool (pyenv and friends).
pub fn find_build_tool(name: &str, path_var: Option<OsString>) -> Option<PathBuf> {
    let path_var = path_var?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .filter(|candidate| {
            let text = candidate.to_string_lossy();
            !SHADOWING_SHIMS.iter().any(|shim| text.contains(shim))
        })
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_config() {
        let config = KreduceConfig::parse(
            r#"
[toolchain]
cmake = "/opt/cmake/bin/cmake"
source_dir = "/opt/kernels"
build_type = "Debug"
verbose = true
extra_args = ["-DUSE_CUDA=0"]

[cache]
root = "/tmp/kreduce-cache"
"#,
        )
        .unwrap();
        assert_eq!(config.toolchain.cmake, PathBuf::from("/opt/cmake/bin/cmake"));
        assert_eq!(config.toolchain.build_type, "Debug");
        assert_eq!(config.toolchain.lang, "rust");
        assert!(config.toolchain.verbose);
        assert_eq!(config.toolchain.extra_args, vec!["-DUSE_CUDA=0"]);
        assert_eq!(
            config.cache_root().unwrap(),
            PathBuf::from("/tmp/kreduce-cache")
        );
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = KreduceConfig::parse("").unwrap();
        assert_eq!(config.toolchain.cmake, PathBuf::from("cmake"));
        assert_eq!(config.toolchain.build_type, "Release");
        assert!(config.toolchain.validate().is_err());
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let err = KreduceConfig::parse("[toolchain\n").unwrap_err();
        assert!(matches!(err, BuildError::Config { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn find_and_load_walks_ancestors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[toolchain]\nsource_dir = \"kernels\"\n",
        )
        .unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let (config, found) = KreduceConfig::find_and_load(&nested).unwrap().unwrap();
        assert_eq!(found, dir.path());
        assert_eq!(config.toolchain.source_dir, dir.path().join("kernels"));
    }

    #[test]
    fn discovery_skips_shims() {
        let dir = tempfile::tempdir().unwrap();
        let shim_dir = dir.path().join(".pyenv").join("shims");
        let real_dir = dir.path().join("usr").join("bin");
        std::fs::create_dir_all(&shim_dir).unwrap();
        std::fs::create_dir_all(&real_dir).unwrap();
        std::fs::write(shim_dir.join("cmake"), b"#!/bin/sh\n").unwrap();
        std::fs::write(real_dir.join("cmake"), b"#!/bin/sh\n").unwrap();

        let path = std::env::join_paths([&shim_dir, &real_dir]).unwrap();
        let found = find_build_tool("cmake", Some(path)).unwrap();
        assert_eq!(found, real_dir.join("cmake"));
    }

    #[test]
    fn bare_tool_name_resolves_past_shims() {
        let dir = tempfile::tempdir().unwrap();
        let shim_dir = dir.path().join(".pyenv").join("shims");
        let real_dir = dir.path().join("opt").join("bin");
        std::fs::create_dir_all(&shim_dir).unwrap();
        std::fs::create_dir_all(&real_dir).unwrap();
        std::fs::write(shim_dir.join("cmake"), b"#!/bin/sh\n").unwrap();
        std::fs::write(real_dir.join("cmake"), b"#!/bin/sh\n").unwrap();
        let path = std::env::join_paths([&shim_dir, &real_dir]).unwrap();

        let resolved = ToolchainConfig::default().resolve_build_tool(Some(path.clone()));
        assert_eq!(resolved.cmake, real_dir.join("cmake"));

        let explicit = ToolchainConfig {
            cmake: PathBuf::from("/usr/local/bin/cmake"),
            ..ToolchainConfig::default()
        };
        assert_eq!(
            explicit.resolve_build_tool(Some(path)).cmake,
            PathBuf::from("/usr/local/bin/cmake")
        );

        let unresolved = ToolchainConfig::default().resolve_build_tool(None);
        assert_eq!(unresolved.cmake, PathBuf::from("cmake"));
    }

    #[test]
    fn discovery_without_path_finds_nothing() {
        assert!(find_build_tool("cmake", None).is_none());
    }
}
