//! Specialization parameters.
//!
//! A build is described by an ordered key/value map. It is turned into
//! command-line arguments only at the tool boundary
//! ([`SpecializationParams::configure_args`]).

use std::path::Path;

use kreduce_core::{CacheKey, TargetKind};

use crate::config::ToolchainConfig;

/// Ordered `-DKEY=VALUE` definitions for the configure phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecializationParams {
    entries: Vec<(String, String)>,
}

impl SpecializationParams {
    /// Create an empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parameters for building `key` with `toolchain`.
    pub fn for_key(key: &CacheKey, toolchain: &ToolchainConfig) -> Self {
        let mut params = Self::new();
        params.set("CMAKE_BUILD_TYPE", &toolchain.build_type);
        if let Some(formula) = key.formula() {
            params.set("FORMULA_OBJ", formula.formula());
            params.set("VAR_ALIASES", formula.declaration_string());
        }
        params.set("shared_obj_name", key.artifact_name());
        params.set("__TYPE__", key.dtype().native_spelling());
        params.set("PYTHON_LANG", &toolchain.lang);
        params.set(
            "PYTHON_EXECUTABLE",
            toolchain.executable_path().to_string_lossy(),
        );

        match key.target() {
            TargetKind::GenericReduction => {}
            TargetKind::SpecializedConvolution { kernel } => {
                params.set("KERNEL", kernel.name());
            }
            TargetKind::ShapeDistance {
                geometry,
                signal,
                orientation,
            } => {
                params.set("KERNEL_GEOM", geometry.name());
                params.set("KERNEL_SIG", signal.name());
                params.set("KERNEL_SPHERE", orientation.name());
            }
        }
        params
    }

    /// Set a parameter, replacing any earlier value for the same name.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    /// Look up a parameter value.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Iterate parameters in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configure-phase arguments: source dir, definitions, extra args, and a
    /// `commandLine` definition echoing the invocation for the build logs.
    pub fn configure_args(&self, source_dir: &Path, extra_args: &[String]) -> Vec<String> {
        let mut args = vec![source_dir.to_string_lossy().into_owned()];
        args.extend(self.iter().map(|(name, value)| format!("-D{name}={value}")));
        args.extend(extra_args.iter().cloned());
        let echo = format!("-DcommandLine={}", args.join(" "));
        args.push(echo);
        args
    }
}

/// Build-phase arguments: compile only the named target.
pub fn build_args(target: &str, verbose: bool) -> Vec<String> {
    let mut args: Vec<String> = ["--build", ".", "--target", target]
        .iter()
        .map(|s| s.to_string())
        .collect();
    if verbose {
        args.push("--".to_string());
        args.push("VERBOSE=1".to_string());
    }
    args
}
