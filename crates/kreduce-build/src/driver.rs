//! Compilation driver.
//!
//! Runs the external build tool's two-phase protocol for one cache key:
//! `configure` receives every specialization parameter, `build` compiles
//! only the named target. The produced library is then installed into the
//! [`ArtifactStore`] with an atomic rename.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use kreduce_core::CacheKey;
use tracing::{debug, info};

use crate::artifact::{library_file_name, Artifact};
use crate::config::ToolchainConfig;
use crate::error::{BuildError, Result};
use crate::params::{build_args, SpecializationParams};
use crate::store::ArtifactStore;
use crate::tool::{BuildTool, CommandTool};

/// Turns cache keys into installed artifacts.
#[derive(Clone)]
pub struct CompilationDriver {
    toolchain: ToolchainConfig,
    tool: Arc<dyn BuildTool>,
    store: ArtifactStore,
}

impl std::fmt::Debug for CompilationDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilationDriver")
            .field("toolchain", &self.toolchain)
            .field("tool", &self.tool.describe())
            .field("store", &self.store)
            .finish()
    }
}

impl CompilationDriver {
    /// Driver running the toolchain's configured build tool.
    pub fn new(toolchain: ToolchainConfig, store: ArtifactStore) -> Self {
        let tool = Arc::new(CommandTool::new(toolchain.cmake.clone()));
        Self::with_tool(toolchain, store, tool)
    }

    /// Driver running a caller-supplied build tool.
    pub fn with_tool(toolchain: ToolchainConfig, store: ArtifactStore, tool: Arc<dyn BuildTool>) -> Self {
        CompilationDriver {
            toolchain,
            tool,
            store,
        }
    }

    pub fn toolchain(&self) -> &ToolchainConfig {
        &self.toolchain
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Configure-phase arguments for `key`, as they would be passed to the tool.
    pub fn configure_args(&self, key: &CacheKey) -> Vec<String> {
        SpecializationParams::for_key(key, &self.toolchain)
            .configure_args(&self.toolchain.source_dir, &self.toolchain.extra_args)
    }

    /// Build `key` in its own build root inside the store.
    pub fn build_in_store(&self, key: &CacheKey) -> Result<Artifact> {
        self.build(key, &self.store.build_root(key))
    }

    /// Build `key` in `build_root` and install the result.
    ///
    /// Running twice for the same key in the same root is safe: the library
    /// is only ever replaced by an atomic rename.
    pub fn build(&self, key: &CacheKey, build_root: &Path) -> Result<Artifact> {
        self.toolchain.validate()?;
        std::fs::create_dir_all(build_root).map_err(|e| BuildError::Store {
            path: build_root.to_path_buf(),
            detail: format!("creating build root: {e}"),
        })?;

        let name = key.artifact_name();
        clear_outputs(build_root, &name).map_err(|e| BuildError::Store {
            path: build_root.to_path_buf(),
            detail: format!("removing previous output: {e}"),
        })?;
        let started = Instant::now();
        info!(
            event = "build_start",
            key = %key.describe(),
            target = %name,
            build_root = %build_root.display(),
        );
        if let Some(formula) = key.formula() {
            debug!(
                formula = %formula.formula(),
                aliases = %formula.display_string(),
                dtype = %key.dtype(),
            );
        }

        self.run_phase("configure", key, &self.configure_args(key), build_root)?;
        self.run_phase(
            "build",
            key,
            &build_args(&name, self.toolchain.verbose),
            build_root,
        )?;

        let produced = locate_output(build_root, &name).ok_or_else(|| BuildError::ArtifactUnloadable {
            key: key.describe(),
            path: build_root.join(library_file_name(&name)),
            detail: "build succeeded but produced no library".to_string(),
        })?;
        let artifact = self.store.install(key, &produced)?;

        info!(
            event = "build_end",
            key = %key.describe(),
            path = %artifact.path.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
        );
        Ok(artifact)
    }

    fn run_phase(&self, phase: &str, key: &CacheKey, args: &[String], cwd: &Path) -> Result<()> {
        debug!(phase, tool = %self.tool.describe(), args = ?args);
        let output = self.tool.run(args, cwd).map_err(|e| BuildError::BuildFailed {
            key: key.describe(),
            diagnostic: format!("{phase}: could not run {}: {e}", self.tool.describe()),
        })?;

        if !output.success {
            let status = output
                .code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Err(BuildError::BuildFailed {
                key: key.describe(),
                diagnostic: format!("{phase} exited with status {status}\n{}", output.combined),
            });
        }

        debug!(phase, output = %output.combined, "phase finished");
        Ok(())
    }
}

fn output_candidates(name: &str) -> [String; 2] {
    [
        library_file_name(name),
        format!("{}{}", std::env::consts::DLL_PREFIX, library_file_name(name)),
    ]
}

/// The build root followed by its immediate subdirectories.
fn output_dirs(build_root: &Path) -> Vec<PathBuf> {
    let mut dirs = vec![build_root.to_path_buf()];
    if let Ok(entries) = std::fs::read_dir(build_root) {
        dirs.extend(
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_dir()),
        );
    }
    dirs
}

/// Find the library the build produced for `name`: `<name><suffix>` or
/// `lib<name><suffix>`, in the build root or one directory below it.
fn locate_output(build_root: &Path, name: &str) -> Option<PathBuf> {
    let candidates = output_candidates(name);
    output_dirs(build_root)
        .iter()
        .flat_map(|dir| candidates.iter().map(move |c| dir.join(c)))
        .find(|p| p.is_file())
}

/// Delete libraries left in the build root by an earlier build of `name`.
fn clear_outputs(build_root: &Path, name: &str) -> std::io::Result<()> {
    let candidates = output_candidates(name);
    for dir in output_dirs(build_root) {
        for candidate in &candidates {
            let path = dir.join(candidate);
            if path.is_file() {
                std::fs::remove_file(&path)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::tests::FAKE_ELF;
    use crate::tool::ToolOutput;
    use kreduce_core::{normalize, DType, OrientationKernel, RadialKernel, TargetKind};
    use parking_lot::Mutex;

    /// Scripted build tool: records invocations, optionally fails a phase,
    /// and writes a fake library for the requested target.
    #[derive(Default)]
    struct FakeTool {
        calls: Mutex<Vec<Vec<String>>>,
        fail_phase: Option<&'static str>,
        diagnostic: String,
        skip_output: bool,
    }

    impl BuildTool for FakeTool {
        fn run(&self, args: &[String], cwd: &Path) -> std::io::Result<ToolOutput> {
            self.calls.lock().push(args.to_vec());
            let phase = if args.first().map(String::as_str) == Some("--build") {
                "build"
            } else {
                "configure"
            };
            if self.fail_phase == Some(phase) {
                return Ok(ToolOutput {
                    success: false,
                    code: Some(2),
                    combined: self.diagnostic.clone(),
                });
            }
            if phase == "build" && !self.skip_output {
                let target = &args[3];
                std::fs::write(cwd.join(library_file_name(target)), FAKE_ELF)?;
            }
            Ok(ToolOutput {
                success: true,
                code: Some(0),
                combined: format!("{phase} ok"),
            })
        }

        fn describe(&self) -> String {
            "fake-cmake".to_string()
        }
    }

    fn toolchain() -> ToolchainConfig {
        ToolchainConfig {
            source_dir: PathBuf::from("/opt/kernels"),
            ..ToolchainConfig::default()
        }
    }

    fn gaussian_key() -> CacheKey {
        CacheKey::reduction(
            normalize("gaussian(x,y)", &["x=Vi(0,3)", "y=Vj(1,3)"]).unwrap(),
            DType::Float32,
        )
    }

    #[test]
    fn two_phase_build_installs_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let tool = Arc::new(FakeTool::default());
        let driver = CompilationDriver::with_tool(toolchain(), store.clone(), tool.clone());
        let key = gaussian_key();

        let artifact = driver.build_in_store(&key).unwrap();
        assert_eq!(artifact.path, store.library_path(&key));
        assert!(artifact.path.is_file());

        let calls = tool.calls.lock();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0][0], "/opt/kernels");
        assert!(calls[0].contains(&"-DVAR_ALIASES=auto x=Vi(0,3); auto y=Vj(1,3); ".to_string()));
        assert!(calls[0].contains(&"-D__TYPE__=float".to_string()));
        assert_eq!(calls[1], build_args(&key.artifact_name(), false));
    }

    #[test]
    fn nonzero_exit_surfaces_diagnostic() {
        let dir = tempfile::tempdir().unwrap();
        let tool = Arc::new(FakeTool {
            fail_phase: Some("build"),
            diagnostic: "error: no matching function for call to 'gaussian'".to_string(),
            ..FakeTool::default()
        });
        let driver = CompilationDriver::with_tool(toolchain(), ArtifactStore::new(dir.path()), tool);

        let err = driver.build_in_store(&gaussian_key()).unwrap_err();
        match err {
            BuildError::BuildFailed { key, diagnostic } => {
                assert!(key.contains("generic-reduction"));
                assert!(diagnostic.contains("no matching function"));
                assert!(diagnostic.contains("status 2"));
            }
            other => panic!("expected BuildFailed, got {other:?}"),
        }
    }

    #[test]
    fn configure_failure_skips_build_phase() {
        let dir = tempfile::tempdir().unwrap();
        let tool = Arc::new(FakeTool {
            fail_phase: Some("configure"),
            diagnostic: "CMake Error".to_string(),
            ..FakeTool::default()
        });
        let driver =
            CompilationDriver::with_tool(toolchain(), ArtifactStore::new(dir.path()), tool.clone());
        assert!(driver.build_in_store(&gaussian_key()).is_err());
        assert_eq!(tool.calls.lock().len(), 1);
    }

    #[test]
    fn missing_output_is_unloadable() {
        let dir = tempfile::tempdir().unwrap();
        let tool = Arc::new(FakeTool {
            skip_output: true,
            ..FakeTool::default()
        });
        let driver = CompilationDriver::with_tool(toolchain(), ArtifactStore::new(dir.path()), tool);
        let err = driver.build_in_store(&gaussian_key()).unwrap_err();
        assert!(matches!(err, BuildError::ArtifactUnloadable { .. }));
    }

    #[test]
    fn rebuild_never_reuses_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let key = gaussian_key();
        let first = CompilationDriver::with_tool(toolchain(), store.clone(), Arc::new(FakeTool::default()));
        first.build_in_store(&key).unwrap();
        assert!(locate_output(&store.build_root(&key), &key.artifact_name()).is_some());

        let silent = Arc::new(FakeTool {
            skip_output: true,
            ..FakeTool::default()
        });
        let second = CompilationDriver::with_tool(toolchain(), store.clone(), silent.clone());
        let err = second.build_in_store(&key).unwrap_err();
        assert!(matches!(err, BuildError::ArtifactUnloadable { .. }), "{err}");
        assert_eq!(silent.calls.lock().len(), 2);
        assert!(locate_output(&store.build_root(&key), &key.artifact_name()).is_none());
    }

    #[test]
    fn unconfigured_source_dir_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let driver = CompilationDriver::with_tool(
            ToolchainConfig::default(),
            ArtifactStore::new(dir.path()),
            Arc::new(FakeTool::default()),
        );
        let err = driver.build_in_store(&gaussian_key()).unwrap_err();
        assert!(matches!(err, BuildError::Config { .. }));
    }

    #[test]
    fn missing_tool_is_build_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut tc = toolchain();
        tc.cmake = PathBuf::from("/nonexistent/kreduce-cmake");
        let driver = CompilationDriver::new(tc, ArtifactStore::new(dir.path()));
        let err = driver.build_in_store(&gaussian_key()).unwrap_err();
        assert!(matches!(err, BuildError::BuildFailed { .. }));
    }

    #[test]
    fn rebuild_in_same_root_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let driver =
            CompilationDriver::with_tool(toolchain(), store.clone(), Arc::new(FakeTool::default()));
        let key = CacheKey::builtin(
            TargetKind::ShapeDistance {
                geometry: RadialKernel::Gaussian,
                signal: RadialKernel::Gaussian,
                orientation: OrientationKernel::Binet,
            },
            DType::Float32,
        )
        .unwrap();

        let first = driver.build_in_store(&key).unwrap();
        let second = driver.build_in_store(&key).unwrap();
        assert_eq!(first, second);
        assert_eq!(std::fs::read(&second.path).unwrap(), FAKE_ELF);
    }

    #[test]
    fn locates_lib_prefixed_output_in_subdir() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("lib");
        std::fs::create_dir(&sub).unwrap();
        let file = sub.join(format!(
            "{}{}",
            std::env::consts::DLL_PREFIX,
            library_file_name("k")
        ));
        std::fs::write(&file, FAKE_ELF).unwrap();
        assert_eq!(locate_output(dir.path(), "k"), Some(file));
        assert_eq!(locate_output(dir.path(), "other"), None);
    }
}
