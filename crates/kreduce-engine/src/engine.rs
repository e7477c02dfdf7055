//! The kernel engine: formula in, loaded kernel out.

use std::collections::HashMap;
use std::sync::Arc;

use kreduce_build::{ArtifactStore, BuildCache, BuildTool, CacheStats, CompilationDriver};
use kreduce_core::{CacheKey, ContentHash, DType, TargetKind};
use kreduce_ffi::{BoundKernel, InvokeError, Layout, ShapeDistanceInput, TypedArray};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::request::KernelRequest;

/// Normalizes requests, builds each distinct kernel once and keeps the
/// loaded kernels for reuse.
pub struct KernelEngine {
    config: EngineConfig,
    driver: CompilationDriver,
    cache: BuildCache,
    kernels: Mutex<HashMap<ContentHash, Arc<BoundKernel>>>,
}

impl std::fmt::Debug for KernelEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelEngine")
            .field("config", &self.config)
            .field("loaded", &self.kernels.lock().len())
            .finish()
    }
}

impl KernelEngine {
    /// Engine running the configured build tool.
    pub fn new(config: EngineConfig) -> Self {
        let store = ArtifactStore::new(&config.cache_root);
        let driver = CompilationDriver::new(config.toolchain.clone(), store.clone());
        Self::from_parts(config, driver, store)
    }

    /// Engine running a caller-supplied build tool.
    pub fn with_tool(config: EngineConfig, tool: Arc<dyn BuildTool>) -> Self {
        let store = ArtifactStore::new(&config.cache_root);
        let driver = CompilationDriver::with_tool(config.toolchain.clone(), store.clone(), tool);
        Self::from_parts(config, driver, store)
    }

    fn from_parts(config: EngineConfig, driver: CompilationDriver, store: ArtifactStore) -> Self {
        KernelEngine {
            config,
            driver,
            cache: BuildCache::new(store),
            kernels: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &ArtifactStore {
        self.cache.store()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Number of kernels loaded into this process.
    pub fn loaded(&self) -> usize {
        self.kernels.lock().len()
    }

    /// Resolve `request` to a loaded kernel, building it if needed.
    ///
    /// A kernel whose artifact exists but cannot be loaded is invalidated
    /// and rebuilt once before the error is returned.
    pub fn kernel(&self, request: &KernelRequest) -> Result<Arc<BoundKernel>> {
        let key = request.key()?;
        let digest = key.digest();
        if let Some(kernel) = self.kernels.lock().get(&digest) {
            return Ok(Arc::clone(kernel));
        }

        let layout = request.layout(&key)?.with_reentrant(self.config.reentrant);
        let kernel = match self.load(&key, layout.clone()) {
            Ok(kernel) => kernel,
            Err(err) if err.is_unloadable() => {
                warn!(
                    event = "artifact_rebuild",
                    key = %key.describe(),
                    error = %err,
                );
                self.cache.invalidate(&key)?;
                self.load(&key, layout)?
            }
            Err(err) => return Err(err),
        };

        let mut kernels = self.kernels.lock();
        let kernel = kernels.entry(digest).or_insert_with(|| Arc::new(kernel));
        Ok(Arc::clone(kernel))
    }

    fn load(&self, key: &CacheKey, layout: Layout) -> Result<BoundKernel> {
        let artifact = self
            .cache
            .get_or_build(key, || self.driver.build_in_store(key))?;
        let kernel = kreduce_ffi::load(&artifact.path, key.target().entry_point(), layout)?;
        info!(
            event = "kernel_ready",
            key = %key.describe(),
            symbol = kernel.symbol(),
        );
        Ok(kernel)
    }

    /// Resolve `request` and invoke it once.
    pub fn evaluate(
        &self,
        request: &KernelRequest,
        scalars: &[f64],
        inputs: &[&TypedArray],
        output: Option<&mut TypedArray>,
    ) -> Result<Option<TypedArray>> {
        let kernel = self.kernel(request)?;
        Ok(kernel.invoke(scalars, inputs, output)?)
    }

    /// Evaluate a shape-distance kernel. Without `output` a zeroed array of
    /// length `nx` is allocated and returned.
    pub fn shape_distance(
        &self,
        target: TargetKind,
        dtype: DType,
        input: &ShapeDistanceInput<'_>,
        bandwidths: &kreduce_ffi::Bandwidths,
        output: Option<&mut TypedArray>,
    ) -> Result<Option<TypedArray>> {
        if !matches!(target, TargetKind::ShapeDistance { .. }) {
            return Err(InvokeError::InvalidLayout {
                detail: format!("{target} is not a shape-distance target"),
            }
            .into());
        }
        let kernel = self.kernel(&KernelRequest::builtin(target, dtype))?;

        match output {
            Some(out) => {
                kreduce_ffi::shape_distance(&kernel, input, bandwidths, out)?;
                Ok(None)
            }
            None => {
                let points = input.source_points;
                let rows = points.shape().first().copied().unwrap_or(0);
                let mut out = TypedArray::zeros(points.dtype(), &[rows])?;
                kreduce_ffi::shape_distance(&kernel, input, bandwidths, &mut out)?;
                Ok(Some(out))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use kreduce_build::{BuildError, ToolOutput, ToolchainConfig};
    use kreduce_core::{FormulaError, OrientationKernel, RadialKernel};
    use kreduce_ffi::{Bandwidths, Entry, EntryPoint};
    use std::path::Path;

    /// Build tool that records its calls and either fails with a diagnostic
    /// or writes a library that passes structural checks but cannot load.
    #[derive(Default)]
    struct ScriptedTool {
        calls: Mutex<Vec<Vec<String>>>,
        failure: Option<String>,
    }

    impl ScriptedTool {
        fn failing(diagnostic: &str) -> Self {
            ScriptedTool {
                failure: Some(diagnostic.to_string()),
                ..Default::default()
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    impl BuildTool for ScriptedTool {
        fn run(&self, args: &[String], cwd: &Path) -> std::io::Result<ToolOutput> {
            self.calls.lock().push(args.to_vec());
            let building = args.first().map(String::as_str) == Some("--build");
            if let (true, Some(diagnostic)) = (building, &self.failure) {
                return Ok(ToolOutput {
                    success: false,
                    code: Some(1),
                    combined: diagnostic.clone(),
                });
            }
            if building {
                let name = format!("{}{}", args[3], std::env::consts::DLL_SUFFIX);
                std::fs::write(cwd.join(name), b"\x7fELF\x02\x01\x01\x00not really a library")?;
            }
            Ok(ToolOutput {
                success: true,
                code: Some(0),
                combined: String::new(),
            })
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    fn engine(dir: &Path, tool: Arc<ScriptedTool>) -> KernelEngine {
        let toolchain = ToolchainConfig {
            source_dir: dir.join("kernels"),
            ..ToolchainConfig::default()
        };
        KernelEngine::with_tool(EngineConfig::new(toolchain, dir.join("cache")), tool)
    }

    fn gaussian_request() -> KernelRequest {
        KernelRequest::reduction("gaussian(x,y)", &["x=Vi(0,3)", "y=Vj(1,3)"], DType::Float32)
    }

    #[test]
    fn build_failure_carries_diagnostic_and_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let tool = Arc::new(ScriptedTool::failing("error: unknown function 'gaussian'"));
        let engine = engine(dir.path(), Arc::clone(&tool));

        let err = engine.kernel(&gaussian_request()).unwrap_err();
        match &err {
            EngineError::Build(BuildError::BuildFailed { key, diagnostic }) => {
                assert!(diagnostic.contains("unknown function 'gaussian'"));
                assert!(key.contains("float32"));
                assert!(key.contains("generic-reduction"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.is_retryable());
        assert_eq!(tool.call_count(), 2);

        engine.kernel(&gaussian_request()).unwrap_err();
        assert_eq!(tool.call_count(), 4);
        assert_eq!(engine.cache_stats().builds, 2);
    }

    #[test]
    fn unloadable_artifact_is_rebuilt_once() {
        let dir = tempfile::tempdir().unwrap();
        let tool = Arc::new(ScriptedTool::default());
        let engine = engine(dir.path(), Arc::clone(&tool));

        let err = engine.kernel(&gaussian_request()).unwrap_err();
        assert!(matches!(err, EngineError::Invoke(InvokeError::ArtifactUnloadable { .. })));
        assert_eq!(engine.cache_stats().builds, 2);
        assert_eq!(tool.call_count(), 4);
        assert_eq!(engine.loaded(), 0);
    }

    unsafe extern "C" fn untouched_reduction(_: i32, _: i32, _: *mut f32, _: *const *const f32) -> i32 {
        0
    }

    #[test]
    fn output_dim_selects_its_own_kernel() {
        let dir = tempfile::tempdir().unwrap();
        let tool = Arc::new(ScriptedTool::default());
        let engine = engine(dir.path(), Arc::clone(&tool));

        let narrow = gaussian_request();
        let wide = gaussian_request().with_output_dim(3);
        for request in [&narrow, &wide] {
            let key = request.key().unwrap();
            let layout = request.layout(&key).unwrap();
            let entry = EntryPoint::F32(Entry::Reduction(untouched_reduction));
            let kernel = unsafe { BoundKernel::from_entry("kreduce_reduce", entry, layout) }.unwrap();
            engine.kernels.lock().insert(key.digest(), Arc::new(kernel));
        }

        let x = TypedArray::from_f32(vec![0.0; 12], &[4, 3]).unwrap();
        let y = TypedArray::from_f32(vec![0.0; 6], &[2, 3]).unwrap();
        let first = engine.evaluate(&narrow, &[], &[&x, &y], None).unwrap().unwrap();
        let second = engine.evaluate(&wide, &[], &[&x, &y], None).unwrap().unwrap();
        assert_eq!(first.shape(), &[4, 1]);
        assert_eq!(second.shape(), &[4, 3]);
        assert!(!Arc::ptr_eq(&engine.kernel(&narrow).unwrap(), &engine.kernel(&wide).unwrap()));
        assert_eq!(tool.call_count(), 0);
    }

    #[test]
    fn malformed_alias_never_reaches_the_tool() {
        let dir = tempfile::tempdir().unwrap();
        let tool = Arc::new(ScriptedTool::default());
        let engine = engine(dir.path(), Arc::clone(&tool));

        let request = KernelRequest::reduction("f(x)", &["x=Vi(0,3)", "x=Vj(1,3)"], DType::Float32);
        let err = engine.kernel(&request).unwrap_err();
        assert!(matches!(err, EngineError::Formula(FormulaError::MalformedAlias { .. })));
        assert!(!err.is_retryable());
        assert_eq!(tool.call_count(), 0);
    }

    #[test]
    fn shape_distance_requires_shape_target() {
        let dir = tempfile::tempdir().unwrap();
        let tool = Arc::new(ScriptedTool::default());
        let engine = engine(dir.path(), Arc::clone(&tool));

        let a = TypedArray::from_f32(vec![0.0; 3], &[1, 3]).unwrap();
        let input = ShapeDistanceInput {
            source_points: &a,
            target_points: &a,
            source_signal: &a,
            target_signal: &a,
            source_weights: &a,
            target_weights: &a,
        };
        let conv = TargetKind::SpecializedConvolution {
            kernel: RadialKernel::Gaussian,
        };
        let err = engine
            .shape_distance(conv, DType::Float32, &input, &Bandwidths::new(1.0, 1.0), None)
            .unwrap_err();
        assert!(matches!(err, EngineError::Invoke(InvokeError::InvalidLayout { .. })));
        assert_eq!(tool.call_count(), 0);

        let fshape = TargetKind::ShapeDistance {
            geometry: RadialKernel::Gaussian,
            signal: RadialKernel::Gaussian,
            orientation: OrientationKernel::Linear,
        };
        let err = engine
            .shape_distance(fshape, DType::Float32, &input, &Bandwidths::new(1.0, 1.0), None)
            .unwrap_err();
        assert!(err.is_retryable(), "{err}");
    }

    #[test]
    fn missing_source_dir_is_permanent() {
        let dir = tempfile::tempdir().unwrap();
        let tool = Arc::new(ScriptedTool::default());
        let config = EngineConfig::new(ToolchainConfig::default(), dir.path().join("cache"));
        let engine = KernelEngine::with_tool(config, tool.clone());

        let err = engine.kernel(&gaussian_request()).unwrap_err();
        assert!(matches!(err, EngineError::Build(BuildError::Config { .. })));
        assert!(!err.is_retryable());
        assert_eq!(tool.call_count(), 0);
    }
}
