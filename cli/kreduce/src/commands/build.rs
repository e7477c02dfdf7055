//! `kreduce build`: compile (or adopt) one kernel's artifact.

use anyhow::Result;
use kreduce_build::{ArtifactStore, BuildCache, CompilationDriver};
use kreduce_engine::{EngineConfig, KernelEngine};

use super::KernelArgs;

/// Build the artifact for `args`; with `load`, also bind its entry point.
pub fn run(config: &EngineConfig, args: &KernelArgs, load: bool) -> Result<()> {
    let request = args.request()?;

    if load {
        let engine = KernelEngine::new(config.clone());
        let kernel = engine.kernel(&request)?;
        println!("Loaded {}", kernel.symbol());
        if let Some(path) = kernel.path() {
            println!("  artifact:  {}", path.display());
        }
        println!("  signature: {}", kernel.layout().signature(kernel.symbol()));
        return Ok(());
    }

    let key = request.key()?;
    let store = ArtifactStore::new(&config.cache_root);
    let driver = CompilationDriver::new(config.toolchain.clone(), store.clone());
    let cache = BuildCache::new(store);

    let artifact = cache.get_or_build(&key, || driver.build_in_store(&key))?;
    let stats = cache.stats();
    let how = if stats.adoptions > 0 { "Adopted" } else { "Built" };
    println!("{how} {}", key.describe());
    println!("  artifact: {}", artifact.path.display());
    println!("  entry:    {}", key.target().entry_point());
    Ok(())
}
