//! `kreduce cache`: list, verify and clean stored artifacts.

use anyhow::{bail, Result};
use kreduce_build::ArtifactStore;
use kreduce_engine::EngineConfig;

/// Print every recorded artifact.
pub fn list(config: &EngineConfig, json: bool) -> Result<()> {
    let store = ArtifactStore::new(&config.cache_root);
    let manifests = store.list()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&manifests)?);
        return Ok(());
    }

    if manifests.is_empty() {
        println!("No artifacts in {}", store.root().display());
        return Ok(());
    }
    println!("{} artifact(s) in {}", manifests.len(), store.root().display());
    for manifest in &manifests {
        println!();
        println!("{}", manifest.name);
        println!("  {}", manifest.description);
        if let Some(formula) = &manifest.formula {
            println!("  formula: {formula}");
        }
        println!("  size:    {} bytes", manifest.size_bytes);
        println!("  build:   {}", manifest.build_id);
    }
    Ok(())
}

/// Check each artifact against its manifest; fails if any is damaged.
pub fn verify(config: &EngineConfig) -> Result<()> {
    let store = ArtifactStore::new(&config.cache_root);
    let manifests = store.list()?;

    let mut damaged = 0;
    for manifest in &manifests {
        match store.verify(manifest) {
            Ok(()) => println!("  ok       {}", manifest.name),
            Err(reason) => {
                damaged += 1;
                println!("  DAMAGED  {} ({reason})", manifest.name);
            }
        }
    }

    if damaged > 0 {
        bail!(
            "{damaged} of {} artifact(s) failed verification; they will be rebuilt on next use",
            manifests.len()
        );
    }
    println!("{} artifact(s) verified", manifests.len());
    Ok(())
}

/// Remove all artifacts and build directories.
pub fn clean(config: &EngineConfig) -> Result<()> {
    let store = ArtifactStore::new(&config.cache_root);
    let removed = store.clean()?;
    if removed == 0 {
        println!("Already clean: {}", store.root().display());
    } else {
        println!("Removed cache contents under {}", store.root().display());
    }
    Ok(())
}
