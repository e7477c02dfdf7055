//! `kreduce inspect`: show how a kernel request is normalized and built.

use anyhow::Result;
use kreduce_build::{ArtifactStore, CompilationDriver};
use kreduce_engine::EngineConfig;
use serde::Serialize;

use super::KernelArgs;

/// Everything derived from one request, without building anything.
#[derive(Debug, Serialize)]
pub struct Inspection {
    pub target: String,
    pub dtype: String,
    pub formula: Option<String>,
    pub declaration: Option<String>,
    pub display: Option<String>,
    pub key_digest: String,
    pub artifact_name: String,
    pub entry_point: String,
    pub signature: String,
    pub configure_args: Vec<String>,
    pub cached: bool,
}

/// Derive the inspection report for `args`.
pub fn inspect(config: &EngineConfig, args: &KernelArgs) -> Result<Inspection> {
    let request = args.request()?;
    let key = request.key()?;
    let store = ArtifactStore::new(&config.cache_root);
    let driver = CompilationDriver::new(config.toolchain.clone(), store.clone());

    let entry_point = key.target().entry_point();
    let signature = match request.layout(&key) {
        Ok(layout) => layout.signature(entry_point),
        Err(e) => format!("(no valid layout: {e})"),
    };

    Ok(Inspection {
        target: key.target().to_string(),
        dtype: key.dtype().to_string(),
        formula: key.formula().map(|f| f.formula().to_string()),
        declaration: key.formula().map(|f| f.declaration_string()),
        display: key.formula().map(|f| f.display_string()),
        key_digest: key.digest().to_string(),
        artifact_name: key.artifact_name(),
        entry_point: entry_point.to_string(),
        signature,
        configure_args: driver.configure_args(&key),
        cached: store.lookup(&key).is_some(),
    })
}

pub fn run(config: &EngineConfig, args: &KernelArgs, json: bool) -> Result<()> {
    let report = inspect(config, args)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Target:      {}", report.target);
    println!("Dtype:       {}", report.dtype);
    if let Some(formula) = &report.formula {
        println!("Formula:     {formula}");
    }
    if let Some(display) = &report.display {
        println!("Aliases:     {}", display.trim_end());
    }
    if let Some(declaration) = &report.declaration {
        println!("Declaration: {}", declaration.trim_end());
    }
    println!("Key:         {}", report.key_digest);
    println!("Artifact:    {}", report.artifact_name);
    println!("Entry point: {}", report.signature);
    println!("Cached:      {}", if report.cached { "yes" } else { "no" });
    println!();
    println!("--- Configure arguments ---");
    for arg in &report.configure_args {
        println!("  {arg}");
    }
    Ok(())
}
