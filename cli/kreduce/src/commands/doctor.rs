//! `kreduce doctor`: toolchain and configuration diagnostics.

use std::path::Path;
use std::process::Command;

use anyhow::Result;
use kreduce_build::config::{CACHE_DIR_ENV, CMAKE_ENV};
use kreduce_build::{find_build_tool, ArtifactStore, KreduceConfig};
use kreduce_engine::EngineConfig;

/// Print toolchain diagnostic information.
pub fn run(start: &Path) -> Result<()> {
    println!("=== kreduce doctor ===");
    println!();
    println!("kreduce version: {}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("--- Configuration ---");
    match KreduceConfig::find_and_load(start) {
        Ok(Some((_, dir))) => println!("  kreduce.toml: found in {}", dir.display()),
        Ok(None) => println!("  kreduce.toml: not found (using defaults)"),
        Err(e) => println!("  kreduce.toml: error: {e}"),
    }
    for var in [CMAKE_ENV, CACHE_DIR_ENV] {
        match std::env::var_os(var) {
            Some(value) => println!("  {var}: {}", value.to_string_lossy()),
            None => println!("  {var}: (unset)"),
        }
    }
    println!();

    let config = match EngineConfig::discover(start) {
        Ok(config) => config,
        Err(e) => {
            println!("  configuration unusable: {e}");
            return Ok(());
        }
    };

    println!("--- Toolchain ---");
    let toolchain = &config.toolchain;
    print_tool_status(&toolchain.cmake.to_string_lossy(), &["--version"]);
    match find_build_tool("cmake", std::env::var_os("PATH")) {
        Some(path) => println!("  cmake on PATH: {}", path.display()),
        None => println!("  cmake on PATH: not found"),
    }
    if toolchain.source_dir.as_os_str().is_empty() {
        println!("  source dir: not configured (set toolchain.source_dir)");
    } else if toolchain.source_dir.is_dir() {
        println!("  source dir: {}", toolchain.source_dir.display());
    } else {
        println!("  source dir: {} (missing)", toolchain.source_dir.display());
    }
    println!("  build type: {}", toolchain.build_type);
    println!();

    println!("--- Cache ---");
    let store = ArtifactStore::new(&config.cache_root);
    println!("  root: {}", store.root().display());
    match store.list() {
        Ok(manifests) => println!("  artifacts: {}", manifests.len()),
        Err(e) => println!("  artifacts: error: {e}"),
    }

    Ok(())
}

fn print_tool_status(name: &str, args: &[&str]) {
    match Command::new(name).args(args).output() {
        Ok(output) => {
            let version = String::from_utf8_lossy(&output.stdout);
            let first_line = version.lines().next().unwrap_or("(unknown version)");
            println!("  {name}: {first_line}");
        }
        Err(_) => {
            println!("  {name}: not found");
        }
    }
}
