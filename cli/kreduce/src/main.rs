//! kreduce CLI: build, inspect and manage formula-specialized kernels.

mod commands;

use std::process;

use clap::{Parser, Subcommand};
use kreduce_engine::EngineConfig;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use commands::KernelArgs;

/// Log filter used when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "warn,kreduce_build=info,kreduce_engine=info,kreduce_ffi=info";

#[derive(Parser)]
#[command(name = "kreduce", version, about = "Formula-driven kernel reduction engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build (or adopt) the artifact for a kernel
    Build {
        #[command(flatten)]
        kernel: KernelArgs,
        /// Also load the artifact and bind its entry point
        #[arg(long)]
        load: bool,
    },
    /// Show the normalized formula, cache key and build parameters
    Inspect {
        #[command(flatten)]
        kernel: KernelArgs,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Manage the artifact cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Check toolchain and configuration
    Doctor,
}

#[derive(Subcommand)]
enum CacheAction {
    /// List stored artifacts
    List {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Check stored artifacts against their manifests
    Verify,
    /// Remove every stored artifact and build directory
    Clean,
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    let result = run(cli);
    if let Err(e) = result {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let cwd = std::env::current_dir()?;

    match cli.command {
        Commands::Build { kernel, load } => {
            let config = discover(&cwd)?;
            commands::build::run(&config, &kernel, load)
        }
        Commands::Inspect { kernel, json } => {
            let config = discover(&cwd)?;
            commands::inspect::run(&config, &kernel, json)
        }
        Commands::Cache { action } => {
            let config = discover(&cwd)?;
            match action {
                CacheAction::List { json } => commands::cache::list(&config, json),
                CacheAction::Verify => commands::cache::verify(&config),
                CacheAction::Clean => commands::cache::clean(&config),
            }
        }
        Commands::Doctor => commands::doctor::run(&cwd),
    }
}

fn discover(cwd: &std::path::Path) -> anyhow::Result<EngineConfig> {
    let config = EngineConfig::discover(cwd)?;
    debug!(
        event = "config_resolved",
        cache_root = %config.cache_root.display(),
        source_dir = %config.toolchain.source_dir.display(),
    );
    Ok(config)
}
