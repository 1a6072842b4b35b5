//! skein CLI - extract and load related records described by a YAML operation
//!
//! Stores are JSON or YAML snapshot files read into a [`MemoryStore`].

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use skein::{LoadOperation, MemoryStore, OperationConfig, OperationReport, RunState, TransformRegistry};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "skein")]
#[command(version, about = "Extract and reload networks of related records", long_about = None)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract records from a store into NDJSON files
    Extract {
        /// Path to the operation YAML file
        config: PathBuf,

        /// Source store snapshot
        #[arg(short, long)]
        store: PathBuf,
    },

    /// Load NDJSON files into a store, rewriting references
    Load {
        /// Path to the operation YAML file
        config: PathBuf,

        /// Target store snapshot; updated in place after the run
        #[arg(short, long)]
        store: PathBuf,

        /// State file to resume from and to save progress to
        #[arg(long)]
        state: Option<PathBuf>,
    },

    /// Check an operation against a store without reading or writing records
    Validate {
        /// Path to the operation YAML file
        config: PathBuf,

        #[arg(short, long)]
        store: PathBuf,

        /// Validate as a load instead of an extraction
        #[arg(short, long)]
        load: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Extract { config, store } => run_extract(&config, &store),
        Commands::Load { config, store, state } => run_load(&config, &store, state.as_deref()),
        Commands::Validate { config, store, load } => validate(&config, &store, load),
    };

    if let Err(e) = result {
        error!("{}", e);
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn print_report(report: &OperationReport) {
    println!("{}", report);
    if report.has_errors() {
        warn!("{} records failed; see result files for details", report.error_count());
    }
}

fn run_extract(config: &Path, store: &Path) -> Result<(), String> {
    let operation = OperationConfig::load_from_file(config).map_err(|e| e.to_string())?;
    let store = MemoryStore::load_file(store).map_err(|e| e.to_string())?;

    let mut op = operation
        .build_extraction(&store, Arc::new(TransformRegistry::with_builtins()))
        .map_err(|e| format!("Invalid operation {}: {}", config.display(), e))?;
    let report = op.execute().map_err(|e| e.to_string())?;

    print_report(&report);
    Ok(())
}

fn run_load(config: &Path, store_path: &Path, state_path: Option<&Path>) -> Result<(), String> {
    let operation = OperationConfig::load_from_file(config).map_err(|e| e.to_string())?;
    let store = MemoryStore::load_file(store_path).map_err(|e| e.to_string())?;

    let saved = match state_path {
        Some(path) if path.exists() => Some(RunState::load_from_file(path).map_err(|e| e.to_string())?),
        _ => None,
    };

    let mut op: LoadOperation<&MemoryStore> = operation
        .build_load(&store, Arc::new(TransformRegistry::with_builtins()), saved.is_some())
        .map_err(|e| format!("Invalid operation {}: {}", config.display(), e))?;
    if let Some(state) = &saved {
        op.resume_from(state);
    }

    let outcome = op.execute();

    // The store and state are saved either way so a failed run can resume.
    store.save_file(store_path).map_err(|e| e.to_string())?;
    if let Some(path) = state_path {
        op.run_state().save_to_file(path).map_err(|e| e.to_string())?;
        info!("Saved load state to {}", path.display());
    }

    let report = outcome.map_err(|e| e.to_string())?;
    print_report(&report);
    Ok(())
}

fn validate(config: &Path, store: &Path, load: bool) -> Result<(), String> {
    let operation = OperationConfig::load_from_file(config).map_err(|e| e.to_string())?;
    let store = MemoryStore::load_file(store).map_err(|e| e.to_string())?;
    let registry = Arc::new(TransformRegistry::with_builtins());

    let steps = if load {
        operation
            .build_load_with(&store, registry, |_| Ok(None))
            .map_err(|e| e.to_string())?
            .steps()
            .len()
    } else {
        operation
            .build_extraction_with(&store, registry, |_| {
                Ok(Box::new(skein::io::MemorySink::new()) as Box<dyn skein::RecordSink>)
            })
            .map_err(|e| e.to_string())?
            .steps()
            .len()
    };

    println!("✓ {} is valid ({} steps)", config.display(), steps);
    Ok(())
}
