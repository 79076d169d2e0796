//! hubward — reconcile declared build-hub objects against a hub.
//!
//! # Usage
//!
//! ```text
//! hubward expand DATA... [--templates PATH]... [--select KIND]...
//! hubward compare DATA... --hub STATE [--templates PATH]... [--diff] [--json]
//! hubward apply DATA... --hub STATE [--templates PATH]... [--skip-phantoms]
//! hubward dump PATTERN... --hub STATE [--include-defaults]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::{apply::ApplyArgs, compare::CompareArgs, dump::DumpArgs, expand::ExpandArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "hubward",
    version,
    about = "Reconcile declared build-hub objects against a hub",
    long_about = None,
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Expand templates and data files into a YAML document stream.
    Expand(ExpandArgs),

    /// Show what apply would change, without touching the hub.
    Compare(CompareArgs),

    /// Apply declared state to the hub in dependency order.
    Apply(ApplyArgs),

    /// Dump observed hub state as configuration documents.
    Dump(DumpArgs),
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    match cli.command {
        Commands::Expand(args) => args.run(),
        Commands::Compare(args) => args.run(),
        Commands::Apply(args) => args.run(),
        Commands::Dump(args) => args.run(),
    }
}
