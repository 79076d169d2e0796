//! `hubward apply` — reconcile the hub with declared state.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;

use hubward_sync::{load_namespace, pipeline, Mode, SnapshotHub, SyncError};

use super::render::{print_reports, print_summary};
use super::LoadArgs;

/// Arguments for `hubward apply`.
#[derive(Args, Debug)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub load: LoadArgs,

    /// Hub state snapshot to reconcile; updated in place on success.
    #[arg(long = "hub", required = true)]
    pub hub: PathBuf,

    /// Drop objects whose dependencies are phantoms instead of refusing
    /// the whole run.
    #[arg(long)]
    pub skip_phantoms: bool,

    /// Objects per multicall chunk.
    #[arg(long, default_value_t = 100)]
    pub chunk_size: usize,

    /// Per-batch deadline in seconds.
    #[arg(long)]
    pub deadline: Option<u64>,

    /// List objects with empty diffs too.
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

impl ApplyArgs {
    pub fn run(self) -> Result<()> {
        let mut options = self.load.pipeline_options();
        options.skip_phantoms = self.skip_phantoms;
        options.chunk_size = self.chunk_size;
        options.deadline = self.deadline.map(Duration::from_secs);

        let namespace = load_namespace(&self.load.data, &self.load.templates, &options)
            .context("loading configuration failed")?;
        let mut hub = SnapshotHub::from_file(&self.hub)
            .with_context(|| format!("could not load hub state from {}", self.hub.display()))?;

        let outcome = match pipeline::run(&mut hub, namespace, Mode::Apply, &options) {
            Ok(outcome) => outcome,
            Err(SyncError::Phantoms { keys }) => {
                for key in &keys {
                    eprintln!("phantom: {key} (referenced but not declared)");
                }
                bail!(
                    "refusing to apply: {} undeclared dependenc{} (use --skip-phantoms to drop \
                     the affected objects)",
                    keys.len(),
                    if keys.len() == 1 { "y" } else { "ies" }
                );
            }
            Err(err) => return Err(err).context("apply failed"),
        };

        print_reports(&outcome.reports, self.verbose);
        print_summary(&outcome);

        hub.save(&self.hub)
            .with_context(|| format!("could not save hub state to {}", self.hub.display()))?;

        if !outcome.is_clean() {
            bail!("{} object(s) failed", outcome.summary.failed);
        }
        Ok(())
    }
}
