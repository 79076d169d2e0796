//! `hubward dump` — render observed hub state as configuration documents.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use hubward_sync::{fetch_documents, render_documents, select_keys, SnapshotHub};

/// Arguments for `hubward dump`.
#[derive(Args, Debug)]
pub struct DumpArgs {
    /// Patterns to dump: `kind:name`, with `*` and `?` globbing; bare
    /// patterns apply to the default kinds.
    #[arg(required = true)]
    pub patterns: Vec<String>,

    /// Hub state snapshot to read.
    #[arg(long = "hub", required = true)]
    pub hub: PathBuf,

    /// Include fields whose value equals the kind's default.
    #[arg(long, short = 'd')]
    pub include_defaults: bool,

    /// Write output to a file instead of stdout.
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,

    /// Apply bare patterns to tags.
    #[arg(long)]
    pub tags: bool,

    /// Apply bare patterns to targets.
    #[arg(long)]
    pub targets: bool,

    /// Apply bare patterns to users.
    #[arg(long)]
    pub users: bool,

    /// Apply bare patterns to hosts.
    #[arg(long)]
    pub hosts: bool,
}

impl DumpArgs {
    pub fn run(self) -> Result<()> {
        let mut default_kinds: Vec<&str> = Vec::new();
        if self.tags {
            default_kinds.push("tag");
        }
        if self.targets {
            default_kinds.push("target");
        }
        if self.users {
            default_kinds.push("user");
        }
        if self.hosts {
            default_kinds.push("host");
        }
        if default_kinds.is_empty() {
            default_kinds = vec!["tag", "target"];
        }

        let mut hub = SnapshotHub::from_file(&self.hub)
            .with_context(|| format!("could not load hub state from {}", self.hub.display()))?;

        let keys = select_keys(&hub.keys(), &self.patterns, &default_kinds);
        if keys.is_empty() {
            eprintln!("no objects match the given patterns");
            return Ok(());
        }

        let documents =
            fetch_documents(&mut hub, &keys, self.include_defaults, None).context("fetch failed")?;
        let text = render_documents(&documents).context("could not render documents")?;

        match &self.output {
            Some(path) => std::fs::write(path, text)
                .with_context(|| format!("could not write {}", path.display()))?,
            None => print!("{text}"),
        }
        Ok(())
    }
}
