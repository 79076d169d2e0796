//! `hubward compare` — read and diff without ever writing.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use similar::TextDiff;

use hubward_core::Key;
use hubward_sync::{fetch_documents, load_namespace, pipeline, Mode, SnapshotHub};

use super::render::{print_reports, print_summary};
use super::LoadArgs;

/// Arguments for `hubward compare`.
#[derive(Args, Debug)]
pub struct CompareArgs {
    #[command(flatten)]
    pub load: LoadArgs,

    /// Hub state snapshot to compare against.
    #[arg(long = "hub", required = true)]
    pub hub: PathBuf,

    /// Show unified diffs of desired vs observed documents.
    #[arg(long)]
    pub diff: bool,

    /// Emit change reports as JSON instead of text.
    #[arg(long)]
    pub json: bool,

    /// List objects with empty diffs too.
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

impl CompareArgs {
    pub fn run(self) -> Result<()> {
        let options = self.load.pipeline_options();
        let namespace = load_namespace(&self.load.data, &self.load.templates, &options)
            .context("loading configuration failed")?;

        // keep the desired documents around for --diff output
        let desired: BTreeMap<Key, serde_yaml::Mapping> = namespace
            .objects()
            .map(hubward_core::Object::key)
            .zip(namespace.documents().map(|doc| doc.data.clone()))
            .collect();

        let mut hub = SnapshotHub::from_file(&self.hub)
            .with_context(|| format!("could not load hub state from {}", self.hub.display()))?;
        let outcome = pipeline::run(&mut hub, namespace, Mode::Compare, &options)
            .context("compare failed")?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&outcome.reports)?);
            return Ok(());
        }

        print_reports(&outcome.reports, self.verbose);
        if self.diff {
            self.print_diffs(&mut hub, &outcome.reports, &desired)?;
        }
        print_summary(&outcome);
        Ok(())
    }

    /// Render desired and observed state as YAML and show a unified diff
    /// for every object with pending changes.
    fn print_diffs(
        &self,
        hub: &mut SnapshotHub,
        reports: &[hubward_sync::ChangeReport],
        desired: &BTreeMap<Key, serde_yaml::Mapping>,
    ) -> Result<()> {
        let changed: Vec<Key> = reports
            .iter()
            .filter(|report| !report.changes.is_empty())
            .map(|report| report.key.clone())
            .filter(|key| !key.is_deferred())
            .collect();
        if changed.is_empty() {
            return Ok(());
        }

        let observed = fetch_documents(hub, &changed, false, None).context("fetch failed")?;
        for (key, observed_doc) in observed {
            let Some(desired_doc) = desired.get(&key) else {
                continue;
            };
            let old = match observed_doc {
                Some(doc) => serde_yaml::to_string(&serde_yaml::Value::Mapping(doc))?,
                None => String::new(),
            };
            let new = serde_yaml::to_string(&serde_yaml::Value::Mapping(desired_doc.clone()))?;
            if old == new {
                continue;
            }
            let old_header = format!("a/{key}");
            let new_header = format!("b/{key}");
            let unified = TextDiff::from_lines(&old, &new)
                .unified_diff()
                .header(&old_header, &new_header)
                .context_radius(3)
                .to_string();
            print!("{unified}");
        }
        Ok(())
    }
}
