//! `hubward expand` — run ingest + expand and print the document stream.

use anyhow::{Context, Result};
use clap::Args;

use hubward_sync::load_namespace;

use super::LoadArgs;

/// Arguments for `hubward expand`.
#[derive(Args, Debug)]
pub struct ExpandArgs {
    #[command(flatten)]
    pub load: LoadArgs,

    /// Only include documents of these kinds in the output.
    #[arg(long = "select", short = 'S')]
    pub select: Vec<String>,
}

impl ExpandArgs {
    pub fn run(self) -> Result<()> {
        let options = self.load.pipeline_options();
        let namespace = load_namespace(&self.load.data, &self.load.templates, &options)
            .context("expansion failed")?;

        for diagnostic in namespace.diagnostics() {
            eprintln!("warning: {diagnostic}");
        }

        let mut first = true;
        for doc in namespace.documents() {
            if !self.select.is_empty() && !self.select.contains(&doc.kind) {
                continue;
            }
            if !first {
                println!("---");
            }
            first = false;
            let rendered =
                serde_yaml::to_string(&serde_yaml::Value::Mapping(doc.data.clone()))
                    .context("could not render document")?;
            print!("{rendered}");
        }
        Ok(())
    }
}
