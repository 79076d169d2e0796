//! Subcommand implementations.

pub mod apply;
pub mod compare;
pub mod dump;
pub mod expand;
pub mod render;

use std::path::PathBuf;
use std::str::FromStr;

use clap::Args;

use hubward_expand::Redefine;
use hubward_sync::PipelineOptions;

/// Thin wrapper so clap can parse the redefine policy.
#[derive(Debug, Clone, Default)]
pub struct RedefineArg(pub Redefine);

impl FromStr for RedefineArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Redefine::from_str(s).map(RedefineArg)
    }
}

/// Options shared by every pipeline-driving subcommand.
#[derive(Args, Debug)]
pub struct LoadArgs {
    /// Data files or directories containing YAML object definitions.
    #[arg(required = true)]
    pub data: Vec<PathBuf>,

    /// Additional locations to find templates referenced by DATA.
    #[arg(long = "templates", short = 't')]
    pub templates: Vec<PathBuf>,

    /// Recurse into subdirectories of DATA and template paths.
    #[arg(long)]
    pub recursive: bool,

    /// Policy when the same object is declared twice.
    #[arg(long, default_value = "error")]
    pub redefine: RedefineArg,
}

impl LoadArgs {
    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            redefine: self.redefine.0,
            recursive: self.recursive,
            ..PipelineOptions::default()
        }
    }
}
