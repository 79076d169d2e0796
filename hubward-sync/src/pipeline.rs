//! Shared pipeline entrypoints used by the CLI: load documents into a
//! namespace, solve, and run a processor against a session.

use std::path::PathBuf;
use std::time::Duration;

use hubward_core::loader;
use hubward_expand::{Namespace, Redefine};

use crate::dump::discover_phantoms;
use crate::error::SyncError;
use crate::processor::{Mode, Processor, ProcessorOptions, ProcessorOutcome};
use crate::session::Session;
use crate::solver::Solver;

/// Policy for a full load-solve-process run.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub redefine: Redefine,
    pub recursive: bool,
    pub chunk_size: usize,
    pub skip_phantoms: bool,
    /// Probe the remote for referenced-but-undeclared keys before deciding
    /// they are phantoms.
    pub discover: bool,
    pub deadline: Option<Duration>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions {
            redefine: Redefine::Error,
            recursive: false,
            chunk_size: 100,
            skip_phantoms: false,
            discover: true,
            deadline: None,
        }
    }
}

/// Load template and data files into an expanded namespace.
///
/// Template paths are ingested first so their definitions are available to
/// calls in the data paths.
pub fn load_namespace(
    data_paths: &[PathBuf],
    template_paths: &[PathBuf],
    options: &PipelineOptions,
) -> Result<Namespace, SyncError> {
    let mut namespace = Namespace::new(options.redefine);
    let templates = loader::load_paths(template_paths, options.recursive)?;
    namespace.ingest_all(templates).map_err(SyncError::from)?;
    let data = loader::load_paths(data_paths, options.recursive)?;
    namespace.ingest_all(data).map_err(SyncError::from)?;
    namespace.expand()?;
    Ok(namespace)
}

/// Solve a namespace and run the processor in the given mode.
pub fn run<S: Session>(
    session: &mut S,
    namespace: Namespace,
    mode: Mode,
    options: &PipelineOptions,
) -> Result<ProcessorOutcome, SyncError> {
    let mut solver = Solver::new(namespace.into_objects());
    if options.discover {
        discover_phantoms(solver.resolver_mut(), session, options.deadline)?;
    }
    let processor_options = ProcessorOptions {
        mode,
        chunk_size: options.chunk_size,
        skip_phantoms: options.skip_phantoms,
        deadline: options.deadline,
    };
    Processor::new(solver, session, processor_options).run()
}
