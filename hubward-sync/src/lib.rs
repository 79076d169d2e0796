//! # hubward-sync
//!
//! The reconciliation engine: resolver, tiered solver with cycle splitting,
//! multicall batching over a [`Session`], per-object change reports, and the
//! chunked processor that drives read, compare, and apply phases.

pub mod batch;
pub mod dump;
pub mod error;
pub mod pipeline;
pub mod processor;
pub mod report;
pub mod resolver;
pub mod session;
pub mod solver;

pub use batch::{Batch, BatchResults, Promise};
pub use dump::{discover_phantoms, fetch_documents, render_documents, select_keys};
pub use error::{SessionError, SyncError};
pub use pipeline::{load_namespace, run, PipelineOptions};
pub use processor::{
    CancelToken, Mode, Processor, ProcessorOptions, ProcessorOutcome, RunSummary,
};
pub use report::{ChangeReport, FailureReason, ReportState};
pub use resolver::{Presence, Resolver};
pub use session::{Session, SnapshotHub};
pub use solver::{Solver, Tier};
