//! The chunked phase engine.
//!
//! Single-threaded and cooperative: the processor pulls tiers from the
//! solver, draws objects in chunks, and drives each chunk through a read
//! multicall, a local compare, and (in apply mode) a write multicall. The
//! only suspension points are the two in-flight batches; between them no
//! object observes another's partial progress.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use hubward_core::{ChangeState, Key, Object, RemoteFault};

use crate::batch::{Batch, Promise};
use crate::error::SyncError;
use crate::report::{ChangeReport, FailureReason, ReportState};
use crate::session::Session;
use crate::solver::Solver;

/// Cooperative cancellation flag, checked between phase transitions.
/// An in-flight batch is never interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Whether writes are submitted or only reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Submit write batches.
    Apply,
    /// Never submit a write; mark identified changes as would-apply.
    Compare,
}

/// Processor tuning and policy.
#[derive(Debug, Clone)]
pub struct ProcessorOptions {
    pub mode: Mode,
    pub chunk_size: usize,
    /// Drop objects whose dependency closure contains a phantom instead of
    /// refusing the whole run.
    pub skip_phantoms: bool,
    /// Per-batch deadline; a timed-out batch fails all its objects.
    pub deadline: Option<Duration>,
}

impl ProcessorOptions {
    pub fn apply() -> Self {
        ProcessorOptions {
            mode: Mode::Apply,
            chunk_size: 100,
            skip_phantoms: false,
            deadline: None,
        }
    }

    pub fn compare() -> Self {
        ProcessorOptions {
            mode: Mode::Compare,
            ..Self::apply()
        }
    }
}

/// Aggregate counts for a processor run.
#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub total_objects: usize,
    pub tiers: usize,
    pub chunks: usize,
    pub applied: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub total_changes: usize,
    pub applied_changes: usize,
    pub would_apply_changes: usize,
    pub skipped_changes: usize,
    /// Objects dropped from the stream because their dependency closure
    /// contains a phantom (skip-phantoms policy).
    pub dropped_for_phantoms: Vec<Key>,
    /// Phantom keys that remained after discovery.
    pub phantoms: Vec<Key>,
    pub cancelled: bool,
}

/// The result of a processor run: per-object reports plus the summary.
#[derive(Debug)]
pub struct ProcessorOutcome {
    pub reports: Vec<ChangeReport>,
    pub summary: RunSummary,
}

impl ProcessorOutcome {
    /// The exit-status contract: failure if anything failed, or if phantoms
    /// survived into an apply run.
    pub fn is_clean(&self) -> bool {
        self.summary.failed == 0 && !self.summary.cancelled
    }
}

/// Drives the solver-to-remote pipeline.
pub struct Processor<'a, S: Session> {
    solver: Solver,
    session: &'a mut S,
    options: ProcessorOptions,
    cancel: CancelToken,
}

/// One object moving through a chunk's phases.
struct Work {
    object: Object,
    report: ChangeReport,
    reads: Vec<Promise>,
}

impl<'a, S: Session> Processor<'a, S> {
    pub fn new(solver: Solver, session: &'a mut S, options: ProcessorOptions) -> Self {
        Processor {
            solver,
            session,
            options,
            cancel: CancelToken::new(),
        }
    }

    /// A handle for cancelling this run between phases.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run every tier to completion (or cancellation).
    pub fn run(self) -> Result<ProcessorOutcome, SyncError> {
        let Processor {
            mut solver,
            session,
            options,
            cancel,
        } = self;

        let phantoms = solver.resolver().phantom_keys();
        if options.mode == Mode::Apply && !phantoms.is_empty() && !options.skip_phantoms {
            return Err(SyncError::Phantoms { keys: phantoms });
        }

        let mut summary = RunSummary {
            phantoms,
            ..RunSummary::default()
        };
        let mut reports: Vec<ChangeReport> = Vec::new();
        let mut failed: BTreeSet<Key> = BTreeSet::new();
        let mut tainted: BTreeSet<Key> = BTreeSet::new();

        while let Some(tier) = solver.next_tier()? {
            summary.tiers += 1;
            if cancel.is_cancelled() {
                tracing::warn!("run cancelled; discarding remaining tiers");
                summary.cancelled = true;
                break;
            }

            // cross-tier failure and phantom policy, before any remote call
            let mut workable: Vec<Object> = Vec::new();
            for object in tier.into_objects() {
                summary.total_objects += 1;
                let key = object.key();
                let deps = object.dependency_keys();

                if let Some(dep) = deps.iter().find(|dep| failed.contains(&dep.key)) {
                    let mut report = ChangeReport::new(&object);
                    report.fail(FailureReason::Upstream {
                        dependency: dep.key.clone(),
                    });
                    summary.failed += 1;
                    failed.insert(key);
                    reports.push(report);
                    continue;
                }

                if options.skip_phantoms {
                    let resolver = solver.resolver();
                    let blocked = deps.iter().any(|dep| {
                        resolver.is_phantom(&dep.key) || tainted.contains(&dep.key)
                    });
                    if blocked {
                        tracing::warn!(
                            "dropping {key}: dependency closure contains a phantom"
                        );
                        tainted.insert(key.clone());
                        summary.dropped_for_phantoms.push(key);
                        continue;
                    }
                }

                workable.push(object);
            }

            let chunk_size = options.chunk_size.max(1);
            let mut queue = workable.into_iter().peekable();
            while queue.peek().is_some() {
                if cancel.is_cancelled() {
                    tracing::warn!("run cancelled; discarding remaining tiers");
                    summary.cancelled = true;
                    break;
                }
                let chunk: Vec<Object> = queue.by_ref().take(chunk_size).collect();
                summary.chunks += 1;
                let chunk_reports = process_chunk(
                    session,
                    &options,
                    &solver,
                    chunk,
                    &mut failed,
                    &cancel,
                );
                for report in chunk_reports {
                    match report.state {
                        ReportState::Failed => summary.failed += 1,
                        ReportState::Applied if report.changes.is_empty() => {
                            summary.unchanged += 1;
                            summary.applied += 1;
                        }
                        ReportState::Applied => summary.applied += 1,
                        _ => {}
                    }
                    summary.total_changes += report.changes.len();
                    summary.applied_changes += report.applied_changes();
                    summary.would_apply_changes += report.would_apply_changes();
                    summary.skipped_changes += report.skipped_changes();
                    reports.push(report);
                }
            }
            if summary.cancelled {
                break;
            }
        }

        Ok(ProcessorOutcome { reports, summary })
    }
}

/// Drive one chunk through read, compare, and apply.
fn process_chunk<S: Session>(
    session: &mut S,
    options: &ProcessorOptions,
    solver: &Solver,
    chunk: Vec<Object>,
    failed: &mut BTreeSet<Key>,
    cancel: &CancelToken,
) -> Vec<ChangeReport> {
    // READ: one multicall for the whole chunk
    let mut batch = Batch::new();
    let mut work: Vec<Work> = chunk
        .into_iter()
        .map(|object| {
            let mut report = ChangeReport::new(&object);
            report.state = ReportState::Reading;
            let reads = object
                .read_calls()
                .into_iter()
                .map(|call| batch.submit(call))
                .collect();
            Work {
                object,
                report,
                reads,
            }
        })
        .collect();

    tracing::debug!("read batch: {} call(s)", batch.len());
    let results = match session.execute(&batch, options.deadline) {
        Ok(results) => results,
        Err(err) => {
            for item in &mut work {
                item.report.fail(FailureReason::Batch {
                    message: err.to_string(),
                });
                failed.insert(item.report.key.clone());
            }
            return work.into_iter().map(|item| item.report).collect();
        }
    };

    // COMPARE: settle promises and diff locally
    for item in &mut work {
        let observed = results.settle_all(&item.reads);
        match item.object.diff(&observed) {
            Ok(changes) => {
                item.report.changes = changes;
                item.report.state = ReportState::Compared;
                if item.report.changes.is_empty() {
                    // nothing to do: straight to applied with zero ops
                    item.report.state = ReportState::Applied;
                }
            }
            Err(read_failure) => {
                let promise = item.reads[read_failure.index];
                item.report.fail(FailureReason::Read {
                    call: batch.call(&promise).clone(),
                    fault: read_failure.fault,
                });
                failed.insert(item.report.key.clone());
            }
        }
    }

    match options.mode {
        Mode::Compare => {
            for item in &mut work {
                if item.report.state == ReportState::Compared {
                    for change in &mut item.report.changes {
                        change.state = ChangeState::WouldApply;
                    }
                }
            }
        }
        Mode::Apply => {
            // cancellation between the read and write phases; compared
            // reports stay compared, nothing is submitted
            if !cancel.is_cancelled() {
                apply_chunk(session, options, solver, &mut work, failed);
            }
        }
    }

    work.into_iter().map(|item| item.report).collect()
}

/// APPLY: one write multicall for every compared object with changes.
fn apply_chunk<S: Session>(
    session: &mut S,
    options: &ProcessorOptions,
    solver: &Solver,
    work: &mut [Work],
    failed: &mut BTreeSet<Key>,
) {
    let resolver = solver.resolver();
    let mut batch = Batch::new();
    let mut submissions: Vec<(usize, usize, Promise)> = Vec::new();

    for (work_index, item) in work.iter_mut().enumerate() {
        if item.report.state != ReportState::Compared {
            continue;
        }
        item.report.state = ReportState::Applying;
        for (change_index, change) in item.report.changes.iter_mut().enumerate() {
            let skip = options.skip_phantoms
                && change
                    .guard
                    .as_ref()
                    .is_some_and(|guard| resolver.is_phantom(guard));
            if skip {
                tracing::debug!("skipping change with phantom guard: {change}");
                change.state = ChangeState::Skipped;
                continue;
            }
            let promise = batch.submit(change.call.clone());
            submissions.push((work_index, change_index, promise));
        }
    }

    if batch.is_empty() {
        for item in work.iter_mut() {
            if item.report.state == ReportState::Applying {
                item.report.state = ReportState::Applied;
            }
        }
        return;
    }

    tracing::debug!("write batch: {} call(s)", batch.len());
    let results = match session.execute(&batch, options.deadline) {
        Ok(results) => results,
        Err(err) => {
            for item in work.iter_mut() {
                if item.report.state == ReportState::Applying {
                    item.report.fail(FailureReason::Batch {
                        message: err.to_string(),
                    });
                    failed.insert(item.report.key.clone());
                }
            }
            return;
        }
    };

    for (work_index, change_index, promise) in submissions {
        let item = &mut work[work_index];
        let change = &mut item.report.changes[change_index];
        match promise.settle(&results) {
            Ok(_) => change.state = ChangeState::Applied,
            Err(fault) => {
                change.state = ChangeState::Failed(fault.message.clone());
                let reason = FailureReason::Apply {
                    description: change.description.clone(),
                    call: change.call.clone(),
                    fault: RemoteFault::new(fault.message.clone()),
                };
                item.report.fail(reason);
                failed.insert(item.report.key.clone());
            }
        }
    }

    for item in work.iter_mut() {
        if item.report.state == ReportState::Applying {
            item.report.state = ReportState::Applied;
        }
    }
}
