//! Per-object change reports.
//!
//! Each object emitted by the solver gets a [`ChangeReport`] that moves
//! through a bounded lifecycle as the processor drives the read, compare,
//! and apply phases:
//!
//! ```text
//!    Init -> Reading -> Compared -> Applying -> {Applied | Failed}
//! ```
//!
//! An empty diff jumps straight from Compared to Applied with zero
//! operations. A failed object never blocks its tier, but it does fail its
//! dependents in later tiers.

use serde::Serialize;

use hubward_core::{CallDescriptor, Change, ChangeState, Key, Object, Origin, RemoteFault};

/// Lifecycle state of a change report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportState {
    Init,
    Reading,
    Compared,
    Applying,
    Applied,
    Failed,
}

/// Why a report ended up [`ReportState::Failed`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case", tag = "reason")]
pub enum FailureReason {
    /// A dependency failed in an earlier tier; no remote calls were issued.
    Upstream { dependency: Key },
    /// A read probe failed.
    Read {
        call: CallDescriptor,
        fault: RemoteFault,
    },
    /// A write failed; carries the change description and its call.
    Apply {
        description: String,
        call: CallDescriptor,
        fault: RemoteFault,
    },
    /// The whole batch failed (transport error or deadline).
    Batch { message: String },
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Upstream { dependency } => {
                write!(f, "upstream failure: {dependency}")
            }
            FailureReason::Read { call, fault } => {
                write!(f, "read failed: {call}: {fault}")
            }
            FailureReason::Apply {
                description, fault, ..
            } => {
                write!(f, "apply failed: {description}: {fault}")
            }
            FailureReason::Batch { message } => write!(f, "batch failed: {message}"),
        }
    }
}

/// The diff and outcome for one object.
#[derive(Debug, Serialize)]
pub struct ChangeReport {
    pub key: Key,
    pub origin: Origin,
    pub state: ReportState,
    pub changes: Vec<Change>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
}

impl ChangeReport {
    pub fn new(object: &Object) -> Self {
        ChangeReport {
            key: object.key(),
            origin: object.origin().clone(),
            state: ReportState::Init,
            changes: Vec::new(),
            failure: None,
        }
    }

    /// Terminal failure; keeps the first reason if called twice.
    pub fn fail(&mut self, reason: FailureReason) {
        self.state = ReportState::Failed;
        if self.failure.is_none() {
            self.failure = Some(reason);
        }
    }

    pub fn is_failed(&self) -> bool {
        self.state == ReportState::Failed
    }

    /// Changes actually applied on the remote.
    pub fn applied_changes(&self) -> usize {
        self.changes
            .iter()
            .filter(|change| change.state == ChangeState::Applied)
            .count()
    }

    /// Changes identified but not submitted (compare-only mode).
    pub fn would_apply_changes(&self) -> usize {
        self.changes
            .iter()
            .filter(|change| change.state == ChangeState::WouldApply)
            .count()
    }

    pub fn skipped_changes(&self) -> usize {
        self.changes
            .iter()
            .filter(|change| change.state == ChangeState::Skipped)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubward_core::loader::parse_documents;
    use hubward_core::models::Permission;

    fn permission_object() -> Object {
        let docs = parse_documents("type: permission\nname: admin\n", &Origin::new("p.yaml", 0))
            .expect("parse");
        Object::Permission(Permission::from_doc(&docs[0]).expect("permission"))
    }

    #[test]
    fn new_report_starts_in_init() {
        let report = ChangeReport::new(&permission_object());
        assert_eq!(report.state, ReportState::Init);
        assert!(report.changes.is_empty());
        assert!(report.failure.is_none());
    }

    #[test]
    fn fail_keeps_the_first_reason() {
        let mut report = ChangeReport::new(&permission_object());
        report.fail(FailureReason::Upstream {
            dependency: Key::new("tag", "b"),
        });
        report.fail(FailureReason::Batch {
            message: "later".into(),
        });
        assert!(report.is_failed());
        assert!(matches!(
            report.failure,
            Some(FailureReason::Upstream { .. })
        ));
    }
}
