//! Error types for hubward-sync.
//!
//! Per-entity read and apply failures are not errors at this level: they are
//! recorded on the entity's change report and cascade to dependents. Only
//! whole-run conditions (unbreakable cycles, phantom preconditions, session
//! transport failures) surface as [`SyncError`].

use thiserror::Error;

use hubward_core::{CoreError, Key};
use hubward_expand::ExpandError;

/// A failure of the session transport as a whole.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The transport could not deliver the batch.
    #[error("session transport error: {0}")]
    Transport(String),

    /// The batch missed its deadline; every call in it is failed.
    #[error("batch deadline exceeded after {0:?}")]
    DeadlineExceeded(std::time::Duration),
}

/// All errors that abort a sync run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An error from the core document/model layer.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// An error from namespace expansion.
    #[error(transparent)]
    Expand(#[from] ExpandError),

    /// An error from the remote session.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The dependency graph contains a cycle that no member can split.
    #[error("unbreakable dependency cycle among: {}", format_keys(.keys))]
    DependencyCycle { keys: Vec<Key> },

    /// Apply mode refused to start: dependencies are neither declared nor
    /// present on the remote, and skip-phantoms is not set.
    #[error("phantom dependencies block apply: {}", format_keys(.keys))]
    Phantoms { keys: Vec<Key> },

    /// A snapshot file could not be read or written.
    #[error("snapshot error at {path}: {message}")]
    Snapshot { path: std::path::PathBuf, message: String },
}

fn format_keys(keys: &[Key]) -> String {
    let shown: Vec<String> = keys.iter().map(Key::to_string).collect();
    shown.join(", ")
}
