//! Error types for hubward-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::key::Origin;

/// All errors that can arise from loading and modelling configuration objects.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Underlying I/O failure, with the path being read.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A configuration document could not be parsed as YAML.
    #[error("malformed document at {origin}: {source}")]
    DocumentParse {
        origin: Origin,
        #[source]
        source: serde_yaml::Error,
    },

    /// A document is structurally invalid (missing `type`, bad `multi`
    /// entry, non-mapping body).
    #[error("invalid document at {origin}: {message}")]
    DocumentShape { origin: Origin, message: String },

    /// Object data failed validation against its kind's model.
    #[error("validation error for {kind} '{name}' at {origin}: {message}")]
    Validation {
        kind: String,
        name: String,
        origin: Origin,
        message: String,
    },

    /// A document named a kind the registry does not know.
    #[error("unknown kind '{kind}' at {origin}")]
    UnknownKind { kind: String, origin: Origin },

    /// The kind registry was modified after expansion began.
    #[error("cannot register kind '{kind}': registry is sealed")]
    RegistrySealed { kind: String },
}

impl CoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CoreError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn validation(
        kind: impl Into<String>,
        name: impl Into<String>,
        origin: &Origin,
        message: impl Into<String>,
    ) -> Self {
        CoreError::Validation {
            kind: kind.into(),
            name: name.into(),
            origin: origin.clone(),
            message: message.into(),
        }
    }
}
