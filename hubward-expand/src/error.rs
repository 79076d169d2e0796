//! Error types for hubward-expand.

use thiserror::Error;

use hubward_core::{CoreError, Key, Origin};

/// All errors that can arise from template handling and namespace expansion.
#[derive(Debug, Error)]
pub enum ExpandError {
    /// An error from the core document/model layer.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A template body failed to parse.
    #[error("syntax error in template '{template}' at {origin}: {source}")]
    TemplateSyntax {
        template: String,
        origin: Origin,
        #[source]
        source: tera::Error,
    },

    /// A template failed to render (undefined variable, bad filter, ...).
    #[error("render error in template '{template}' at {origin}: {source}")]
    TemplateRender {
        template: String,
        origin: Origin,
        #[source]
        source: tera::Error,
    },

    /// A template rendered, but its output was not a valid document stream.
    #[error("template '{template}' produced invalid output at {origin}: {source}")]
    TemplateOutput {
        template: String,
        origin: Origin,
        #[source]
        source: CoreError,
    },

    /// A template-call payload failed the template's declared schema.
    #[error("validation error for call of '{template}' at {origin}: field '{field}': {message}")]
    Validation {
        template: String,
        field: String,
        message: String,
        origin: Origin,
    },

    /// A template call could not be resolved, or expansion ran too deep.
    #[error("{message} at {origin}")]
    Expansion { message: String, origin: Origin },

    /// A second declaration of the same key under the `error` policy.
    #[error("redefinition of {key} at {origin} (original at {original})")]
    Redefine {
        key: Key,
        origin: Origin,
        original: Origin,
    },

    /// A second declaration of the same template under the `error` policy.
    #[error("redefinition of template '{name}' at {origin} (original at {original})")]
    RedefineTemplate {
        name: String,
        origin: Origin,
        original: Origin,
    },
}
