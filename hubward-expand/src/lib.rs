//! # hubward-expand
//!
//! Template layer for hubward: template declarations with defaults and input
//! schemas, a Tera rendering engine, and the [`Namespace`] that macro-expands
//! raw documents into core objects.

pub mod engine;
pub mod error;
pub mod namespace;
pub mod template;

pub use engine::TemplateEngine;
pub use error::ExpandError;
pub use namespace::{Entry, Namespace, Redefine, DEFAULT_MAX_DEPTH};
pub use template::{Template, TemplateSchema};
