//! Identity and position metadata for declared objects.
//!
//! Every declared object has a stable identity [`Key`] of `(kind, name)`, and
//! carries an [`Origin`] recording where it came from: the file and line of
//! its source document, plus the chain of template expansions that produced
//! it (outermost first).

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Prefix used for the kind of a deferred-update shadow (`deferred-tag`, ...).
pub const DEFERRED_PREFIX: &str = "deferred-";

/// Stable identity of a declared object: `(kind, name)`.
///
/// `kind` is a short lowercase tag drawn from the registry (`tag`, `target`,
/// `external-repo`, ...); `name` is an opaque string. Ordering is by
/// `(kind, name)`, which is the deterministic order used within solver tiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key {
    pub kind: String,
    pub name: String,
}

impl Key {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Key {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// The key of the deferred-update shadow for this object.
    pub fn deferred(&self) -> Key {
        Key {
            kind: format!("{DEFERRED_PREFIX}{}", self.kind),
            name: self.name.clone(),
        }
    }

    /// True if this key names a deferred-update shadow.
    pub fn is_deferred(&self) -> bool {
        self.kind.starts_with(DEFERRED_PREFIX)
    }

    /// For a deferred shadow key, the key of the primary object.
    pub fn primary(&self) -> Key {
        match self.kind.strip_prefix(DEFERRED_PREFIX) {
            Some(kind) => Key::new(kind, self.name.clone()),
            None => self.clone(),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

/// One step in a template expansion chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Name of the template that produced the document.
    pub template: String,
    /// File the template was defined in.
    pub file: PathBuf,
    /// Line of the template definition.
    pub line: usize,
}

/// Position metadata attached to every document and object.
///
/// `trace` records template expansions in order, outermost first. Loaders
/// attach the file and line; the expander extends the trace. The trace length
/// is the expansion depth, which the namespace bounds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub file: PathBuf,
    pub line: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<TraceEntry>,
}

impl Origin {
    pub fn new(file: impl Into<PathBuf>, line: usize) -> Self {
        Origin {
            file: file.into(),
            line,
            trace: Vec::new(),
        }
    }

    /// A copy of this origin with one more trace entry appended.
    pub fn traced(&self, entry: TraceEntry) -> Origin {
        let mut trace = self.trace.clone();
        trace.push(entry);
        Origin {
            file: self.file.clone(),
            line: self.line,
            trace,
        }
    }

    /// Expansion depth: the number of template frames above this origin.
    pub fn depth(&self) -> usize {
        self.trace.len()
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file.display(), self.line)?;
        for entry in &self.trace {
            write!(
                f,
                "\n  via template '{}' ({}:{})",
                entry.template,
                entry.file.display(),
                entry.line
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_display_and_order() {
        let a = Key::new("tag", "alpha");
        let b = Key::new("tag", "beta");
        let t = Key::new("target", "alpha");
        assert_eq!(a.to_string(), "tag:alpha");
        assert!(a < b);
        assert!(b < t, "kinds sort before names");
    }

    #[test]
    fn deferred_round_trip() {
        let k = Key::new("tag", "f42-build");
        let d = k.deferred();
        assert_eq!(d.kind, "deferred-tag");
        assert!(d.is_deferred());
        assert_eq!(d.primary(), k);
        assert!(!k.is_deferred());
    }

    #[test]
    fn traced_extends_without_mutating() {
        let origin = Origin::new("data/tags.yaml", 12);
        let traced = origin.traced(TraceEntry {
            template: "build-pair".into(),
            file: "templates/pair.yaml".into(),
            line: 3,
        });
        assert_eq!(origin.depth(), 0);
        assert_eq!(traced.depth(), 1);
        assert_eq!(traced.trace[0].template, "build-pair");
    }

    #[test]
    fn origin_display_includes_trace() {
        let origin = Origin::new("a.yaml", 1).traced(TraceEntry {
            template: "t".into(),
            file: "t.yaml".into(),
            line: 2,
        });
        let shown = origin.to_string();
        assert!(shown.contains("a.yaml:1"));
        assert!(shown.contains("via template 't'"));
    }
}
