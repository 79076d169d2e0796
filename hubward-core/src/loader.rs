//! Configuration document loading.
//!
//! Documents are YAML streams. Every document must carry a `type` field
//! naming either a core kind or a template. Top-level fields beginning with
//! `_` or `x-` are reserved for shared anchors and are dropped. A `multi`
//! document expands into one document per entry whose value is a mapping,
//! with the entry key supplying `name` when the mapping has none.
//!
//! The loader assigns every document an [`Origin`] with the file and the
//! line the document starts on.

use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};

use crate::error::CoreError;
use crate::key::Origin;

/// A raw configuration document: a `type` tag plus its mapping body.
///
/// The body retains the `type` and `name` entries; `kind` and `name` here are
/// conveniences extracted at load time.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDoc {
    pub kind: String,
    pub name: Option<String>,
    pub data: Mapping,
    pub origin: Origin,
}

impl RawDoc {
    /// The `name` field, or an error naming the missing field.
    pub fn require_name(&self) -> Result<&str, CoreError> {
        self.name.as_deref().ok_or_else(|| CoreError::DocumentShape {
            origin: self.origin.clone(),
            message: format!("{} document has no 'name' field", self.kind),
        })
    }
}

fn is_reserved(key: &str) -> bool {
    key.starts_with('_') || key.starts_with("x-")
}

fn string_key(value: &Value) -> Option<&str> {
    value.as_str()
}

/// Split a YAML stream into `(start_line, chunk)` pairs on `---` separators.
///
/// serde_yaml reports positions within a single document only, so document
/// start lines are tracked here by scanning the raw text.
fn split_stream(text: &str) -> Vec<(usize, String)> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut start_line = 1usize;
    let mut seen_content = false;

    for (idx, line) in text.lines().enumerate() {
        let lineno = idx + 1;
        let trimmed = line.trim_end();
        if trimmed == "---" || trimmed.starts_with("--- ") {
            if seen_content {
                chunks.push((start_line, std::mem::take(&mut current)));
            }
            current.clear();
            seen_content = false;
            start_line = lineno;
            // inline content after the separator belongs to the new document
            if let Some(rest) = trimmed.strip_prefix("---") {
                if !rest.trim().is_empty() {
                    current.push_str(rest.trim_start());
                    current.push('\n');
                    seen_content = true;
                }
            }
            continue;
        }
        if !seen_content && !trimmed.trim().is_empty() && !trimmed.trim_start().starts_with('#') {
            seen_content = true;
            start_line = lineno;
        }
        current.push_str(line);
        current.push('\n');
    }
    if seen_content {
        chunks.push((start_line, current));
    }
    chunks
}

fn doc_from_mapping(mut mapping: Mapping, origin: Origin) -> Result<Vec<RawDoc>, CoreError> {
    // drop reserved anchor-carrier fields
    let reserved: Vec<Value> = mapping
        .keys()
        .filter(|k| string_key(k).is_some_and(is_reserved))
        .cloned()
        .collect();
    for key in reserved {
        mapping.remove(&key);
    }

    let kind = mapping
        .get(Value::from("type"))
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| CoreError::DocumentShape {
            origin: origin.clone(),
            message: "document has no 'type' field".into(),
        })?;

    if kind == "multi" {
        return expand_multi(mapping, origin);
    }

    let name = mapping
        .get(Value::from("name"))
        .and_then(Value::as_str)
        .map(str::to_owned);

    Ok(vec![RawDoc {
        kind,
        name,
        data: mapping,
        origin,
    }])
}

/// Expand a `multi` document into one document per mapping-valued entry.
fn expand_multi(mapping: Mapping, origin: Origin) -> Result<Vec<RawDoc>, CoreError> {
    let mut docs = Vec::new();
    for (key, value) in &mapping {
        let Some(key) = string_key(key) else {
            continue;
        };
        if key == "type" || is_reserved(key) {
            continue;
        }
        let Value::Mapping(entry) = value else {
            tracing::warn!("skipping non-mapping entry '{key}' in multi document at {origin}");
            continue;
        };
        let mut entry = entry.clone();
        if !entry.contains_key(Value::from("name")) {
            entry.insert(Value::from("name"), Value::from(key));
        }
        docs.extend(doc_from_mapping(entry, origin.clone())?);
    }
    Ok(docs)
}

/// Parse a YAML stream into raw documents, attributing each to `file` with
/// per-document start lines.
///
/// This is also the path that rendered template output takes; in that case
/// `base` carries the caller's trace so parse errors point at the expansion.
pub fn parse_documents(text: &str, base: &Origin) -> Result<Vec<RawDoc>, CoreError> {
    let mut docs = Vec::new();
    for (start_line, chunk) in split_stream(text) {
        // documents loaded from a file get their own start lines; rendered
        // template output keeps the call site's line
        let origin = Origin {
            file: base.file.clone(),
            line: if base.line == 0 { start_line } else { base.line },
            trace: base.trace.clone(),
        };
        let value: Value =
            serde_yaml::from_str(&chunk).map_err(|source| CoreError::DocumentParse {
                origin: origin.clone(),
                source,
            })?;
        match value {
            Value::Null => continue,
            Value::Mapping(mapping) => docs.extend(doc_from_mapping(mapping, origin)?),
            other => {
                return Err(CoreError::DocumentShape {
                    origin,
                    message: format!(
                        "expected a mapping document, got {}",
                        yaml_type_name(&other)
                    ),
                })
            }
        }
    }
    Ok(docs)
}

fn yaml_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

/// Load all documents from a single YAML file.
pub fn load_file(path: &Path) -> Result<Vec<RawDoc>, CoreError> {
    let text = std::fs::read_to_string(path).map_err(|e| CoreError::io(path, e))?;
    parse_documents(&text, &Origin::new(path, 0))
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

fn collect_yaml_files(dir: &Path, recursive: bool, out: &mut Vec<PathBuf>) -> Result<(), CoreError> {
    let entries = std::fs::read_dir(dir).map_err(|e| CoreError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| CoreError::io(dir, e))?;
        let path = entry.path();
        if path.is_dir() {
            if recursive {
                collect_yaml_files(&path, recursive, out)?;
            }
        } else if is_yaml(&path) {
            out.push(path);
        }
    }
    Ok(())
}

/// Load documents from files and directories, in a deterministic order.
///
/// Directories contribute their `.yaml` / `.yml` files sorted by path;
/// explicit file arguments are loaded as given.
pub fn load_paths(paths: &[PathBuf], recursive: bool) -> Result<Vec<RawDoc>, CoreError> {
    let mut docs = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut files = Vec::new();
            collect_yaml_files(path, recursive, &mut files)?;
            files.sort();
            for file in files {
                docs.extend(load_file(&file)?);
            }
        } else {
            docs.extend(load_file(path)?);
        }
    }
    Ok(docs)
}
