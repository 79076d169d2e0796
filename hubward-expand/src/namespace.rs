//! The template namespace: raw documents in, expanded objects out.
//!
//! Ingested documents queue in insertion order. `expand` drains the queue,
//! installing core-kind objects directly and macro-expanding template calls;
//! expansion output is appended back onto the queue, so templates may emit
//! further template calls up to the configured depth bound.

use std::collections::{BTreeMap, VecDeque};
use std::str::FromStr;

use hubward_core::{Key, KindRegistry, Object, RawDoc, TraceEntry};

use crate::engine::TemplateEngine;
use crate::error::ExpandError;
use crate::template::Template;

/// Default bound on template expansion depth (trace length).
pub const DEFAULT_MAX_DEPTH: usize = 20;

/// What to do when the same key (or template name) is declared twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Redefine {
    /// Fail the run.
    #[default]
    Error,
    /// Keep the newest declaration.
    Replace,
    /// Keep the newest declaration and record a diagnostic.
    Warn,
    /// Keep the original declaration.
    Skip,
}

impl FromStr for Redefine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(Redefine::Error),
            "replace" => Ok(Redefine::Replace),
            "warn" => Ok(Redefine::Warn),
            "skip" => Ok(Redefine::Skip),
            other => Err(format!(
                "unknown redefine policy '{other}'; expected: error, replace, warn, skip"
            )),
        }
    }
}

/// An expanded object together with the document it came from.
#[derive(Debug, Clone)]
pub struct Entry {
    pub object: Object,
    pub doc: RawDoc,
}

/// Holds templates and raw/expanded objects, and drives expansion.
#[derive(Debug)]
pub struct Namespace {
    registry: KindRegistry,
    redefine: Redefine,
    max_depth: usize,
    engine: TemplateEngine,
    templates: BTreeMap<String, Template>,
    pending: VecDeque<RawDoc>,
    entries: BTreeMap<Key, Entry>,
    diagnostics: Vec<String>,
}

impl Namespace {
    pub fn new(redefine: Redefine) -> Self {
        Namespace {
            registry: KindRegistry::core(),
            redefine,
            max_depth: DEFAULT_MAX_DEPTH,
            engine: TemplateEngine::new(),
            templates: BTreeMap::new(),
            pending: VecDeque::new(),
            entries: BTreeMap::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Replace the kind registry. Only meaningful before expansion begins.
    pub fn with_registry(mut self, registry: KindRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Queue one raw document. Template declarations register immediately;
    /// everything else waits for [`Namespace::expand`].
    pub fn ingest(&mut self, doc: RawDoc) -> Result<(), ExpandError> {
        if doc.kind == "template" {
            let template = Template::from_doc(&doc)?;
            self.add_template(template)
        } else {
            self.pending.push_back(doc);
            Ok(())
        }
    }

    /// Queue a whole document sequence.
    pub fn ingest_all(
        &mut self,
        docs: impl IntoIterator<Item = RawDoc>,
    ) -> Result<(), ExpandError> {
        for doc in docs {
            self.ingest(doc)?;
        }
        Ok(())
    }

    fn add_template(&mut self, template: Template) -> Result<(), ExpandError> {
        if let Some(original) = self.templates.get(&template.name) {
            match self.redefine {
                Redefine::Error => {
                    return Err(ExpandError::RedefineTemplate {
                        name: template.name.clone(),
                        origin: template.origin.clone(),
                        original: original.origin.clone(),
                    })
                }
                Redefine::Skip => {
                    tracing::debug!("skipping redefinition of template '{}'", template.name);
                    return Ok(());
                }
                Redefine::Warn => {
                    let note = format!(
                        "template '{}' redefined at {} (original at {})",
                        template.name, template.origin, original.origin
                    );
                    tracing::warn!("{note}");
                    self.diagnostics.push(note);
                }
                Redefine::Replace => {}
            }
        }
        self.engine.register(&template)?;
        self.templates.insert(template.name.clone(), template);
        Ok(())
    }

    /// Drain the pending queue, installing core objects and expanding
    /// template calls until nothing is left.
    pub fn expand(&mut self) -> Result<(), ExpandError> {
        self.registry.seal();
        while let Some(doc) = self.pending.pop_front() {
            if doc.kind == "template" {
                // a template emitted by a template joins the registry
                let template = Template::from_doc(&doc)?;
                self.add_template(template)?;
                continue;
            }
            match self.registry.build(&doc)? {
                Some(object) => self.install(object, doc)?,
                None => self.expand_call(doc)?,
            }
        }
        Ok(())
    }

    fn install(&mut self, object: Object, doc: RawDoc) -> Result<(), ExpandError> {
        let key = object.key();
        if let Some(original) = self.entries.get(&key) {
            match self.redefine {
                Redefine::Error => {
                    return Err(ExpandError::Redefine {
                        key,
                        origin: doc.origin.clone(),
                        original: original.doc.origin.clone(),
                    })
                }
                Redefine::Skip => {
                    tracing::debug!("skipping redefinition of {key}");
                    return Ok(());
                }
                Redefine::Warn => {
                    let note = format!(
                        "{key} redefined at {} (original at {})",
                        doc.origin, original.doc.origin
                    );
                    tracing::warn!("{note}");
                    self.diagnostics.push(note);
                }
                Redefine::Replace => {}
            }
        }
        self.entries.insert(key, Entry { object, doc });
        Ok(())
    }

    fn expand_call(&mut self, call: RawDoc) -> Result<(), ExpandError> {
        let Some(template) = self.templates.get(&call.kind) else {
            let known = self.template_names().join(", ");
            return Err(ExpandError::Expansion {
                message: format!(
                    "could not resolve template '{}'; known templates: [{known}]",
                    call.kind
                ),
                origin: call.origin.clone(),
            });
        };

        let merged = template.merge_call_data(&call.data);
        if let Some(schema) = &template.schema {
            schema.validate(&merged, &template.name, &call.origin)?;
        }

        let child_origin = call.origin.traced(TraceEntry {
            template: template.name.clone(),
            file: template.origin.file.clone(),
            line: template.origin.line,
        });
        if child_origin.depth() > self.max_depth {
            return Err(ExpandError::Expansion {
                message: format!(
                    "maximum template expansion depth {} exceeded by '{}'",
                    self.max_depth, template.name
                ),
                origin: call.origin.clone(),
            });
        }

        let rendered = self.engine.render(template, &merged, &call.origin)?;
        let docs = hubward_core::loader::parse_documents(&rendered, &child_origin).map_err(
            |source| ExpandError::TemplateOutput {
                template: template.name.clone(),
                origin: call.origin.clone(),
                source,
            },
        )?;

        tracing::debug!(
            "template '{}' expanded into {} document(s)",
            template.name,
            docs.len()
        );
        for doc in docs {
            self.pending.push_back(doc);
        }
        Ok(())
    }

    // -- accessors ----------------------------------------------------------

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Key) -> Option<&Object> {
        self.entries.get(key).map(|entry| &entry.object)
    }

    pub fn objects(&self) -> impl Iterator<Item = &Object> {
        self.entries.values().map(|entry| &entry.object)
    }

    /// Expanded documents in key order, for `expand` output.
    pub fn documents(&self) -> impl Iterator<Item = &RawDoc> {
        self.entries.values().map(|entry| &entry.doc)
    }

    /// Consume the namespace into the key-to-object map the solver takes.
    pub fn into_objects(self) -> BTreeMap<Key, Object> {
        self.entries
            .into_iter()
            .map(|(key, entry)| (key, entry.object))
            .collect()
    }

    pub fn template_names(&self) -> Vec<String> {
        self.templates.keys().cloned().collect()
    }

    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubward_core::loader::parse_documents;
    use hubward_core::Origin;

    fn namespace_with(yaml: &str, redefine: Redefine) -> Result<Namespace, ExpandError> {
        let docs = parse_documents(yaml, &Origin::new("data.yaml", 0)).expect("parse");
        let mut ns = Namespace::new(redefine);
        ns.ingest_all(docs)?;
        ns.expand()?;
        Ok(ns)
    }

    #[test]
    fn core_objects_install_directly() {
        let ns = namespace_with("type: tag\nname: f42\n---\ntype: permission\nname: admin\n", Redefine::Error)
            .expect("expand");
        assert_eq!(ns.len(), 2);
        assert!(ns.get(&Key::new("tag", "f42")).is_some());
    }

    #[test]
    fn redefine_error_policy() {
        let err = namespace_with(
            "type: tag\nname: f42\n---\ntype: tag\nname: f42\n",
            Redefine::Error,
        )
        .unwrap_err();
        assert!(matches!(err, ExpandError::Redefine { .. }));
    }

    #[test]
    fn redefine_skip_keeps_first() {
        let ns = namespace_with(
            "type: tag\nname: f42\narches: [x86_64]\n---\ntype: tag\nname: f42\narches: [s390x]\n",
            Redefine::Skip,
        )
        .expect("expand");
        assert_eq!(ns.len(), 1);
        let Object::Tag(tag) = ns.get(&Key::new("tag", "f42")).unwrap() else {
            panic!("expected a tag");
        };
        assert_eq!(tag.arches, vec!["x86_64"]);
        assert!(ns.diagnostics().is_empty());
    }

    #[test]
    fn redefine_warn_keeps_latest_with_diagnostic() {
        let ns = namespace_with(
            "type: tag\nname: f42\narches: [x86_64]\n---\ntype: tag\nname: f42\narches: [s390x]\n",
            Redefine::Warn,
        )
        .expect("expand");
        let Object::Tag(tag) = ns.get(&Key::new("tag", "f42")).unwrap() else {
            panic!("expected a tag");
        };
        assert_eq!(tag.arches, vec!["s390x"]);
        assert_eq!(ns.diagnostics().len(), 1);
    }

    #[test]
    fn custom_registry_narrows_known_kinds() {
        let mut registry = KindRegistry::new();
        registry
            .register("permission", |doc| {
                hubward_core::models::Permission::from_doc(doc)
                    .map(hubward_core::Object::Permission)
            })
            .expect("unsealed");

        let docs = parse_documents("type: tag\nname: t\n", &Origin::new("d.yaml", 0))
            .expect("parse");
        let mut ns = Namespace::new(Redefine::Error).with_registry(registry);
        ns.ingest_all(docs).expect("ingest");
        // with tags unregistered, the document is a template call for an
        // unknown template
        let err = ns.expand().unwrap_err();
        assert!(err.to_string().contains("could not resolve template 'tag'"));
    }

    #[test]
    fn unknown_template_lists_known_names() {
        let err = namespace_with(
            "type: template\nname: known-template\ntemplate: |\n  type: tag\n  name: x\n---\ntype: missing-template\nname: y\n",
            Redefine::Error,
        )
        .unwrap_err();
        let shown = err.to_string();
        assert!(shown.contains("could not resolve template 'missing-template'"));
        assert!(shown.contains("known-template"));
    }
}
