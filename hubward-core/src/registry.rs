//! Kind registry: maps kind tags to object constructors.
//!
//! The registry is built once at startup and sealed before expansion begins.
//! Re-registering a kind is an idempotent replacement while unsealed and an
//! error afterwards.

use std::collections::BTreeMap;

use crate::error::CoreError;
use crate::loader::RawDoc;
use crate::models::{
    ArchiveType, BuildType, Channel, ContentGenerator, ExternalRepo, Group, Host, Object,
    Permission, Tag, Target, User,
};

/// Builds an [`Object`] from a raw document of the registered kind.
pub type Constructor = fn(&RawDoc) -> Result<Object, CoreError>;

/// The set of known kinds.
#[derive(Debug)]
pub struct KindRegistry {
    constructors: BTreeMap<String, Constructor>,
    sealed: bool,
}

impl KindRegistry {
    /// An empty registry. Most callers want [`KindRegistry::core`].
    pub fn new() -> Self {
        KindRegistry {
            constructors: BTreeMap::new(),
            sealed: false,
        }
    }

    /// The registry of all built-in kinds.
    pub fn core() -> Self {
        let mut registry = Self::new();
        let entries: [(&str, Constructor); 11] = [
            ("tag", |doc| Tag::from_doc(doc).map(Object::Tag)),
            ("target", |doc| Target::from_doc(doc).map(Object::Target)),
            ("external-repo", |doc| {
                ExternalRepo::from_doc(doc).map(Object::ExternalRepo)
            }),
            ("user", |doc| User::from_doc(doc).map(Object::User)),
            ("group", |doc| Group::from_doc(doc).map(Object::Group)),
            ("host", |doc| Host::from_doc(doc).map(Object::Host)),
            ("channel", |doc| Channel::from_doc(doc).map(Object::Channel)),
            ("permission", |doc| {
                Permission::from_doc(doc).map(Object::Permission)
            }),
            ("build-type", |doc| {
                BuildType::from_doc(doc).map(Object::BuildType)
            }),
            ("content-generator", |doc| {
                ContentGenerator::from_doc(doc).map(Object::ContentGenerator)
            }),
            ("archive-type", |doc| {
                ArchiveType::from_doc(doc).map(Object::ArchiveType)
            }),
        ];
        for (kind, constructor) in entries {
            registry.constructors.insert(kind.to_owned(), constructor);
        }
        registry
    }

    /// Register (or replace) a kind. Fails once the registry is sealed.
    pub fn register(&mut self, kind: &str, constructor: Constructor) -> Result<(), CoreError> {
        if self.sealed {
            return Err(CoreError::RegistrySealed {
                kind: kind.to_owned(),
            });
        }
        self.constructors.insert(kind.to_owned(), constructor);
        Ok(())
    }

    /// Seal the registry; expansion calls this before consuming documents.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    /// All registered kind tags, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    /// Build an object from `doc`, or `None` when the kind is unknown
    /// (the namespace treats those documents as template calls).
    pub fn build(&self, doc: &RawDoc) -> Result<Option<Object>, CoreError> {
        match self.constructors.get(&doc.kind) {
            Some(constructor) => constructor(doc).map(Some),
            None => Ok(None),
        }
    }
}

impl Default for KindRegistry {
    fn default() -> Self {
        Self::core()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Origin;
    use crate::loader::parse_documents;

    #[test]
    fn core_registry_knows_all_kinds() {
        let registry = KindRegistry::core();
        for kind in [
            "tag",
            "target",
            "external-repo",
            "user",
            "group",
            "host",
            "channel",
            "permission",
            "build-type",
            "content-generator",
            "archive-type",
        ] {
            assert!(registry.contains(kind), "missing kind {kind}");
        }
        assert!(!registry.contains("multi"), "multi is a loader construct");
    }

    #[test]
    fn build_dispatches_by_kind() {
        let registry = KindRegistry::core();
        let docs = parse_documents("type: permission\nname: admin\n", &Origin::new("p.yaml", 0))
            .expect("parse");
        let object = registry.build(&docs[0]).expect("build").expect("known kind");
        assert_eq!(object.key().to_string(), "permission:admin");
    }

    #[test]
    fn unknown_kind_builds_nothing() {
        let registry = KindRegistry::core();
        let docs = parse_documents(
            "type: my-template\nname: whatever\n",
            &Origin::new("t.yaml", 0),
        )
        .expect("parse");
        assert!(registry.build(&docs[0]).expect("build").is_none());
    }

    #[test]
    fn sealed_registry_rejects_registration() {
        let mut registry = KindRegistry::core();
        registry.register("tag", |doc| Tag::from_doc(doc).map(Object::Tag)).expect("replace ok");
        registry.seal();
        let err = registry
            .register("custom", |doc| Tag::from_doc(doc).map(Object::Tag))
            .unwrap_err();
        assert!(matches!(err, CoreError::RegistrySealed { .. }));
    }
}
