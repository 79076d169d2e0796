//! Object models for every supported kind.
//!
//! Each kind module defines the desired-state struct deserialised from
//! configuration documents, the wire-shape structs parsed from remote read
//! results, and the diff logic that turns (desired, observed) into a list of
//! typed [`Change`]s. The [`Object`] enum is the sum over kinds that the
//! namespace, solver, and processor operate on.

use serde::de::DeserializeOwned;
use serde_json::Value;
use serde_yaml::Mapping;

use crate::change::{CallDescriptor, Change, RemoteFault};
use crate::error::CoreError;
use crate::key::{Key, Origin};
use crate::loader::RawDoc;

pub mod archive_type;
pub mod build_type;
pub mod channel;
pub mod content_generator;
pub mod deferred;
pub mod external_repo;
pub mod group;
pub mod host;
pub mod permission;
pub mod tag;
pub mod target;
pub mod user;

pub use archive_type::ArchiveType;
pub use build_type::BuildType;
pub use channel::Channel;
pub use content_generator::ContentGenerator;
pub use deferred::DeferredUpdate;
pub use external_repo::ExternalRepo;
pub use group::Group;
pub use host::Host;
pub use permission::Permission;
pub use tag::Tag;
pub use target::Target;
pub use user::User;

/// A dependency slot: which field of an object a dependency edge comes from.
///
/// The solver consults `can_defer` to decide which edges may be dropped when
/// breaking a cycle; the dropped slots travel on the deferred-update shadow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Slot {
    Permission,
    Inheritance,
    ExternalRepos,
    PackageOwners,
    BuildTag,
    DestTag,
    Groups,
    Members,
    Permissions,
    Channels,
    Hosts,
    Users,
    /// A deferred shadow's edge back to the object it updates.
    Primary,
}

/// A single dependency edge: the key it points at and the slot it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub key: Key,
    pub slot: Slot,
}

impl Dependency {
    pub fn new(key: Key, slot: Slot) -> Self {
        Dependency { key, slot }
    }
}

/// A read probe that failed: the index of the probe and the remote fault.
#[derive(Debug, Clone)]
pub struct ReadFailure {
    pub index: usize,
    pub fault: RemoteFault,
}

/// Fetch a settled read result, converting a per-call fault into [`ReadFailure`].
pub(crate) fn read(
    observed: &[Result<Value, RemoteFault>],
    index: usize,
) -> Result<&Value, ReadFailure> {
    match observed.get(index) {
        Some(Ok(value)) => Ok(value),
        Some(Err(fault)) => Err(ReadFailure {
            index,
            fault: fault.clone(),
        }),
        None => Err(ReadFailure {
            index,
            fault: RemoteFault::new("read result missing from batch"),
        }),
    }
}

/// Parse a remote response value; `null` means the object does not exist.
pub(crate) fn parse_remote<T: DeserializeOwned>(
    index: usize,
    value: &Value,
) -> Result<Option<T>, ReadFailure> {
    if value.is_null() {
        return Ok(None);
    }
    serde_json::from_value(value.clone())
        .map(Some)
        .map_err(|err| ReadFailure {
            index,
            fault: RemoteFault::new(format!("malformed remote response: {err}")),
        })
}

/// Deserialize a document body into a model struct, mapping serde failures
/// into a validation error carrying the document origin.
pub(crate) fn from_mapping<T: DeserializeOwned>(doc: &RawDoc) -> Result<T, CoreError> {
    let mut data = doc.data.clone();
    data.remove(serde_yaml::Value::from("type"));
    serde_yaml::from_value(serde_yaml::Value::Mapping(data)).map_err(|err| {
        CoreError::validation(
            &doc.kind,
            doc.name.as_deref().unwrap_or("<unnamed>"),
            &doc.origin,
            err.to_string(),
        )
    })
}

/// Is `slot` in play for a diff pass?
///
/// `only = Some(slots)` restricts the diff to those slots (the deferred
/// shadow's view); otherwise any slot listed in `dropped` is skipped (the
/// split primary's view).
pub(crate) fn slot_active(slot: Slot, dropped: &[Slot], only: Option<&[Slot]>) -> bool {
    match only {
        Some(slots) => slots.contains(&slot),
        None => !dropped.contains(&slot),
    }
}

/// A declared (or synthesised) object of any kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    Tag(Tag),
    Target(Target),
    ExternalRepo(ExternalRepo),
    User(User),
    Group(Group),
    Host(Host),
    Channel(Channel),
    Permission(Permission),
    BuildType(BuildType),
    ContentGenerator(ContentGenerator),
    ArchiveType(ArchiveType),
    Deferred(DeferredUpdate),
}

impl Object {
    pub fn kind(&self) -> String {
        match self {
            Object::Tag(_) => "tag".into(),
            Object::Target(_) => "target".into(),
            Object::ExternalRepo(_) => "external-repo".into(),
            Object::User(_) => "user".into(),
            Object::Group(_) => "group".into(),
            Object::Host(_) => "host".into(),
            Object::Channel(_) => "channel".into(),
            Object::Permission(_) => "permission".into(),
            Object::BuildType(_) => "build-type".into(),
            Object::ContentGenerator(_) => "content-generator".into(),
            Object::ArchiveType(_) => "archive-type".into(),
            Object::Deferred(d) => d.key().kind,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Object::Tag(o) => &o.name,
            Object::Target(o) => &o.name,
            Object::ExternalRepo(o) => &o.name,
            Object::User(o) => &o.name,
            Object::Group(o) => &o.name,
            Object::Host(o) => &o.name,
            Object::Channel(o) => &o.name,
            Object::Permission(o) => &o.name,
            Object::BuildType(o) => &o.name,
            Object::ContentGenerator(o) => &o.name,
            Object::ArchiveType(o) => &o.name,
            Object::Deferred(d) => d.name(),
        }
    }

    pub fn key(&self) -> Key {
        match self {
            Object::Deferred(d) => d.key(),
            other => Key::new(other.kind(), other.name()),
        }
    }

    pub fn origin(&self) -> &Origin {
        match self {
            Object::Tag(o) => &o.origin,
            Object::Target(o) => &o.origin,
            Object::ExternalRepo(o) => &o.origin,
            Object::User(o) => &o.origin,
            Object::Group(o) => &o.origin,
            Object::Host(o) => &o.origin,
            Object::Channel(o) => &o.origin,
            Object::Permission(o) => &o.origin,
            Object::BuildType(o) => &o.origin,
            Object::ContentGenerator(o) => &o.origin,
            Object::ArchiveType(o) => &o.origin,
            Object::Deferred(d) => d.origin(),
        }
    }

    /// Dependency edges this object contributes to the solver graph.
    ///
    /// A split primary no longer reports the edges that moved onto its
    /// deferred shadow.
    pub fn dependency_keys(&self) -> Vec<Dependency> {
        let raw = match self {
            Object::Tag(o) => o.dependency_keys(),
            Object::Target(o) => o.dependency_keys(),
            Object::User(o) => o.dependency_keys(),
            Object::Group(o) => o.dependency_keys(),
            Object::Host(o) => o.dependency_keys(),
            Object::Channel(o) => o.dependency_keys(),
            Object::ContentGenerator(o) => o.dependency_keys(),
            Object::Deferred(d) => return d.dependency_keys(),
            Object::ExternalRepo(_)
            | Object::Permission(_)
            | Object::BuildType(_)
            | Object::ArchiveType(_) => Vec::new(),
        };
        let dropped = self.dropped_slots();
        if dropped.is_empty() {
            return raw;
        }
        raw.into_iter()
            .filter(|dep| !dropped.contains(&dep.slot))
            .collect()
    }

    fn dropped_slots(&self) -> &[Slot] {
        match self {
            Object::Tag(o) => &o.dropped,
            Object::User(o) => &o.dropped,
            Object::Group(o) => &o.dropped,
            Object::Host(o) => &o.dropped,
            Object::Channel(o) => &o.dropped,
            Object::ContentGenerator(o) => &o.dropped,
            _ => &[],
        }
    }

    /// The deferrable slots that currently carry dependency edges.
    pub fn deferrable_slots(&self) -> Vec<Slot> {
        let mut slots: Vec<Slot> = Vec::new();
        for dep in self.dependency_keys() {
            if self.can_defer(dep.slot) && !slots.contains(&dep.slot) {
                slots.push(dep.slot);
            }
        }
        slots
    }

    /// Whether the given dependency slot may be deferred to a later tier.
    pub fn can_defer(&self, slot: Slot) -> bool {
        match self {
            Object::Tag(_) => matches!(
                slot,
                Slot::Permission | Slot::Inheritance | Slot::ExternalRepos | Slot::PackageOwners
            ),
            Object::User(_) => matches!(slot, Slot::Groups | Slot::Permissions),
            Object::Group(_) => matches!(slot, Slot::Members | Slot::Permissions),
            Object::Host(_) => matches!(slot, Slot::Channels),
            Object::Channel(_) => matches!(slot, Slot::Hosts),
            Object::ContentGenerator(_) => matches!(slot, Slot::Users),
            // target creation requires both tags up front; the rest have no deps
            _ => false,
        }
    }

    /// Whether splitting this object would actually remove edges.
    pub fn can_split(&self) -> bool {
        !matches!(self, Object::Deferred(_)) && !self.deferrable_slots().is_empty()
    }

    /// Split into `(primary, deferred-update shadow)`.
    ///
    /// The primary is this object with every currently-deferrable edge
    /// dropped from its diff scope; the shadow carries exactly those slots
    /// and depends on the primary plus the dropped edge targets.
    pub fn split(&self) -> Option<(Object, Object)> {
        let slots = self.deferrable_slots();
        if slots.is_empty() || matches!(self, Object::Deferred(_)) {
            return None;
        }
        let mut primary = self.clone();
        match &mut primary {
            Object::Tag(o) => o.dropped = slots.clone(),
            Object::User(o) => o.dropped = slots.clone(),
            Object::Group(o) => o.dropped = slots.clone(),
            Object::Host(o) => o.dropped = slots.clone(),
            Object::Channel(o) => o.dropped = slots.clone(),
            Object::ContentGenerator(o) => o.dropped = slots.clone(),
            _ => return None,
        }
        let shadow = Object::Deferred(DeferredUpdate::new(self.clone(), slots));
        Some((primary, shadow))
    }

    /// Read probes for this object, in the fixed per-kind order that
    /// [`Object::diff`] expects its results in.
    pub fn read_calls(&self) -> Vec<CallDescriptor> {
        match self {
            Object::Deferred(d) => d.read_calls(),
            other => read_calls_for(&other.key()).unwrap_or_default(),
        }
    }

    /// Compute the changes needed to bring the remote in line with this
    /// object, given the settled results of [`Object::read_calls`].
    pub fn diff(&self, observed: &[Result<Value, RemoteFault>]) -> Result<Vec<Change>, ReadFailure> {
        match self {
            Object::Tag(o) => o.diff(observed, None),
            Object::Target(o) => o.diff(observed),
            Object::ExternalRepo(o) => o.diff(observed),
            Object::User(o) => o.diff(observed, None),
            Object::Group(o) => o.diff(observed, None),
            Object::Host(o) => o.diff(observed, None),
            Object::Channel(o) => o.diff(observed, None),
            Object::Permission(o) => o.diff(observed),
            Object::BuildType(o) => o.diff(observed),
            Object::ContentGenerator(o) => o.diff(observed, None),
            Object::ArchiveType(o) => o.diff(observed),
            Object::Deferred(d) => d.diff(observed),
        }
    }
}

/// Read probes for a bare key, used by `dump` and by declared objects alike.
///
/// Returns `None` for kinds that have no remote read surface (deferred
/// shadows resolve through their primary instead).
pub fn read_calls_for(key: &Key) -> Option<Vec<CallDescriptor>> {
    let name = key.name.as_str();
    let calls = match key.kind.as_str() {
        "tag" => tag::read_calls_for(name),
        "target" => target::read_calls_for(name),
        "external-repo" => external_repo::read_calls_for(name),
        "user" => user::read_calls_for(name),
        "group" => group::read_calls_for(name),
        "host" => host::read_calls_for(name),
        "channel" => channel::read_calls_for(name),
        "permission" => permission::read_calls_for(name),
        "build-type" => build_type::read_calls_for(name),
        "content-generator" => content_generator::read_calls_for(name),
        "archive-type" => archive_type::read_calls_for(name),
        _ => return None,
    };
    Some(calls)
}

/// Render observed remote state for a key as a configuration document.
///
/// Returns `Ok(None)` when the object does not exist remotely. Fields whose
/// observed value equals the kind's declared default are elided unless
/// `include_defaults` is set.
pub fn observed_doc(
    key: &Key,
    observed: &[Result<Value, RemoteFault>],
    include_defaults: bool,
) -> Result<Option<Mapping>, ReadFailure> {
    let name = key.name.as_str();
    match key.kind.as_str() {
        "tag" => tag::observed_doc(name, observed, include_defaults),
        "target" => target::observed_doc(name, observed, include_defaults),
        "external-repo" => external_repo::observed_doc(name, observed, include_defaults),
        "user" => user::observed_doc(name, observed, include_defaults),
        "group" => group::observed_doc(name, observed, include_defaults),
        "host" => host::observed_doc(name, observed, include_defaults),
        "channel" => channel::observed_doc(name, observed, include_defaults),
        "permission" => permission::observed_doc(name, observed, include_defaults),
        "build-type" => build_type::observed_doc(name, observed, include_defaults),
        "content-generator" => content_generator::observed_doc(name, observed, include_defaults),
        "archive-type" => archive_type::observed_doc(name, observed, include_defaults),
        _ => Ok(None),
    }
}

/// Shared helper for building observed documents: insert `key: value` only
/// when it differs from the default (or defaults are requested).
pub(crate) fn doc_field<V: Into<serde_yaml::Value>>(
    doc: &mut Mapping,
    include_defaults: bool,
    key: &str,
    value: V,
    is_default: bool,
) {
    if include_defaults || !is_default {
        doc.insert(serde_yaml::Value::from(key), value.into());
    }
}
