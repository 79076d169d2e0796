//! Tag model: inheritance, external repo links, extras, package groups,
//! package list, and the flags that control exact reconciliation.
//!
//! Tags carry the richest configuration surface of any kind and are the main
//! source of dependency cycles (mutually-inheriting tag pairs), so all of
//! their link slots are deferrable.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use serde_yaml::Mapping;

use crate::change::{CallDescriptor, Change, ChangeOp, RemoteFault};
use crate::error::CoreError;
use crate::key::{Key, Origin};
use crate::loader::RawDoc;

use super::{
    doc_field, from_mapping, parse_remote, read, slot_active, Dependency, ReadFailure, Slot,
};

// ---------------------------------------------------------------------------
// Sub-models
// ---------------------------------------------------------------------------

/// One parent link in a tag's inheritance chain.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InheritanceLink {
    pub name: String,
    pub priority: i64,
    #[serde(rename = "max-depth", default)]
    pub max_depth: Option<i64>,
    #[serde(rename = "no-config", default)]
    pub no_config: bool,
    #[serde(rename = "pkg-filter", default, deserialize_with = "de_pkg_filter")]
    pub pkg_filter: String,
    #[serde(default)]
    pub intransitive: bool,
}

impl InheritanceLink {
    pub fn key(&self) -> Key {
        Key::new("tag", self.name.clone())
    }

    fn wire(&self, delete: bool) -> Value {
        json!({
            "name": self.name,
            "priority": self.priority,
            "maxdepth": self.max_depth,
            "noconfig": self.no_config,
            "pkg_filter": self.pkg_filter,
            "intransitive": self.intransitive,
            "delete_link": delete,
        })
    }
}

/// A `pkg-filter` may be given as a list of package names, shorthand for an
/// anchored alternation pattern.
fn de_pkg_filter<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    let value = serde_yaml::Value::deserialize(de)?;
    match value {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Sequence(items) => {
            let names: Vec<String> = items
                .into_iter()
                .map(|item| match item {
                    serde_yaml::Value::String(s) => Ok(s),
                    other => Err(serde::de::Error::custom(format!(
                        "pkg-filter entries must be strings, got {other:?}"
                    ))),
                })
                .collect::<Result<_, _>>()?;
            Ok(format!("^({})$", names.join("|")))
        }
        other => Err(serde::de::Error::custom(format!(
            "pkg-filter must be a string or list, got {other:?}"
        ))),
    }
}

/// Merge behaviour for an external repo attached to a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMode {
    #[default]
    Koji,
    Simple,
    Bare,
}

impl MergeMode {
    fn as_str(&self) -> &'static str {
        match self {
            MergeMode::Koji => "koji",
            MergeMode::Simple => "simple",
            MergeMode::Bare => "bare",
        }
    }
}

/// One external repo link on a tag.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExternalRepoLink {
    pub name: String,
    pub priority: i64,
    #[serde(default)]
    pub arches: Option<Vec<String>>,
    #[serde(rename = "merge-mode", default)]
    pub merge_mode: MergeMode,
}

impl ExternalRepoLink {
    pub fn key(&self) -> Key {
        Key::new("external-repo", self.name.clone())
    }
}

/// A package entry within a tag package group.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TagGroupPackage {
    pub name: String,
    #[serde(default)]
    pub blocked: bool,
}

/// A package group on a tag.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TagGroup {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub blocked: bool,
    #[serde(default, deserialize_with = "de_group_packages")]
    pub packages: Vec<TagGroupPackage>,
    #[serde(rename = "exact-packages", default)]
    pub exact_packages: bool,
}

/// An entry in the tag's package list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageEntry {
    pub name: String,
    #[serde(default)]
    pub blocked: bool,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(rename = "extra-arches", default)]
    pub extra_arches: Vec<String>,
}

// ---------------------------------------------------------------------------
// Simplified input forms
// ---------------------------------------------------------------------------

/// Normalise link lists given as a bare string, a list of strings
/// (auto-numbered by tens), or a list of mappings with explicit priorities.
fn normalize_links(value: serde_yaml::Value) -> Result<Vec<serde_yaml::Value>, String> {
    use serde_yaml::Value as Y;

    let items = match value {
        Y::String(name) => {
            let mut m = Mapping::new();
            m.insert(Y::from("name"), Y::from(name));
            m.insert(Y::from("priority"), Y::from(0i64));
            return Ok(vec![Y::Mapping(m)]);
        }
        Y::Sequence(items) => items,
        other => return Err(format!("expected a string or a list, got {other:?}")),
    };

    let mut next: i64 = 0;
    // the next default recomputes from the highest priority seen anywhere
    // in the list, not just the preceding item
    let mut highest = i64::MIN;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Y::String(name) => {
                let mut m = Mapping::new();
                m.insert(Y::from("name"), Y::from(name));
                m.insert(Y::from("priority"), Y::from(next));
                highest = highest.max(next);
                next += 10;
                out.push(Y::Mapping(m));
            }
            Y::Mapping(mut m) => {
                let priority = m
                    .get(Y::from("priority"))
                    .and_then(serde_yaml::Value::as_i64)
                    .unwrap_or(next);
                m.insert(Y::from("priority"), Y::from(priority));
                highest = highest.max(priority);
                next = highest + (10 - highest.rem_euclid(10));
                out.push(Y::Mapping(m));
            }
            other => return Err(format!("link entries must be strings or mappings, got {other:?}")),
        }
    }
    Ok(out)
}

fn de_links<'de, D: Deserializer<'de>, T: serde::de::DeserializeOwned>(
    de: D,
) -> Result<Vec<T>, D::Error> {
    let value = serde_yaml::Value::deserialize(de)?;
    let normalized = normalize_links(value).map_err(serde::de::Error::custom)?;
    normalized
        .into_iter()
        .map(|v| serde_yaml::from_value(v).map_err(serde::de::Error::custom))
        .collect()
}

fn de_inheritance<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<InheritanceLink>, D::Error> {
    de_links(de)
}

fn de_external_repos<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<ExternalRepoLink>, D::Error> {
    de_links(de)
}

/// Group packages may be bare strings or full mappings.
fn de_group_packages<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<TagGroupPackage>, D::Error> {
    use serde_yaml::Value as Y;
    let value = Y::deserialize(de)?;
    let Y::Sequence(items) = value else {
        return Err(serde::de::Error::custom("group packages must be a list"));
    };
    items
        .into_iter()
        .map(|item| match item {
            Y::String(name) => Ok(TagGroupPackage {
                name,
                blocked: false,
            }),
            mapping @ Y::Mapping(_) => {
                serde_yaml::from_value(mapping).map_err(serde::de::Error::custom)
            }
            other => Err(serde::de::Error::custom(format!(
                "group package entries must be strings or mappings, got {other:?}"
            ))),
        })
        .collect()
}

/// Groups may be a list (of names or mappings) or a map of name to package
/// list or full mapping.
fn de_groups<'de, D: Deserializer<'de>>(de: D) -> Result<BTreeMap<String, TagGroup>, D::Error> {
    use serde_yaml::Value as Y;

    fn insert<E: serde::de::Error>(
        out: &mut BTreeMap<String, TagGroup>,
        group: TagGroup,
    ) -> Result<(), E> {
        if out.contains_key(&group.name) {
            return Err(E::custom(format!("duplicate group '{}'", group.name)));
        }
        out.insert(group.name.clone(), group);
        Ok(())
    }

    let value = Y::deserialize(de)?;
    let mut out = BTreeMap::new();

    match value {
        Y::Sequence(items) => {
            for item in items {
                let group = match item {
                    Y::String(name) => TagGroup {
                        name,
                        description: None,
                        blocked: false,
                        packages: Vec::new(),
                        exact_packages: false,
                    },
                    mapping @ Y::Mapping(_) => {
                        serde_yaml::from_value(mapping).map_err(serde::de::Error::custom)?
                    }
                    other => {
                        return Err(serde::de::Error::custom(format!(
                            "group entries must be strings or mappings, got {other:?}"
                        )))
                    }
                };
                insert(&mut out, group)?;
            }
        }
        Y::Mapping(entries) => {
            for (key, item) in entries {
                let Y::String(name) = key else {
                    return Err(serde::de::Error::custom("group names must be strings"));
                };
                let group = match item {
                    Y::Sequence(packages) => {
                        let mut m = Mapping::new();
                        m.insert(Y::from("name"), Y::from(name.clone()));
                        m.insert(Y::from("packages"), Y::Sequence(packages));
                        serde_yaml::from_value(Y::Mapping(m)).map_err(serde::de::Error::custom)?
                    }
                    Y::Mapping(mut m) => {
                        match m.get(Y::from("name")).and_then(Y::as_str) {
                            Some(existing) if existing != name => {
                                return Err(serde::de::Error::custom(format!(
                                    "group name mismatch: '{existing}' != '{name}'"
                                )))
                            }
                            Some(_) => {}
                            None => {
                                m.insert(Y::from("name"), Y::from(name.clone()));
                            }
                        }
                        serde_yaml::from_value(Y::Mapping(m)).map_err(serde::de::Error::custom)?
                    }
                    other => {
                        return Err(serde::de::Error::custom(format!(
                            "group '{name}' must be a list or mapping, got {other:?}"
                        )))
                    }
                };
                insert(&mut out, group)?;
            }
        }
        other => {
            return Err(serde::de::Error::custom(format!(
                "groups must be a list or mapping, got {other:?}"
            )))
        }
    }
    Ok(out)
}

/// Packages may be a single name, or a list of names and mappings.
/// Duplicate names merge, keeping the last entry.
fn de_packages<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<PackageEntry>, D::Error> {
    use serde_yaml::Value as Y;

    let value = Y::deserialize(de)?;
    let items = match value {
        Y::String(name) => {
            return Ok(vec![PackageEntry {
                name,
                blocked: false,
                owner: None,
                extra_arches: Vec::new(),
            }])
        }
        Y::Sequence(items) => items,
        other => {
            return Err(serde::de::Error::custom(format!(
                "packages must be a string or list, got {other:?}"
            )))
        }
    };

    let mut merged: Vec<PackageEntry> = Vec::new();
    for item in items {
        let entry: PackageEntry = match item {
            Y::String(name) => PackageEntry {
                name,
                blocked: false,
                owner: None,
                extra_arches: Vec::new(),
            },
            mapping @ Y::Mapping(_) => {
                serde_yaml::from_value(mapping).map_err(serde::de::Error::custom)?
            }
            other => {
                return Err(serde::de::Error::custom(format!(
                    "package entries must be strings or mappings, got {other:?}"
                )))
            }
        };
        if let Some(existing) = merged.iter_mut().find(|p| p.name == entry.name) {
            tracing::warn!("duplicate package '{}', keeping the later entry", entry.name);
            *existing = entry;
        } else {
            merged.push(entry);
        }
    }
    Ok(merged)
}

// ---------------------------------------------------------------------------
// Tag
// ---------------------------------------------------------------------------

/// A declared tag.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Tag {
    pub name: String,
    #[serde(default, alias = "lock")]
    pub locked: bool,
    #[serde(default)]
    pub permission: Option<String>,
    #[serde(default)]
    pub arches: Vec<String>,
    #[serde(rename = "maven-support", default)]
    pub maven_support: bool,
    #[serde(rename = "maven-include-all", default)]
    pub maven_include_all: bool,
    #[serde(default)]
    pub extras: BTreeMap<String, Value>,
    #[serde(rename = "blocked-extras", default)]
    pub blocked_extras: Vec<String>,
    #[serde(default, deserialize_with = "de_groups")]
    pub groups: BTreeMap<String, TagGroup>,
    #[serde(default, deserialize_with = "de_inheritance")]
    pub inheritance: Vec<InheritanceLink>,
    #[serde(rename = "external-repos", default, deserialize_with = "de_external_repos")]
    pub external_repos: Vec<ExternalRepoLink>,
    #[serde(default, deserialize_with = "de_packages")]
    pub packages: Vec<PackageEntry>,
    #[serde(rename = "exact-extras", default)]
    pub exact_extras: bool,
    #[serde(rename = "exact-groups", default)]
    pub exact_groups: bool,
    #[serde(rename = "exact-packages", default)]
    pub exact_packages: bool,
    #[serde(skip)]
    pub origin: Origin,
    #[serde(skip)]
    pub(crate) dropped: Vec<Slot>,
}

impl Tag {
    pub fn from_doc(doc: &RawDoc) -> Result<Tag, CoreError> {
        doc.require_name()?;
        let mut tag: Tag = from_mapping(doc)?;
        tag.origin = doc.origin.clone();

        let mut seen = BTreeMap::new();
        for parent in &tag.inheritance {
            if let Some(prev) = seen.insert(parent.priority, &parent.name) {
                return Err(CoreError::validation(
                    "tag",
                    &tag.name,
                    &tag.origin,
                    format!(
                        "duplicate inheritance priority {} for '{}' and '{}'",
                        parent.priority, prev, parent.name
                    ),
                ));
            }
        }

        let mut seen = BTreeMap::new();
        for repo in &tag.external_repos {
            if let Some(prev) = seen.insert(repo.priority, &repo.name) {
                return Err(CoreError::validation(
                    "tag",
                    &tag.name,
                    &tag.origin,
                    format!(
                        "duplicate external repo priority {} for '{}' and '{}'",
                        repo.priority, prev, repo.name
                    ),
                ));
            }
        }

        Ok(tag)
    }

    pub fn dependency_keys(&self) -> Vec<Dependency> {
        let mut deps = Vec::new();
        if let Some(permission) = &self.permission {
            deps.push(Dependency::new(
                Key::new("permission", permission.clone()),
                Slot::Permission,
            ));
        }
        for parent in &self.inheritance {
            deps.push(Dependency::new(parent.key(), Slot::Inheritance));
        }
        for repo in &self.external_repos {
            deps.push(Dependency::new(repo.key(), Slot::ExternalRepos));
        }
        let mut owners: Vec<&str> = Vec::new();
        for package in &self.packages {
            if let Some(owner) = &package.owner {
                if !owners.contains(&owner.as_str()) {
                    owners.push(owner);
                    deps.push(Dependency::new(
                        Key::new("user", owner.clone()),
                        Slot::PackageOwners,
                    ));
                }
            }
        }
        deps
    }

    pub fn read_calls(&self) -> Vec<CallDescriptor> {
        read_calls_for(&self.name)
    }

    fn active(&self, slot: Slot, only: Option<&[Slot]>) -> bool {
        slot_active(slot, &self.dropped, only)
    }

    /// Base configuration (everything outside a deferrable slot) is only
    /// diffed on a full pass, never on a deferred shadow's restricted pass.
    fn base_active(&self, only: Option<&[Slot]>) -> bool {
        only.is_none()
    }

    pub fn diff(
        &self,
        observed: &[Result<Value, RemoteFault>],
        only: Option<&[Slot]>,
    ) -> Result<Vec<Change>, ReadFailure> {
        let remote: Option<RemoteTag> = parse_remote(0, read(observed, 0)?)?;

        let Some(remote) = remote else {
            return Ok(self.creation_changes(only));
        };

        let mut changes = Vec::new();

        if self.base_active(only) {
            if remote.locked != self.locked {
                changes.push(self.set_locked());
            }
            if !same_arch_set(&remote.arches, &self.arches) {
                changes.push(self.set_arches());
            }
            if remote.maven_support != self.maven_support
                || remote.maven_include_all != self.maven_include_all
            {
                changes.push(self.set_maven());
            }
            self.diff_extras(&remote, &mut changes);

            let remote_groups: Vec<RemoteGroup> = parse_remote(2, read(observed, 2)?)?
                .unwrap_or_default();
            self.diff_groups(&remote_groups, &mut changes);
        }

        if self.active(Slot::Permission, only) && remote.perm != self.permission {
            changes.push(self.set_permission());
        }

        if self.base_active(only) || self.active(Slot::PackageOwners, only) {
            let remote_packages: Vec<RemotePackage> = parse_remote(1, read(observed, 1)?)?
                .unwrap_or_default();
            self.diff_packages(&remote_packages, only, &mut changes);
        }

        if self.active(Slot::Inheritance, only) {
            let remote_inheritance: Vec<RemoteInheritance> = parse_remote(3, read(observed, 3)?)?
                .unwrap_or_default();
            self.diff_inheritance(&remote_inheritance, &mut changes);
        }

        if self.active(Slot::ExternalRepos, only) {
            let remote_repos: Vec<RemoteRepoLink> = parse_remote(4, read(observed, 4)?)?
                .unwrap_or_default();
            self.diff_external_repos(&remote_repos, &mut changes);
        }

        Ok(changes)
    }

    /// Changes for a tag that does not exist remotely.
    fn creation_changes(&self, only: Option<&[Slot]>) -> Vec<Change> {
        let mut changes = Vec::new();

        if self.base_active(only) {
            changes.push(Change::new(
                ChangeOp::CreateObject,
                CallDescriptor::new("createTag")
                    .arg(self.name.clone())
                    .kw("locked", self.locked)
                    .kw("arches", json!(self.arches))
                    .kw("maven_support", self.maven_support)
                    .kw("maven_include_all", self.maven_include_all),
                format!("Create tag {}", self.name),
            ));
            if !self.extras.is_empty() {
                changes.push(self.set_extras());
            }
            for key in &self.blocked_extras {
                changes.push(self.block_extra(key));
            }
            for group in self.groups.values() {
                changes.push(self.add_group(group));
                for package in &group.packages {
                    changes.push(self.add_group_package(&group.name, package));
                }
            }
        }

        if self.active(Slot::Permission, only) && self.permission.is_some() {
            changes.push(self.set_permission());
        }

        if self.base_active(only) || self.active(Slot::PackageOwners, only) {
            for package in &self.packages {
                if self.base_active(only) {
                    changes.push(self.add_package(package));
                } else if let Some(owner) = &package.owner {
                    changes.push(self.set_package_owner(&package.name, owner));
                }
            }
        }

        if self.active(Slot::Inheritance, only) {
            for parent in &self.inheritance {
                changes.push(self.add_inheritance(parent));
            }
        }
        if self.active(Slot::ExternalRepos, only) {
            for repo in &self.external_repos {
                changes.push(self.add_external_repo(repo));
            }
        }

        changes
    }

    fn diff_extras(&self, remote: &RemoteTag, changes: &mut Vec<Change>) {
        for (key, value) in &self.extras {
            match remote.extra.get(key) {
                None => changes.push(self.add_extra(key, value)),
                Some(current) if current != value => changes.push(self.update_extra(key, value)),
                Some(_) => {}
            }
        }
        if self.exact_extras {
            for key in remote.extra.keys() {
                if !self.extras.contains_key(key) {
                    changes.push(self.remove_extra(key));
                }
            }
        }
        for key in &self.blocked_extras {
            if !remote.blocked_extras.contains(key) && !self.extras.contains_key(key) {
                changes.push(self.block_extra(key));
            }
        }
        if self.exact_extras {
            for key in &remote.blocked_extras {
                if !self.blocked_extras.contains(key) && !self.extras.contains_key(key) {
                    changes.push(self.unblock_extra(key));
                }
            }
        }
    }

    fn diff_groups(&self, remote: &[RemoteGroup], changes: &mut Vec<Change>) {
        let remote_groups: BTreeMap<&str, &RemoteGroup> =
            remote.iter().map(|g| (g.name.as_str(), g)).collect();

        for (name, group) in &self.groups {
            let Some(remote_group) = remote_groups.get(name.as_str()) else {
                changes.push(self.add_group(group));
                for package in &group.packages {
                    changes.push(self.add_group_package(name, package));
                }
                continue;
            };

            if group.blocked != remote_group.blocked
                || group.description != remote_group.description
            {
                changes.push(self.update_group(group));
            }

            let remote_packages: BTreeMap<&str, &RemoteGroupPackage> = remote_group
                .packagelist
                .iter()
                .map(|p| (p.package.as_str(), p))
                .collect();
            for package in &group.packages {
                match remote_packages.get(package.name.as_str()) {
                    None => changes.push(self.add_group_package(name, package)),
                    Some(remote_pkg) if remote_pkg.blocked != package.blocked => {
                        changes.push(self.update_group_package(name, package))
                    }
                    Some(_) => {}
                }
            }
            if group.exact_packages {
                for remote_pkg in &remote_group.packagelist {
                    if !group.packages.iter().any(|p| p.name == remote_pkg.package) {
                        changes.push(self.remove_group_package(name, &remote_pkg.package));
                    }
                }
            }
        }

        if self.exact_groups {
            for remote_group in remote {
                if !self.groups.contains_key(&remote_group.name) {
                    changes.push(self.remove_group(&remote_group.name));
                }
            }
        }
    }

    fn diff_packages(
        &self,
        remote: &[RemotePackage],
        only: Option<&[Slot]>,
        changes: &mut Vec<Change>,
    ) {
        let remote_packages: BTreeMap<&str, &RemotePackage> = remote
            .iter()
            .map(|p| (p.package_name.as_str(), p))
            .collect();
        let owners_active = self.active(Slot::PackageOwners, only);
        let base = self.base_active(only);

        for package in &self.packages {
            match remote_packages.get(package.name.as_str()) {
                None => {
                    if base {
                        changes.push(self.add_package(package));
                    } else if let Some(owner) = &package.owner {
                        // restricted owner pass on a package the base pass
                        // will have added without an owner
                        changes.push(self.set_package_owner(&package.name, owner));
                    }
                }
                Some(remote_pkg) => {
                    if base && remote_pkg.blocked != package.blocked {
                        changes.push(if package.blocked {
                            self.block_package(&package.name)
                        } else {
                            self.unblock_package(&package.name)
                        });
                    }
                    if owners_active {
                        if let Some(owner) = &package.owner {
                            if remote_pkg.owner_name.as_deref() != Some(owner.as_str()) {
                                changes.push(self.set_package_owner(&package.name, owner));
                            }
                        }
                    }
                    if base && !same_arch_set(&remote_pkg.extra_arches, &package.extra_arches) {
                        changes.push(self.set_package_arches(package));
                    }
                }
            }
        }

        if base && self.exact_packages {
            for remote_pkg in remote {
                if !self.packages.iter().any(|p| p.name == remote_pkg.package_name) {
                    changes.push(self.remove_package(&remote_pkg.package_name));
                }
            }
        }
    }

    fn diff_inheritance(&self, remote: &[RemoteInheritance], changes: &mut Vec<Change>) {
        let desired: BTreeMap<&str, &InheritanceLink> = self
            .inheritance
            .iter()
            .map(|link| (link.name.as_str(), link))
            .collect();

        // inheritance is inherently exact: stale parents always come out
        for remote_link in remote {
            if !desired.contains_key(remote_link.name.as_str()) {
                changes.push(self.remove_inheritance(&remote_link.name));
            }
        }

        let remote_links: BTreeMap<&str, &RemoteInheritance> = remote
            .iter()
            .map(|link| (link.name.as_str(), link))
            .collect();
        for link in &self.inheritance {
            match remote_links.get(link.name.as_str()) {
                None => changes.push(self.add_inheritance(link)),
                Some(remote_link) => {
                    if remote_link.priority != link.priority
                        || remote_link.maxdepth != link.max_depth
                        || remote_link.noconfig != link.no_config
                        || remote_link.pkg_filter != link.pkg_filter
                        || remote_link.intransitive != link.intransitive
                    {
                        changes.push(self.update_inheritance(link));
                    }
                }
            }
        }
    }

    fn diff_external_repos(&self, remote: &[RemoteRepoLink], changes: &mut Vec<Change>) {
        let desired: BTreeMap<&str, &ExternalRepoLink> = self
            .external_repos
            .iter()
            .map(|repo| (repo.name.as_str(), repo))
            .collect();

        for remote_repo in remote {
            match desired.get(remote_repo.external_repo_name.as_str()) {
                None => changes.push(self.remove_external_repo(&remote_repo.external_repo_name)),
                Some(repo) => {
                    let desired_arches = repo.arches.clone().unwrap_or_default();
                    if remote_repo.priority != repo.priority
                        || remote_repo.merge_mode != repo.merge_mode.as_str()
                        || !same_arch_set(&remote_repo.arches, &desired_arches)
                    {
                        changes.push(self.update_external_repo(repo));
                    }
                }
            }
        }
        for repo in &self.external_repos {
            if !remote
                .iter()
                .any(|r| r.external_repo_name == repo.name)
            {
                changes.push(self.add_external_repo(repo));
            }
        }
    }

    // -- change constructors ------------------------------------------------

    fn edit(&self) -> CallDescriptor {
        CallDescriptor::new("editTag").arg(self.name.clone())
    }

    fn set_locked(&self) -> Change {
        let action = if self.locked { "Lock" } else { "Unlock" };
        Change::new(
            ChangeOp::SetField,
            self.edit().kw("locked", self.locked),
            format!("{action} tag"),
        )
    }

    fn set_arches(&self) -> Change {
        Change::new(
            ChangeOp::SetField,
            self.edit().kw("arches", json!(self.arches)),
            format!("Set arches to [{}]", self.arches.join(", ")),
        )
    }

    fn set_maven(&self) -> Change {
        Change::new(
            ChangeOp::SetField,
            self.edit()
                .kw("maven_support", self.maven_support)
                .kw("maven_include_all", self.maven_include_all),
            format!(
                "Set Maven support {} (include_all={})",
                if self.maven_support { "on" } else { "off" },
                self.maven_include_all
            ),
        )
    }

    fn set_permission(&self) -> Change {
        let change = Change::new(
            ChangeOp::SetField,
            self.edit().kw("perm", json!(self.permission)),
            match &self.permission {
                Some(permission) => format!("Set permission {permission}"),
                None => "Clear permission".to_owned(),
            },
        );
        match &self.permission {
            Some(permission) => change.guarded_by(Key::new("permission", permission.clone())),
            None => change,
        }
    }

    fn set_extras(&self) -> Change {
        Change::new(
            ChangeOp::SetField,
            self.edit().kw("extra", json!(self.extras)),
            format!("Set {} extra fields", self.extras.len()),
        )
    }

    fn add_extra(&self, key: &str, value: &Value) -> Change {
        Change::new(
            ChangeOp::SetField,
            self.edit().kw("extra", json!({ key: value })),
            format!("Add extra field {key} = {value}"),
        )
    }

    fn update_extra(&self, key: &str, value: &Value) -> Change {
        Change::new(
            ChangeOp::SetField,
            self.edit().kw("extra", json!({ key: value })),
            format!("Update extra field {key} = {value}"),
        )
    }

    fn remove_extra(&self, key: &str) -> Change {
        Change::new(
            ChangeOp::SetField,
            self.edit().kw("remove_extra", json!([key])),
            format!("Remove extra field {key}"),
        )
    }

    fn block_extra(&self, key: &str) -> Change {
        Change::new(
            ChangeOp::SetField,
            self.edit().kw("block_extra", json!([key])),
            format!("Block extra field {key}"),
        )
    }

    fn unblock_extra(&self, key: &str) -> Change {
        Change::new(
            ChangeOp::SetField,
            self.edit().kw("unblock_extra", json!([key])),
            format!("Unblock extra field {key}"),
        )
    }

    fn add_group(&self, group: &TagGroup) -> Change {
        Change::new(
            ChangeOp::AddMember,
            CallDescriptor::new("groupListAdd")
                .arg(self.name.clone())
                .arg(group.name.clone())
                .kw("description", json!(group.description))
                .kw("block", group.blocked),
            format!("Add group '{}'", group.name),
        )
    }

    fn update_group(&self, group: &TagGroup) -> Change {
        Change::new(
            ChangeOp::SetField,
            CallDescriptor::new("groupListAdd")
                .arg(self.name.clone())
                .arg(group.name.clone())
                .kw("description", json!(group.description))
                .kw("block", group.blocked),
            format!("Update group '{}'", group.name),
        )
    }

    fn remove_group(&self, group: &str) -> Change {
        Change::new(
            ChangeOp::RemoveMember,
            CallDescriptor::new("groupListRemove")
                .arg(self.name.clone())
                .arg(group.to_owned()),
            format!("Remove group '{group}'"),
        )
    }

    fn add_group_package(&self, group: &str, package: &TagGroupPackage) -> Change {
        let verb = if package.blocked { "Block" } else { "Add" };
        Change::new(
            ChangeOp::AddMember,
            CallDescriptor::new("groupPackageListAdd")
                .arg(self.name.clone())
                .arg(group.to_owned())
                .arg(package.name.clone())
                .kw("block", package.blocked),
            format!("{verb} package {} in group {group}", package.name),
        )
    }

    fn update_group_package(&self, group: &str, package: &TagGroupPackage) -> Change {
        let verb = if package.blocked { "Block" } else { "Unblock" };
        Change::new(
            ChangeOp::SetField,
            CallDescriptor::new("groupPackageListAdd")
                .arg(self.name.clone())
                .arg(group.to_owned())
                .arg(package.name.clone())
                .kw("block", package.blocked),
            format!("{verb} package {} in group {group}", package.name),
        )
    }

    fn remove_group_package(&self, group: &str, package: &str) -> Change {
        Change::new(
            ChangeOp::RemoveMember,
            CallDescriptor::new("groupPackageListRemove")
                .arg(self.name.clone())
                .arg(group.to_owned())
                .arg(package.to_owned()),
            format!("Remove package {package} from group {group}"),
        )
    }

    fn add_inheritance(&self, link: &InheritanceLink) -> Change {
        Change::new(
            ChangeOp::SetInheritance,
            CallDescriptor::new("setInheritanceData")
                .arg(self.name.clone())
                .arg(json!([link.wire(false)])),
            format!(
                "Add inheritance {} with priority {}",
                link.name, link.priority
            ),
        )
        .guarded_by(link.key())
    }

    fn update_inheritance(&self, link: &InheritanceLink) -> Change {
        Change::new(
            ChangeOp::SetInheritance,
            CallDescriptor::new("setInheritanceData")
                .arg(self.name.clone())
                .arg(json!([link.wire(false)])),
            format!(
                "Update inheritance {} with priority {}",
                link.name, link.priority
            ),
        )
    }

    fn remove_inheritance(&self, parent: &str) -> Change {
        Change::new(
            ChangeOp::SetInheritance,
            CallDescriptor::new("setInheritanceData")
                .arg(self.name.clone())
                .arg(json!([{ "name": parent, "delete_link": true }])),
            format!("Remove inheritance {parent}"),
        )
    }

    fn add_external_repo(&self, repo: &ExternalRepoLink) -> Change {
        Change::new(
            ChangeOp::AddLink,
            CallDescriptor::new("addExternalRepoToTag")
                .arg(self.name.clone())
                .arg(repo.name.clone())
                .kw("priority", repo.priority)
                .kw("merge_mode", repo.merge_mode.as_str())
                .kw("arches", json!(repo.arches)),
            format!(
                "Add external repo {} with priority {}",
                repo.name, repo.priority
            ),
        )
        .guarded_by(repo.key())
    }

    fn update_external_repo(&self, repo: &ExternalRepoLink) -> Change {
        Change::new(
            ChangeOp::UpdateLink,
            CallDescriptor::new("editTagExternalRepo")
                .arg(self.name.clone())
                .arg(repo.name.clone())
                .kw("priority", repo.priority)
                .kw("merge_mode", repo.merge_mode.as_str())
                .kw("arches", json!(repo.arches)),
            format!(
                "Update external repo {} with priority {}",
                repo.name, repo.priority
            ),
        )
    }

    fn remove_external_repo(&self, repo: &str) -> Change {
        Change::new(
            ChangeOp::RemoveLink,
            CallDescriptor::new("removeExternalRepoFromTag")
                .arg(self.name.clone())
                .arg(repo.to_owned()),
            format!("Remove external repo {repo}"),
        )
    }

    fn add_package(&self, package: &PackageEntry) -> Change {
        let owner_active = !self.dropped.contains(&Slot::PackageOwners);
        let owner = if owner_active {
            package.owner.clone()
        } else {
            None
        };
        let mut call = CallDescriptor::new("packageListAdd")
            .arg(self.name.clone())
            .arg(package.name.clone())
            .kw("block", package.blocked);
        if let Some(owner) = &owner {
            call = call.kw("owner", owner.clone());
        }
        if !package.extra_arches.is_empty() {
            call = call.kw("extra_arches", json!(package.extra_arches));
        }
        let verb = if package.blocked { "Block" } else { "Add" };
        let change = Change::new(
            ChangeOp::AddMember,
            call,
            format!("{verb} package {}", package.name),
        );
        match owner {
            Some(owner) => change.guarded_by(Key::new("user", owner)),
            None => change,
        }
    }

    fn block_package(&self, package: &str) -> Change {
        Change::new(
            ChangeOp::SetField,
            CallDescriptor::new("packageListBlock")
                .arg(self.name.clone())
                .arg(package.to_owned()),
            format!("Block package {package}"),
        )
    }

    fn unblock_package(&self, package: &str) -> Change {
        Change::new(
            ChangeOp::SetField,
            CallDescriptor::new("packageListUnblock")
                .arg(self.name.clone())
                .arg(package.to_owned()),
            format!("Unblock package {package}"),
        )
    }

    fn set_package_owner(&self, package: &str, owner: &str) -> Change {
        Change::new(
            ChangeOp::SetField,
            CallDescriptor::new("packageListSetOwner")
                .arg(self.name.clone())
                .arg(package.to_owned())
                .arg(owner.to_owned()),
            format!("Set package {package} owner to {owner}"),
        )
        .guarded_by(Key::new("user", owner.to_owned()))
    }

    fn set_package_arches(&self, package: &PackageEntry) -> Change {
        Change::new(
            ChangeOp::SetField,
            CallDescriptor::new("packageListSetArches")
                .arg(self.name.clone())
                .arg(package.name.clone())
                .arg(json!(package.extra_arches)),
            format!(
                "Set package {} extra arches to [{}]",
                package.name,
                package.extra_arches.join(", ")
            ),
        )
    }

    fn remove_package(&self, package: &str) -> Change {
        Change::new(
            ChangeOp::RemoveMember,
            CallDescriptor::new("packageListRemove")
                .arg(self.name.clone())
                .arg(package.to_owned()),
            format!("Remove package {package}"),
        )
    }
}

/// Arch lists compare as sets.
pub(crate) fn same_arch_set(a: &[String], b: &[String]) -> bool {
    let mut a: Vec<&str> = a.iter().map(String::as_str).collect();
    let mut b: Vec<&str> = b.iter().map(String::as_str).collect();
    a.sort_unstable();
    a.dedup();
    b.sort_unstable();
    b.dedup();
    a == b
}

// ---------------------------------------------------------------------------
// Remote wire shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RemoteTag {
    #[allow(dead_code)]
    id: i64,
    #[allow(dead_code)]
    name: String,
    #[serde(default)]
    locked: bool,
    #[serde(default)]
    perm: Option<String>,
    #[serde(default)]
    arches: Vec<String>,
    #[serde(default)]
    maven_support: bool,
    #[serde(default)]
    maven_include_all: bool,
    #[serde(default)]
    extra: BTreeMap<String, Value>,
    #[serde(default)]
    blocked_extras: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RemotePackage {
    package_name: String,
    #[serde(default)]
    blocked: bool,
    #[serde(default)]
    owner_name: Option<String>,
    #[serde(default)]
    extra_arches: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RemoteGroupPackage {
    package: String,
    #[serde(default)]
    blocked: bool,
}

#[derive(Debug, Deserialize)]
struct RemoteGroup {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    blocked: bool,
    #[serde(default)]
    packagelist: Vec<RemoteGroupPackage>,
}

#[derive(Debug, Deserialize)]
struct RemoteInheritance {
    name: String,
    priority: i64,
    #[serde(default)]
    maxdepth: Option<i64>,
    #[serde(default)]
    noconfig: bool,
    #[serde(default)]
    pkg_filter: String,
    #[serde(default)]
    intransitive: bool,
}

#[derive(Debug, Deserialize)]
struct RemoteRepoLink {
    external_repo_name: String,
    priority: i64,
    #[serde(default)]
    arches: Vec<String>,
    #[serde(default = "default_merge_mode")]
    merge_mode: String,
}

fn default_merge_mode() -> String {
    "koji".to_owned()
}

// ---------------------------------------------------------------------------
// Read probes and dump rendering
// ---------------------------------------------------------------------------

pub(crate) fn read_calls_for(name: &str) -> Vec<CallDescriptor> {
    vec![
        CallDescriptor::new("getTag").arg(name.to_owned()),
        CallDescriptor::new("listPackages").kw("tag", name.to_owned()),
        CallDescriptor::new("getTagGroups").arg(name.to_owned()),
        CallDescriptor::new("getInheritanceData").arg(name.to_owned()),
        CallDescriptor::new("getTagExternalRepos").arg(name.to_owned()),
    ]
}

pub(crate) fn observed_doc(
    name: &str,
    observed: &[Result<Value, RemoteFault>],
    include_defaults: bool,
) -> Result<Option<Mapping>, ReadFailure> {
    use serde_yaml::Value as Y;

    let Some(remote) = parse_remote::<RemoteTag>(0, read(observed, 0)?)? else {
        return Ok(None);
    };
    let packages: Vec<RemotePackage> = parse_remote(1, read(observed, 1)?)?.unwrap_or_default();
    let groups: Vec<RemoteGroup> = parse_remote(2, read(observed, 2)?)?.unwrap_or_default();
    let inheritance: Vec<RemoteInheritance> =
        parse_remote(3, read(observed, 3)?)?.unwrap_or_default();
    let repos: Vec<RemoteRepoLink> = parse_remote(4, read(observed, 4)?)?.unwrap_or_default();

    let mut doc = Mapping::new();
    doc.insert(Y::from("type"), Y::from("tag"));
    doc.insert(Y::from("name"), Y::from(name));
    doc_field(&mut doc, include_defaults, "locked", remote.locked, !remote.locked);
    if let Some(perm) = &remote.perm {
        doc.insert(Y::from("permission"), Y::from(perm.clone()));
    }
    doc_field(
        &mut doc,
        include_defaults,
        "arches",
        yaml_strings(&remote.arches),
        remote.arches.is_empty(),
    );
    doc_field(
        &mut doc,
        include_defaults,
        "maven-support",
        remote.maven_support,
        !remote.maven_support,
    );
    doc_field(
        &mut doc,
        include_defaults,
        "maven-include-all",
        remote.maven_include_all,
        !remote.maven_include_all,
    );
    if !remote.extra.is_empty() || include_defaults {
        let mut extras = Mapping::new();
        for (key, value) in &remote.extra {
            extras.insert(Y::from(key.clone()), json_to_yaml(value));
        }
        doc.insert(Y::from("extras"), Y::Mapping(extras));
    }
    doc_field(
        &mut doc,
        include_defaults,
        "blocked-extras",
        yaml_strings(&remote.blocked_extras),
        remote.blocked_extras.is_empty(),
    );

    if !inheritance.is_empty() || include_defaults {
        let links: Vec<Y> = inheritance
            .iter()
            .map(|link| {
                let mut m = Mapping::new();
                m.insert(Y::from("name"), Y::from(link.name.clone()));
                m.insert(Y::from("priority"), Y::from(link.priority));
                if let Some(depth) = link.maxdepth {
                    m.insert(Y::from("max-depth"), Y::from(depth));
                }
                doc_field(&mut m, include_defaults, "no-config", link.noconfig, !link.noconfig);
                doc_field(
                    &mut m,
                    include_defaults,
                    "pkg-filter",
                    link.pkg_filter.clone(),
                    link.pkg_filter.is_empty(),
                );
                doc_field(
                    &mut m,
                    include_defaults,
                    "intransitive",
                    link.intransitive,
                    !link.intransitive,
                );
                Y::Mapping(m)
            })
            .collect();
        doc.insert(Y::from("inheritance"), Y::from(links));
    }

    if !repos.is_empty() || include_defaults {
        let links: Vec<Y> = repos
            .iter()
            .map(|repo| {
                let mut m = Mapping::new();
                m.insert(Y::from("name"), Y::from(repo.external_repo_name.clone()));
                m.insert(Y::from("priority"), Y::from(repo.priority));
                doc_field(
                    &mut m,
                    include_defaults,
                    "arches",
                    yaml_strings(&repo.arches),
                    repo.arches.is_empty(),
                );
                doc_field(
                    &mut m,
                    include_defaults,
                    "merge-mode",
                    repo.merge_mode.clone(),
                    repo.merge_mode == "koji",
                );
                Y::Mapping(m)
            })
            .collect();
        doc.insert(Y::from("external-repos"), Y::from(links));
    }

    if !groups.is_empty() || include_defaults {
        let mut group_map = Mapping::new();
        for group in &groups {
            let mut m = Mapping::new();
            if let Some(description) = &group.description {
                m.insert(Y::from("description"), Y::from(description.clone()));
            }
            doc_field(&mut m, include_defaults, "blocked", group.blocked, !group.blocked);
            let packages: Vec<Y> = group
                .packagelist
                .iter()
                .map(|pkg| {
                    if pkg.blocked {
                        let mut pm = Mapping::new();
                        pm.insert(Y::from("name"), Y::from(pkg.package.clone()));
                        pm.insert(Y::from("blocked"), Y::from(true));
                        Y::Mapping(pm)
                    } else {
                        Y::from(pkg.package.clone())
                    }
                })
                .collect();
            m.insert(Y::from("packages"), Y::from(packages));
            group_map.insert(Y::from(group.name.clone()), Y::Mapping(m));
        }
        doc.insert(Y::from("groups"), Y::Mapping(group_map));
    }

    if !packages.is_empty() || include_defaults {
        let entries: Vec<Y> = packages
            .iter()
            .map(|pkg| {
                let simple = !pkg.blocked && pkg.owner_name.is_none() && pkg.extra_arches.is_empty();
                if simple && !include_defaults {
                    return Y::from(pkg.package_name.clone());
                }
                let mut m = Mapping::new();
                m.insert(Y::from("name"), Y::from(pkg.package_name.clone()));
                doc_field(&mut m, include_defaults, "blocked", pkg.blocked, !pkg.blocked);
                if let Some(owner) = &pkg.owner_name {
                    m.insert(Y::from("owner"), Y::from(owner.clone()));
                }
                doc_field(
                    &mut m,
                    include_defaults,
                    "extra-arches",
                    yaml_strings(&pkg.extra_arches),
                    pkg.extra_arches.is_empty(),
                );
                Y::Mapping(m)
            })
            .collect();
        doc.insert(Y::from("packages"), Y::from(entries));
    }

    Ok(Some(doc))
}

pub(crate) fn yaml_strings(items: &[String]) -> Vec<serde_yaml::Value> {
    items.iter().map(|s| serde_yaml::Value::from(s.clone())).collect()
}

pub(crate) fn json_to_yaml(value: &Value) -> serde_yaml::Value {
    serde_yaml::to_value(value).unwrap_or(serde_yaml::Value::Null)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
