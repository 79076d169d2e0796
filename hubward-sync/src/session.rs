//! Remote sessions.
//!
//! [`Session`] is the transport seam: it takes a closed batch and returns
//! per-call results in submission order. [`SnapshotHub`] is the in-memory
//! implementation backing tests and offline runs; it serves every read
//! method from a YAML snapshot of hub state and applies writes to it. A
//! networked transport implements the same trait.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde_json::{json, Map, Value};

use hubward_core::{CallDescriptor, Key, RemoteFault};

use crate::batch::{Batch, BatchResults};
use crate::error::{SessionError, SyncError};

/// A multicall-capable remote session. One batch is in flight at a time.
pub trait Session {
    /// Execute a closed batch, resolving every call in submission order.
    ///
    /// A `deadline` bounds the whole batch; missing it is a batch-wide
    /// failure surfaced as [`SessionError::DeadlineExceeded`].
    fn execute(
        &mut self,
        batch: &Batch,
        deadline: Option<Duration>,
    ) -> Result<BatchResults, SessionError>;
}

fn fault(message: impl Into<String>) -> RemoteFault {
    RemoteFault::new(message)
}

/// In-memory hub state keyed by kind and name.
///
/// Records hold the same field names the read methods serve, so a snapshot
/// file reads like the remote's own answers.
pub struct SnapshotHub {
    state: BTreeMap<String, BTreeMap<String, Value>>,
    next_id: i64,
    /// The session's own account, used when a call addresses a null user.
    current_user: String,
    /// Injected failures: calls whose `(method, first positional arg)`
    /// matches fail with a generic remote error.
    fail_matchers: Vec<(String, String)>,
    /// Simulated per-batch latency, checked against the deadline.
    latency: Option<Duration>,
    write_log: Vec<String>,
}

impl Default for SnapshotHub {
    fn default() -> Self {
        Self::empty()
    }
}

impl SnapshotHub {
    pub fn empty() -> Self {
        SnapshotHub {
            state: BTreeMap::new(),
            next_id: 1,
            current_user: "admin".to_owned(),
            fail_matchers: Vec::new(),
            latency: None,
            write_log: Vec::new(),
        }
    }

    /// The account this session is logged in as.
    pub fn current_user(&self) -> &str {
        &self.current_user
    }

    /// Load hub state from a YAML snapshot: a mapping of kind to a mapping
    /// of name to record.
    pub fn from_yaml(text: &str) -> Result<Self, SyncError> {
        let parsed: serde_yaml::Value =
            serde_yaml::from_str(text).map_err(|err| SyncError::Snapshot {
                path: "<inline>".into(),
                message: err.to_string(),
            })?;
        let as_json: Value = serde_json::to_value(&parsed).map_err(|err| SyncError::Snapshot {
            path: "<inline>".into(),
            message: err.to_string(),
        })?;

        let mut hub = SnapshotHub::empty();
        let Value::Object(kinds) = as_json else {
            return Err(SyncError::Snapshot {
                path: "<inline>".into(),
                message: "snapshot must be a mapping of kind to records".into(),
            });
        };
        for (kind, records) in kinds {
            let Value::Object(records) = records else {
                return Err(SyncError::Snapshot {
                    path: "<inline>".into(),
                    message: format!("snapshot kind '{kind}' must map names to records"),
                });
            };
            for (name, record) in records {
                let mut record = match record {
                    Value::Object(map) => map,
                    Value::Null => Map::new(),
                    other => {
                        return Err(SyncError::Snapshot {
                            path: "<inline>".into(),
                            message: format!(
                                "snapshot record {kind}:{name} must be a mapping, got {other}"
                            ),
                        })
                    }
                };
                record.insert("name".into(), Value::from(name.clone()));
                if !record.contains_key("id") {
                    record.insert("id".into(), Value::from(hub.next_id));
                    hub.next_id += 1;
                }
                hub.state
                    .entry(kind.clone())
                    .or_default()
                    .insert(name, Value::Object(record));
            }
        }
        Ok(hub)
    }

    pub fn from_file(path: &Path) -> Result<Self, SyncError> {
        let text = std::fs::read_to_string(path).map_err(|err| SyncError::Snapshot {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        Self::from_yaml(&text)
    }

    /// Serialise the current state back to YAML.
    pub fn to_yaml(&self) -> Result<String, SyncError> {
        serde_yaml::to_string(&self.state).map_err(|err| SyncError::Snapshot {
            path: "<inline>".into(),
            message: err.to_string(),
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), SyncError> {
        let text = self.to_yaml()?;
        std::fs::write(path, text).map_err(|err| SyncError::Snapshot {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    }

    /// Fail any call matching `(method, first positional arg)`.
    pub fn fail_on(&mut self, method: &str, first_arg: &str) {
        self.fail_matchers.push((method.to_owned(), first_arg.to_owned()));
    }

    /// Simulate slow batches for deadline tests.
    pub fn set_latency(&mut self, latency: Duration) {
        self.latency = Some(latency);
    }

    /// Methods of every write call dispatched so far, in order.
    pub fn write_log(&self) -> &[String] {
        &self.write_log
    }

    /// All `(kind, name)` keys present in the snapshot, sorted.
    pub fn keys(&self) -> Vec<Key> {
        let mut keys = Vec::new();
        for (kind, records) in &self.state {
            for name in records.keys() {
                keys.push(Key::new(kind.clone(), name.clone()));
            }
        }
        keys.sort();
        keys
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.state
            .get(&key.kind)
            .is_some_and(|records| records.contains_key(&key.name))
    }

    // -- record access ------------------------------------------------------

    fn record(&self, kind: &str, name: &str) -> Option<&Map<String, Value>> {
        self.state
            .get(kind)
            .and_then(|records| records.get(name))
            .and_then(Value::as_object)
    }

    fn record_mut(&mut self, kind: &str, name: &str) -> Option<&mut Map<String, Value>> {
        self.state
            .get_mut(kind)
            .and_then(|records| records.get_mut(name))
            .and_then(Value::as_object_mut)
    }

    fn require_mut(
        &mut self,
        kind: &str,
        name: &str,
    ) -> Result<&mut Map<String, Value>, RemoteFault> {
        if self.record(kind, name).is_none() {
            return Err(fault(format!("no such {kind}: {name}")));
        }
        Ok(self.record_mut(kind, name).expect("checked above"))
    }

    fn insert_record(&mut self, kind: &str, name: &str, mut record: Map<String, Value>) {
        record.insert("name".into(), Value::from(name));
        record.insert("id".into(), Value::from(self.next_id));
        self.next_id += 1;
        self.state
            .entry(kind.to_owned())
            .or_default()
            .insert(name.to_owned(), Value::Object(record));
    }

    fn exists(&self, kind: &str, name: &str) -> bool {
        self.record(kind, name).is_some()
    }

    // -- call dispatch ------------------------------------------------------

    fn dispatch(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        if let Some(first) = call.args.first().and_then(Value::as_str) {
            let method = call.method.as_str();
            if self
                .fail_matchers
                .iter()
                .any(|(m, a)| m == method && a == first)
            {
                return Err(fault(format!("remote generic error: {method} {first}")));
            }
        }

        match call.method.as_str() {
            // reads
            "getTag" => self.get_tag(call),
            "listPackages" => self.tag_array(call, "packages", "tag"),
            "getTagGroups" => self.tag_array_positional(call, "groups"),
            "getInheritanceData" => self.tag_array_positional(call, "inheritance"),
            "getTagExternalRepos" => self.tag_array_positional(call, "external_repos"),
            "getBuildTarget" => self.get_simple(call, "target"),
            "getExternalRepo" => self.get_simple(call, "external-repo"),
            "getUser" => self.get_user(call),
            "getUserPerms" => self.get_user_perms(call),
            "getGroup" => self.get_group(call),
            "getGroupMembers" => self.get_group_members(call),
            "getHost" => self.get_simple(call, "host"),
            "listHostChannels" => self.list_host_channels(call),
            "getChannel" => self.get_simple(call, "channel"),
            "listHosts" => self.list_hosts(call),
            "getPermission" => self.get_simple(call, "permission"),
            "getBType" => self.get_simple(call, "build-type"),
            "getContentGenerator" => self.get_simple(call, "content-generator"),
            "getArchiveType" => self.get_simple(call, "archive-type"),
            // writes
            _ => {
                self.write_log.push(call.method.clone());
                self.dispatch_write(call)
            }
        }
    }

    fn dispatch_write(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        match call.method.as_str() {
            "createTag" => self.create_tag(call),
            "editTag" => self.edit_tag(call),
            "setInheritanceData" => self.set_inheritance(call),
            "addExternalRepoToTag" => self.add_repo_to_tag(call),
            "editTagExternalRepo" => self.edit_tag_repo(call),
            "removeExternalRepoFromTag" => self.remove_repo_from_tag(call),
            "groupListAdd" => self.group_list_add(call),
            "groupListRemove" => self.group_list_remove(call),
            "groupPackageListAdd" => self.group_package_add(call),
            "groupPackageListRemove" => self.group_package_remove(call),
            "packageListAdd" => self.package_list_add(call),
            "packageListBlock" => self.package_set_flag(call, true),
            "packageListUnblock" => self.package_set_flag(call, false),
            "packageListSetOwner" => self.package_set_owner(call),
            "packageListSetArches" => self.package_set_arches(call),
            "packageListRemove" => self.package_list_remove(call),
            "createBuildTarget" => self.create_target(call),
            "editBuildTarget" => self.edit_target(call),
            "createExternalRepo" => self.create_external_repo(call),
            "editExternalRepo" => self.edit_external_repo(call),
            "createUser" => self.create_user(call),
            "enableUser" => self.set_principal_enabled(call, true),
            "disableUser" => self.set_principal_enabled(call, false),
            "grantPermission" => self.grant_permission(call),
            "revokePermission" => self.revoke_permission(call),
            "addGroupMember" => self.add_group_member(call),
            "dropGroupMember" => self.drop_group_member(call),
            "newGroup" => self.new_group(call),
            "addHost" => self.add_host(call),
            "editHost" => self.edit_host(call),
            "addHostToChannel" => self.add_host_to_channel(call),
            "removeHostFromChannel" => self.remove_host_from_channel(call),
            "createChannel" => self.create_channel(call),
            "editChannel" => self.edit_channel(call),
            "createPermission" => self.create_permission(call),
            "editPermission" => self.edit_permission(call),
            "addBType" => self.add_btype(call),
            "grantCGAccess" => self.grant_cg_access(call),
            "revokeCGAccess" => self.revoke_cg_access(call),
            "addArchiveType" => self.add_archive_type(call),
            other => Err(fault(format!("unknown method {other}"))),
        }
    }

    // -- argument helpers ---------------------------------------------------

    fn arg(call: &CallDescriptor, index: usize) -> Result<&str, RemoteFault> {
        call.args
            .get(index)
            .and_then(Value::as_str)
            .ok_or_else(|| fault(format!("{}: missing argument {index}", call.method)))
    }

    fn kw<'a>(call: &'a CallDescriptor, name: &str) -> Option<&'a Value> {
        call.kwargs.get(name)
    }

    fn string_list(value: &Value) -> Vec<String> {
        value
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    // -- reads --------------------------------------------------------------

    fn get_tag(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let name = Self::arg(call, 0)?;
        let Some(record) = self.record("tag", name) else {
            return Ok(Value::Null);
        };
        Ok(json!({
            "id": record.get("id"),
            "name": name,
            "locked": record.get("locked").cloned().unwrap_or(Value::from(false)),
            "perm": record.get("perm").cloned().unwrap_or(Value::Null),
            "arches": record.get("arches").cloned().unwrap_or(json!([])),
            "maven_support": record.get("maven_support").cloned().unwrap_or(Value::from(false)),
            "maven_include_all": record.get("maven_include_all").cloned().unwrap_or(Value::from(false)),
            "extra": record.get("extra").cloned().unwrap_or(json!({})),
            "blocked_extras": record.get("blocked_extras").cloned().unwrap_or(json!([])),
        }))
    }

    fn tag_array(
        &mut self,
        call: &CallDescriptor,
        field: &str,
        kw_name: &str,
    ) -> Result<Value, RemoteFault> {
        let name = Self::kw(call, kw_name)
            .and_then(Value::as_str)
            .ok_or_else(|| fault(format!("{}: missing '{kw_name}'", call.method)))?;
        Ok(self
            .record("tag", name)
            .and_then(|record| record.get(field).cloned())
            .unwrap_or(json!([])))
    }

    fn tag_array_positional(
        &mut self,
        call: &CallDescriptor,
        field: &str,
    ) -> Result<Value, RemoteFault> {
        let name = Self::arg(call, 0)?;
        Ok(self
            .record("tag", name)
            .and_then(|record| record.get(field).cloned())
            .unwrap_or(json!([])))
    }

    fn get_simple(&mut self, call: &CallDescriptor, kind: &str) -> Result<Value, RemoteFault> {
        let name = Self::arg(call, 0)?;
        match self.record(kind, name) {
            Some(record) => Ok(Value::Object(record.clone())),
            None => Ok(Value::Null),
        }
    }

    fn get_user(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let name = Self::arg(call, 0)?;
        let Some(record) = self.record("user", name) else {
            return Ok(Value::Null);
        };
        let mut out = record.clone();
        out.remove("permissions");
        let groups: Vec<String> = self
            .state
            .get("group")
            .map(|groups| {
                groups
                    .iter()
                    .filter(|(_, record)| {
                        record
                            .get("members")
                            .map(|m| Self::string_list(m).contains(&name.to_owned()))
                            .unwrap_or(false)
                    })
                    .map(|(group_name, _)| group_name.clone())
                    .collect()
            })
            .unwrap_or_default();
        out.insert("groups".into(), json!(groups));
        Ok(Value::Object(out))
    }

    fn get_user_perms(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let name = Self::arg(call, 0)?;
        for kind in ["user", "group"] {
            if let Some(record) = self.record(kind, name) {
                return Ok(record.get("permissions").cloned().unwrap_or(json!([])));
            }
        }
        Ok(json!([]))
    }

    fn get_group(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let name = Self::arg(call, 0)?;
        let Some(record) = self.record("group", name) else {
            return Ok(Value::Null);
        };
        let mut out = record.clone();
        out.remove("members");
        out.remove("permissions");
        Ok(Value::Object(out))
    }

    fn get_group_members(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let name = Self::arg(call, 0)?;
        Ok(self
            .record("group", name)
            .and_then(|record| record.get("members").cloned())
            .unwrap_or(json!([])))
    }

    fn list_host_channels(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let host = Self::arg(call, 0)?;
        let channels: Vec<String> = self
            .state
            .get("channel")
            .map(|channels| {
                channels
                    .iter()
                    .filter(|(_, record)| {
                        record
                            .get("hosts")
                            .map(|h| Self::string_list(h).contains(&host.to_owned()))
                            .unwrap_or(false)
                    })
                    .map(|(channel_name, _)| channel_name.clone())
                    .collect()
            })
            .unwrap_or_default();
        Ok(json!(channels))
    }

    fn list_hosts(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let channel = Self::kw(call, "channel")
            .and_then(Value::as_str)
            .ok_or_else(|| fault("listHosts: missing 'channel'"))?;
        Ok(self
            .record("channel", channel)
            .and_then(|record| record.get("hosts").cloned())
            .unwrap_or(json!([])))
    }

    // -- tag writes ---------------------------------------------------------

    fn create_tag(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let name = Self::arg(call, 0)?.to_owned();
        if self.exists("tag", &name) {
            return Err(fault(format!("tag already exists: {name}")));
        }
        let mut record = Map::new();
        for field in ["locked", "arches", "maven_support", "maven_include_all"] {
            if let Some(value) = Self::kw(call, field) {
                record.insert(field.into(), value.clone());
            }
        }
        self.insert_record("tag", &name, record);
        Ok(Value::Null)
    }

    fn edit_tag(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let name = Self::arg(call, 0)?.to_owned();
        let kwargs = call.kwargs.clone();
        let record = self.require_mut("tag", &name)?;
        for field in ["locked", "perm", "arches", "maven_support", "maven_include_all"] {
            if let Some(value) = kwargs.get(field) {
                record.insert(field.into(), value.clone());
            }
        }
        if let Some(Value::Object(extra)) = kwargs.get("extra") {
            let current = record
                .entry("extra")
                .or_insert_with(|| json!({}));
            if let Some(current) = current.as_object_mut() {
                for (key, value) in extra {
                    current.insert(key.clone(), value.clone());
                }
            }
        }
        if let Some(keys) = kwargs.get("remove_extra") {
            if let Some(extra) = record.get_mut("extra").and_then(Value::as_object_mut) {
                for key in Self::string_list(keys) {
                    extra.remove(&key);
                }
            }
        }
        if let Some(keys) = kwargs.get("block_extra") {
            let blocked = record
                .entry("blocked_extras")
                .or_insert_with(|| json!([]));
            if let Some(blocked) = blocked.as_array_mut() {
                for key in Self::string_list(keys) {
                    if !blocked.iter().any(|k| k.as_str() == Some(&key)) {
                        blocked.push(Value::from(key));
                    }
                }
            }
        }
        if let Some(keys) = kwargs.get("unblock_extra") {
            if let Some(blocked) = record.get_mut("blocked_extras").and_then(Value::as_array_mut) {
                for key in Self::string_list(keys) {
                    blocked.retain(|k| k.as_str() != Some(&key));
                }
            }
        }
        Ok(Value::Null)
    }

    fn set_inheritance(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let name = Self::arg(call, 0)?.to_owned();
        let entries = call
            .args
            .get(1)
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| fault("setInheritanceData: missing entries"))?;

        // parents are addressed by name and must exist
        for entry in &entries {
            let parent = entry.get("name").and_then(Value::as_str).unwrap_or_default();
            let delete = entry.get("delete_link").and_then(Value::as_bool).unwrap_or(false);
            if !delete && !self.exists("tag", parent) {
                return Err(fault(format!("no such tag: {parent}")));
            }
        }

        let record = self.require_mut("tag", &name)?;
        let links = record.entry("inheritance").or_insert_with(|| json!([]));
        let Some(links) = links.as_array_mut() else {
            return Err(fault("corrupt inheritance data"));
        };
        for entry in entries {
            let parent = entry
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned();
            let delete = entry.get("delete_link").and_then(Value::as_bool).unwrap_or(false);
            links.retain(|link| link.get("name").and_then(Value::as_str) != Some(&parent));
            if !delete {
                let mut stored = entry.clone();
                if let Some(map) = stored.as_object_mut() {
                    map.remove("delete_link");
                }
                links.push(stored);
            }
        }
        Ok(Value::Null)
    }

    fn add_repo_to_tag(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let name = Self::arg(call, 0)?.to_owned();
        let repo = Self::arg(call, 1)?.to_owned();
        if !self.exists("external-repo", &repo) {
            return Err(fault(format!("no such external-repo: {repo}")));
        }
        let entry = json!({
            "external_repo_name": repo,
            "priority": Self::kw(call, "priority").cloned().unwrap_or(Value::from(0)),
            "merge_mode": Self::kw(call, "merge_mode").cloned().unwrap_or(Value::from("koji")),
            "arches": Self::kw(call, "arches")
                .filter(|v| !v.is_null())
                .cloned()
                .unwrap_or(json!([])),
        });
        let record = self.require_mut("tag", &name)?;
        let repos = record.entry("external_repos").or_insert_with(|| json!([]));
        if let Some(repos) = repos.as_array_mut() {
            repos.push(entry);
        }
        Ok(Value::Null)
    }

    fn edit_tag_repo(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let name = Self::arg(call, 0)?.to_owned();
        let repo = Self::arg(call, 1)?.to_owned();
        let kwargs = call.kwargs.clone();
        let record = self.require_mut("tag", &name)?;
        let repos = record
            .get_mut("external_repos")
            .and_then(Value::as_array_mut)
            .ok_or_else(|| fault(format!("tag {name} has no external repos")))?;
        let entry = repos
            .iter_mut()
            .find(|e| e.get("external_repo_name").and_then(Value::as_str) == Some(repo.as_str()))
            .ok_or_else(|| fault(format!("tag {name} has no external repo {repo}")))?;
        if let Some(map) = entry.as_object_mut() {
            if let Some(priority) = kwargs.get("priority") {
                map.insert("priority".into(), priority.clone());
            }
            if let Some(mode) = kwargs.get("merge_mode") {
                map.insert("merge_mode".into(), mode.clone());
            }
            if let Some(arches) = kwargs.get("arches") {
                let arches = if arches.is_null() { json!([]) } else { arches.clone() };
                map.insert("arches".into(), arches);
            }
        }
        Ok(Value::Null)
    }

    fn remove_repo_from_tag(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let name = Self::arg(call, 0)?.to_owned();
        let repo = Self::arg(call, 1)?.to_owned();
        let record = self.require_mut("tag", &name)?;
        if let Some(repos) = record.get_mut("external_repos").and_then(Value::as_array_mut) {
            repos.retain(|e| e.get("external_repo_name").and_then(Value::as_str) != Some(&repo));
        }
        Ok(Value::Null)
    }

    fn group_list_add(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let name = Self::arg(call, 0)?.to_owned();
        let group = Self::arg(call, 1)?.to_owned();
        let description = Self::kw(call, "description").cloned().unwrap_or(Value::Null);
        let blocked = Self::kw(call, "block").cloned().unwrap_or(Value::from(false));
        let record = self.require_mut("tag", &name)?;
        let groups = record.entry("groups").or_insert_with(|| json!([]));
        let Some(groups) = groups.as_array_mut() else {
            return Err(fault("corrupt group data"));
        };
        if let Some(existing) = groups
            .iter_mut()
            .find(|g| g.get("name").and_then(Value::as_str) == Some(group.as_str()))
        {
            if let Some(map) = existing.as_object_mut() {
                map.insert("description".into(), description);
                map.insert("blocked".into(), blocked);
            }
        } else {
            groups.push(json!({
                "name": group,
                "description": description,
                "blocked": blocked,
                "packagelist": [],
            }));
        }
        Ok(Value::Null)
    }

    fn group_list_remove(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let name = Self::arg(call, 0)?.to_owned();
        let group = Self::arg(call, 1)?.to_owned();
        let record = self.require_mut("tag", &name)?;
        if let Some(groups) = record.get_mut("groups").and_then(Value::as_array_mut) {
            groups.retain(|g| g.get("name").and_then(Value::as_str) != Some(&group));
        }
        Ok(Value::Null)
    }

    fn group_package_add(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let name = Self::arg(call, 0)?.to_owned();
        let group = Self::arg(call, 1)?.to_owned();
        let package = Self::arg(call, 2)?.to_owned();
        let blocked = Self::kw(call, "block").cloned().unwrap_or(Value::from(false));
        let record = self.require_mut("tag", &name)?;
        let groups = record
            .get_mut("groups")
            .and_then(Value::as_array_mut)
            .ok_or_else(|| fault(format!("tag {name} has no groups")))?;
        let entry = groups
            .iter_mut()
            .find(|g| g.get("name").and_then(Value::as_str) == Some(group.as_str()))
            .ok_or_else(|| fault(format!("tag {name} has no group {group}")))?;
        let Some(map) = entry.as_object_mut() else {
            return Err(fault("corrupt group data"));
        };
        let packagelist = map.entry("packagelist").or_insert_with(|| json!([]));
        if let Some(packagelist) = packagelist.as_array_mut() {
            packagelist.retain(|p| p.get("package").and_then(Value::as_str) != Some(&package));
            packagelist.push(json!({"package": package, "blocked": blocked}));
        }
        Ok(Value::Null)
    }

    fn group_package_remove(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let name = Self::arg(call, 0)?.to_owned();
        let group = Self::arg(call, 1)?.to_owned();
        let package = Self::arg(call, 2)?.to_owned();
        let record = self.require_mut("tag", &name)?;
        if let Some(groups) = record.get_mut("groups").and_then(Value::as_array_mut) {
            if let Some(entry) = groups
                .iter_mut()
                .find(|g| g.get("name").and_then(Value::as_str) == Some(group.as_str()))
            {
                if let Some(packagelist) =
                    entry.get_mut("packagelist").and_then(Value::as_array_mut)
                {
                    packagelist
                        .retain(|p| p.get("package").and_then(Value::as_str) != Some(&package));
                }
            }
        }
        Ok(Value::Null)
    }

    fn package_list_add(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let name = Self::arg(call, 0)?.to_owned();
        let package = Self::arg(call, 1)?.to_owned();
        if let Some(owner) = Self::kw(call, "owner").and_then(Value::as_str) {
            if !self.exists("user", owner) {
                return Err(fault(format!("no such user: {owner}")));
            }
        }
        let entry = json!({
            "package_name": package,
            "blocked": Self::kw(call, "block").cloned().unwrap_or(Value::from(false)),
            "owner_name": Self::kw(call, "owner").cloned().unwrap_or(Value::Null),
            "extra_arches": Self::kw(call, "extra_arches").cloned().unwrap_or(json!([])),
        });
        let record = self.require_mut("tag", &name)?;
        let packages = record.entry("packages").or_insert_with(|| json!([]));
        if let Some(packages) = packages.as_array_mut() {
            packages.retain(|p| p.get("package_name").and_then(Value::as_str) != Some(&package));
            packages.push(entry);
        }
        Ok(Value::Null)
    }

    fn package_entry_mut<'a>(
        record: &'a mut Map<String, Value>,
        tag: &str,
        package: &str,
    ) -> Result<&'a mut Map<String, Value>, RemoteFault> {
        record
            .get_mut("packages")
            .and_then(Value::as_array_mut)
            .and_then(|packages| {
                packages
                    .iter_mut()
                    .find(|p| p.get("package_name").and_then(Value::as_str) == Some(package))
            })
            .and_then(Value::as_object_mut)
            .ok_or_else(|| fault(format!("tag {tag} has no package {package}")))
    }

    fn package_set_flag(
        &mut self,
        call: &CallDescriptor,
        blocked: bool,
    ) -> Result<Value, RemoteFault> {
        let name = Self::arg(call, 0)?.to_owned();
        let package = Self::arg(call, 1)?.to_owned();
        let record = self.require_mut("tag", &name)?;
        let entry = Self::package_entry_mut(record, &name, &package)?;
        entry.insert("blocked".into(), Value::from(blocked));
        Ok(Value::Null)
    }

    fn package_set_owner(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let name = Self::arg(call, 0)?.to_owned();
        let package = Self::arg(call, 1)?.to_owned();
        let owner = Self::arg(call, 2)?.to_owned();
        if !self.exists("user", &owner) {
            return Err(fault(format!("no such user: {owner}")));
        }
        let record = self.require_mut("tag", &name)?;
        let entry = Self::package_entry_mut(record, &name, &package)?;
        entry.insert("owner_name".into(), Value::from(owner));
        Ok(Value::Null)
    }

    fn package_set_arches(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let name = Self::arg(call, 0)?.to_owned();
        let package = Self::arg(call, 1)?.to_owned();
        let arches = call.args.get(2).cloned().unwrap_or(json!([]));
        let record = self.require_mut("tag", &name)?;
        let entry = Self::package_entry_mut(record, &name, &package)?;
        entry.insert("extra_arches".into(), arches);
        Ok(Value::Null)
    }

    fn package_list_remove(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let name = Self::arg(call, 0)?.to_owned();
        let package = Self::arg(call, 1)?.to_owned();
        let record = self.require_mut("tag", &name)?;
        if let Some(packages) = record.get_mut("packages").and_then(Value::as_array_mut) {
            packages.retain(|p| p.get("package_name").and_then(Value::as_str) != Some(&package));
        }
        Ok(Value::Null)
    }

    // -- other writes -------------------------------------------------------

    fn create_target(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let name = Self::arg(call, 0)?.to_owned();
        let build = Self::arg(call, 1)?.to_owned();
        let dest = Self::arg(call, 2)?.to_owned();
        if self.exists("target", &name) {
            return Err(fault(format!("target already exists: {name}")));
        }
        for tag in [&build, &dest] {
            if !self.exists("tag", tag) {
                return Err(fault(format!("no such tag: {tag}")));
            }
        }
        let mut record = Map::new();
        record.insert("build_tag_name".into(), Value::from(build));
        record.insert("dest_tag_name".into(), Value::from(dest));
        self.insert_record("target", &name, record);
        Ok(Value::Null)
    }

    fn edit_target(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let name = Self::arg(call, 0)?.to_owned();
        let build = Self::arg(call, 2)?.to_owned();
        let dest = Self::arg(call, 3)?.to_owned();
        for tag in [&build, &dest] {
            if !self.exists("tag", tag) {
                return Err(fault(format!("no such tag: {tag}")));
            }
        }
        let record = self.require_mut("target", &name)?;
        record.insert("build_tag_name".into(), Value::from(build));
        record.insert("dest_tag_name".into(), Value::from(dest));
        Ok(Value::Null)
    }

    fn create_external_repo(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let name = Self::arg(call, 0)?.to_owned();
        let url = Self::arg(call, 1)?.to_owned();
        if self.exists("external-repo", &name) {
            return Err(fault(format!("external repo already exists: {name}")));
        }
        let mut record = Map::new();
        record.insert("url".into(), Value::from(url));
        self.insert_record("external-repo", &name, record);
        Ok(Value::Null)
    }

    fn edit_external_repo(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let name = Self::arg(call, 0)?.to_owned();
        let url = Self::kw(call, "url").cloned();
        let record = self.require_mut("external-repo", &name)?;
        if let Some(url) = url {
            record.insert("url".into(), url);
        }
        Ok(Value::Null)
    }

    fn create_user(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let name = Self::arg(call, 0)?.to_owned();
        if self.exists("user", &name) {
            return Err(fault(format!("user already exists: {name}")));
        }
        let mut record = Map::new();
        record.insert(
            "enabled".into(),
            Self::kw(call, "enabled").cloned().unwrap_or(Value::from(true)),
        );
        record.insert("permissions".into(), json!([]));
        self.insert_record("user", &name, record);
        Ok(Value::Null)
    }

    fn set_principal_enabled(
        &mut self,
        call: &CallDescriptor,
        enabled: bool,
    ) -> Result<Value, RemoteFault> {
        let name = Self::arg(call, 0)?.to_owned();
        for kind in ["user", "group"] {
            if self.exists(kind, &name) {
                let record = self.require_mut(kind, &name)?;
                record.insert("enabled".into(), Value::from(enabled));
                return Ok(Value::Null);
            }
        }
        Err(fault(format!("no such user or group: {name}")))
    }

    fn grant_permission(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let name = Self::arg(call, 0)?.to_owned();
        let permission = Self::arg(call, 1)?.to_owned();
        if !self.exists("permission", &permission) {
            return Err(fault(format!("no such permission: {permission}")));
        }
        for kind in ["user", "group"] {
            if self.exists(kind, &name) {
                let record = self.require_mut(kind, &name)?;
                let perms = record.entry("permissions").or_insert_with(|| json!([]));
                if let Some(perms) = perms.as_array_mut() {
                    if !perms.iter().any(|p| p.as_str() == Some(&permission)) {
                        perms.push(Value::from(permission));
                    }
                }
                return Ok(Value::Null);
            }
        }
        Err(fault(format!("no such user or group: {name}")))
    }

    fn revoke_permission(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let name = Self::arg(call, 0)?.to_owned();
        let permission = Self::arg(call, 1)?.to_owned();
        for kind in ["user", "group"] {
            if self.exists(kind, &name) {
                let record = self.require_mut(kind, &name)?;
                if let Some(perms) = record.get_mut("permissions").and_then(Value::as_array_mut) {
                    perms.retain(|p| p.as_str() != Some(&permission));
                }
                return Ok(Value::Null);
            }
        }
        Err(fault(format!("no such user or group: {name}")))
    }

    fn add_group_member(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let group = Self::arg(call, 0)?.to_owned();
        let user = Self::arg(call, 1)?.to_owned();
        if !self.exists("user", &user) {
            return Err(fault(format!("no such user: {user}")));
        }
        let record = self.require_mut("group", &group)?;
        let members = record.entry("members").or_insert_with(|| json!([]));
        if let Some(members) = members.as_array_mut() {
            if !members.iter().any(|m| m.as_str() == Some(&user)) {
                members.push(Value::from(user));
            }
        }
        Ok(Value::Null)
    }

    fn drop_group_member(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let group = Self::arg(call, 0)?.to_owned();
        let user = Self::arg(call, 1)?.to_owned();
        let record = self.require_mut("group", &group)?;
        if let Some(members) = record.get_mut("members").and_then(Value::as_array_mut) {
            members.retain(|m| m.as_str() != Some(&user));
        }
        Ok(Value::Null)
    }

    fn new_group(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let name = Self::arg(call, 0)?.to_owned();
        if self.exists("group", &name) {
            return Err(fault(format!("group already exists: {name}")));
        }
        let mut record = Map::new();
        record.insert("enabled".into(), Value::from(true));
        record.insert("members".into(), json!([]));
        record.insert("permissions".into(), json!([]));
        self.insert_record("group", &name, record);
        Ok(Value::Null)
    }

    fn add_host(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let name = Self::arg(call, 0)?.to_owned();
        if self.exists("host", &name) {
            return Err(fault(format!("host already exists: {name}")));
        }
        let mut record = Map::new();
        record.insert("arches".into(), call.args.get(1).cloned().unwrap_or(json!([])));
        record.insert("capacity".into(), Value::from(0.0));
        record.insert("enabled".into(), Value::from(true));
        self.insert_record("host", &name, record);
        Ok(Value::Null)
    }

    fn edit_host(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let name = Self::arg(call, 0)?.to_owned();
        let kwargs = call.kwargs.clone();
        let record = self.require_mut("host", &name)?;
        for field in ["arches", "capacity", "enabled", "description"] {
            if let Some(value) = kwargs.get(field) {
                record.insert(field.into(), value.clone());
            }
        }
        Ok(Value::Null)
    }

    fn add_host_to_channel(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let host = Self::arg(call, 0)?.to_owned();
        let channel = Self::arg(call, 1)?.to_owned();
        if !self.exists("host", &host) {
            return Err(fault(format!("no such host: {host}")));
        }
        let record = self.require_mut("channel", &channel)?;
        let hosts = record.entry("hosts").or_insert_with(|| json!([]));
        if let Some(hosts) = hosts.as_array_mut() {
            if !hosts.iter().any(|h| h.as_str() == Some(&host)) {
                hosts.push(Value::from(host));
            }
        }
        Ok(Value::Null)
    }

    fn remove_host_from_channel(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let host = Self::arg(call, 0)?.to_owned();
        let channel = Self::arg(call, 1)?.to_owned();
        let record = self.require_mut("channel", &channel)?;
        if let Some(hosts) = record.get_mut("hosts").and_then(Value::as_array_mut) {
            hosts.retain(|h| h.as_str() != Some(&host));
        }
        Ok(Value::Null)
    }

    fn create_channel(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let name = Self::arg(call, 0)?.to_owned();
        if self.exists("channel", &name) {
            return Err(fault(format!("channel already exists: {name}")));
        }
        let mut record = Map::new();
        record.insert(
            "description".into(),
            Self::kw(call, "description").cloned().unwrap_or(Value::Null),
        );
        record.insert("hosts".into(), json!([]));
        self.insert_record("channel", &name, record);
        Ok(Value::Null)
    }

    fn edit_channel(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let name = Self::arg(call, 0)?.to_owned();
        let description = Self::kw(call, "description").cloned();
        let record = self.require_mut("channel", &name)?;
        if let Some(description) = description {
            record.insert("description".into(), description);
        }
        Ok(Value::Null)
    }

    fn create_permission(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let name = Self::arg(call, 0)?.to_owned();
        if self.exists("permission", &name) {
            return Err(fault(format!("permission already exists: {name}")));
        }
        let mut record = Map::new();
        record.insert(
            "description".into(),
            Self::kw(call, "description").cloned().unwrap_or(Value::Null),
        );
        self.insert_record("permission", &name, record);
        Ok(Value::Null)
    }

    fn edit_permission(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let name = Self::arg(call, 0)?.to_owned();
        let description = Self::kw(call, "description").cloned();
        let record = self.require_mut("permission", &name)?;
        if let Some(description) = description {
            record.insert("description".into(), description);
        }
        Ok(Value::Null)
    }

    fn add_btype(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let name = Self::arg(call, 0)?.to_owned();
        if self.exists("build-type", &name) {
            return Err(fault(format!("build type already exists: {name}")));
        }
        self.insert_record("build-type", &name, Map::new());
        Ok(Value::Null)
    }

    /// Resolve a user argument, treating null as the session's own account.
    fn user_arg(&self, call: &CallDescriptor, index: usize) -> Result<String, RemoteFault> {
        match call.args.get(index) {
            Some(Value::Null) => Ok(self.current_user.clone()),
            Some(Value::String(user)) => Ok(user.clone()),
            _ => Err(fault(format!("{}: missing user argument", call.method))),
        }
    }

    /// There is no standalone creation call for content generators; a grant
    /// with `create` brings one into existence as a side effect.
    fn grant_cg_access(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let user = self.user_arg(call, 0)?;
        let generator = Self::arg(call, 1)?.to_owned();
        let create = Self::kw(call, "create")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if user != self.current_user && !self.exists("user", &user) {
            return Err(fault(format!("no such user: {user}")));
        }
        if !self.exists("content-generator", &generator) {
            if !create {
                return Err(fault(format!("no such content-generator: {generator}")));
            }
            let mut record = Map::new();
            record.insert("users".into(), json!([]));
            self.insert_record("content-generator", &generator, record);
        }
        let record = self.require_mut("content-generator", &generator)?;
        let users = record.entry("users").or_insert_with(|| json!([]));
        if let Some(users) = users.as_array_mut() {
            if !users.iter().any(|u| u.as_str() == Some(&user)) {
                users.push(Value::from(user));
            }
        }
        Ok(Value::Null)
    }

    fn revoke_cg_access(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let user = self.user_arg(call, 0)?;
        let generator = Self::arg(call, 1)?.to_owned();
        let record = self.require_mut("content-generator", &generator)?;
        if let Some(users) = record.get_mut("users").and_then(Value::as_array_mut) {
            users.retain(|u| u.as_str() != Some(&user));
        }
        Ok(Value::Null)
    }

    fn add_archive_type(&mut self, call: &CallDescriptor) -> Result<Value, RemoteFault> {
        let name = Self::arg(call, 0)?.to_owned();
        if self.exists("archive-type", &name) {
            return Err(fault(format!("archive type already exists: {name}")));
        }
        let mut record = Map::new();
        for (field, kw_name) in [
            ("extensions", "extensions"),
            ("description", "description"),
            ("compression_type", "compression_type"),
        ] {
            if let Some(value) = Self::kw(call, kw_name) {
                record.insert(field.into(), value.clone());
            }
        }
        self.insert_record("archive-type", &name, record);
        Ok(Value::Null)
    }
}

impl Session for SnapshotHub {
    fn execute(
        &mut self,
        batch: &Batch,
        deadline: Option<Duration>,
    ) -> Result<BatchResults, SessionError> {
        if let (Some(latency), Some(deadline)) = (self.latency, deadline) {
            if latency > deadline {
                return Err(SessionError::DeadlineExceeded(deadline));
            }
        }
        let results = batch
            .calls()
            .iter()
            .map(|call| self.dispatch(call))
            .collect();
        Ok(BatchResults::new(results))
    }
}
