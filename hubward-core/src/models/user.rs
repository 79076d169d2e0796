//! User model: group membership, permission grants, and the enabled flag.

use serde::Deserialize;
use serde_json::Value;
use serde_yaml::Mapping;

use crate::change::{CallDescriptor, Change, ChangeOp, RemoteFault};
use crate::error::CoreError;
use crate::key::{Key, Origin};
use crate::loader::RawDoc;

use super::{
    doc_field, from_mapping, parse_remote, read, slot_active, Dependency, ReadFailure, Slot,
};
use super::tag::yaml_strings;

/// A declared user account.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct User {
    pub name: String,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(rename = "exact-groups", default)]
    pub exact_groups: bool,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(rename = "exact-permissions", default)]
    pub exact_permissions: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(skip)]
    pub origin: Origin,
    #[serde(skip)]
    pub(crate) dropped: Vec<Slot>,
}

fn default_enabled() -> bool {
    true
}

impl User {
    pub fn from_doc(doc: &RawDoc) -> Result<User, CoreError> {
        doc.require_name()?;
        let mut user: User = from_mapping(doc)?;
        user.origin = doc.origin.clone();
        Ok(user)
    }

    pub fn dependency_keys(&self) -> Vec<Dependency> {
        let mut deps = Vec::new();
        for group in &self.groups {
            deps.push(Dependency::new(Key::new("group", group.clone()), Slot::Groups));
        }
        for permission in &self.permissions {
            deps.push(Dependency::new(
                Key::new("permission", permission.clone()),
                Slot::Permissions,
            ));
        }
        deps
    }

    pub fn read_calls(&self) -> Vec<CallDescriptor> {
        read_calls_for(&self.name)
    }

    fn active(&self, slot: Slot, only: Option<&[Slot]>) -> bool {
        slot_active(slot, &self.dropped, only)
    }

    pub fn diff(
        &self,
        observed: &[Result<Value, RemoteFault>],
        only: Option<&[Slot]>,
    ) -> Result<Vec<Change>, ReadFailure> {
        let remote: Option<RemoteUser> = parse_remote(0, read(observed, 0)?)?;
        let mut changes = Vec::new();

        let Some(remote) = remote else {
            if only.is_none() {
                changes.push(self.create());
            }
            if self.active(Slot::Permissions, only) {
                for permission in &self.permissions {
                    changes.push(self.grant_permission(permission));
                }
            }
            if self.active(Slot::Groups, only) {
                for group in &self.groups {
                    changes.push(self.add_to_group(group));
                }
            }
            return Ok(changes);
        };

        if only.is_none() && remote.enabled != self.enabled {
            changes.push(self.set_enabled());
        }

        if self.active(Slot::Groups, only) {
            for group in &self.groups {
                if !remote.groups.contains(group) {
                    changes.push(self.add_to_group(group));
                }
            }
            if self.exact_groups {
                for group in &remote.groups {
                    if !self.groups.contains(group) {
                        changes.push(self.remove_from_group(group));
                    }
                }
            }
        }

        if self.active(Slot::Permissions, only) {
            let remote_perms: Vec<String> = parse_remote(1, read(observed, 1)?)?
                .unwrap_or_default();
            for permission in &self.permissions {
                if !remote_perms.contains(permission) {
                    changes.push(self.grant_permission(permission));
                }
            }
            if self.exact_permissions {
                for permission in &remote_perms {
                    if !self.permissions.contains(permission) {
                        changes.push(self.revoke_permission(permission));
                    }
                }
            }
        }

        Ok(changes)
    }

    fn create(&self) -> Change {
        Change::new(
            ChangeOp::CreateObject,
            CallDescriptor::new("createUser")
                .arg(self.name.clone())
                .kw("enabled", self.enabled),
            format!("Create user {}", self.name),
        )
    }

    fn set_enabled(&self) -> Change {
        let (method, verb) = if self.enabled {
            ("enableUser", "Enable")
        } else {
            ("disableUser", "Disable")
        };
        Change::new(
            ChangeOp::SetField,
            CallDescriptor::new(method).arg(self.name.clone()),
            format!("{verb} user"),
        )
    }

    fn grant_permission(&self, permission: &str) -> Change {
        Change::new(
            ChangeOp::SetPermissionGrant,
            CallDescriptor::new("grantPermission")
                .arg(self.name.clone())
                .arg(permission.to_owned()),
            format!("Grant permission {permission}"),
        )
        .guarded_by(Key::new("permission", permission.to_owned()))
    }

    fn revoke_permission(&self, permission: &str) -> Change {
        Change::new(
            ChangeOp::RevokePermissionGrant,
            CallDescriptor::new("revokePermission")
                .arg(self.name.clone())
                .arg(permission.to_owned()),
            format!("Revoke permission {permission}"),
        )
    }

    fn add_to_group(&self, group: &str) -> Change {
        Change::new(
            ChangeOp::AddMember,
            CallDescriptor::new("addGroupMember")
                .arg(group.to_owned())
                .arg(self.name.clone()),
            format!("Add to group {group}"),
        )
        .guarded_by(Key::new("group", group.to_owned()))
    }

    fn remove_from_group(&self, group: &str) -> Change {
        Change::new(
            ChangeOp::RemoveMember,
            CallDescriptor::new("dropGroupMember")
                .arg(group.to_owned())
                .arg(self.name.clone()),
            format!("Remove from group {group}"),
        )
    }
}

#[derive(Debug, Deserialize)]
struct RemoteUser {
    #[allow(dead_code)]
    id: i64,
    #[allow(dead_code)]
    name: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    groups: Vec<String>,
}

pub(crate) fn read_calls_for(name: &str) -> Vec<CallDescriptor> {
    vec![
        CallDescriptor::new("getUser")
            .arg(name.to_owned())
            .kw("groups", true),
        CallDescriptor::new("getUserPerms").arg(name.to_owned()),
    ]
}

pub(crate) fn observed_doc(
    name: &str,
    observed: &[Result<Value, RemoteFault>],
    include_defaults: bool,
) -> Result<Option<Mapping>, ReadFailure> {
    use serde_yaml::Value as Y;

    let Some(remote) = parse_remote::<RemoteUser>(0, read(observed, 0)?)? else {
        return Ok(None);
    };
    let permissions: Vec<String> = parse_remote(1, read(observed, 1)?)?.unwrap_or_default();

    let mut doc = Mapping::new();
    doc.insert(Y::from("type"), Y::from("user"));
    doc.insert(Y::from("name"), Y::from(name));
    doc_field(&mut doc, include_defaults, "enabled", remote.enabled, remote.enabled);
    doc_field(
        &mut doc,
        include_defaults,
        "groups",
        yaml_strings(&remote.groups),
        remote.groups.is_empty(),
    );
    doc_field(
        &mut doc,
        include_defaults,
        "permissions",
        yaml_strings(&permissions),
        permissions.is_empty(),
    );
    Ok(Some(doc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::parse_documents;
    use serde_json::json;

    fn user_from(yaml: &str) -> User {
        let docs = parse_documents(yaml, &Origin::new("users.yaml", 0)).expect("parse");
        User::from_doc(&docs[0]).expect("user")
    }

    #[test]
    fn enabled_defaults_to_true() {
        let user = user_from("type: user\nname: walter\n");
        assert!(user.enabled);
    }

    #[test]
    fn exact_groups_removes_observed_extras() {
        let user = user_from("type: user\nname: walter\ngroups: [build]\nexact-groups: true\n");
        let observed = vec![
            Ok(json!({"id": 9, "name": "walter", "enabled": true, "groups": ["build", "stale"]})),
            Ok(json!([])),
        ];
        let changes = user.diff(&observed, None).expect("diff");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].op, ChangeOp::RemoveMember);
        assert!(changes[0].description.contains("stale"));
    }

    #[test]
    fn lax_groups_only_add() {
        let user = user_from("type: user\nname: walter\ngroups: [build]\n");
        let observed = vec![
            Ok(json!({"id": 9, "name": "walter", "enabled": true, "groups": ["stale"]})),
            Ok(json!([])),
        ];
        let changes = user.diff(&observed, None).expect("diff");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].op, ChangeOp::AddMember);
    }

    #[test]
    fn permission_grants_are_guarded() {
        let user = user_from("type: user\nname: walter\npermissions: [admin]\n");
        let changes = user.diff(&[Ok(Value::Null), Ok(json!([]))], None).expect("diff");
        let grant = changes
            .iter()
            .find(|c| c.op == ChangeOp::SetPermissionGrant)
            .expect("grant change");
        assert_eq!(grant.guard, Some(Key::new("permission", "admin")));
    }

    #[test]
    fn disable_when_remote_enabled() {
        let user = user_from("type: user\nname: walter\nenabled: false\n");
        let observed = vec![
            Ok(json!({"id": 9, "name": "walter", "enabled": true, "groups": []})),
            Ok(json!([])),
        ];
        let changes = user.diff(&observed, None).expect("diff");
        assert_eq!(changes.len(), 1);
        assert!(changes[0].call.to_string().contains("disableUser"));
    }
}
