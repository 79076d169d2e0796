//! Group model: members, permission grants, and the enabled flag.
//!
//! Groups and users reference each other at the declaration level, which is
//! the canonical source of cycles outside tag inheritance; both member and
//! permission slots are deferrable.

use serde::Deserialize;
use serde_json::Value;
use serde_yaml::Mapping;

use crate::change::{CallDescriptor, Change, ChangeOp, RemoteFault};
use crate::error::CoreError;
use crate::key::{Key, Origin};
use crate::loader::RawDoc;

use super::tag::yaml_strings;
use super::{
    doc_field, from_mapping, parse_remote, read, slot_active, Dependency, ReadFailure, Slot,
};

/// A declared group.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Group {
    pub name: String,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(rename = "exact-members", default)]
    pub exact_members: bool,
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

impl Group {
    pub fn from_doc(doc: &RawDoc) -> Result<Group, CoreError> {
        doc.require_name()?;
        let mut group: Group = from_mapping(doc)?;
        group.origin = doc.origin.clone();
        Ok(group)
    }

    pub fn dependency_keys(&self) -> Vec<Dependency> {
        let mut deps = Vec::new();
        for member in &self.members {
            deps.push(Dependency::new(Key::new("user", member.clone()), Slot::Members));
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
        let remote: Option<RemoteGroup> = parse_remote(0, read(observed, 0)?)?;
        let mut changes = Vec::new();

        let Some(remote) = remote else {
            if only.is_none() {
                changes.push(self.create());
            }
            if self.active(Slot::Members, only) {
                for member in &self.members {
                    changes.push(self.add_member(member));
                }
            }
            if self.active(Slot::Permissions, only) {
                for permission in &self.permissions {
                    changes.push(self.grant_permission(permission));
                }
            }
            return Ok(changes);
        };

        if only.is_none() && remote.enabled != self.enabled {
            changes.push(self.set_enabled());
        }

        if self.active(Slot::Members, only) {
            let remote_members: Vec<String> = parse_remote(1, read(observed, 1)?)?
                .unwrap_or_default();
            for member in &self.members {
                if !remote_members.contains(member) {
                    changes.push(self.add_member(member));
                }
            }
            if self.exact_members {
                for member in &remote_members {
                    if !self.members.contains(member) {
                        changes.push(self.remove_member(member));
                    }
                }
            }
        }

        if self.active(Slot::Permissions, only) {
            let remote_perms: Vec<String> = parse_remote(2, read(observed, 2)?)?
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
            CallDescriptor::new("newGroup").arg(self.name.clone()),
            format!("Create group {}", self.name),
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
            format!("{verb} group"),
        )
    }

    fn add_member(&self, member: &str) -> Change {
        Change::new(
            ChangeOp::AddMember,
            CallDescriptor::new("addGroupMember")
                .arg(self.name.clone())
                .arg(member.to_owned()),
            format!("Add member {member}"),
        )
        .guarded_by(Key::new("user", member.to_owned()))
    }

    fn remove_member(&self, member: &str) -> Change {
        Change::new(
            ChangeOp::RemoveMember,
            CallDescriptor::new("dropGroupMember")
                .arg(self.name.clone())
                .arg(member.to_owned()),
            format!("Remove member {member}"),
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
}

#[derive(Debug, Deserialize)]
struct RemoteGroup {
    #[allow(dead_code)]
    id: i64,
    #[allow(dead_code)]
    name: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

pub(crate) fn read_calls_for(name: &str) -> Vec<CallDescriptor> {
    vec![
        CallDescriptor::new("getGroup").arg(name.to_owned()),
        CallDescriptor::new("getGroupMembers").arg(name.to_owned()),
        CallDescriptor::new("getUserPerms").arg(name.to_owned()),
    ]
}

pub(crate) fn observed_doc(
    name: &str,
    observed: &[Result<Value, RemoteFault>],
    include_defaults: bool,
) -> Result<Option<Mapping>, ReadFailure> {
    use serde_yaml::Value as Y;

    let Some(remote) = parse_remote::<RemoteGroup>(0, read(observed, 0)?)? else {
        return Ok(None);
    };
    let members: Vec<String> = parse_remote(1, read(observed, 1)?)?.unwrap_or_default();
    let permissions: Vec<String> = parse_remote(2, read(observed, 2)?)?.unwrap_or_default();

    let mut doc = Mapping::new();
    doc.insert(Y::from("type"), Y::from("group"));
    doc.insert(Y::from("name"), Y::from(name));
    doc_field(&mut doc, include_defaults, "enabled", remote.enabled, remote.enabled);
    doc_field(
        &mut doc,
        include_defaults,
        "members",
        yaml_strings(&members),
        members.is_empty(),
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

    fn group_from(yaml: &str) -> Group {
        let docs = parse_documents(yaml, &Origin::new("groups.yaml", 0)).expect("parse");
        Group::from_doc(&docs[0]).expect("group")
    }

    #[test]
    fn exact_members_add_and_remove() {
        let group = group_from(
            "type: group\nname: g\nmembers: [u1, u2]\nexact-members: true\n",
        );
        let observed = vec![
            Ok(json!({"id": 2, "name": "g", "enabled": true})),
            Ok(json!(["u2", "u3"])),
            Ok(json!([])),
        ];
        let changes = group.diff(&observed, None).expect("diff");
        assert_eq!(changes.len(), 2);
        assert!(changes
            .iter()
            .any(|c| c.op == ChangeOp::AddMember && c.description.contains("u1")));
        assert!(changes
            .iter()
            .any(|c| c.op == ChangeOp::RemoveMember && c.description.contains("u3")));
    }

    #[test]
    fn lax_members_never_remove() {
        let group = group_from("type: group\nname: g\nmembers: [u1, u2]\n");
        let observed = vec![
            Ok(json!({"id": 2, "name": "g", "enabled": true})),
            Ok(json!(["u2", "u3"])),
            Ok(json!([])),
        ];
        let changes = group.diff(&observed, None).expect("diff");
        assert!(changes.iter().all(|c| c.op != ChangeOp::RemoveMember));
    }

    #[test]
    fn absent_remote_creates_and_populates() {
        let group = group_from("type: group\nname: g\nmembers: [u1]\npermissions: [admin]\n");
        let observed = vec![Ok(Value::Null), Ok(json!([])), Ok(json!([]))];
        let changes = group.diff(&observed, None).expect("diff");
        assert_eq!(changes[0].op, ChangeOp::CreateObject);
        assert_eq!(changes.len(), 3);
    }
}
