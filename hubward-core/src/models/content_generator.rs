//! Content generator model: a name plus the users allowed to import
//! through it.

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

/// A declared content generator.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContentGenerator {
    pub name: String,
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(rename = "exact-users", default)]
    pub exact_users: bool,
    #[serde(skip)]
    pub origin: Origin,
    #[serde(skip)]
    pub(crate) dropped: Vec<Slot>,
}

impl ContentGenerator {
    pub fn from_doc(doc: &RawDoc) -> Result<ContentGenerator, CoreError> {
        doc.require_name()?;
        let mut generator: ContentGenerator = from_mapping(doc)?;
        generator.origin = doc.origin.clone();
        Ok(generator)
    }

    pub fn dependency_keys(&self) -> Vec<Dependency> {
        self.users
            .iter()
            .map(|user| Dependency::new(Key::new("user", user.clone()), Slot::Users))
            .collect()
    }

    pub fn read_calls(&self) -> Vec<CallDescriptor> {
        read_calls_for(&self.name)
    }

    pub fn diff(
        &self,
        observed: &[Result<Value, RemoteFault>],
        only: Option<&[Slot]>,
    ) -> Result<Vec<Change>, ReadFailure> {
        let remote: Option<RemoteContentGenerator> = parse_remote(0, read(observed, 0)?)?;
        let users_active = slot_active(Slot::Users, &self.dropped, only);
        let mut changes = Vec::new();

        let Some(remote) = remote else {
            if only.is_none() {
                changes.extend(self.create());
            }
            if users_active {
                for user in &self.users {
                    changes.push(self.grant_access(user));
                }
            }
            return Ok(changes);
        };

        if users_active {
            for user in &self.users {
                if !remote.users.contains(user) {
                    changes.push(self.grant_access(user));
                }
            }
            if self.exact_users {
                for user in &remote.users {
                    if !self.users.contains(user) {
                        changes.push(self.revoke_access(user));
                    }
                }
            }
        }

        Ok(changes)
    }

    /// The hub has no standalone creation call for content generators: one
    /// comes into existence only as a side effect of granting it to a user.
    /// Grant it to the calling user (a null user resolves to the session's
    /// own account), then revoke that bootstrap grant.
    fn create(&self) -> [Change; 2] {
        [
            Change::new(
                ChangeOp::CreateObject,
                CallDescriptor::new("grantCGAccess")
                    .arg(Value::Null)
                    .arg(self.name.clone())
                    .kw("create", true),
                format!("Create content generator {}", self.name),
            ),
            Change::new(
                ChangeOp::RemoveMember,
                CallDescriptor::new("revokeCGAccess")
                    .arg(Value::Null)
                    .arg(self.name.clone()),
                "Revoke bootstrap cg-import from the calling user".to_owned(),
            ),
        ]
    }

    fn grant_access(&self, user: &str) -> Change {
        Change::new(
            ChangeOp::AddMember,
            CallDescriptor::new("grantCGAccess")
                .arg(user.to_owned())
                .arg(self.name.clone()),
            format!("Grant cg-import for user {user}"),
        )
        .guarded_by(Key::new("user", user.to_owned()))
    }

    fn revoke_access(&self, user: &str) -> Change {
        Change::new(
            ChangeOp::RemoveMember,
            CallDescriptor::new("revokeCGAccess")
                .arg(user.to_owned())
                .arg(self.name.clone()),
            format!("Revoke cg-import from user {user}"),
        )
    }
}

#[derive(Debug, Deserialize)]
struct RemoteContentGenerator {
    #[allow(dead_code)]
    id: i64,
    #[allow(dead_code)]
    name: String,
    #[serde(default)]
    users: Vec<String>,
}

pub(crate) fn read_calls_for(name: &str) -> Vec<CallDescriptor> {
    vec![CallDescriptor::new("getContentGenerator").arg(name.to_owned())]
}

pub(crate) fn observed_doc(
    name: &str,
    observed: &[Result<Value, RemoteFault>],
    include_defaults: bool,
) -> Result<Option<Mapping>, ReadFailure> {
    use serde_yaml::Value as Y;

    let Some(remote) = parse_remote::<RemoteContentGenerator>(0, read(observed, 0)?)? else {
        return Ok(None);
    };
    let mut doc = Mapping::new();
    doc.insert(Y::from("type"), Y::from("content-generator"));
    doc.insert(Y::from("name"), Y::from(name));
    doc_field(
        &mut doc,
        include_defaults,
        "users",
        yaml_strings(&remote.users),
        remote.users.is_empty(),
    );
    Ok(Some(doc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::parse_documents;
    use serde_json::json;

    #[test]
    fn creation_is_a_grant_then_revoke_pair() {
        let docs = parse_documents(
            "type: content-generator\nname: osbuild\nusers: [svc-osbuild]\n",
            &Origin::new("cg.yaml", 0),
        )
        .expect("parse");
        let generator = ContentGenerator::from_doc(&docs[0]).expect("generator");

        let changes = generator.diff(&[Ok(Value::Null)], None).expect("diff");
        let methods: Vec<&str> = changes.iter().map(|c| c.call.method.as_str()).collect();
        assert_eq!(methods, vec!["grantCGAccess", "revokeCGAccess", "grantCGAccess"]);

        // the bootstrap grant creates as a side effect, addressed to the
        // session's own user
        assert_eq!(changes[0].op, ChangeOp::CreateObject);
        assert_eq!(changes[0].call.args[0], Value::Null);
        assert_eq!(changes[0].call.kwargs.get("create"), Some(&Value::from(true)));
        assert_eq!(changes[1].call.args[0], Value::Null);
        // the declared user's grant is a plain member add
        assert_eq!(changes[2].call.args[0], Value::from("svc-osbuild"));
        assert!(changes[2].call.kwargs.get("create").is_none());
    }

    #[test]
    fn user_grants_follow_exactness() {
        let docs = parse_documents(
            "type: content-generator\nname: osbuild\nusers: [svc-osbuild]\nexact-users: true\n",
            &Origin::new("cg.yaml", 0),
        )
        .expect("parse");
        let generator = ContentGenerator::from_doc(&docs[0]).expect("generator");

        let observed = vec![Ok(json!({
            "id": 3, "name": "osbuild", "users": ["legacy-bot"],
        }))];
        let changes = generator.diff(&observed, None).expect("diff");
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().any(|c| c.op == ChangeOp::AddMember));
        assert!(changes.iter().any(|c| c.op == ChangeOp::RemoveMember));
    }
}
