//! Deferred-update shadows.
//!
//! When the solver breaks a cycle it splits an object into a primary copy
//! (emitted in the current tier with its deferrable edges dropped) and a
//! shadow of kind `deferred-<kind>` that carries exactly the dropped slots.
//! The shadow depends on the primary and on every target of the dropped
//! edges, so it lands in a strictly later tier.

use serde_json::Value;

use crate::change::{CallDescriptor, Change, RemoteFault};
use crate::key::{Key, Origin};

use super::{Dependency, Object, ReadFailure, Slot};

/// An update-only shadow of a split object.
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredUpdate {
    object: Box<Object>,
    slots: Vec<Slot>,
}

impl DeferredUpdate {
    pub fn new(object: Object, slots: Vec<Slot>) -> Self {
        DeferredUpdate {
            object: Box::new(object),
            slots,
        }
    }

    /// The slots this shadow will reconcile.
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// The key of the primary object this shadow updates.
    pub fn primary_key(&self) -> Key {
        self.object.key()
    }

    pub fn key(&self) -> Key {
        self.object.key().deferred()
    }

    pub fn name(&self) -> &str {
        self.object.name()
    }

    pub fn origin(&self) -> &Origin {
        self.object.origin()
    }

    /// The primary, plus the targets of every dropped edge.
    pub fn dependency_keys(&self) -> Vec<Dependency> {
        let mut deps = vec![Dependency::new(self.primary_key(), Slot::Primary)];
        for dep in self.object.dependency_keys() {
            if self.slots.contains(&dep.slot) {
                deps.push(dep);
            }
        }
        deps
    }

    pub fn read_calls(&self) -> Vec<CallDescriptor> {
        self.object.read_calls()
    }

    pub fn diff(&self, observed: &[Result<Value, RemoteFault>]) -> Result<Vec<Change>, ReadFailure> {
        let only = Some(self.slots.as_slice());
        match self.object.as_ref() {
            Object::Tag(o) => o.diff(observed, only),
            Object::User(o) => o.diff(observed, only),
            Object::Group(o) => o.diff(observed, only),
            Object::Host(o) => o.diff(observed, only),
            Object::Channel(o) => o.diff(observed, only),
            Object::ContentGenerator(o) => o.diff(observed, only),
            // non-splittable kinds never produce shadows
            other => {
                debug_assert!(false, "deferred shadow over unsplittable kind {:?}", other.key());
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::parse_documents;
    use crate::models::Group;

    fn group_object(yaml: &str) -> Object {
        let docs = parse_documents(yaml, &Origin::new("groups.yaml", 0)).expect("parse");
        Object::Group(Group::from_doc(&docs[0]).expect("group"))
    }

    #[test]
    fn shadow_depends_on_primary_and_dropped_targets() {
        let object = group_object("type: group\nname: g\nmembers: [u1]\n");
        let (_, shadow) = object.split().expect("split");
        let deps = shadow.dependency_keys();
        assert!(deps
            .iter()
            .any(|d| d.key == Key::new("group", "g") && d.slot == Slot::Primary));
        assert!(deps.iter().any(|d| d.key == Key::new("user", "u1")));
        assert_eq!(shadow.key(), Key::new("deferred-group", "g"));
    }

    #[test]
    fn shadow_diff_covers_only_dropped_slots() {
        let object = group_object("type: group\nname: g\nmembers: [u1]\npermissions: [admin]\n");
        let (primary, shadow) = object.split().expect("split");

        let observed = vec![
            Ok(Value::Null),
            Ok(serde_json::json!([])),
            Ok(serde_json::json!([])),
        ];
        let primary_changes = primary.diff(&observed).expect("diff");
        assert_eq!(primary_changes.len(), 1, "primary only creates: {primary_changes:?}");

        let shadow_changes = shadow.diff(&observed).expect("diff");
        assert_eq!(shadow_changes.len(), 2, "shadow adds member and grant");
        assert!(shadow_changes
            .iter()
            .all(|c| !c.description.starts_with("Create group")));
    }
}
