//! Typed write operations produced by diffing desired against observed state.
//!
//! A [`Change`] pairs an operation tag with the remote call that implements
//! it and a human-readable description. Changes are created during the
//! compare phase and carry their own lifecycle: pending until a write batch
//! settles them, then applied, failed, skipped, or (in compare-only mode)
//! would-apply.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::key::Key;

/// A remote-side failure for a single call in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteFault {
    pub message: String,
}

impl RemoteFault {
    pub fn new(message: impl Into<String>) -> Self {
        RemoteFault {
            message: message.into(),
        }
    }
}

impl fmt::Display for RemoteFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for RemoteFault {}

/// An opaque remote call: method name, positional args, named args.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallDescriptor {
    pub method: String,
    pub args: Vec<Value>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub kwargs: Map<String, Value>,
}

impl CallDescriptor {
    pub fn new(method: impl Into<String>) -> Self {
        CallDescriptor {
            method: method.into(),
            args: Vec::new(),
            kwargs: Map::new(),
        }
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn kw(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.to_owned(), value.into());
        self
    }
}

impl fmt::Display for CallDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.method)?;
        let mut first = true;
        for arg in &self.args {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{arg}")?;
        }
        for (key, value) in &self.kwargs {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{key}={value}")?;
        }
        write!(f, ")")
    }
}

/// The category of a write operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeOp {
    CreateObject,
    SetField,
    SetInheritance,
    AddLink,
    UpdateLink,
    RemoveLink,
    AddMember,
    RemoveMember,
    SetPermissionGrant,
    RevokePermissionGrant,
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            ChangeOp::CreateObject => "create-object",
            ChangeOp::SetField => "set-field",
            ChangeOp::SetInheritance => "set-inheritance",
            ChangeOp::AddLink => "add-link",
            ChangeOp::UpdateLink => "update-link",
            ChangeOp::RemoveLink => "remove-link",
            ChangeOp::AddMember => "add-member",
            ChangeOp::RemoveMember => "remove-member",
            ChangeOp::SetPermissionGrant => "set-permission-grant",
            ChangeOp::RevokePermissionGrant => "revoke-permission-grant",
        };
        f.write_str(tag)
    }
}

/// Lifecycle of a single change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "state", content = "detail")]
pub enum ChangeState {
    /// Created by compare, not yet submitted.
    Pending,
    /// Compare-only mode: the change was identified but never submitted.
    WouldApply,
    /// The write call succeeded.
    Applied,
    /// The change was skipped (phantom-dependent under skip-phantoms).
    Skipped,
    /// The write call failed; carries the remote fault text.
    Failed(String),
}

/// A single typed write operation against the remote.
///
/// `guard` names a dependency this change cannot succeed without. Under the
/// skip-phantoms policy, a change whose guard resolves to a phantom is
/// skipped instead of submitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Change {
    pub op: ChangeOp,
    pub call: CallDescriptor,
    pub description: String,
    pub state: ChangeState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guard: Option<Key>,
}

impl Change {
    pub fn new(op: ChangeOp, call: CallDescriptor, description: impl Into<String>) -> Self {
        Change {
            op,
            call,
            description: description.into(),
            state: ChangeState::Pending,
            guard: None,
        }
    }

    pub fn guarded_by(mut self, key: Key) -> Self {
        self.guard = Some(key);
        self
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.op, self.description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn descriptor_display() {
        let call = CallDescriptor::new("createTag")
            .arg("f42-build")
            .kw("locked", false);
        assert_eq!(call.to_string(), "createTag(\"f42-build\", locked=false)");
    }

    #[test]
    fn change_starts_pending() {
        let change = Change::new(
            ChangeOp::CreateObject,
            CallDescriptor::new("createTag").arg("x"),
            "Create tag x",
        );
        assert_eq!(change.state, ChangeState::Pending);
        assert_eq!(change.to_string(), "[create-object] Create tag x");
    }

    #[test]
    fn descriptor_serializes_without_empty_kwargs() {
        let call = CallDescriptor::new("getTag").arg("a");
        let value = serde_json::to_value(&call).unwrap();
        assert_eq!(value, json!({"method": "getTag", "args": ["a"]}));
    }
}
