//! Permission model.

use serde::Deserialize;
use serde_json::Value;
use serde_yaml::Mapping;

use crate::change::{CallDescriptor, Change, ChangeOp, RemoteFault};
use crate::error::CoreError;
use crate::key::Origin;
use crate::loader::RawDoc;

use super::{from_mapping, parse_remote, read, ReadFailure};

/// A declared permission.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Permission {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(skip)]
    pub origin: Origin,
}

impl Permission {
    pub fn from_doc(doc: &RawDoc) -> Result<Permission, CoreError> {
        doc.require_name()?;
        let mut permission: Permission = from_mapping(doc)?;
        permission.origin = doc.origin.clone();
        Ok(permission)
    }

    pub fn read_calls(&self) -> Vec<CallDescriptor> {
        read_calls_for(&self.name)
    }

    pub fn diff(&self, observed: &[Result<Value, RemoteFault>]) -> Result<Vec<Change>, ReadFailure> {
        let remote: Option<RemotePermission> = parse_remote(0, read(observed, 0)?)?;

        let Some(remote) = remote else {
            let mut call = CallDescriptor::new("createPermission").arg(self.name.clone());
            if let Some(description) = &self.description {
                call = call.kw("description", description.clone());
            }
            return Ok(vec![Change::new(
                ChangeOp::CreateObject,
                call,
                format!("Create permission {}", self.name),
            )]);
        };

        if self.description.is_some() && remote.description != self.description {
            let description = self.description.clone().unwrap_or_default();
            return Ok(vec![Change::new(
                ChangeOp::SetField,
                CallDescriptor::new("editPermission")
                    .arg(self.name.clone())
                    .kw("description", description.clone()),
                format!("Set description to '{description}'"),
            )]);
        }
        Ok(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
struct RemotePermission {
    #[allow(dead_code)]
    id: i64,
    #[allow(dead_code)]
    name: String,
    #[serde(default)]
    description: Option<String>,
}

pub(crate) fn read_calls_for(name: &str) -> Vec<CallDescriptor> {
    vec![CallDescriptor::new("getPermission").arg(name.to_owned())]
}

pub(crate) fn observed_doc(
    name: &str,
    observed: &[Result<Value, RemoteFault>],
    _include_defaults: bool,
) -> Result<Option<Mapping>, ReadFailure> {
    use serde_yaml::Value as Y;

    let Some(remote) = parse_remote::<RemotePermission>(0, read(observed, 0)?)? else {
        return Ok(None);
    };
    let mut doc = Mapping::new();
    doc.insert(Y::from("type"), Y::from("permission"));
    doc.insert(Y::from("name"), Y::from(name));
    if let Some(description) = remote.description {
        doc.insert(Y::from("description"), Y::from(description));
    }
    Ok(Some(doc))
}
