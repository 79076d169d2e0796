//! Build type model. Build types are create-only on the remote side.

use serde::Deserialize;
use serde_json::Value;
use serde_yaml::Mapping;

use crate::change::{CallDescriptor, Change, ChangeOp, RemoteFault};
use crate::error::CoreError;
use crate::key::Origin;
use crate::loader::RawDoc;

use super::{from_mapping, parse_remote, read, ReadFailure};

/// A declared build type.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildType {
    pub name: String,
    #[serde(skip)]
    pub origin: Origin,
}

impl BuildType {
    pub fn from_doc(doc: &RawDoc) -> Result<BuildType, CoreError> {
        doc.require_name()?;
        let mut btype: BuildType = from_mapping(doc)?;
        btype.origin = doc.origin.clone();
        Ok(btype)
    }

    pub fn read_calls(&self) -> Vec<CallDescriptor> {
        read_calls_for(&self.name)
    }

    pub fn diff(&self, observed: &[Result<Value, RemoteFault>]) -> Result<Vec<Change>, ReadFailure> {
        let remote: Option<RemoteBuildType> = parse_remote(0, read(observed, 0)?)?;
        if remote.is_some() {
            return Ok(Vec::new());
        }
        Ok(vec![Change::new(
            ChangeOp::CreateObject,
            CallDescriptor::new("addBType").arg(self.name.clone()),
            format!("Create build type {}", self.name),
        )])
    }
}

#[derive(Debug, Deserialize)]
struct RemoteBuildType {
    #[allow(dead_code)]
    id: i64,
    #[allow(dead_code)]
    name: String,
}

pub(crate) fn read_calls_for(name: &str) -> Vec<CallDescriptor> {
    vec![CallDescriptor::new("getBType").arg(name.to_owned())]
}

pub(crate) fn observed_doc(
    name: &str,
    observed: &[Result<Value, RemoteFault>],
    _include_defaults: bool,
) -> Result<Option<Mapping>, ReadFailure> {
    use serde_yaml::Value as Y;

    if parse_remote::<RemoteBuildType>(0, read(observed, 0)?)?.is_none() {
        return Ok(None);
    }
    let mut doc = Mapping::new();
    doc.insert(Y::from("type"), Y::from("build-type"));
    doc.insert(Y::from("name"), Y::from(name));
    Ok(Some(doc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::parse_documents;
    use serde_json::json;

    #[test]
    fn existing_build_type_is_clean() {
        let docs = parse_documents("type: build-type\nname: rpm\n", &Origin::new("bt.yaml", 0))
            .expect("parse");
        let btype = BuildType::from_doc(&docs[0]).expect("build type");

        let absent = btype.diff(&[Ok(Value::Null)]).expect("diff");
        assert_eq!(absent.len(), 1);
        assert_eq!(absent[0].op, ChangeOp::CreateObject);

        let present = btype
            .diff(&[Ok(json!({"id": 1, "name": "rpm"}))])
            .expect("diff");
        assert!(present.is_empty());
    }
}
