//! Build target model: a name bound to a build tag and a destination tag.

use serde::Deserialize;
use serde_json::Value;
use serde_yaml::Mapping;

use crate::change::{CallDescriptor, Change, ChangeOp, RemoteFault};
use crate::error::CoreError;
use crate::key::{Key, Origin};
use crate::loader::RawDoc;

use super::{from_mapping, parse_remote, read, Dependency, ReadFailure, Slot};

/// A declared build target. `dest-tag` defaults to the target's own name.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Target {
    pub name: String,
    #[serde(rename = "build-tag")]
    pub build_tag: String,
    #[serde(rename = "dest-tag", default)]
    pub dest_tag: Option<String>,
    #[serde(skip)]
    pub origin: Origin,
}

impl Target {
    pub fn from_doc(doc: &RawDoc) -> Result<Target, CoreError> {
        doc.require_name()?;
        let mut target: Target = from_mapping(doc)?;
        target.origin = doc.origin.clone();
        Ok(target)
    }

    /// The effective destination tag.
    pub fn dest(&self) -> &str {
        self.dest_tag.as_deref().unwrap_or(&self.name)
    }

    pub fn dependency_keys(&self) -> Vec<Dependency> {
        vec![
            Dependency::new(Key::new("tag", self.build_tag.clone()), Slot::BuildTag),
            Dependency::new(Key::new("tag", self.dest().to_owned()), Slot::DestTag),
        ]
    }

    pub fn read_calls(&self) -> Vec<CallDescriptor> {
        read_calls_for(&self.name)
    }

    pub fn diff(&self, observed: &[Result<Value, RemoteFault>]) -> Result<Vec<Change>, ReadFailure> {
        let remote: Option<RemoteTarget> = parse_remote(0, read(observed, 0)?)?;

        let Some(remote) = remote else {
            return Ok(vec![Change::new(
                ChangeOp::CreateObject,
                CallDescriptor::new("createBuildTarget")
                    .arg(self.name.clone())
                    .arg(self.build_tag.clone())
                    .arg(self.dest().to_owned()),
                format!(
                    "Create target {} with build tag {} and dest tag {}",
                    self.name,
                    self.build_tag,
                    self.dest()
                ),
            )
            .guarded_by(Key::new("tag", self.build_tag.clone()))]);
        };

        if remote.build_tag_name != self.build_tag || remote.dest_tag_name != self.dest() {
            return Ok(vec![Change::new(
                ChangeOp::SetField,
                CallDescriptor::new("editBuildTarget")
                    .arg(self.name.clone())
                    .arg(self.name.clone())
                    .arg(self.build_tag.clone())
                    .arg(self.dest().to_owned()),
                format!(
                    "Edit target {} to build tag {} and dest tag {}",
                    self.name,
                    self.build_tag,
                    self.dest()
                ),
            )]);
        }

        Ok(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
struct RemoteTarget {
    #[allow(dead_code)]
    id: i64,
    #[allow(dead_code)]
    name: String,
    build_tag_name: String,
    dest_tag_name: String,
}

pub(crate) fn read_calls_for(name: &str) -> Vec<CallDescriptor> {
    vec![CallDescriptor::new("getBuildTarget").arg(name.to_owned())]
}

pub(crate) fn observed_doc(
    name: &str,
    observed: &[Result<Value, RemoteFault>],
    include_defaults: bool,
) -> Result<Option<Mapping>, ReadFailure> {
    use serde_yaml::Value as Y;

    let Some(remote) = parse_remote::<RemoteTarget>(0, read(observed, 0)?)? else {
        return Ok(None);
    };
    let mut doc = Mapping::new();
    doc.insert(Y::from("type"), Y::from("target"));
    doc.insert(Y::from("name"), Y::from(name));
    doc.insert(Y::from("build-tag"), Y::from(remote.build_tag_name));
    if remote.dest_tag_name != name || include_defaults {
        doc.insert(Y::from("dest-tag"), Y::from(remote.dest_tag_name));
    }
    Ok(Some(doc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::parse_documents;
    use serde_json::json;

    fn target_from(yaml: &str) -> Target {
        let docs = parse_documents(yaml, &Origin::new("targets.yaml", 0)).expect("parse");
        Target::from_doc(&docs[0]).expect("target")
    }

    #[test]
    fn dest_tag_defaults_to_own_name() {
        let target = target_from("type: target\nname: f42\nbuild-tag: f42-build\n");
        assert_eq!(target.dest(), "f42");
        let deps = target.dependency_keys();
        assert!(deps.contains(&Dependency::new(Key::new("tag", "f42"), Slot::DestTag)));
    }

    #[test]
    fn missing_build_tag_is_a_validation_error() {
        let docs = parse_documents("type: target\nname: f42\n", &Origin::new("t.yaml", 0))
            .expect("parse");
        let err = Target::from_doc(&docs[0]).unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
    }

    #[test]
    fn absent_remote_creates_with_guard() {
        let target = target_from("type: target\nname: f42\nbuild-tag: f42-build\n");
        let changes = target.diff(&[Ok(Value::Null)]).expect("diff");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].op, ChangeOp::CreateObject);
        assert_eq!(changes[0].guard, Some(Key::new("tag", "f42-build")));
    }

    #[test]
    fn drifted_remote_is_edited() {
        let target = target_from("type: target\nname: f42\nbuild-tag: f42-build\n");
        let observed = vec![Ok(json!({
            "id": 1, "name": "f42",
            "build_tag_name": "old-build", "dest_tag_name": "f42",
        }))];
        let changes = target.diff(&observed).expect("diff");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].op, ChangeOp::SetField);
    }

    #[test]
    fn matching_remote_is_clean() {
        let target = target_from("type: target\nname: f42\nbuild-tag: f42-build\n");
        let observed = vec![Ok(json!({
            "id": 1, "name": "f42",
            "build_tag_name": "f42-build", "dest_tag_name": "f42",
        }))];
        assert!(target.diff(&observed).expect("diff").is_empty());
    }
}
