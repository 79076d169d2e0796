//! External repository model: a name and an http(s) URL.

use serde::Deserialize;
use serde_json::Value;
use serde_yaml::Mapping;

use crate::change::{CallDescriptor, Change, ChangeOp, RemoteFault};
use crate::error::CoreError;
use crate::key::Origin;
use crate::loader::RawDoc;

use super::{from_mapping, parse_remote, read, ReadFailure};

/// A declared external repository.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExternalRepo {
    pub name: String,
    pub url: String,
    #[serde(skip)]
    pub origin: Origin,
}

impl ExternalRepo {
    pub fn from_doc(doc: &RawDoc) -> Result<ExternalRepo, CoreError> {
        doc.require_name()?;
        let mut repo: ExternalRepo = from_mapping(doc)?;
        repo.origin = doc.origin.clone();
        if !repo.url.starts_with("http://") && !repo.url.starts_with("https://") {
            return Err(CoreError::validation(
                "external-repo",
                &repo.name,
                &repo.origin,
                format!("url must start with http:// or https://, got '{}'", repo.url),
            ));
        }
        Ok(repo)
    }

    pub fn read_calls(&self) -> Vec<CallDescriptor> {
        read_calls_for(&self.name)
    }

    pub fn diff(&self, observed: &[Result<Value, RemoteFault>]) -> Result<Vec<Change>, ReadFailure> {
        let remote: Option<RemoteRepo> = parse_remote(0, read(observed, 0)?)?;

        let Some(remote) = remote else {
            return Ok(vec![Change::new(
                ChangeOp::CreateObject,
                CallDescriptor::new("createExternalRepo")
                    .arg(self.name.clone())
                    .arg(self.url.clone()),
                format!("Create external repo {} with URL {}", self.name, self.url),
            )]);
        };

        if remote.url != self.url {
            return Ok(vec![Change::new(
                ChangeOp::SetField,
                CallDescriptor::new("editExternalRepo")
                    .arg(self.name.clone())
                    .kw("url", self.url.clone()),
                format!("Set URL to {}", self.url),
            )]);
        }
        Ok(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
struct RemoteRepo {
    #[allow(dead_code)]
    id: i64,
    #[allow(dead_code)]
    name: String,
    url: String,
}

pub(crate) fn read_calls_for(name: &str) -> Vec<CallDescriptor> {
    vec![CallDescriptor::new("getExternalRepo").arg(name.to_owned())]
}

pub(crate) fn observed_doc(
    name: &str,
    observed: &[Result<Value, RemoteFault>],
    _include_defaults: bool,
) -> Result<Option<Mapping>, ReadFailure> {
    use serde_yaml::Value as Y;

    let Some(remote) = parse_remote::<RemoteRepo>(0, read(observed, 0)?)? else {
        return Ok(None);
    };
    let mut doc = Mapping::new();
    doc.insert(Y::from("type"), Y::from("external-repo"));
    doc.insert(Y::from("name"), Y::from(name));
    doc.insert(Y::from("url"), Y::from(remote.url));
    Ok(Some(doc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::parse_documents;
    use serde_json::json;

    #[test]
    fn rejects_non_http_url() {
        let docs = parse_documents(
            "type: external-repo\nname: epel\nurl: ftp://example.com/repo\n",
            &Origin::new("repos.yaml", 0),
        )
        .expect("parse");
        let err = ExternalRepo::from_doc(&docs[0]).unwrap_err();
        assert!(err.to_string().contains("http"));
    }

    #[test]
    fn url_drift_produces_set_field() {
        let docs = parse_documents(
            "type: external-repo\nname: epel\nurl: https://example.com/new\n",
            &Origin::new("repos.yaml", 0),
        )
        .expect("parse");
        let repo = ExternalRepo::from_doc(&docs[0]).expect("repo");

        let absent = repo.diff(&[Ok(Value::Null)]).expect("diff");
        assert_eq!(absent[0].op, ChangeOp::CreateObject);

        let observed = vec![Ok(json!({
            "id": 4, "name": "epel", "url": "https://example.com/old",
        }))];
        let changes = repo.diff(&observed).expect("diff");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].op, ChangeOp::SetField);
        assert!(changes[0].call.to_string().contains("editExternalRepo"));
    }
}
