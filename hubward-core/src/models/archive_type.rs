//! Archive type model. Like build types these are create-only remotely;
//! the hub offers no edit call once an archive type exists.

use serde::Deserialize;
use serde_json::{json, Value};
use serde_yaml::Mapping;

use crate::change::{CallDescriptor, Change, ChangeOp, RemoteFault};
use crate::error::CoreError;
use crate::key::Origin;
use crate::loader::RawDoc;

use super::tag::yaml_strings;
use super::{doc_field, from_mapping, parse_remote, read, ReadFailure};

/// Compression applied to archives of this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Tar,
    Zip,
}

impl Compression {
    fn as_str(&self) -> &'static str {
        match self {
            Compression::Tar => "tar",
            Compression::Zip => "zip",
        }
    }
}

/// A declared archive type.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArchiveType {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(rename = "compression-type", default)]
    pub compression: Option<Compression>,
    #[serde(skip)]
    pub origin: Origin,
}

impl ArchiveType {
    pub fn from_doc(doc: &RawDoc) -> Result<ArchiveType, CoreError> {
        doc.require_name()?;
        let mut atype: ArchiveType = from_mapping(doc)?;
        atype.origin = doc.origin.clone();

        // strip leading dots and dedup, keeping first occurrence
        let mut extensions: Vec<String> = Vec::new();
        for ext in &atype.extensions {
            let cleaned = ext.trim_start_matches('.').to_owned();
            if !extensions.contains(&cleaned) {
                extensions.push(cleaned);
            }
        }
        atype.extensions = extensions;
        Ok(atype)
    }

    pub fn read_calls(&self) -> Vec<CallDescriptor> {
        read_calls_for(&self.name)
    }

    pub fn diff(&self, observed: &[Result<Value, RemoteFault>]) -> Result<Vec<Change>, ReadFailure> {
        let remote: Option<RemoteArchiveType> = parse_remote(0, read(observed, 0)?)?;
        if remote.is_some() {
            // the hub cannot update archive types in place
            return Ok(Vec::new());
        }
        let mut call = CallDescriptor::new("addArchiveType")
            .arg(self.name.clone())
            .kw("extensions", json!(self.extensions));
        if let Some(description) = &self.description {
            call = call.kw("description", description.clone());
        }
        if let Some(compression) = &self.compression {
            call = call.kw("compression_type", compression.as_str());
        }
        Ok(vec![Change::new(
            ChangeOp::CreateObject,
            call,
            format!("Create archive type {}", self.name),
        )])
    }
}

#[derive(Debug, Deserialize)]
struct RemoteArchiveType {
    #[allow(dead_code)]
    id: i64,
    #[allow(dead_code)]
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    extensions: Vec<String>,
    #[serde(default)]
    compression_type: Option<String>,
}

pub(crate) fn read_calls_for(name: &str) -> Vec<CallDescriptor> {
    vec![CallDescriptor::new("getArchiveType").arg(name.to_owned())]
}

pub(crate) fn observed_doc(
    name: &str,
    observed: &[Result<Value, RemoteFault>],
    include_defaults: bool,
) -> Result<Option<Mapping>, ReadFailure> {
    use serde_yaml::Value as Y;

    let Some(remote) = parse_remote::<RemoteArchiveType>(0, read(observed, 0)?)? else {
        return Ok(None);
    };
    let mut doc = Mapping::new();
    doc.insert(Y::from("type"), Y::from("archive-type"));
    doc.insert(Y::from("name"), Y::from(name));
    if let Some(description) = remote.description {
        doc.insert(Y::from("description"), Y::from(description));
    }
    doc_field(
        &mut doc,
        include_defaults,
        "extensions",
        yaml_strings(&remote.extensions),
        remote.extensions.is_empty(),
    );
    if let Some(compression) = remote.compression_type {
        doc.insert(Y::from("compression-type"), Y::from(compression));
    }
    Ok(Some(doc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::parse_documents;

    fn atype_from(yaml: &str) -> ArchiveType {
        let docs = parse_documents(yaml, &Origin::new("at.yaml", 0)).expect("parse");
        ArchiveType::from_doc(&docs[0]).expect("archive type")
    }

    #[test]
    fn extensions_are_cleaned_and_deduped() {
        let atype = atype_from(
            "type: archive-type\nname: tarball\nextensions: ['.tar.gz', tar.gz, tgz]\n",
        );
        assert_eq!(atype.extensions, vec!["tar.gz", "tgz"]);
    }

    #[test]
    fn existing_archive_type_is_never_edited() {
        let atype = atype_from(
            "type: archive-type\nname: tarball\nextensions: [tgz]\ncompression-type: tar\n",
        );
        let observed = vec![Ok(json!({
            "id": 5, "name": "tarball", "extensions": ["different"],
        }))];
        assert!(atype.diff(&observed).expect("diff").is_empty());

        let changes = atype.diff(&[Ok(Value::Null)]).expect("diff");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].op, ChangeOp::CreateObject);
        assert!(changes[0].call.to_string().contains("compression_type"));
    }
}
