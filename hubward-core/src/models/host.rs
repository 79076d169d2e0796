//! Build host model: arches, capacity, channels.

use serde::Deserialize;
use serde_json::{json, Value};
use serde_yaml::Mapping;

use crate::change::{CallDescriptor, Change, ChangeOp, RemoteFault};
use crate::error::CoreError;
use crate::key::{Key, Origin};
use crate::loader::RawDoc;

use super::tag::{same_arch_set, yaml_strings};
use super::{
    doc_field, from_mapping, parse_remote, read, slot_active, Dependency, ReadFailure, Slot,
};

/// A declared build host.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Host {
    pub name: String,
    #[serde(default)]
    pub arches: Vec<String>,
    #[serde(default)]
    pub capacity: Option<f64>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(rename = "exact-channels", default)]
    pub exact_channels: bool,
    #[serde(skip)]
    pub origin: Origin,
    #[serde(skip)]
    pub(crate) dropped: Vec<Slot>,
}

fn default_enabled() -> bool {
    true
}

impl Host {
    pub fn from_doc(doc: &RawDoc) -> Result<Host, CoreError> {
        doc.require_name()?;
        let mut host: Host = from_mapping(doc)?;
        host.origin = doc.origin.clone();
        Ok(host)
    }

    pub fn dependency_keys(&self) -> Vec<Dependency> {
        self.channels
            .iter()
            .map(|channel| Dependency::new(Key::new("channel", channel.clone()), Slot::Channels))
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
        let remote: Option<RemoteHost> = parse_remote(0, read(observed, 0)?)?;
        let channels_active = slot_active(Slot::Channels, &self.dropped, only);
        let base = only.is_none();
        let mut changes = Vec::new();

        let Some(remote) = remote else {
            if base {
                changes.push(self.create());
                if let Some(capacity) = self.capacity {
                    changes.push(self.set_capacity(capacity));
                }
                if let Some(description) = &self.description {
                    changes.push(self.set_description(description));
                }
                if !self.enabled {
                    changes.push(self.set_enabled());
                }
            }
            if channels_active {
                for channel in &self.channels {
                    changes.push(self.add_channel(channel));
                }
            }
            return Ok(changes);
        };

        if base {
            if !same_arch_set(&remote.arches, &self.arches) {
                changes.push(self.set_arches());
            }
            if let Some(capacity) = self.capacity {
                if remote.capacity != capacity {
                    changes.push(self.set_capacity(capacity));
                }
            }
            if remote.enabled != self.enabled {
                changes.push(self.set_enabled());
            }
            if let Some(description) = &self.description {
                if remote.description.as_deref() != Some(description.as_str()) {
                    changes.push(self.set_description(description));
                }
            }
        }

        if channels_active {
            let remote_channels: Vec<String> = parse_remote(1, read(observed, 1)?)?
                .unwrap_or_default();
            for channel in &self.channels {
                if !remote_channels.contains(channel) {
                    changes.push(self.add_channel(channel));
                }
            }
            if self.exact_channels {
                for channel in &remote_channels {
                    if !self.channels.contains(channel) {
                        changes.push(self.remove_channel(channel));
                    }
                }
            }
        }

        Ok(changes)
    }

    fn create(&self) -> Change {
        Change::new(
            ChangeOp::CreateObject,
            CallDescriptor::new("addHost")
                .arg(self.name.clone())
                .arg(json!(self.arches)),
            format!("Create host {}", self.name),
        )
    }

    fn edit(&self) -> CallDescriptor {
        CallDescriptor::new("editHost").arg(self.name.clone())
    }

    fn set_arches(&self) -> Change {
        Change::new(
            ChangeOp::SetField,
            self.edit().kw("arches", json!(self.arches)),
            format!("Set arches to [{}]", self.arches.join(", ")),
        )
    }

    fn set_capacity(&self, capacity: f64) -> Change {
        Change::new(
            ChangeOp::SetField,
            self.edit().kw("capacity", capacity),
            format!("Set capacity to {capacity}"),
        )
    }

    fn set_enabled(&self) -> Change {
        let verb = if self.enabled { "Enable" } else { "Disable" };
        Change::new(
            ChangeOp::SetField,
            self.edit().kw("enabled", self.enabled),
            format!("{verb} host"),
        )
    }

    fn set_description(&self, description: &str) -> Change {
        Change::new(
            ChangeOp::SetField,
            self.edit().kw("description", description.to_owned()),
            format!("Set description to '{description}'"),
        )
    }

    fn add_channel(&self, channel: &str) -> Change {
        Change::new(
            ChangeOp::AddMember,
            CallDescriptor::new("addHostToChannel")
                .arg(self.name.clone())
                .arg(channel.to_owned()),
            format!("Add to channel {channel}"),
        )
        .guarded_by(Key::new("channel", channel.to_owned()))
    }

    fn remove_channel(&self, channel: &str) -> Change {
        Change::new(
            ChangeOp::RemoveMember,
            CallDescriptor::new("removeHostFromChannel")
                .arg(self.name.clone())
                .arg(channel.to_owned()),
            format!("Remove from channel {channel}"),
        )
    }
}

#[derive(Debug, Deserialize)]
struct RemoteHost {
    #[allow(dead_code)]
    id: i64,
    #[allow(dead_code)]
    name: String,
    #[serde(default)]
    arches: Vec<String>,
    #[serde(default)]
    capacity: f64,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    description: Option<String>,
}

pub(crate) fn read_calls_for(name: &str) -> Vec<CallDescriptor> {
    vec![
        CallDescriptor::new("getHost").arg(name.to_owned()),
        CallDescriptor::new("listHostChannels").arg(name.to_owned()),
    ]
}

pub(crate) fn observed_doc(
    name: &str,
    observed: &[Result<Value, RemoteFault>],
    include_defaults: bool,
) -> Result<Option<Mapping>, ReadFailure> {
    use serde_yaml::Value as Y;

    let Some(remote) = parse_remote::<RemoteHost>(0, read(observed, 0)?)? else {
        return Ok(None);
    };
    let channels: Vec<String> = parse_remote(1, read(observed, 1)?)?.unwrap_or_default();

    let mut doc = Mapping::new();
    doc.insert(Y::from("type"), Y::from("host"));
    doc.insert(Y::from("name"), Y::from(name));
    doc_field(
        &mut doc,
        include_defaults,
        "arches",
        yaml_strings(&remote.arches),
        remote.arches.is_empty(),
    );
    doc_field(
        &mut doc,
        include_defaults,
        "capacity",
        remote.capacity,
        remote.capacity == 0.0,
    );
    doc_field(&mut doc, include_defaults, "enabled", remote.enabled, remote.enabled);
    if let Some(description) = &remote.description {
        doc_field(
            &mut doc,
            include_defaults,
            "description",
            description.clone(),
            description.is_empty(),
        );
    }
    doc_field(
        &mut doc,
        include_defaults,
        "channels",
        yaml_strings(&channels),
        channels.is_empty(),
    );
    Ok(Some(doc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::parse_documents;

    fn host_from(yaml: &str) -> Host {
        let docs = parse_documents(yaml, &Origin::new("hosts.yaml", 0)).expect("parse");
        Host::from_doc(&docs[0]).expect("host")
    }

    #[test]
    fn exact_channels_semantics() {
        let host = host_from(
            "type: host\nname: builder01\nchannels: [default]\nexact-channels: true\n",
        );
        let observed = vec![
            Ok(json!({"id": 1, "name": "builder01", "arches": [], "capacity": 0.0, "enabled": true})),
            Ok(json!(["default", "image"])),
        ];
        let changes = host.diff(&observed, None).expect("diff");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].op, ChangeOp::RemoveMember);
        assert!(changes[0].description.contains("image"));
    }

    #[test]
    fn capacity_left_alone_when_undeclared() {
        let host = host_from("type: host\nname: builder01\n");
        let observed = vec![
            Ok(json!({"id": 1, "name": "builder01", "arches": [], "capacity": 4.5, "enabled": true})),
            Ok(json!([])),
        ];
        assert!(host.diff(&observed, None).expect("diff").is_empty());
    }

    #[test]
    fn absent_host_is_created_with_channels() {
        let host = host_from(
            "type: host\nname: builder01\narches: [x86_64]\ncapacity: 2.0\nchannels: [default]\n",
        );
        let observed = vec![Ok(Value::Null), Ok(json!([]))];
        let changes = host.diff(&observed, None).expect("diff");
        assert_eq!(changes[0].op, ChangeOp::CreateObject);
        assert!(changes.iter().any(|c| c.op == ChangeOp::AddMember));
        assert!(changes.iter().any(|c| c.description.contains("capacity") || c.description.contains("2")));
    }
}
