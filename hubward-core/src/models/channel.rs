//! Channel model: a named pool of build hosts.

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

/// A declared channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Channel {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(rename = "exact-hosts", default)]
    pub exact_hosts: bool,
    #[serde(skip)]
    pub origin: Origin,
    #[serde(skip)]
    pub(crate) dropped: Vec<Slot>,
}

impl Channel {
    pub fn from_doc(doc: &RawDoc) -> Result<Channel, CoreError> {
        doc.require_name()?;
        let mut channel: Channel = from_mapping(doc)?;
        channel.origin = doc.origin.clone();
        Ok(channel)
    }

    pub fn dependency_keys(&self) -> Vec<Dependency> {
        self.hosts
            .iter()
            .map(|host| Dependency::new(Key::new("host", host.clone()), Slot::Hosts))
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
        let remote: Option<RemoteChannel> = parse_remote(0, read(observed, 0)?)?;
        let hosts_active = slot_active(Slot::Hosts, &self.dropped, only);
        let mut changes = Vec::new();

        let Some(remote) = remote else {
            if only.is_none() {
                changes.push(self.create());
            }
            if hosts_active {
                for host in &self.hosts {
                    changes.push(self.add_host(host));
                }
            }
            return Ok(changes);
        };

        if only.is_none() {
            if let Some(description) = &self.description {
                if remote.description.as_deref() != Some(description.as_str()) {
                    changes.push(self.set_description(description));
                }
            }
        }

        if hosts_active {
            let remote_hosts: Vec<String> = parse_remote(1, read(observed, 1)?)?
                .unwrap_or_default();
            for host in &self.hosts {
                if !remote_hosts.contains(host) {
                    changes.push(self.add_host(host));
                }
            }
            if self.exact_hosts {
                for host in &remote_hosts {
                    if !self.hosts.contains(host) {
                        changes.push(self.remove_host(host));
                    }
                }
            }
        }

        Ok(changes)
    }

    fn create(&self) -> Change {
        let mut call = CallDescriptor::new("createChannel").arg(self.name.clone());
        if let Some(description) = &self.description {
            call = call.kw("description", description.clone());
        }
        Change::new(
            ChangeOp::CreateObject,
            call,
            format!("Create channel {}", self.name),
        )
    }

    fn set_description(&self, description: &str) -> Change {
        Change::new(
            ChangeOp::SetField,
            CallDescriptor::new("editChannel")
                .arg(self.name.clone())
                .kw("description", description.to_owned()),
            format!("Set description to '{description}'"),
        )
    }

    fn add_host(&self, host: &str) -> Change {
        Change::new(
            ChangeOp::AddMember,
            CallDescriptor::new("addHostToChannel")
                .arg(host.to_owned())
                .arg(self.name.clone()),
            format!("Add host {host}"),
        )
        .guarded_by(Key::new("host", host.to_owned()))
    }

    fn remove_host(&self, host: &str) -> Change {
        Change::new(
            ChangeOp::RemoveMember,
            CallDescriptor::new("removeHostFromChannel")
                .arg(host.to_owned())
                .arg(self.name.clone()),
            format!("Remove host {host}"),
        )
    }
}

#[derive(Debug, Deserialize)]
struct RemoteChannel {
    #[allow(dead_code)]
    id: i64,
    #[allow(dead_code)]
    name: String,
    #[serde(default)]
    description: Option<String>,
}

pub(crate) fn read_calls_for(name: &str) -> Vec<CallDescriptor> {
    vec![
        CallDescriptor::new("getChannel").arg(name.to_owned()),
        CallDescriptor::new("listHosts").kw("channel", name.to_owned()),
    ]
}

pub(crate) fn observed_doc(
    name: &str,
    observed: &[Result<Value, RemoteFault>],
    include_defaults: bool,
) -> Result<Option<Mapping>, ReadFailure> {
    use serde_yaml::Value as Y;

    let Some(remote) = parse_remote::<RemoteChannel>(0, read(observed, 0)?)? else {
        return Ok(None);
    };
    let hosts: Vec<String> = parse_remote(1, read(observed, 1)?)?.unwrap_or_default();

    let mut doc = Mapping::new();
    doc.insert(Y::from("type"), Y::from("channel"));
    doc.insert(Y::from("name"), Y::from(name));
    if let Some(description) = remote.description {
        doc.insert(Y::from("description"), Y::from(description));
    }
    doc_field(
        &mut doc,
        include_defaults,
        "hosts",
        yaml_strings(&hosts),
        hosts.is_empty(),
    );
    Ok(Some(doc))
}
