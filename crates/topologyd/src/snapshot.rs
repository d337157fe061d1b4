//! Persisted administrative snapshot.
//!
//! Ids are kept as plain strings so a single malformed record fails on its
//! own during restore instead of rejecting the whole document.

use crate::model::{Link, SwitchDescription};
use crate::registry::{lookup_interface, SwitchMap};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use topo_types::{EntityKind, InterfaceId, Metadata};

/// Document id of the snapshot.
pub const SNAPSHOT_ID: &str = "network_status";

/// Per-class metadata mirror: entity id to metadata map.
pub type MetadataNamespace = BTreeMap<String, Metadata>;

fn snapshot_id() -> String {
    SNAPSHOT_ID.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkStatus {
    #[serde(default = "snapshot_id")]
    pub id: String,
    #[serde(default)]
    pub switches: BTreeMap<String, SwitchRecord>,
    #[serde(default)]
    pub links: BTreeMap<String, LinkRecord>,
}

impl Default for NetworkStatus {
    fn default() -> Self {
        Self {
            id: snapshot_id(),
            switches: BTreeMap::new(),
            links: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwitchRecord {
    pub enabled: bool,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub description: SwitchDescription,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub interfaces: BTreeMap<String, InterfaceRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterfaceRecord {
    pub id: String,
    pub port_number: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub speed: Option<f64>,
    pub enabled: bool,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub nni: bool,
    #[serde(default)]
    pub uni: bool,
    #[serde(default = "default_lldp")]
    pub lldp: bool,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

fn default_lldp() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointRecord {
    pub id: String,
    pub switch: String,
    pub port_number: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagRecord {
    #[serde(default)]
    pub endpoint_a: Option<Value>,
    #[serde(default)]
    pub endpoint_b: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkRecord {
    pub enabled: bool,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub metadata: Metadata,
    pub endpoint_a: EndpointRecord,
    pub endpoint_b: EndpointRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_tags: Option<TagRecord>,
}

impl NetworkStatus {
    /// Serialises the live registries.
    ///
    /// Runtime-only link metadata is left out.
    pub fn compose<'a>(switches: &SwitchMap, links: impl Iterator<Item = &'a Link>) -> Self {
        let switch_records = switches
            .iter()
            .map(|(id, sw)| {
                let interfaces = sw
                    .interfaces
                    .values()
                    .map(|i| {
                        let record = InterfaceRecord {
                            id: i.id.to_string(),
                            port_number: i.port_number(),
                            name: i.name.clone(),
                            mac: i.mac.clone(),
                            speed: i.speed,
                            enabled: i.enabled,
                            active: i.active,
                            nni: i.nni,
                            uni: i.uni,
                            lldp: i.lldp,
                            link: i.link.as_ref().map(|l| l.to_string()),
                            metadata: i.metadata.clone(),
                        };
                        (i.id.to_string(), record)
                    })
                    .collect();
                let record = SwitchRecord {
                    enabled: sw.enabled,
                    active: sw.active,
                    description: sw.description.clone(),
                    metadata: sw.metadata.clone(),
                    interfaces,
                };
                (id.clone(), record)
            })
            .collect();

        let link_records = links
            .map(|link| {
                let tags = |id: &InterfaceId| {
                    lookup_interface(switches, id).and_then(|i| i.available_tags.clone())
                };
                let tag_a = tags(&link.endpoint_a);
                let tag_b = tags(&link.endpoint_b);
                let available_tags = (tag_a.is_some() || tag_b.is_some()).then(|| TagRecord {
                    endpoint_a: tag_a,
                    endpoint_b: tag_b,
                });
                let record = LinkRecord {
                    enabled: link.enabled,
                    active: link.active,
                    metadata: link.persistent_metadata(),
                    endpoint_a: EndpointRecord::from_id(&link.endpoint_a),
                    endpoint_b: EndpointRecord::from_id(&link.endpoint_b),
                    available_tags,
                };
                (link.id.to_string(), record)
            })
            .collect();

        Self {
            id: snapshot_id(),
            switches: switch_records,
            links: link_records,
        }
    }

    /// Metadata of one entity class, keyed by entity id.
    pub fn metadata_namespace(&self, kind: EntityKind) -> MetadataNamespace {
        match kind {
            EntityKind::Switch => self
                .switches
                .iter()
                .map(|(id, sw)| (id.clone(), sw.metadata.clone()))
                .collect(),
            EntityKind::Interface => self
                .switches
                .values()
                .flat_map(|sw| sw.interfaces.iter())
                .map(|(id, i)| (id.clone(), i.metadata.clone()))
                .collect(),
            EntityKind::Link => self
                .links
                .iter()
                .map(|(id, l)| (id.clone(), l.metadata.clone()))
                .collect(),
        }
    }
}

impl EndpointRecord {
    pub fn from_id(id: &InterfaceId) -> Self {
        Self {
            id: id.to_string(),
            switch: id.switch().to_string(),
            port_number: id.port(),
        }
    }

    /// Interface id rebuilt from `(switch, port_number)`.
    pub fn interface_id(&self) -> InterfaceId {
        InterfaceId::new(self.switch.clone(), self.port_number)
    }
}
