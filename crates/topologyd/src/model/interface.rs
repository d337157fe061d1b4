use super::Entity;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use topo_types::{EntityKind, InterfaceId, LinkId, Metadata};

/// A switch port.
///
/// `link` is a weak reference: the link table owns links, the interface
/// only remembers which one it was last wired to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interface {
    pub id: InterfaceId,
    pub name: String,
    pub mac: Option<String>,
    /// Bytes per second, when reported.
    pub speed: Option<f64>,
    pub enabled: bool,
    pub active: bool,
    pub nni: bool,
    pub uni: bool,
    pub lldp: bool,
    pub link: Option<LinkId>,
    pub metadata: Metadata,
    /// Opaque tag-pool payload, forwarded into snapshots untouched.
    pub available_tags: Option<Value>,
}

impl Interface {
    pub fn new(id: InterfaceId, name: impl Into<String>, enabled: bool) -> Self {
        Self {
            id,
            name: name.into(),
            mac: None,
            speed: None,
            enabled,
            active: false,
            nni: false,
            uni: false,
            lldp: true,
            link: None,
            metadata: Metadata::new(),
            available_tags: None,
        }
    }

    pub fn port_number(&self) -> u32 {
        self.id.port()
    }

    /// Wires this interface to `link` as an inter-switch endpoint.
    pub fn wire(&mut self, link: LinkId) {
        self.link = Some(link);
        self.nni = true;
        self.uni = false;
    }
}

impl Entity for Interface {
    const KIND: EntityKind = EntityKind::Interface;

    fn entity_id(&self) -> String {
        self.id.to_string()
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn planes_mut(&mut self) -> (&mut bool, &mut bool) {
        (&mut self.enabled, &mut self.active)
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
