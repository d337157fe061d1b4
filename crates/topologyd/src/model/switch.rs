use super::{Entity, Interface};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use topo_types::{EntityKind, InterfaceId, Metadata};

/// Descriptive fields reported by the switch itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwitchDescription {
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub hardware: String,
    #[serde(default)]
    pub software: String,
    #[serde(default)]
    pub serial: String,
    #[serde(default)]
    pub data_path: String,
}

/// A switch and the interfaces it owns, keyed by port number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Switch {
    /// Datapath id.
    pub id: String,
    pub enabled: bool,
    pub active: bool,
    pub description: SwitchDescription,
    pub metadata: Metadata,
    pub interfaces: BTreeMap<u32, Interface>,
}

impl Switch {
    pub fn new(id: impl Into<String>, enabled: bool) -> Self {
        Self {
            id: id.into(),
            enabled,
            active: false,
            description: SwitchDescription::default(),
            metadata: Metadata::new(),
            interfaces: BTreeMap::new(),
        }
    }

    pub fn interface(&self, port: u32) -> Option<&Interface> {
        self.interfaces.get(&port)
    }

    pub fn interface_mut(&mut self, port: u32) -> Option<&mut Interface> {
        self.interfaces.get_mut(&port)
    }

    /// Returns the interface on `port`, creating it if absent.
    ///
    /// The flag is true when a new interface was created.
    pub fn update_or_create_interface(
        &mut self,
        port: u32,
        name: &str,
        enabled: bool,
    ) -> (&mut Interface, bool) {
        let id = InterfaceId::new(self.id.clone(), port);
        let mut created = false;
        let interface = self.interfaces.entry(port).or_insert_with(|| {
            created = true;
            Interface::new(id, name, enabled)
        });
        if !name.is_empty() && interface.name != name {
            interface.name = name.to_string();
        }
        (interface, created)
    }

    pub fn remove_interface(&mut self, port: u32) -> Option<Interface> {
        self.interfaces.remove(&port)
    }

    /// Ids of every interface on this switch, in port order.
    pub fn interface_ids(&self) -> Vec<InterfaceId> {
        self.interfaces.values().map(|i| i.id.clone()).collect()
    }
}

impl Entity for Switch {
    const KIND: EntityKind = EntityKind::Switch;

    fn entity_id(&self) -> String {
        self.id.clone()
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_or_create_interface() {
        let mut sw = Switch::new("A", true);
        let (intf, created) = sw.update_or_create_interface(1, "eth1", false);
        assert!(created);
        assert_eq!(intf.id, InterfaceId::new("A", 1));
        assert!(!intf.enabled);

        let (intf, created) = sw.update_or_create_interface(1, "eth1-renamed", true);
        assert!(!created);
        assert_eq!(intf.name, "eth1-renamed");
        // Existing admin state is kept.
        assert!(!intf.enabled);
        assert_eq!(sw.interface_ids(), vec![InterfaceId::new("A", 1)]);
    }
}
