//! Startup reconciliation.
//!
//! Replays the persisted snapshot into the registries before live events
//! are processed. Only administrative state and metadata are restored;
//! every entity starts inactive and learns its operational state from
//! discovery. A record that fails is reported and skipped, never half
//! applied.

use crate::error::{Result, TopologyError};
use crate::model::{strip_runtime_keys, Entity, Switch};
use crate::notification::Notification;
use crate::registry::lookup_interface_mut;
use crate::snapshot::{InterfaceRecord, LinkRecord, NetworkStatus, SwitchRecord};
use crate::topology::Topology;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use topo_common::{poll_until, PollError};
use topo_types::{EntityKind, InterfaceId, LinkId};
use tracing::{debug, error, info, instrument, warn};

/// Outcome of [`Topology::load_topology`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestoreReport {
    /// False when the store never produced a snapshot.
    pub store_available: bool,
    pub restored_switches: Vec<String>,
    pub restored_links: Vec<LinkId>,
    pub failed_switches: BTreeMap<String, TopologyError>,
    pub failed_links: BTreeMap<String, TopologyError>,
    /// Entities whose metadata was merged from the persisted namespaces.
    pub merged_metadata: usize,
}

impl RestoreReport {
    pub fn is_clean(&self) -> bool {
        self.failed_switches.is_empty() && self.failed_links.is_empty()
    }
}

/// Interface record checked and converted ahead of applying a switch.
struct PreparedInterface {
    id: InterfaceId,
    record: InterfaceRecord,
}

impl Topology {
    /// Fetches the snapshot and replays it, then emits `topology_loaded`.
    ///
    /// A store that stays unavailable for the whole bootstrap budget is
    /// logged and the engine starts empty.
    #[instrument(skip_all)]
    pub async fn load_topology(&self) -> RestoreReport {
        let policy = self.settings.bootstrap;
        debug!(
            attempts = policy.attempts,
            max_wait_ms = policy.max_wait().as_millis() as u64,
            "Waiting for topology store"
        );
        let store = self.store.clone();
        let fetched = poll_until(policy, "topology store", || {
            let store = store.clone();
            async move { store.get_snapshot().await }
        })
        .await;

        let mut report = RestoreReport::default();
        match fetched {
            Ok(snapshot) => {
                report.store_available = true;
                self.restore_snapshot(&snapshot, &mut report);
                report.merged_metadata = self.restore_metadata().await;
            }
            Err(PollError::Exhausted { attempts }) => {
                let e = TopologyError::PersistenceUnavailable { attempts };
                error!(error = %e, "Starting with an empty topology");
            }
            Err(PollError::Check(e)) => {
                error!(error = %e, "Failed to fetch snapshot, starting with an empty topology");
            }
        }

        info!(
            switches = report.restored_switches.len(),
            links = report.restored_links.len(),
            failed_switches = report.failed_switches.len(),
            failed_links = report.failed_links.len(),
            "Topology loaded"
        );
        self.notifier.send(Notification::TopologyLoaded {
            topology: Arc::new(self.topology()),
            failed_switches: report.failed_switches.clone(),
            failed_links: report.failed_links.clone(),
        });
        report
    }

    /// Applies `snapshot`: switches first, then links, whose endpoints
    /// must already be present.
    pub fn restore_snapshot(&self, snapshot: &NetworkStatus, report: &mut RestoreReport) {
        for (dpid, record) in &snapshot.switches {
            match self.restore_switch(dpid, record) {
                Ok(switch) => {
                    for interface in switch.interfaces.values() {
                        self.notifier.send(Notification::PortCreated {
                            content: json!({
                                "switch": dpid,
                                "port": interface.port_number(),
                                "port_description": {
                                    "alias": interface.name,
                                    "mac": interface.mac,
                                    "state": interface.active,
                                },
                            }),
                        });
                    }
                    report.restored_switches.push(dpid.clone());
                }
                Err(e) => {
                    error!(switch = %dpid, error = %e, "Failed to restore switch");
                    report.failed_switches.insert(
                        dpid.clone(),
                        TopologyError::partial_restore(EntityKind::Switch, dpid, e),
                    );
                }
            }
        }

        for (key, record) in &snapshot.links {
            match self.restore_link(key, record) {
                Ok(link_id) => report.restored_links.push(link_id),
                Err(e) => {
                    error!(link_id = %key, error = %e, "Failed to restore link");
                    report.failed_links.insert(
                        key.clone(),
                        TopologyError::partial_restore(EntityKind::Link, key, e),
                    );
                }
            }
        }
    }

    fn restore_switch(&self, dpid: &str, record: &SwitchRecord) -> Result<Switch> {
        info!(switch = %dpid, "Restoring switch");
        let mut prepared = Vec::with_capacity(record.interfaces.len());
        for (key, interface) in &record.interfaces {
            let id = InterfaceId::new(dpid, interface.port_number);
            if interface.id != id.to_string() || *key != interface.id {
                return Err(TopologyError::validation(format!(
                    "interface record {} does not belong to port {}",
                    key, id
                )));
            }
            if let Some(link) = &interface.link {
                link.parse::<LinkId>()?;
            }
            if interface.nni && interface.uni {
                return Err(TopologyError::validation(format!(
                    "interface {} is both NNI and UNI",
                    id
                )));
            }
            prepared.push(PreparedInterface {
                id,
                record: interface.clone(),
            });
        }

        let enable_default = self.settings.enable_by_default;
        let switch = self.switches.with_map_mut(|map| {
            let (switch, _) =
                map.get_or_insert_with(dpid.to_string(), || Switch::new(dpid, enable_default));
            if record.enabled {
                switch.enable();
            } else {
                switch.disable();
            }
            switch.description = record.description.clone();
            switch.extend_metadata(record.metadata.clone());

            for PreparedInterface { id, record: saved } in &prepared {
                debug!(interface = %id, "Restoring interface");
                let (interface, _) =
                    switch.update_or_create_interface(id.port(), &saved.name, saved.enabled);
                if saved.enabled {
                    interface.enable();
                } else {
                    interface.disable();
                }
                interface.deactivate();
                if saved.mac.is_some() {
                    interface.mac = saved.mac.clone();
                }
                if saved.speed.is_some() {
                    interface.speed = saved.speed;
                }
                interface.lldp = saved.lldp;
                interface.uni = saved.uni;
                interface.extend_metadata(saved.metadata.clone());
            }
            switch.clone()
        });
        Ok(switch)
    }

    fn restore_link(&self, key: &str, record: &LinkRecord) -> Result<LinkId> {
        let a = record.endpoint_a.interface_id();
        let b = record.endpoint_b.interface_id();
        info!(link_id = %key, endpoint_a = %a, endpoint_b = %b, "Restoring link");
        for (endpoint, label) in [(&a, "endpoint_a"), (&b, "endpoint_b")] {
            if !self.switches.interface_exists(endpoint) {
                return Err(TopologyError::LinkCreation(format!(
                    "{} {} not found",
                    label, endpoint
                )));
            }
        }

        let mut links = self.links.lock();
        let (link_id, _) = self.resolve_link_locked(&mut links, &a, &b)?;
        if link_id.as_str() != key {
            warn!(stored = %key, computed = %link_id, "Stored link id differs from endpoint hash");
        }
        if let Some(link) = links.get_mut(&link_id) {
            if record.enabled {
                link.enable();
            } else {
                link.disable();
            }
            link.extend_metadata(strip_runtime_keys(record.metadata.clone()));
        }

        let tags = record.available_tags.clone().unwrap_or_default();
        self.switches.with_map_mut(|map| {
            for (endpoint, tag) in [(&a, tags.endpoint_a), (&b, tags.endpoint_b)] {
                if let Some(interface) = lookup_interface_mut(map, endpoint) {
                    interface.wire(link_id.clone());
                    if tag.is_some() {
                        interface.available_tags = tag;
                    }
                }
            }
        });
        Ok(link_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{EndpointRecord, MetadataNamespace};
    use crate::store::MemoryStore;
    use crate::topology::EngineSettings;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn interface_record(switch: &str, port: u32, enabled: bool) -> (String, InterfaceRecord) {
        let id = InterfaceId::new(switch, port).to_string();
        let record = InterfaceRecord {
            id: id.clone(),
            port_number: port,
            name: format!("eth{}", port),
            enabled,
            lldp: true,
            ..Default::default()
        };
        (id, record)
    }

    fn snapshot() -> NetworkStatus {
        let mut snapshot = NetworkStatus::default();
        for dpid in ["A", "B"] {
            snapshot.switches.insert(
                dpid.to_string(),
                SwitchRecord {
                    enabled: true,
                    metadata: topo_types::Metadata::from_iter([("rack".to_string(), json!(dpid))]),
                    interfaces: BTreeMap::from([interface_record(dpid, 1, true)]),
                    ..Default::default()
                },
            );
        }
        let (a, b) = (InterfaceId::new("A", 1), InterfaceId::new("B", 1));
        let mut metadata = topo_types::Metadata::new();
        metadata.insert("notified_up_at".into(), json!("2024-01-01T00:00:00"));
        metadata.insert("owner".into(), json!("ops"));
        snapshot.links.insert(
            LinkId::from_endpoints(&a, &b).to_string(),
            LinkRecord {
                enabled: true,
                active: true,
                metadata,
                endpoint_a: EndpointRecord::from_id(&a),
                endpoint_b: EndpointRecord::from_id(&b),
                available_tags: None,
            },
        );
        snapshot
    }

    fn engine(store: MemoryStore) -> Arc<Topology> {
        let (topology, _rx) = Topology::new(EngineSettings::default(), Arc::new(store));
        topology
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_admin_state_only() {
        let topology = engine(MemoryStore::with_snapshot(snapshot()));
        let report = topology.load_topology().await;

        assert!(report.store_available);
        assert!(report.is_clean());
        assert_eq!(report.restored_switches, vec!["A".to_string(), "B".to_string()]);

        let link_id = report.restored_links[0].clone();
        let link = topology.link(&link_id).unwrap();
        assert!(link.enabled);
        assert!(!link.active);
        assert_eq!(link.metadata.len(), 1);

        let interface = topology.interface(&InterfaceId::new("A", 1)).unwrap();
        assert!(interface.enabled);
        assert!(!interface.active);
        assert!(interface.nni);
        assert_eq!(topology.switch("B").unwrap().metadata["rack"], json!("B"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_with_missing_endpoint_is_reported() {
        let mut snapshot = snapshot();
        snapshot.switches.remove("B");
        let topology = engine(MemoryStore::with_snapshot(snapshot));
        let report = topology.load_topology().await;

        assert_eq!(report.restored_switches, vec!["A".to_string()]);
        assert_eq!(report.failed_links.len(), 1);
        assert!(report.failed_switches.is_empty());
        assert!(topology.links().is_empty());
        assert!(topology.interface(&InterfaceId::new("A", 1)).unwrap().link.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_switch_is_skipped_whole() {
        let mut snapshot = snapshot();
        let record = snapshot.switches.get_mut("B").unwrap();
        let (_, mut bad) = interface_record("B", 2, true);
        bad.id = "C:2".into();
        record.interfaces.insert("C:2".into(), bad);

        let topology = engine(MemoryStore::with_snapshot(snapshot));
        let report = topology.load_topology().await;

        assert!(report.failed_switches.contains_key("B"));
        assert!(topology.switch("B").unwrap_err().is_not_found());
        assert_eq!(report.failed_links.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_metadata_namespaces_merged_on_restore() {
        let link_id = LinkId::from_endpoints(&InterfaceId::new("A", 1), &InterfaceId::new("B", 1));
        let switches = MetadataNamespace::from([
            ("A".to_string(), topo_types::Metadata::from_iter([("site".to_string(), json!("lab"))])),
            ("gone".to_string(), topo_types::Metadata::from_iter([("site".to_string(), json!("x"))])),
        ]);
        let mut link_entries = topo_types::Metadata::new();
        link_entries.insert("weight".into(), json!(7));
        link_entries.insert("last_status_change".into(), json!("2024-01-01T00:00:00"));
        let links = MetadataNamespace::from([(link_id.to_string(), link_entries)]);
        let store = MemoryStore::with_snapshot(snapshot())
            .with_metadata(EntityKind::Switch, switches)
            .with_metadata(EntityKind::Link, links);

        let topology = engine(store);
        let report = topology.load_topology().await;

        assert_eq!(report.merged_metadata, 2);
        let switch = topology.switch("A").unwrap();
        assert_eq!(switch.metadata["site"], json!("lab"));
        assert_eq!(switch.metadata["rack"], json!("A"));
        let link = topology.link(&link_id).unwrap();
        assert_eq!(link.metadata["weight"], json!(7));
        assert!(!link.metadata.contains_key("last_status_change"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_never_ready() {
        let store = MemoryStore::with_snapshot(snapshot()).available_after(u32::MAX);
        let (topology, mut rx) = Topology::new(EngineSettings::default(), Arc::new(store));
        let report = topology.load_topology().await;

        assert!(!report.store_available);
        assert!(topology.switches().is_empty());
        let loaded = rx.try_recv().unwrap();
        assert_eq!(loaded.name(), "topology.topology_loaded");
    }
}
