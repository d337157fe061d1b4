//! Routes inbound bus events to the engine.

use crate::handlers::{InterfaceInfo, LivenessStatus, SwitchInfo};
use crate::snapshot::TagRecord;
use crate::topology::Topology;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use topo_common::{Envelope, EventHandler};
use topo_types::{InterfaceId, LinkId};
use tracing::{debug, warn};

/// Maintenance targets carried by `topology.interruption.*`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceTarget {
    Switches(Vec<String>),
    Links(Vec<LinkId>),
}

/// Inbound events understood by the engine. The envelope name selects
/// the variant's meaning where one payload serves several events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyEvent {
    SwitchUp(SwitchInfo),
    ConnectionLost { dpid: String },
    InterfaceCreated(InterfaceInfo),
    InterfacesCreated(Vec<InterfaceInfo>),
    InterfaceDeleted(InterfaceId),
    InterfaceLinkUp(InterfaceId),
    InterfaceLinkDown(InterfaceId),
    NniPair { a: InterfaceId, b: InterfaceId },
    /// `liveness.up` or `liveness.down`.
    Liveness { a: InterfaceId, b: InterfaceId },
    LivenessDisabled { interfaces: Vec<InterfaceId> },
    AvailableTags { link: LinkId, tags: TagRecord },
    NetworkStatusUpdated { interfaces: Vec<InterfaceId> },
    PortCreated { content: Value },
    /// `topology.interruption.start` or `topology.interruption.end`.
    Maintenance(MaintenanceTarget),
}

pub struct Dispatcher {
    topology: Arc<Topology>,
}

impl Dispatcher {
    pub fn new(topology: Arc<Topology>) -> Self {
        Self { topology }
    }

    fn dispatch(&self, envelope: Envelope<TopologyEvent>) -> crate::error::Result<()> {
        let Envelope {
            name,
            content,
            timestamp,
        } = envelope;
        let topology = &self.topology;
        match content {
            TopologyEvent::SwitchUp(info) => {
                topology.handle_new_switch(&info)?;
            }
            TopologyEvent::ConnectionLost { dpid } => {
                topology.handle_connection_lost(&dpid)?;
            }
            TopologyEvent::InterfaceCreated(info) => {
                topology.handle_interface_created(&info, timestamp)?;
            }
            TopologyEvent::InterfacesCreated(infos) => {
                topology.handle_interfaces_created(&infos, timestamp)?;
            }
            TopologyEvent::InterfaceDeleted(id) => {
                topology.handle_interface_deleted(&id, timestamp)?;
            }
            TopologyEvent::InterfaceLinkUp(id) => {
                let outcome = topology.handle_interface_link_up(&id, timestamp)?;
                debug!(interface = %id, outcome = ?outcome, "Link up handled");
            }
            TopologyEvent::InterfaceLinkDown(id) => {
                let outcome = topology.handle_interface_link_down(&id, timestamp)?;
                debug!(interface = %id, outcome = ?outcome, "Link down handled");
            }
            TopologyEvent::NniPair { a, b } => {
                topology.handle_nni_pair(&a, &b)?;
            }
            TopologyEvent::Liveness { a, b } => {
                let status = if name.ends_with(".up") {
                    LivenessStatus::Up
                } else {
                    LivenessStatus::Down
                };
                topology.handle_liveness(&a, &b, status)?;
            }
            TopologyEvent::LivenessDisabled { interfaces } => {
                topology.handle_liveness_disabled(&interfaces);
            }
            TopologyEvent::AvailableTags { link, tags } => {
                topology.handle_available_tags(&link, tags)?;
            }
            TopologyEvent::NetworkStatusUpdated { interfaces } => {
                topology.handle_network_status_updated(&interfaces);
            }
            TopologyEvent::PortCreated { content } => {
                topology.handle_port_created(content);
            }
            TopologyEvent::Maintenance(target) => {
                let start = name.ends_with(".start");
                let report = match (target, start) {
                    (MaintenanceTarget::Switches(ids), true) => topology.start_maintenance_switches(&ids),
                    (MaintenanceTarget::Switches(ids), false) => topology.end_maintenance_switches(&ids),
                    (MaintenanceTarget::Links(ids), true) => topology.start_maintenance_links(&ids),
                    (MaintenanceTarget::Links(ids), false) => topology.end_maintenance_links(&ids),
                };
                if !report.is_complete() {
                    warn!(event = %name, failed = report.failed.len(), "Maintenance partially applied");
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler<TopologyEvent> for Dispatcher {
    fn name(&self) -> &str {
        "topology"
    }

    fn patterns(&self) -> Vec<&'static str> {
        vec![
            r".*\.switch\.(new|reconnected)",
            r".*\.connection\.lost",
            r".*\.switch\.interface\.created",
            r".*\.switch\.interfaces\.created",
            r".*\.switch\.interface\.deleted",
            r".*\.switch\.interface\.link_(up|down)",
            r".*\.interface\.is\.nni",
            r".*\.liveness\.(up|down|disabled)",
            r".*\.link_available_tags",
            r".*\.of_lldp\.network_status\.updated",
            r".*\.switch\.port\.created",
            r"topology\.interruption\.(start|end)",
        ]
    }

    async fn handle(&self, event: Envelope<TopologyEvent>) {
        let name = event.name.clone();
        if let Err(e) = self.dispatch(event) {
            warn!(event = %name, error = %e, "Failed to handle event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::topology::EngineSettings;
    use topo_common::EventBus;

    #[tokio::test]
    async fn test_dispatch_through_bus() {
        let (topology, _rx) = Topology::new(EngineSettings::default(), Arc::new(MemoryStore::new()));
        let bus = EventBus::new();
        topo_common::spawn_handler(&bus, Arc::new(Dispatcher::new(topology.clone()))).unwrap();

        let delivered = bus.publish(
            "kytos/of_core.switch.new",
            TopologyEvent::SwitchUp(SwitchInfo {
                dpid: "A".into(),
                description: None,
            }),
        );
        assert_eq!(delivered, 1);
        assert_eq!(bus.publish("kytos/core.unrelated", TopologyEvent::PortCreated { content: Value::Null }), 0);

        for _ in 0..50 {
            if topology.switch("A").is_ok() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(topology.switch("A").unwrap().active);
    }

    #[tokio::test]
    async fn test_errors_are_logged_not_raised() {
        let (topology, _rx) = Topology::new(EngineSettings::default(), Arc::new(MemoryStore::new()));
        let dispatcher = Dispatcher::new(topology.clone());
        dispatcher
            .handle(Envelope::new(
                "kytos/of_core.connection.lost",
                TopologyEvent::ConnectionLost { dpid: "missing".into() },
            ))
            .await;
        assert!(topology.switches().is_empty());
    }
}
