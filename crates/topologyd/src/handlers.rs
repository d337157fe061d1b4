//! Reactions to discovery and liveness events.

use crate::error::{Result, TopologyError};
use crate::model::{Entity, Switch, SwitchDescription};
use crate::notification::{reason, Notification};
use crate::registry::lookup_interface_mut;
use crate::snapshot::TagRecord;
use crate::topology::Topology;
use crate::view::{self, LinkView};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use tokio::time::Instant;
use topo_types::{EntityKind, EntityStatus, InterfaceId, LinkId};
use tracing::{debug, info, warn};

/// Metadata key carrying the last liveness verdict for a link.
pub const LIVENESS_STATUS_KEY: &str = "liveness_status";

/// Switch as announced by the controller core.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwitchInfo {
    pub dpid: String,
    #[serde(default)]
    pub description: Option<SwitchDescription>,
}

/// Interface as announced by the controller core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceInfo {
    pub id: InterfaceId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LivenessStatus {
    Up,
    Down,
}

impl LivenessStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LivenessStatus::Up => "up",
            LivenessStatus::Down => "down",
        }
    }
}

/// What a link-up event led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkUpOutcome {
    /// Older than the last event seen for the interface.
    Stale,
    /// The interface is not an endpoint of any link.
    NoLink,
    /// The far endpoint is not active yet.
    PeerInactive(LinkId),
    /// Fresh up transition, confirmation pending.
    Scheduled(LinkId),
    /// The link was already up; notified immediately.
    Refreshed(LinkId),
}

/// What a link-down event led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkDownOutcome {
    Stale,
    NoActiveLink,
    Down(LinkId),
}

enum LinkUpStep {
    NoLink,
    PeerInactive(LinkId),
    Scheduled(LinkId),
    Refreshed(LinkView),
}

impl Topology {
    /// Handles `interface.link_up` observed at `at`.
    pub fn handle_interface_link_up(&self, id: &InterfaceId, at: DateTime<Utc>) -> Result<LinkUpOutcome> {
        if !self.accept_interface_event(id, at) {
            return Ok(LinkUpOutcome::Stale);
        }
        self.handle_link_up(id)
    }

    pub(crate) fn handle_link_up(&self, id: &InterfaceId) -> Result<LinkUpOutcome> {
        let now = Instant::now();
        let delay = self.settings.link_up_timer;
        let step = {
            let mut links = self.links.lock();
            self.switches.with_interface_mut(id, |i| i.activate())?;

            let found = links
                .find_by_interface(id)
                .and_then(|l| l.other_endpoint(id).map(|o| (l.id.clone(), o.clone())));
            match found {
                None => LinkUpStep::NoLink,
                Some((link_id, other)) if !self.switches.interface_active(&other) => {
                    LinkUpStep::PeerInactive(link_id)
                }
                Some((link_id, _)) => match links.get_mut(&link_id) {
                    None => LinkUpStep::NoLink,
                    Some(link) => {
                        let was_active = link.active;
                        link.activate();
                        link.stamp_status_change(now);
                        if was_active {
                            link.notified_up_at = Some(now);
                            let switches = self.switches.read();
                            LinkUpStep::Refreshed(LinkView::build(link, &switches, delay, now))
                        } else {
                            LinkUpStep::Scheduled(link_id)
                        }
                    }
                },
            }
        };

        self.notify_topology_update();
        let outcome = match step {
            LinkUpStep::NoLink => LinkUpOutcome::NoLink,
            LinkUpStep::PeerInactive(link_id) => {
                debug!(interface = %id, link_id = %link_id, "Link peer not active yet");
                LinkUpOutcome::PeerInactive(link_id)
            }
            LinkUpStep::Scheduled(link_id) => {
                self.schedule_link_up_check(link_id.clone(), reason::LINK_UP);
                LinkUpOutcome::Scheduled(link_id)
            }
            LinkUpStep::Refreshed(view) => {
                let link_id = view.id.clone();
                info!(link_id = %link_id, "Link up");
                self.notifier.send(Notification::LinkUp {
                    link: view,
                    reason: reason::LINK_UP.to_string(),
                });
                self.schedule_save();
                LinkUpOutcome::Refreshed(link_id)
            }
        };
        Ok(outcome)
    }

    /// Handles `interface.link_down` observed at `at`.
    pub fn handle_interface_link_down(
        &self,
        id: &InterfaceId,
        at: DateTime<Utc>,
    ) -> Result<LinkDownOutcome> {
        if !self.accept_interface_event(id, at) {
            return Ok(LinkDownOutcome::Stale);
        }
        self.handle_link_down(id, reason::LINK_DOWN)
    }

    pub(crate) fn handle_link_down(&self, id: &InterfaceId, why: &str) -> Result<LinkDownOutcome> {
        let now = Instant::now();
        let delay = self.settings.link_up_timer;
        let down = {
            let mut links = self.links.lock();
            self.switches.with_interface_mut(id, |i| i.deactivate())?;

            let active_id = links
                .find_by_interface(id)
                .filter(|l| l.active)
                .map(|l| l.id.clone());
            let link = match &active_id {
                Some(link_id) => links.get_mut(link_id),
                None => None,
            };
            match link {
                Some(link) => {
                    link.deactivate();
                    link.stamp_status_change(now);
                    let switches = self.switches.read();
                    Some(LinkView::build(link, &switches, delay, now))
                }
                None => None,
            }
        };

        self.notify_topology_update();
        let Some(view) = down else {
            return Ok(LinkDownOutcome::NoActiveLink);
        };
        let link_id = view.id.clone();
        if self.link_up_timer.cancel(&link_id) {
            debug!(link_id = %link_id, "Cancelled pending link-up confirmation");
        }
        info!(link_id = %link_id, reason = why, "Link down");
        self.notifier.send(Notification::LinkDown {
            link: view,
            reason: why.to_string(),
        });
        Ok(LinkDownOutcome::Down(link_id))
    }

    /// Handles `interface.deleted`: the link goes down, then the interface
    /// is dropped from its switch.
    pub fn handle_interface_deleted(&self, id: &InterfaceId, at: DateTime<Utc>) -> Result<LinkDownOutcome> {
        if !self.accept_interface_event(id, at) {
            return Ok(LinkDownOutcome::Stale);
        }
        let outcome = self.handle_link_down(id, reason::INTERFACE_DELETED)?;
        self.switches
            .with_switch_mut(id.switch(), |sw| sw.remove_interface(id.port()))?;
        self.forget_interface_events(id);
        info!(interface = %id, "Interface deleted");
        self.schedule_save();
        self.notify_topology_update();
        Ok(outcome)
    }

    /// Handles `interface.created`. Creates the switch and interface as
    /// needed; an interface announced active is treated as a link-up.
    pub fn handle_interface_created(&self, info: &InterfaceInfo, at: DateTime<Utc>) -> Result<bool> {
        let default = self.settings.enable_by_default;
        let (_, switch_created) = self.switches.get_or_create(info.id.switch(), default);
        let created = self.switches.with_switch_mut(info.id.switch(), |sw| {
            let (interface, created) = sw.update_or_create_interface(info.id.port(), &info.name, default);
            if info.mac.is_some() {
                interface.mac = info.mac.clone();
            }
            if info.speed.is_some() {
                interface.speed = info.speed;
            }
            created
        })?;
        if created || switch_created {
            debug!(interface = %info.id, "Interface registered");
            self.schedule_save();
        }
        if info.active {
            self.handle_interface_link_up(&info.id, at)?;
        } else {
            self.notify_topology_update();
        }
        Ok(created)
    }

    /// Handles a batch of interfaces announced for one switch.
    ///
    /// Returns how many were newly created. One bad entry does not stop
    /// the others; the first error is returned after the batch.
    pub fn handle_interfaces_created(&self, infos: &[InterfaceInfo], at: DateTime<Utc>) -> Result<usize> {
        let mut created = 0;
        let mut first_error = None;
        for info in infos {
            match self.handle_interface_created(info, at) {
                Ok(true) => created += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(interface = %info.id, error = %e, "Failed to register interface");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(created),
        }
    }

    /// Handles `switch.new` and `switch.reconnected`.
    pub fn handle_new_switch(&self, info: &SwitchInfo) -> Result<Switch> {
        let (_, created) = self
            .switches
            .get_or_create(&info.dpid, self.settings.enable_by_default);
        let switch = self.switches.with_switch_mut(&info.dpid, |sw| {
            sw.activate();
            if let Some(description) = &info.description {
                sw.description = description.clone();
            }
            sw.clone()
        })?;
        if created {
            info!(switch = %info.dpid, "Switch discovered");
        } else {
            debug!(switch = %info.dpid, "Switch reconnected");
        }
        self.schedule_save();
        self.notify_topology_update();
        if switch.enabled {
            self.notifier.send(Notification::SwitchEnabled {
                dpid: switch.id.clone(),
            });
        }
        Ok(switch)
    }

    /// Handles `connection.lost`.
    pub fn handle_connection_lost(&self, dpid: &str) -> Result<bool> {
        let changed = self.deactivate_switch(dpid)?;
        if changed {
            info!(switch = %dpid, "Switch connection lost");
        }
        Ok(changed)
    }

    /// Handles an NNI pair reported by link discovery.
    ///
    /// Returns the link id and whether the link is new. A new link whose
    /// endpoints are both active goes through the link-up debounce.
    pub fn handle_nni_pair(&self, a: &InterfaceId, b: &InterfaceId) -> Result<(LinkId, bool)> {
        let now = Instant::now();
        let (link_id, created, debounce) = {
            let mut links = self.links.lock();
            let (link_id, created) = self.resolve_link_locked(&mut links, a, b)?;
            let debounce = self.switches.with_map_mut(|map| {
                for endpoint in [a, b] {
                    if let Some(interface) = lookup_interface_mut(map, endpoint) {
                        interface.wire(link_id.clone());
                    }
                }
                match links.get_mut(&link_id) {
                    Some(link) if created && view::endpoints_active(link, map) => {
                        link.activate();
                        link.stamp_status_change(now);
                        true
                    }
                    _ => false,
                }
            });
            (link_id, created, debounce)
        };

        if created {
            self.schedule_save();
            self.notify_topology_update();
        }
        if debounce {
            self.schedule_link_up_check(link_id.clone(), reason::LINK_UP);
        }
        Ok((link_id, created))
    }

    /// Handles a liveness verdict for the link joining `a` and `b`.
    pub fn handle_liveness(&self, a: &InterfaceId, b: &InterfaceId, status: LivenessStatus) -> Result<()> {
        let link_id = LinkId::from_endpoints(a, b);
        let view = {
            let mut links = self.links.lock();
            let link = links
                .get_mut(&link_id)
                .ok_or_else(|| TopologyError::link_not_found(&link_id))?;
            link.metadata
                .insert(LIVENESS_STATUS_KEY.to_string(), Value::from(status.as_str()));
            let switches = self.switches.read();
            LinkView::build(link, &switches, self.settings.link_up_timer, Instant::now())
        };

        self.schedule_metadata_save(EntityKind::Link);
        self.schedule_save();
        self.notify_topology_update();

        let why = match (view.status, status) {
            (EntityStatus::Up, LivenessStatus::Up) => Some(reason::LIVENESS_UP),
            (EntityStatus::Down, LivenessStatus::Down) => Some(reason::LIVENESS_DOWN),
            _ => None,
        };
        if let Some(why) = why {
            debug!(link_id = %link_id, reason = why, "Liveness status changed");
            self.notifier.send(Notification::LinkStatusChanged {
                status: view.status,
                link: view,
                reason: why.to_string(),
            });
        }
        Ok(())
    }

    /// Handles `liveness.disabled` for `interfaces`: the liveness key is
    /// dropped from every link touching them. Returns the affected links.
    pub fn handle_liveness_disabled(&self, interfaces: &[InterfaceId]) -> BTreeSet<LinkId> {
        let affected = {
            let mut links = self.links.lock();
            let ids = links.links_of_interfaces(interfaces);
            for id in &ids {
                if let Some(link) = links.get_mut(id) {
                    link.remove_metadata(LIVENESS_STATUS_KEY);
                }
            }
            ids
        };

        if !affected.is_empty() {
            self.schedule_metadata_save(EntityKind::Link);
            self.schedule_save();
        }
        self.notify_topology_update();
        for view in self.link_views(&affected) {
            self.notifier.send(Notification::LinkStatusChanged {
                status: view.status,
                link: view,
                reason: reason::LIVENESS_DISABLED.to_string(),
            });
        }
        affected
    }

    /// Records the tag pools reported for the endpoints of `link_id`.
    pub fn handle_available_tags(&self, link_id: &LinkId, tags: TagRecord) -> Result<()> {
        {
            let links = self.links.lock();
            let link = links
                .get(link_id)
                .ok_or_else(|| TopologyError::link_not_found(link_id))?;
            self.switches.with_map_mut(|map| {
                for (endpoint, value) in [(&link.endpoint_a, tags.endpoint_a), (&link.endpoint_b, tags.endpoint_b)] {
                    if let (Some(interface), Some(value)) = (lookup_interface_mut(map, endpoint), value) {
                        interface.available_tags = Some(value);
                    }
                }
            });
        }
        debug!(link_id = %link_id, "Available tags updated");
        self.schedule_save();
        Ok(())
    }

    /// Handles `network_status.updated` listing changed interfaces.
    ///
    /// Returns how many known switches were touched; a save is scheduled
    /// when any were.
    pub fn handle_network_status_updated(&self, interfaces: &[InterfaceId]) -> usize {
        let switches: BTreeSet<&str> = interfaces
            .iter()
            .map(|i| i.switch())
            .filter(|s| self.switches.contains(s))
            .collect();
        if !switches.is_empty() {
            debug!(switches = switches.len(), "Network status updated");
            self.schedule_save();
        }
        switches.len()
    }

    /// Re-publishes a port announcement.
    pub fn handle_port_created(&self, content: Value) {
        self.notifier.send(Notification::PortCreated { content });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::Notification;
    use crate::store::MemoryStore;
    use crate::topology::EngineSettings;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn engine() -> (Arc<Topology>, mpsc::UnboundedReceiver<Notification>) {
        let settings = EngineSettings {
            enable_by_default: true,
            ..EngineSettings::default()
        };
        Topology::new(settings, Arc::new(MemoryStore::new()))
    }

    fn info(switch: &str, port: u32, active: bool) -> InterfaceInfo {
        InterfaceInfo {
            id: InterfaceId::new(switch, port),
            name: format!("eth{}", port),
            mac: None,
            speed: Some(1.25e9),
            active,
        }
    }

    fn names(rx: &mut mpsc::UnboundedReceiver<Notification>) -> Vec<String> {
        std::iter::from_fn(|| rx.try_recv().ok()).map(|n| n.name()).collect()
    }

    #[tokio::test]
    async fn test_interface_created_registers_switch() {
        let (topology, _rx) = engine();
        assert!(topology.handle_interface_created(&info("A", 1, false), Utc::now()).unwrap());
        assert!(!topology.handle_interface_created(&info("A", 1, false), Utc::now()).unwrap());

        let interface = topology.interface(&InterfaceId::new("A", 1)).unwrap();
        assert_eq!(interface.speed, Some(1.25e9));
        assert_eq!(topology.switches().len(), 1);
    }

    #[tokio::test]
    async fn test_nni_pair_requires_known_endpoints() {
        let (topology, _rx) = engine();
        topology.handle_interface_created(&info("A", 1, false), Utc::now()).unwrap();
        let err = topology
            .handle_nni_pair(&InterfaceId::new("A", 1), &InterfaceId::new("B", 1))
            .unwrap_err();
        assert!(matches!(err, TopologyError::LinkCreation(_)));
    }

    #[tokio::test]
    async fn test_nni_pair_wires_both_endpoints() {
        let (topology, _rx) = engine();
        let (a, b) = (InterfaceId::new("A", 1), InterfaceId::new("B", 1));
        topology.handle_interface_created(&info("A", 1, false), Utc::now()).unwrap();
        topology.handle_interface_created(&info("B", 1, false), Utc::now()).unwrap();

        let (link_id, created) = topology.handle_nni_pair(&a, &b).unwrap();
        assert!(created);
        let (again, created) = topology.handle_nni_pair(&b, &a).unwrap();
        assert!(!created);
        assert_eq!(again, link_id);

        for id in [&a, &b] {
            let interface = topology.interface(id).unwrap();
            assert!(interface.nni);
            assert_eq!(interface.link.as_ref(), Some(&link_id));
        }
    }

    #[tokio::test]
    async fn test_link_up_without_link() {
        let (topology, _rx) = engine();
        topology.handle_interface_created(&info("A", 1, false), Utc::now()).unwrap();
        let outcome = topology
            .handle_interface_link_up(&InterfaceId::new("A", 1), Utc::now())
            .unwrap();
        assert_eq!(outcome, LinkUpOutcome::NoLink);
        assert!(topology.interface(&InterfaceId::new("A", 1)).unwrap().active);
    }

    #[tokio::test]
    async fn test_link_down_on_inactive_link_is_quiet() {
        let (topology, mut rx) = engine();
        let (a, b) = (InterfaceId::new("A", 1), InterfaceId::new("B", 1));
        topology.handle_interface_created(&info("A", 1, false), Utc::now()).unwrap();
        topology.handle_interface_created(&info("B", 1, false), Utc::now()).unwrap();
        topology.handle_nni_pair(&a, &b).unwrap();
        names(&mut rx);

        let outcome = topology.handle_interface_link_down(&a, Utc::now()).unwrap();
        assert_eq!(outcome, LinkDownOutcome::NoActiveLink);
        assert!(!names(&mut rx).contains(&"topology.link_down".to_string()));
    }

    #[tokio::test]
    async fn test_liveness_sets_and_clears_key() {
        let (topology, mut rx) = engine();
        let (a, b) = (InterfaceId::new("A", 1), InterfaceId::new("B", 1));
        topology.handle_interface_created(&info("A", 1, false), Utc::now()).unwrap();
        topology.handle_interface_created(&info("B", 1, false), Utc::now()).unwrap();
        let (link_id, _) = topology.handle_nni_pair(&a, &b).unwrap();
        names(&mut rx);

        topology.handle_liveness(&a, &b, LivenessStatus::Down).unwrap();
        let link = topology.link(&link_id).unwrap();
        assert_eq!(link.metadata.get(LIVENESS_STATUS_KEY), Some(&json!("down")));
        assert!(names(&mut rx).contains(&"topology.link_status.changed".to_string()));

        let affected = topology.handle_liveness_disabled(&[a.clone()]);
        assert_eq!(affected, BTreeSet::from([link_id.clone()]));
        assert!(topology.link(&link_id).unwrap().metadata.get(LIVENESS_STATUS_KEY).is_none());
    }

    #[tokio::test]
    async fn test_liveness_for_unknown_link() {
        let (topology, _rx) = engine();
        let err = topology
            .handle_liveness(&InterfaceId::new("A", 1), &InterfaceId::new("B", 1), LivenessStatus::Up)
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_network_status_counts_known_switches() {
        let (topology, _rx) = engine();
        topology.handle_interface_created(&info("A", 1, false), Utc::now()).unwrap();
        let touched = topology.handle_network_status_updated(&[
            InterfaceId::new("A", 1),
            InterfaceId::new("A", 2),
            InterfaceId::new("Z", 1),
        ]);
        assert_eq!(touched, 1);
    }

    #[tokio::test]
    async fn test_new_switch_notifies_when_enabled() {
        let store = Arc::new(MemoryStore::new());
        let settings = EngineSettings {
            enable_by_default: true,
            ..EngineSettings::default()
        };
        let (topology, mut rx) = Topology::new(settings, store);
        let switch = topology
            .handle_new_switch(&SwitchInfo {
                dpid: "00:01".into(),
                description: None,
            })
            .unwrap();
        assert!(switch.active);
        assert_eq!(
            names(&mut rx),
            vec!["topology.updated".to_string(), "topology.switch.enabled".to_string()]
        );
    }
}
