//! Read-only views handed to consumers.

use crate::model::{Interface, Link, Switch};
use crate::registry::{lookup_interface, SwitchMap};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use topo_types::{EntityStatus, InterfaceId, LinkId, Metadata};

/// A link as seen by consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkView {
    pub id: LinkId,
    pub endpoint_a: InterfaceId,
    pub endpoint_b: InterfaceId,
    pub enabled: bool,
    /// Committed operational state. Stays false while a fresh up
    /// transition is still inside the debounce window.
    pub active: bool,
    pub status: EntityStatus,
    pub metadata: Metadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_status_change: Option<DateTime<Utc>>,
}

impl LinkView {
    pub(crate) fn build(link: &Link, switches: &SwitchMap, delay: Duration, now: Instant) -> Self {
        let status = link_status(link, switches, delay, now);
        Self {
            id: link.id.clone(),
            endpoint_a: link.endpoint_a.clone(),
            endpoint_b: link.endpoint_b.clone(),
            enabled: link.enabled,
            active: link.active && !link.is_pending_up(delay, now),
            status,
            metadata: link.metadata.clone(),
            last_status_change: link.last_status_change_at,
        }
    }
}

/// Whole-topology view published with `topology.updated`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TopologyView {
    pub switches: BTreeMap<String, Switch>,
    pub links: BTreeMap<LinkId, LinkView>,
}

impl TopologyView {
    pub(crate) fn build<'a>(
        switches: &SwitchMap,
        links: impl Iterator<Item = &'a Link>,
        delay: Duration,
        now: Instant,
    ) -> Self {
        Self {
            switches: switches
                .iter()
                .map(|(id, sw)| (id.clone(), sw.clone()))
                .collect(),
            links: links
                .map(|l| (l.id.clone(), LinkView::build(l, switches, delay, now)))
                .collect(),
        }
    }

    pub fn interfaces(&self) -> impl Iterator<Item = &Interface> {
        self.switches.values().flat_map(|sw| sw.interfaces.values())
    }
}

/// Status of an interface, taking its switch's admin state into account.
pub fn interface_status(switch: &Switch, interface: &Interface) -> EntityStatus {
    EntityStatus::derive(switch.enabled && interface.enabled, interface.active)
}

/// Status of a link including its endpoints.
///
/// Disabled if the link, an endpoint or an endpoint's switch is disabled.
/// Down if the link or an endpoint is inactive, an endpoint no longer
/// exists, or an up transition is still being debounced.
pub fn link_status(link: &Link, switches: &SwitchMap, delay: Duration, now: Instant) -> EntityStatus {
    let endpoints = [&link.endpoint_a, &link.endpoint_b].map(|id| {
        switches
            .get(&id.switch().to_string())
            .and_then(|sw| sw.interface(id.port()).map(|i| (sw.enabled, i)))
    });

    let disabled = !link.enabled
        || endpoints
            .iter()
            .flatten()
            .any(|(switch_enabled, i)| !switch_enabled || !i.enabled);
    if disabled {
        return EntityStatus::Disabled;
    }

    let endpoints_active = endpoints.iter().all(|e| e.is_some_and(|(_, i)| i.active));
    if !link.active || !endpoints_active || link.is_pending_up(delay, now) {
        return EntityStatus::Down;
    }
    EntityStatus::Up
}

/// True if both endpoints of `link` exist and are operationally active.
pub(crate) fn endpoints_active(link: &Link, switches: &SwitchMap) -> bool {
    [&link.endpoint_a, &link.endpoint_b]
        .iter()
        .all(|id| lookup_interface(switches, id).is_some_and(|i| i.active))
}
