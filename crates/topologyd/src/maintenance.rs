//! Maintenance windows.
//!
//! Starting maintenance forces an entity down (disabled and inactive)
//! together with the interfaces it spans. Ending it brings them back up
//! immediately, without waiting out the link-up debounce. Each item in a
//! batch either applies completely or not at all.

use crate::error::{Result, TopologyError};
use crate::model::Entity;
use crate::notification::{reason, Notification};
use crate::registry::lookup_interface_mut;
use crate::topology::Topology;
use crate::view;
use std::collections::{BTreeMap, BTreeSet};
use tokio::time::Instant;
use topo_types::{InterfaceId, LinkId};
use tracing::{info, warn};

/// Per-item result of a maintenance batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub succeeded: Vec<String>,
    pub failed: BTreeMap<String, TopologyError>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, id: String, result: Result<()>) {
        match result {
            Ok(()) => self.succeeded.push(id),
            Err(e) => {
                warn!(id = %id, error = %e, "Maintenance item failed");
                self.failed.insert(id, e);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Start,
    End,
}

impl Phase {
    fn up(self) -> bool {
        self == Phase::End
    }
}

impl Topology {
    pub fn start_maintenance_switches(&self, dpids: &[String]) -> BatchReport {
        self.maintain_switches(dpids, Phase::Start)
    }

    pub fn end_maintenance_switches(&self, dpids: &[String]) -> BatchReport {
        self.maintain_switches(dpids, Phase::End)
    }

    pub fn start_maintenance_links(&self, ids: &[LinkId]) -> BatchReport {
        self.maintain_links(ids, Phase::Start)
    }

    pub fn end_maintenance_links(&self, ids: &[LinkId]) -> BatchReport {
        self.maintain_links(ids, Phase::End)
    }

    fn maintain_switches(&self, dpids: &[String], phase: Phase) -> BatchReport {
        let mut report = BatchReport::default();
        let mut touched_links = BTreeSet::new();
        for dpid in dpids {
            let result = self.maintain_switch(dpid, phase, &mut touched_links);
            if result.is_ok() {
                let notification = if phase.up() {
                    Notification::SwitchEnabled { dpid: dpid.clone() }
                } else {
                    Notification::SwitchDisabled { dpid: dpid.clone() }
                };
                self.notifier.send(notification);
            }
            report.record(dpid.clone(), result);
        }
        self.finish_maintenance(&report, touched_links, phase);
        report
    }

    /// Applies one switch: the switch, all of its interfaces and every
    /// link touching it. Ending maintenance only brings a link up once its
    /// far endpoint is active too.
    fn maintain_switch(&self, dpid: &str, phase: Phase, touched: &mut BTreeSet<LinkId>) -> Result<()> {
        let now = Instant::now();
        let mut links = self.links.lock();
        let link_ids = links.links_of_switch(dpid);
        self.switches.with_switch_mut(dpid, |sw| {
            set_planes(sw, phase);
            for interface in sw.interfaces.values_mut() {
                set_planes(interface, phase);
            }
        })?;
        let switches = self.switches.read();
        for id in &link_ids {
            let Some(link) = links.get_mut(id) else {
                continue;
            };
            if phase.up() {
                link.enable();
                if !view::endpoints_active(link, &switches) {
                    continue;
                }
            }
            if set_planes(link, phase) {
                link.stamp_status_change(now);
            }
            if phase.up() {
                link.notified_up_at = Some(now);
            }
        }
        drop(switches);
        if !phase.up() {
            for id in &link_ids {
                self.link_up_timer.cancel(id);
            }
        }
        touched.extend(link_ids);
        Ok(())
    }

    fn maintain_links(&self, ids: &[LinkId], phase: Phase) -> BatchReport {
        let mut report = BatchReport::default();
        let mut touched = BTreeSet::new();
        for id in ids {
            let result = self.maintain_link(id, phase);
            if result.is_ok() {
                touched.insert(id.clone());
            }
            report.record(id.to_string(), result);
        }
        self.finish_maintenance(&report, touched, phase);
        report
    }

    /// Applies one link and both of its endpoints.
    ///
    /// Endpoints are checked before anything changes, so a link with a
    /// missing endpoint is left untouched.
    fn maintain_link(&self, id: &LinkId, phase: Phase) -> Result<()> {
        let now = Instant::now();
        let mut links = self.links.lock();
        let link = links
            .get_mut(id)
            .ok_or_else(|| TopologyError::link_not_found(id))?;
        let endpoints: [InterfaceId; 2] = [link.endpoint_a.clone(), link.endpoint_b.clone()];

        self.switches.with_map_mut(|map| {
            for endpoint in &endpoints {
                if lookup_interface_mut(map, endpoint).is_none() {
                    return Err(TopologyError::interface_not_found(endpoint));
                }
            }
            for endpoint in &endpoints {
                if let Some(interface) = lookup_interface_mut(map, endpoint) {
                    set_planes(interface, phase);
                }
            }
            Ok(())
        })?;

        if set_planes(link, phase) {
            link.stamp_status_change(now);
        }
        if phase.up() {
            link.notified_up_at = Some(now);
        } else {
            self.link_up_timer.cancel(id);
        }
        Ok(())
    }

    fn finish_maintenance(&self, report: &BatchReport, links: BTreeSet<LinkId>, phase: Phase) {
        if report.succeeded.is_empty() {
            return;
        }
        info!(
            up = phase.up(),
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Maintenance batch applied"
        );
        self.schedule_save();
        self.notify_topology_update();
        for link in self.link_views(&links) {
            self.notifier.send(Notification::LinkStatusChanged {
                status: link.status,
                link,
                reason: reason::MAINTENANCE.to_string(),
            });
        }
    }
}

/// Forces both planes of `entity`; returns whether the active flag moved.
fn set_planes<E: Entity>(entity: &mut E, phase: Phase) -> bool {
    if phase.up() {
        entity.enable();
        entity.activate()
    } else {
        entity.disable();
        entity.deactivate()
    }
}
