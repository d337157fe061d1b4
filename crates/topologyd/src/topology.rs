//! The topology engine.
//!
//! `Topology` owns the switch registry and the link table and is the only
//! place their fields are mutated. Two coarse locks guard it:
//!
//! - the links lock (`links`), held for every link read-modify-write,
//!   always taken before the switch registry lock;
//! - the snapshot lock (`snapshot_lock`), held while a snapshot is
//!   composed and written.
//!
//! Neither is held across a debounce wait. Notifications are queued after
//! the locks are released.

use crate::config::TopologydConfig;
use crate::debounce::LinkUpTimer;
use crate::error::{Result, TopologyError};
use crate::links::LinkTable;
use crate::model::{Entity, Interface, Switch};
use crate::notification::{reason, Notification, Notifier};
use crate::registry::SwitchRegistry;
use crate::snapshot::NetworkStatus;
use crate::store::TopologyStore;
use crate::view::{self, LinkView, TopologyView};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::task::TaskTracker;
use topo_common::PollPolicy;
use topo_types::{EntityKind, EntityStatus, InterfaceId, LinkId};
use tracing::{debug, info, warn};

/// Engine tunables.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Debounce window for link-up notifications.
    pub link_up_timer: Duration,
    /// Admin state given to newly discovered entities.
    pub enable_by_default: bool,
    /// Startup snapshot polling.
    pub bootstrap: PollPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&TopologydConfig::default())
    }
}

impl From<&TopologydConfig> for EngineSettings {
    fn from(config: &TopologydConfig) -> Self {
        Self {
            link_up_timer: config.link_up_timer(),
            enable_by_default: config.topology.enable_entities_by_default,
            bootstrap: config.bootstrap_policy(),
        }
    }
}

pub struct Topology {
    me: Weak<Topology>,
    pub(crate) settings: EngineSettings,
    pub(crate) switches: SwitchRegistry,
    pub(crate) links: Mutex<LinkTable>,
    pub(crate) store: Arc<dyn TopologyStore>,
    snapshot_lock: tokio::sync::Mutex<()>,
    pub(crate) notifier: Notifier,
    pub(crate) link_up_timer: LinkUpTimer,
    intf_updated_at: Mutex<HashMap<InterfaceId, DateTime<Utc>>>,
    tasks: TaskTracker,
}

impl Topology {
    /// Builds an engine around `store` and returns it with the receiving
    /// end of its notification channel.
    pub fn new(
        settings: EngineSettings,
        store: Arc<dyn TopologyStore>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Notification>) {
        let (notifier, rx) = Notifier::channel();
        let topology = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            link_up_timer: LinkUpTimer::new(settings.link_up_timer),
            settings,
            switches: SwitchRegistry::new(),
            links: Mutex::new(LinkTable::new()),
            store,
            snapshot_lock: tokio::sync::Mutex::new(()),
            notifier,
            intf_updated_at: Mutex::new(HashMap::new()),
            tasks: TaskTracker::new(),
        });
        (topology, rx)
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub(crate) fn handle(&self) -> Option<Arc<Self>> {
        self.me.upgrade()
    }

    // ---------------------------------------------------------------------
    // Persistence
    // ---------------------------------------------------------------------

    /// Serialises the current registries.
    pub fn compose_snapshot(&self) -> NetworkStatus {
        let links = self.links.lock();
        let switches = self.switches.read();
        NetworkStatus::compose(&switches, links.iter())
    }

    /// Composes and writes a snapshot under the snapshot lock.
    pub async fn save_snapshot(&self) -> Result<()> {
        let _guard = self.snapshot_lock.lock().await;
        let snapshot = self.compose_snapshot();
        self.store.save_snapshot(&snapshot).await
    }

    /// Requests an asynchronous snapshot write.
    ///
    /// Failures are logged; callers never wait on the write.
    pub fn schedule_save(&self) {
        let Some(this) = self.handle() else {
            return;
        };
        self.tasks.spawn(async move {
            match this.save_snapshot().await {
                Ok(()) => debug!("Snapshot saved"),
                Err(e) => warn!(error = %e, "Failed to save snapshot"),
            }
        });
    }

    /// Requests an asynchronous write of one metadata namespace.
    pub fn schedule_metadata_save(&self, kind: EntityKind) {
        let Some(this) = self.handle() else {
            return;
        };
        self.tasks.spawn(async move {
            let _guard = this.snapshot_lock.lock().await;
            let namespace = this.compose_snapshot().metadata_namespace(kind);
            match this.store.save_metadata(kind, &namespace).await {
                Ok(()) => debug!(namespace = kind.plural(), "Metadata saved"),
                Err(e) => warn!(namespace = kind.plural(), error = %e, "Failed to save metadata"),
            }
        });
    }

    /// Waits for every scheduled write to finish.
    pub async fn flush(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    /// Cancels pending link-up wakes and writes a final snapshot.
    pub async fn shutdown(&self) -> Result<()> {
        let cancelled = self.link_up_timer.cancel_all();
        info!(cancelled, "Cancelled pending link-up confirmations");
        self.flush().await;
        self.save_snapshot().await
    }

    // ---------------------------------------------------------------------
    // Notifications
    // ---------------------------------------------------------------------

    pub(crate) fn notify_topology_update(&self) {
        self.notifier.send(Notification::TopologyUpdated {
            topology: Arc::new(self.topology()),
        });
    }

    /// Propagates an admin change to the status of `link_ids`.
    ///
    /// Enabling goes through the debounce so consumers only hear "up" once
    /// the link has been stable; anything else is reported immediately.
    pub(crate) fn notify_links_status(&self, link_ids: BTreeSet<LinkId>, why: &'static str) {
        if why == reason::LINK_ENABLED {
            for id in link_ids {
                self.schedule_link_up_check(id, why);
            }
            return;
        }
        for view in self.link_views(&link_ids) {
            self.notifier.send(Notification::LinkStatusChanged {
                status: view.status,
                link: view,
                reason: why.to_string(),
            });
        }
    }

    // ---------------------------------------------------------------------
    // Debounce
    // ---------------------------------------------------------------------

    /// Schedules a link-up confirmation for `link_id` one debounce window
    /// from now.
    pub(crate) fn schedule_link_up_check(&self, link_id: LinkId, why: &'static str) {
        let Some(this) = self.handle() else {
            return;
        };
        let scheduled_at = Instant::now();
        let id = link_id.clone();
        debug!(link_id = %link_id, reason = why, "Link-up confirmation scheduled");
        self.link_up_timer.schedule(link_id, async move {
            this.confirm_link_up(&id, scheduled_at, why);
        });
    }

    /// Commits a pending link-up if the link is still up and stable.
    ///
    /// Returns true when a link-up notification was emitted. A wake that
    /// finds the link down, inside a newer debounce window, or already
    /// notified since `scheduled_at` does nothing.
    pub(crate) fn confirm_link_up(&self, link_id: &LinkId, scheduled_at: Instant, why: &str) -> bool {
        let now = Instant::now();
        let delay = self.settings.link_up_timer;
        let view = {
            let mut links = self.links.lock();
            let switches = self.switches.read();
            let Some(link) = links.get_mut(link_id) else {
                return false;
            };
            if !link.active {
                debug!(link_id = %link_id, "Link-up wake is stale, link inactive");
                return false;
            }
            if link
                .last_status_change
                .is_some_and(|changed| now.saturating_duration_since(changed) < delay)
            {
                debug!(link_id = %link_id, "Link-up wake is stale, link flapped");
                return false;
            }
            if link.notified_up_at.is_some_and(|at| at >= scheduled_at) {
                debug!(link_id = %link_id, "Link-up already notified");
                return false;
            }
            if view::link_status(link, &switches, delay, now) != EntityStatus::Up {
                return false;
            }
            link.notified_up_at = Some(now);
            LinkView::build(link, &switches, delay, now)
        };

        info!(link_id = %link_id, reason = why, "Link up");
        self.notify_topology_update();
        self.notifier.send(Notification::LinkUp {
            link: view,
            reason: why.to_string(),
        });
        self.schedule_save();
        true
    }

    /// Drops interface events older than the newest one already applied.
    ///
    /// Only known interfaces are tracked; an event for an unknown one is
    /// passed through so its handler reports it as not found.
    pub(crate) fn accept_interface_event(&self, id: &InterfaceId, at: DateTime<Utc>) -> bool {
        if !self.switches.interface_exists(id) {
            return true;
        }
        let mut seen = self.intf_updated_at.lock();
        match seen.get(id) {
            Some(last) if *last > at => {
                debug!(interface = %id, "Dropping out-of-order interface event");
                false
            }
            _ => {
                seen.insert(id.clone(), at);
                true
            }
        }
    }

    /// Stops tracking event order for a removed interface.
    pub(crate) fn forget_interface_events(&self, id: &InterfaceId) {
        self.intf_updated_at.lock().remove(id);
    }

    // ---------------------------------------------------------------------
    // Read API
    // ---------------------------------------------------------------------

    pub fn topology(&self) -> TopologyView {
        let links = self.links.lock();
        let switches = self.switches.read();
        TopologyView::build(&switches, links.iter(), self.settings.link_up_timer, Instant::now())
    }

    pub fn switches(&self) -> Vec<Switch> {
        self.switches.list()
    }

    pub fn switch(&self, dpid: &str) -> Result<Switch> {
        self.switches
            .get(dpid)
            .ok_or_else(|| TopologyError::switch_not_found(dpid))
    }

    pub fn interfaces(&self) -> Vec<Interface> {
        self.switches
            .list()
            .into_iter()
            .flat_map(|sw| sw.interfaces.into_values())
            .collect()
    }

    pub fn interface(&self, id: &InterfaceId) -> Result<Interface> {
        self.switches
            .interface(id)
            .ok_or_else(|| TopologyError::interface_not_found(id))
    }

    pub fn interface_status(&self, id: &InterfaceId) -> Result<EntityStatus> {
        let switch = self.switch(id.switch())?;
        let interface = switch
            .interface(id.port())
            .ok_or_else(|| TopologyError::interface_not_found(id))?;
        Ok(view::interface_status(&switch, interface))
    }

    pub fn links(&self) -> Vec<LinkView> {
        self.topology().links.into_values().collect()
    }

    pub fn link(&self, id: &LinkId) -> Result<LinkView> {
        self.link_views(&BTreeSet::from([id.clone()]))
            .pop()
            .ok_or_else(|| TopologyError::link_not_found(id))
    }

    pub fn link_status(&self, id: &LinkId) -> Result<EntityStatus> {
        self.link(id).map(|l| l.status)
    }

    /// The link attached to `interface`, if any.
    pub fn link_for_interface(&self, interface: &InterfaceId) -> Option<LinkView> {
        let links = self.links.lock();
        let switches = self.switches.read();
        links.find_by_interface(interface).map(|l| {
            LinkView::build(l, &switches, self.settings.link_up_timer, Instant::now())
        })
    }

    pub(crate) fn link_views(&self, ids: &BTreeSet<LinkId>) -> Vec<LinkView> {
        let links = self.links.lock();
        let switches = self.switches.read();
        let now = Instant::now();
        ids.iter()
            .filter_map(|id| links.get(id))
            .map(|l| LinkView::build(l, &switches, self.settings.link_up_timer, now))
            .collect()
    }

    // ---------------------------------------------------------------------
    // Link resolution
    // ---------------------------------------------------------------------

    /// Returns the link joining `a` and `b`, creating it if necessary.
    ///
    /// Both interfaces must exist. Resolution runs under the links lock
    /// so concurrent discovery of the same pair yields a single link.
    pub fn get_or_create_link(&self, a: &InterfaceId, b: &InterfaceId) -> Result<(LinkId, bool)> {
        let mut links = self.links.lock();
        self.resolve_link_locked(&mut links, a, b)
    }

    pub(crate) fn resolve_link_locked(
        &self,
        links: &mut LinkTable,
        a: &InterfaceId,
        b: &InterfaceId,
    ) -> Result<(LinkId, bool)> {
        for id in [a, b] {
            if !self.switches.interface_exists(id) {
                return Err(TopologyError::LinkCreation(format!("unknown endpoint {}", id)));
            }
        }
        links.get_or_create(a, b, self.settings.enable_by_default)
    }

    // ---------------------------------------------------------------------
    // Switch state
    // ---------------------------------------------------------------------

    pub fn enable_switch(&self, dpid: &str) -> Result<bool> {
        let changed = self.switches.with_switch_mut(dpid, |sw| sw.enable())?;
        if changed {
            info!(switch = %dpid, "Switch enabled");
            self.schedule_save();
            self.notifier.send(Notification::SwitchEnabled {
                dpid: dpid.to_string(),
            });
            self.notify_topology_update();
            let link_ids = self.links.lock().links_of_switch(dpid);
            self.notify_links_status(link_ids, reason::LINK_ENABLED);
        }
        Ok(changed)
    }

    pub fn disable_switch(&self, dpid: &str) -> Result<bool> {
        let changed = self.switches.with_switch_mut(dpid, |sw| sw.disable())?;
        if changed {
            info!(switch = %dpid, "Switch disabled");
            self.schedule_save();
            self.notifier.send(Notification::SwitchDisabled {
                dpid: dpid.to_string(),
            });
            self.notify_topology_update();
            let link_ids = self.links.lock().links_of_switch(dpid);
            self.notify_links_status(link_ids, reason::LINK_DISABLED);
        }
        Ok(changed)
    }

    pub fn activate_switch(&self, dpid: &str) -> Result<bool> {
        let changed = self.switches.with_switch_mut(dpid, |sw| sw.activate())?;
        if changed {
            self.notify_topology_update();
        }
        Ok(changed)
    }

    pub fn deactivate_switch(&self, dpid: &str) -> Result<bool> {
        let changed = self.switches.with_switch_mut(dpid, |sw| sw.deactivate())?;
        if changed {
            self.notify_topology_update();
        }
        Ok(changed)
    }

    // ---------------------------------------------------------------------
    // Interface state
    // ---------------------------------------------------------------------

    pub fn enable_interface(&self, id: &InterfaceId) -> Result<bool> {
        let changed = self.switches.with_interface_mut(id, |i| i.enable())?;
        if changed {
            self.after_interfaces_admin_change(&[id.clone()], true);
        }
        Ok(changed)
    }

    pub fn disable_interface(&self, id: &InterfaceId) -> Result<bool> {
        let changed = self.switches.with_interface_mut(id, |i| i.disable())?;
        if changed {
            self.after_interfaces_admin_change(&[id.clone()], false);
        }
        Ok(changed)
    }

    /// Enables `ports` on `dpid`, or every interface when `ports` is None.
    ///
    /// Existing interfaces are changed even when some listed ports are
    /// missing; the missing ones are then reported as a conflict.
    pub fn enable_interfaces(&self, dpid: &str, ports: Option<&[u32]>) -> Result<Vec<InterfaceId>> {
        self.set_interfaces_enabled(dpid, ports, true)
    }

    pub fn disable_interfaces(&self, dpid: &str, ports: Option<&[u32]>) -> Result<Vec<InterfaceId>> {
        self.set_interfaces_enabled(dpid, ports, false)
    }

    fn set_interfaces_enabled(
        &self,
        dpid: &str,
        ports: Option<&[u32]>,
        enable: bool,
    ) -> Result<Vec<InterfaceId>> {
        let (changed, missing) = self.switches.with_switch_mut(dpid, |sw| {
            let targets: Vec<u32> = match ports {
                Some(ports) => ports.to_vec(),
                None => sw.interfaces.keys().copied().collect(),
            };
            let mut changed = Vec::new();
            let mut missing = Vec::new();
            for port in targets {
                match sw.interface_mut(port) {
                    Some(i) => {
                        let flipped = if enable { i.enable() } else { i.disable() };
                        if flipped {
                            changed.push(i.id.clone());
                        }
                    }
                    None => missing.push(port),
                }
            }
            (changed, missing)
        })?;

        if !changed.is_empty() {
            self.after_interfaces_admin_change(&changed, enable);
        }
        if !missing.is_empty() {
            return Err(TopologyError::Conflict(format!(
                "interfaces not found on switch {}: {:?}",
                dpid, missing
            )));
        }
        Ok(changed)
    }

    fn after_interfaces_admin_change(&self, ids: &[InterfaceId], enabled: bool) {
        self.schedule_save();
        for id in ids {
            info!(interface = %id, enabled, "Interface admin state changed");
            let notification = if enabled {
                Notification::InterfaceEnabled { interface: id.clone() }
            } else {
                Notification::InterfaceDisabled { interface: id.clone() }
            };
            self.notifier.send(notification);
        }
        self.notify_topology_update();

        let link_ids: BTreeSet<LinkId> = {
            let links = self.links.lock();
            ids.iter()
                .filter_map(|id| links.find_by_interface(id).map(|l| l.id.clone()))
                .collect()
        };
        let why = if enabled {
            reason::LINK_ENABLED
        } else {
            reason::LINK_DISABLED
        };
        self.notify_links_status(link_ids, why);
    }

    /// Marks an interface active. An attached link whose far endpoint is
    /// already active goes through the link-up debounce.
    pub fn activate_interface(&self, id: &InterfaceId) -> Result<bool> {
        let was_active = self.interface(id)?.active;
        self.handle_link_up(id)?;
        Ok(!was_active)
    }

    /// Marks an interface inactive, taking an active attached link down
    /// with it.
    pub fn deactivate_interface(&self, id: &InterfaceId) -> Result<bool> {
        let was_active = self.interface(id)?.active;
        self.handle_link_down(id, reason::LINK_DOWN)?;
        Ok(was_active)
    }

    /// Sets the NNI/UNI flags of an interface. They are mutually exclusive.
    pub fn set_interface_classification(&self, id: &InterfaceId, nni: bool, uni: bool) -> Result<()> {
        if nni && uni {
            return Err(TopologyError::validation(format!(
                "interface {} cannot be both NNI and UNI",
                id
            )));
        }
        let changed = self.switches.with_interface_mut(id, |i| {
            let changed = i.nni != nni || i.uni != uni;
            i.nni = nni;
            i.uni = uni;
            changed
        })?;
        if changed {
            self.schedule_save();
            self.notify_topology_update();
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Link state
    // ---------------------------------------------------------------------

    pub fn enable_link(&self, id: &LinkId) -> Result<bool> {
        let changed = self.update_link(id, |l| l.enable())?;
        if changed {
            info!(link_id = %id, "Link enabled");
            self.schedule_save();
            if let Ok(link) = self.link(id) {
                self.notifier.send(Notification::LinkEnabled { link });
            }
            self.notify_topology_update();
            self.notify_links_status(BTreeSet::from([id.clone()]), reason::LINK_ENABLED);
        }
        Ok(changed)
    }

    pub fn disable_link(&self, id: &LinkId) -> Result<bool> {
        let changed = self.update_link(id, |l| l.disable())?;
        if changed {
            info!(link_id = %id, "Link disabled");
            self.schedule_save();
            if let Ok(link) = self.link(id) {
                self.notifier.send(Notification::LinkDisabled { link });
            }
            self.notify_topology_update();
            self.notify_links_status(BTreeSet::from([id.clone()]), reason::LINK_DISABLED);
        }
        Ok(changed)
    }

    /// Marks a link active. Both endpoints must already be active; the
    /// transition is confirmed through the link-up debounce.
    pub fn activate_link(&self, id: &LinkId) -> Result<bool> {
        let now = Instant::now();
        let changed = {
            let mut links = self.links.lock();
            let link = links
                .get_mut(id)
                .ok_or_else(|| TopologyError::link_not_found(id))?;
            if !view::endpoints_active(link, &self.switches.read()) {
                return Err(TopologyError::Conflict(format!(
                    "endpoints of link {} are not active",
                    id
                )));
            }
            let changed = link.activate();
            if changed {
                link.stamp_status_change(now);
            }
            changed
        };
        if changed {
            self.notify_topology_update();
            self.schedule_link_up_check(id.clone(), reason::LINK_UP);
        }
        Ok(changed)
    }

    pub fn deactivate_link(&self, id: &LinkId) -> Result<bool> {
        let now = Instant::now();
        let changed = self.update_link(id, |l| {
            let changed = l.deactivate();
            if changed {
                l.stamp_status_change(now);
            }
            changed
        })?;
        if changed {
            self.link_up_timer.cancel(id);
            self.notify_topology_update();
        }
        Ok(changed)
    }

    pub(crate) fn update_link<R>(
        &self,
        id: &LinkId,
        f: impl FnOnce(&mut crate::model::Link) -> R,
    ) -> Result<R> {
        let mut links = self.links.lock();
        links
            .get_mut(id)
            .map(f)
            .ok_or_else(|| TopologyError::link_not_found(id))
    }
}
