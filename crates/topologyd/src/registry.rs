//! Switch and interface registry.
//!
//! The registry is the only owner of switch state. Callers get clones for
//! reading and closures for mutation, so no reference into the map ever
//! escapes the lock.

use crate::error::{Result, TopologyError};
use crate::model::{Interface, Switch};
use parking_lot::{RwLock, RwLockReadGuard};
use topo_common::SyncMap;
use topo_types::InterfaceId;

pub type SwitchMap = SyncMap<String, Switch>;

#[derive(Debug, Default)]
pub struct SwitchRegistry {
    inner: RwLock<SwitchMap>,
}

impl SwitchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the switch with `id`, creating it if absent.
    pub fn get_or_create(&self, id: &str, enabled: bool) -> (Switch, bool) {
        let mut map = self.inner.write();
        let (switch, created) = map.get_or_insert_with(id.to_string(), || Switch::new(id, enabled));
        if created {
            tracing::debug!(switch = %id, "Switch created in registry");
        }
        (switch.clone(), created)
    }

    pub fn get(&self, id: &str) -> Option<Switch> {
        self.inner.read().get(&id.to_string()).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().contains_key(&id.to_string())
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Clones of every switch, in id order.
    pub fn list(&self) -> Vec<Switch> {
        self.inner.read().values().cloned().collect()
    }

    pub fn with_switch_mut<R>(&self, id: &str, f: impl FnOnce(&mut Switch) -> R) -> Result<R> {
        self.inner
            .write()
            .update(&id.to_string(), f)
            .map_err(|_| TopologyError::switch_not_found(id))
    }

    pub fn interface(&self, id: &InterfaceId) -> Option<Interface> {
        let map = self.inner.read();
        lookup_interface(&map, id).cloned()
    }

    pub fn with_interface_mut<R>(
        &self,
        id: &InterfaceId,
        f: impl FnOnce(&mut Interface) -> R,
    ) -> Result<R> {
        let mut map = self.inner.write();
        let switch = map
            .get_mut(&id.switch().to_string())
            .ok_or_else(|| TopologyError::switch_not_found(id.switch()))?;
        let interface = switch
            .interface_mut(id.port())
            .ok_or_else(|| TopologyError::interface_not_found(id))?;
        Ok(f(interface))
    }

    /// Runs `f` with exclusive access to the whole map.
    ///
    /// Used for multi-entity updates that must be all-or-nothing.
    pub fn with_map_mut<R>(&self, f: impl FnOnce(&mut SwitchMap) -> R) -> R {
        f(&mut self.inner.write())
    }

    pub fn interface_exists(&self, id: &InterfaceId) -> bool {
        lookup_interface(&self.inner.read(), id).is_some()
    }

    pub fn interface_active(&self, id: &InterfaceId) -> bool {
        lookup_interface(&self.inner.read(), id).is_some_and(|i| i.active)
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, SwitchMap> {
        self.inner.read()
    }
}

/// Resolves an interface inside an already-locked map.
pub fn lookup_interface<'a>(map: &'a SwitchMap, id: &InterfaceId) -> Option<&'a Interface> {
    map.get(&id.switch().to_string())
        .and_then(|sw| sw.interface(id.port()))
}

/// Mutable variant of [`lookup_interface`].
pub fn lookup_interface_mut<'a>(
    map: &'a mut SwitchMap,
    id: &InterfaceId,
) -> Option<&'a mut Interface> {
    map.get_mut(&id.switch().to_string())
        .and_then(|sw| sw.interface_mut(id.port()))
}
