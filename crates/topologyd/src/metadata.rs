//! Entity metadata operations.

use crate::error::{Result, TopologyError};
use crate::model::{strip_runtime_keys, Entity};
use crate::notification::{MetadataAction, Notification};
use crate::topology::Topology;
use serde_json::Value;
use std::fmt;
use topo_types::{EntityKind, InterfaceId, LinkId, Metadata, ParseError};
use tracing::{debug, warn};

/// Addresses one switch, interface or link.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Switch(String),
    Interface(InterfaceId),
    Link(LinkId),
}

impl EntityRef {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityRef::Switch(_) => EntityKind::Switch,
            EntityRef::Interface(_) => EntityKind::Interface,
            EntityRef::Link(_) => EntityKind::Link,
        }
    }

    /// Builds a reference from a namespace key of class `kind`.
    pub fn parse(kind: EntityKind, id: &str) -> std::result::Result<Self, ParseError> {
        Ok(match kind {
            EntityKind::Switch => EntityRef::Switch(id.to_string()),
            EntityKind::Interface => EntityRef::Interface(id.parse()?),
            EntityKind::Link => EntityRef::Link(id.parse()?),
        })
    }

    fn not_found(&self) -> TopologyError {
        TopologyError::not_found(self.kind(), self)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Switch(id) => f.write_str(id),
            EntityRef::Interface(id) => write!(f, "{}", id),
            EntityRef::Link(id) => write!(f, "{}", id),
        }
    }
}

impl Topology {
    /// Runs `f` against the entity behind `target`.
    fn with_entity_mut<R>(&self, target: &EntityRef, f: impl FnOnce(&mut dyn MetadataHolder) -> R) -> Result<R> {
        match target {
            EntityRef::Switch(dpid) => self
                .switches
                .with_switch_mut(dpid, |sw| f(sw))
                .map_err(|_| target.not_found()),
            EntityRef::Interface(id) => self
                .switches
                .with_interface_mut(id, |i| f(i))
                .map_err(|_| target.not_found()),
            EntityRef::Link(id) => self.update_link(id, |l| f(l)),
        }
    }

    pub fn metadata(&self, target: &EntityRef) -> Result<Metadata> {
        self.with_entity_mut(target, |e| e.metadata_map().clone())
    }

    /// Merges `entries` into the entity's metadata.
    pub fn extend_metadata(&self, target: &EntityRef, entries: Metadata) -> Result<()> {
        let added = entries.clone();
        self.with_entity_mut(target, |e| e.merge(entries))?;
        self.after_metadata_change(target, MetadataAction::Added, added);
        Ok(())
    }

    /// Like [`extend_metadata`](Self::extend_metadata), for an untyped
    /// payload that must be a JSON object.
    pub fn extend_metadata_value(&self, target: &EntityRef, payload: Value) -> Result<()> {
        match payload {
            Value::Object(entries) => self.extend_metadata(target, entries),
            other => Err(TopologyError::validation(format!(
                "metadata must be an object, got {}",
                other
            ))),
        }
    }

    /// Removes `key`. Returns whether it was present; an absent key is not
    /// an error here.
    pub fn remove_metadata(&self, target: &EntityRef, key: &str) -> Result<bool> {
        let removed = self.with_entity_mut(target, |e| e.take(key))?;
        match removed {
            Some(value) => {
                let entry = Metadata::from_iter([(key.to_string(), value)]);
                self.after_metadata_change(target, MetadataAction::Removed, entry);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Removes `key`, failing when it is absent.
    pub fn remove_metadata_key(&self, target: &EntityRef, key: &str) -> Result<()> {
        if self.remove_metadata(target, key)? {
            return Ok(());
        }
        Err(TopologyError::MetadataKeyNotFound {
            kind: target.kind(),
            id: target.to_string(),
            key: key.to_string(),
        })
    }

    /// Merges the persisted metadata namespaces into restored entities.
    ///
    /// Entries for entities that were not restored are skipped. Returns how
    /// many entities were updated.
    pub(crate) async fn restore_metadata(&self) -> usize {
        let mut merged = 0;
        for kind in [EntityKind::Switch, EntityKind::Interface, EntityKind::Link] {
            let namespace = match self.store.get_metadata(kind).await {
                Ok(namespace) => namespace,
                Err(e) => {
                    warn!(namespace = kind.plural(), error = %e, "Failed to read metadata namespace");
                    continue;
                }
            };
            for (id, entries) in namespace {
                let entries = match kind {
                    EntityKind::Link => strip_runtime_keys(entries),
                    _ => entries,
                };
                if entries.is_empty() {
                    continue;
                }
                let applied = EntityRef::parse(kind, &id)
                    .map_err(TopologyError::from)
                    .and_then(|target| self.with_entity_mut(&target, |e| e.merge(entries)));
                match applied {
                    Ok(()) => merged += 1,
                    Err(e) => debug!(namespace = kind.plural(), id = %id, error = %e, "Skipping persisted metadata"),
                }
            }
        }
        merged
    }

    fn after_metadata_change(&self, target: &EntityRef, action: MetadataAction, metadata: Metadata) {
        let kind = target.kind();
        debug!(kind = %kind, id = %target, action = %action, "Metadata changed");
        self.schedule_metadata_save(kind);
        self.schedule_save();
        self.notifier.send(Notification::MetadataChanged {
            kind,
            id: target.to_string(),
            action,
            metadata,
        });
        self.notify_topology_update();
    }
}

/// Object-safe view over [`Entity`] metadata.
trait MetadataHolder {
    fn metadata_map(&self) -> &Metadata;
    fn merge(&mut self, entries: Metadata);
    fn take(&mut self, key: &str) -> Option<Value>;
}

impl<E: Entity> MetadataHolder for E {
    fn metadata_map(&self) -> &Metadata {
        self.metadata()
    }

    fn merge(&mut self, entries: Metadata) {
        self.extend_metadata(entries);
    }

    fn take(&mut self, key: &str) -> Option<Value> {
        self.metadata_mut().remove(key)
    }
}
