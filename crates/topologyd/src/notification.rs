//! Outbound notifications.
//!
//! Every notification carries its entity class explicitly, so consumers
//! never infer it from the payload shape.

use crate::error::TopologyError;
use crate::view::{LinkView, TopologyView};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use topo_types::{EntityKind, EntityStatus, InterfaceId, Metadata};

/// Reasons attached to link status notifications.
pub mod reason {
    pub const LINK_UP: &str = "link up";
    pub const LINK_DOWN: &str = "link down";
    pub const LINK_ENABLED: &str = "link enabled";
    pub const LINK_DISABLED: &str = "link disabled";
    pub const INTERFACE_DELETED: &str = "interface deleted";
    pub const LIVENESS_UP: &str = "liveness_up";
    pub const LIVENESS_DOWN: &str = "liveness_down";
    pub const LIVENESS_DISABLED: &str = "liveness_disabled";
    pub const MAINTENANCE: &str = "maintenance";
}

/// Direction of a metadata change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataAction {
    Added,
    Removed,
}

impl fmt::Display for MetadataAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataAction::Added => f.write_str("added"),
            MetadataAction::Removed => f.write_str("removed"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Notification {
    TopologyUpdated {
        topology: Arc<TopologyView>,
    },
    /// Emitted once after startup replay.
    TopologyLoaded {
        topology: Arc<TopologyView>,
        failed_switches: BTreeMap<String, TopologyError>,
        failed_links: BTreeMap<String, TopologyError>,
    },
    SwitchEnabled {
        dpid: String,
    },
    SwitchDisabled {
        dpid: String,
    },
    InterfaceEnabled {
        interface: InterfaceId,
    },
    InterfaceDisabled {
        interface: InterfaceId,
    },
    LinkEnabled {
        link: LinkView,
    },
    LinkDisabled {
        link: LinkView,
    },
    LinkUp {
        link: LinkView,
        reason: String,
    },
    LinkDown {
        link: LinkView,
        reason: String,
    },
    LinkStatusChanged {
        link: LinkView,
        status: EntityStatus,
        reason: String,
    },
    MetadataChanged {
        kind: EntityKind,
        id: String,
        action: MetadataAction,
        metadata: Metadata,
    },
    /// Port observed, either passed through from discovery or replayed
    /// from the snapshot.
    PortCreated {
        content: Value,
    },
}

impl Notification {
    /// Dotted event name used when publishing on the bus.
    pub fn name(&self) -> String {
        match self {
            Notification::TopologyUpdated { .. } => "topology.updated".into(),
            Notification::TopologyLoaded { .. } => "topology.topology_loaded".into(),
            Notification::SwitchEnabled { .. } => "topology.switch.enabled".into(),
            Notification::SwitchDisabled { .. } => "topology.switch.disabled".into(),
            Notification::InterfaceEnabled { .. } => "topology.interface.enabled".into(),
            Notification::InterfaceDisabled { .. } => "topology.interface.disabled".into(),
            Notification::LinkEnabled { .. } => "topology.link.enabled".into(),
            Notification::LinkDisabled { .. } => "topology.link.disabled".into(),
            Notification::LinkUp { .. } => "topology.link_up".into(),
            Notification::LinkDown { .. } => "topology.link_down".into(),
            Notification::LinkStatusChanged { .. } => "topology.link_status.changed".into(),
            Notification::MetadataChanged { kind, action, .. } => {
                format!("topology.{}.metadata.{}", kind.plural(), action)
            }
            Notification::PortCreated { .. } => "topology.port.created".into(),
        }
    }
}

/// Sending half of the outbound notification channel.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl Notifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Enqueues a notification. A closed channel is logged and ignored.
    pub fn send(&self, notification: Notification) {
        let name = notification.name();
        if self.tx.send(notification).is_err() {
            tracing::debug!(event = %name, "Notification channel closed, dropping");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_notification_names() {
        let n = Notification::MetadataChanged {
            kind: EntityKind::Interface,
            id: "A:1".into(),
            action: MetadataAction::Removed,
            metadata: Metadata::new(),
        };
        assert_eq!(n.name(), "topology.interfaces.metadata.removed");
    }

    #[tokio::test]
    async fn test_notifier_delivers_in_order() {
        let (notifier, mut rx) = Notifier::channel();
        notifier.send(Notification::SwitchEnabled { dpid: "A".into() });
        notifier.send(Notification::SwitchDisabled { dpid: "A".into() });

        assert_eq!(rx.recv().await.unwrap().name(), "topology.switch.enabled");
        assert_eq!(rx.recv().await.unwrap().name(), "topology.switch.disabled");
    }

    #[test]
    fn test_send_after_close_is_ignored() {
        let (notifier, rx) = Notifier::channel();
        drop(rx);
        notifier.send(Notification::SwitchEnabled { dpid: "A".into() });
    }
}
