use super::Entity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use topo_types::{EndpointPair, EntityKind, InterfaceId, LinkId, Metadata};

/// Metadata keys that only describe the running process and are never
/// persisted or restored.
pub const RUNTIME_METADATA_KEYS: [&str; 3] =
    ["last_status_is_active", "last_status_change", "notified_up_at"];

/// A link between two interfaces.
///
/// The debounce bookkeeping uses the tokio clock so it follows paused time
/// in tests; the wall-clock copy is only for consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub id: LinkId,
    pub endpoint_a: InterfaceId,
    pub endpoint_b: InterfaceId,
    pub enabled: bool,
    pub active: bool,
    pub metadata: Metadata,
    #[serde(skip)]
    pub last_status_change: Option<Instant>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_status_change_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub notified_up_at: Option<Instant>,
}

impl Link {
    pub fn new(endpoint_a: InterfaceId, endpoint_b: InterfaceId, enabled: bool) -> Self {
        Self {
            id: LinkId::from_endpoints(&endpoint_a, &endpoint_b),
            endpoint_a,
            endpoint_b,
            enabled,
            active: false,
            metadata: Metadata::new(),
            last_status_change: None,
            last_status_change_at: None,
            notified_up_at: None,
        }
    }

    pub fn pair(&self) -> EndpointPair {
        EndpointPair::new(self.endpoint_a.clone(), self.endpoint_b.clone())
    }

    pub fn has_endpoint(&self, id: &InterfaceId) -> bool {
        &self.endpoint_a == id || &self.endpoint_b == id
    }

    /// Endpoint opposite to `id`, if `id` is an endpoint of this link.
    pub fn other_endpoint(&self, id: &InterfaceId) -> Option<&InterfaceId> {
        if &self.endpoint_a == id {
            Some(&self.endpoint_b)
        } else if &self.endpoint_b == id {
            Some(&self.endpoint_a)
        } else {
            None
        }
    }

    /// Records an operational transition at `now`.
    pub fn stamp_status_change(&mut self, now: Instant) {
        self.last_status_change = Some(now);
        self.last_status_change_at = Some(Utc::now());
    }

    /// True while an up transition is waiting out the debounce window.
    ///
    /// A link that was notified up after its last transition is never
    /// pending, whatever the elapsed time.
    pub fn is_pending_up(&self, delay: Duration, now: Instant) -> bool {
        let Some(changed) = self.last_status_change else {
            return false;
        };
        self.active
            && now.saturating_duration_since(changed) < delay
            && self.notified_up_at.map_or(true, |notified| notified < changed)
    }

    /// Metadata with the process-local keys removed.
    pub fn persistent_metadata(&self) -> Metadata {
        strip_runtime_keys(self.metadata.clone())
    }
}

/// Removes process-local keys from a link metadata map.
pub fn strip_runtime_keys(mut metadata: Metadata) -> Metadata {
    for key in RUNTIME_METADATA_KEYS {
        metadata.remove(key);
    }
    metadata
}

impl Entity for Link {
    const KIND: EntityKind = EntityKind::Link;

    fn entity_id(&self) -> String {
        self.id.to_string()
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
    use serde_json::json;

    fn link() -> Link {
        Link::new(InterfaceId::new("A", 1), InterfaceId::new("B", 1), true)
    }

    #[test]
    fn test_other_endpoint() {
        let l = link();
        assert_eq!(l.other_endpoint(&InterfaceId::new("A", 1)), Some(&InterfaceId::new("B", 1)));
        assert_eq!(l.other_endpoint(&InterfaceId::new("C", 1)), None);
        assert_eq!(l.id, l.pair().link_id());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_window() {
        let delay = Duration::from_secs(10);
        let mut l = link();
        l.activate();
        let t0 = Instant::now();
        l.stamp_status_change(t0);
        assert!(l.is_pending_up(delay, t0));

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(l.is_pending_up(delay, Instant::now()));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!l.is_pending_up(delay, Instant::now()));
    }

    #[test]
    fn test_notified_link_is_not_pending() {
        let mut l = link();
        l.activate();
        let now = Instant::now();
        l.stamp_status_change(now);
        l.notified_up_at = Some(now);
        assert!(!l.is_pending_up(Duration::from_secs(10), now));
    }

    #[test]
    fn test_runtime_keys_stripped() {
        let mut l = link();
        l.metadata.insert("last_status_change".into(), json!(1.0));
        l.metadata.insert("notified_up_at".into(), json!("x"));
        l.metadata.insert("owner".into(), json!("ops"));
        let kept = l.persistent_metadata();
        assert_eq!(kept.len(), 1);
        assert!(kept.contains_key("owner"));
    }
}
