//! In-process event bus with regex subscriptions.
//!
//! Events are identified by dotted names (`kytos/of_core.switch.new`,
//! `topology.link_up`). A subscriber registers one or more regular
//! expressions; each pattern is anchored, so it has to match the whole
//! name. Delivery is fire-and-forget over unbounded channels: a publisher
//! never waits for a slow subscriber, and subscribers whose receiver has
//! been dropped are pruned on the next publish.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::RegexSet;
use thiserror::Error;
use tokio::sync::mpsc;

/// Error type for bus operations.
#[derive(Debug, Clone, Error)]
pub enum BusError {
    #[error("invalid subscription pattern: {0}")]
    InvalidPattern(String),

    #[error("subscription needs at least one pattern")]
    NoPatterns,
}

/// A published event.
#[derive(Debug, Clone)]
pub struct Envelope<T> {
    /// Dotted event name.
    pub name: String,
    pub content: T,
    /// Time the event was published.
    pub timestamp: DateTime<Utc>,
}

impl<T> Envelope<T> {
    pub fn new(name: impl Into<String>, content: T) -> Self {
        Self {
            name: name.into(),
            content,
            timestamp: Utc::now(),
        }
    }

    /// Overrides the publish timestamp (used for replays and tests).
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

struct Subscriber<T> {
    patterns: RegexSet,
    tx: mpsc::UnboundedSender<Envelope<T>>,
}

/// Fan-out bus delivering cloned envelopes to every matching subscriber.
pub struct EventBus<T> {
    subscribers: Mutex<Vec<Subscriber<T>>>,
}

impl<T: Clone> EventBus<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Registers a subscriber for every event whose name matches one of
    /// `patterns`.
    pub fn subscribe(
        &self,
        patterns: &[&str],
    ) -> Result<mpsc::UnboundedReceiver<Envelope<T>>, BusError> {
        if patterns.is_empty() {
            return Err(BusError::NoPatterns);
        }
        let anchored = patterns.iter().map(|p| format!("^(?:{})$", p));
        let set = RegexSet::new(anchored).map_err(|e| BusError::InvalidPattern(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(Subscriber { patterns: set, tx });
        Ok(rx)
    }

    /// Publishes an event and returns how many subscribers received it.
    pub fn publish(&self, name: impl Into<String>, content: T) -> usize {
        self.publish_envelope(Envelope::new(name, content))
    }

    /// Publishes a pre-built envelope, keeping its timestamp.
    pub fn publish_envelope(&self, envelope: Envelope<T>) -> usize {
        let mut subscribers = self.subscribers.lock();
        let mut delivered = 0;
        subscribers.retain(|sub| {
            if sub.tx.is_closed() {
                return false;
            }
            if sub.patterns.is_match(&envelope.name) {
                if sub.tx.send(envelope.clone()).is_err() {
                    return false;
                }
                delivered += 1;
            }
            true
        });
        if delivered == 0 {
            tracing::trace!(event = %envelope.name, "No subscriber for event");
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl<T: Clone> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_pattern_routing() {
        let bus: EventBus<u32> = EventBus::new();
        let mut switches = bus.subscribe(&[r".*\.switch\.(new|reconnected)"]).unwrap();
        let mut links = bus.subscribe(&[r"topology\.link_(up|down)"]).unwrap();

        assert_eq!(bus.publish("kytos/of_core.switch.new", 1), 1);
        assert_eq!(bus.publish("topology.link_up", 2), 1);
        assert_eq!(bus.publish("topology.link_up.extra", 3), 0);

        assert_eq!(switches.recv().await.unwrap().content, 1);
        assert_eq!(links.recv().await.unwrap().content, 2);
        assert!(links.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_fan_out_to_all_matching() {
        let bus: EventBus<&'static str> = EventBus::new();
        let mut a = bus.subscribe(&["topology\\..*"]).unwrap();
        let mut b = bus.subscribe(&["topology.updated"]).unwrap();

        assert_eq!(bus.publish("topology.updated", "x"), 2);
        assert_eq!(a.recv().await.unwrap().name, "topology.updated");
        assert_eq!(b.recv().await.unwrap().name, "topology.updated");
    }

    #[test]
    fn test_closed_subscribers_are_pruned() {
        let bus: EventBus<u32> = EventBus::new();
        let rx = bus.subscribe(&["a"]).unwrap();
        let _keep = bus.subscribe(&["b"]).unwrap();
        drop(rx);

        bus.publish("a", 1);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_invalid_patterns_rejected() {
        let bus: EventBus<u32> = EventBus::new();
        assert!(matches!(bus.subscribe(&[]), Err(BusError::NoPatterns)));
        assert!(matches!(
            bus.subscribe(&["("]),
            Err(BusError::InvalidPattern(_))
        ));
    }
}
