//! Event handler trait and its worker loop.

use crate::bus::{BusError, Envelope, EventBus};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// A consumer of bus events.
///
/// Handlers declare the event names they care about as regular expressions
/// and receive every matching envelope. `handle` may be invoked
/// concurrently for different events, so implementations must do their
/// own locking.
#[async_trait]
pub trait EventHandler<T>: Send + Sync + 'static
where
    T: Clone + Send + 'static,
{
    /// Returns the name of this handler (for logging).
    fn name(&self) -> &str;

    /// Regular expressions matched against full event names.
    fn patterns(&self) -> Vec<&'static str>;

    /// Processes one event.
    async fn handle(&self, event: Envelope<T>);
}

/// Subscribes `handler` to `bus` and starts its worker.
///
/// Every delivered envelope is handled in its own task, so a handler that
/// is waiting on I/O never holds up the events queued behind it. The
/// worker ends once the bus is dropped.
pub fn spawn_handler<T, H>(bus: &EventBus<T>, handler: Arc<H>) -> Result<JoinHandle<()>, BusError>
where
    T: Clone + Send + 'static,
    H: EventHandler<T>,
{
    let patterns = handler.patterns();
    let mut rx = bus.subscribe(&patterns)?;
    tracing::info!(handler = handler.name(), patterns = ?patterns, "Handler subscribed");

    Ok(tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let handler = handler.clone();
            tokio::spawn(async move {
                tracing::debug!(handler = handler.name(), event = %envelope.name, "Dispatching event");
                handler.handle(envelope).await;
            });
        }
        tracing::debug!(handler = handler.name(), "Handler worker stopped");
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventHandler<u32> for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn patterns(&self) -> Vec<&'static str> {
            vec![r".*\.switch\.new"]
        }

        async fn handle(&self, event: Envelope<u32>) {
            self.seen.lock().push(event.name);
        }
    }

    #[tokio::test]
    async fn test_handler_receives_matching_events() {
        let bus = EventBus::new();
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        let worker = spawn_handler(&bus, recorder.clone()).unwrap();

        bus.publish("of_core.switch.new", 1);
        bus.publish("of_core.switch.gone", 2);
        drop(bus);
        worker.await.unwrap();
        // Per-event tasks may still be running after the worker exits.
        for _ in 0..10 {
            if !recorder.seen.lock().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(*recorder.seen.lock(), vec!["of_core.switch.new".to_string()]);
    }
}
