//! Deferred link-up confirmation.
//!
//! Each link has at most one pending wake. Scheduling again replaces the
//! previous wake, and a link-down cancels it. Aborting is only an
//! optimisation: the wake itself re-validates link state before acting,
//! so a wake that slips through a race is still harmless.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use topo_types::LinkId;

#[derive(Debug)]
pub struct LinkUpTimer {
    delay: Duration,
    pending: Mutex<HashMap<LinkId, JoinHandle<()>>>,
}

impl LinkUpTimer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Runs `wake` once the debounce window has elapsed.
    ///
    /// No lock is held while waiting.
    pub fn schedule<F>(&self, link_id: LinkId, wake: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let deadline = Instant::now() + self.delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            wake.await;
        });

        let mut pending = self.pending.lock();
        pending.retain(|_, h| !h.is_finished());
        if let Some(previous) = pending.insert(link_id.clone(), handle) {
            previous.abort();
            tracing::debug!(link_id = %link_id, "Replaced pending link-up wake");
        }
    }

    /// Drops the pending wake for `link_id`, if any.
    pub fn cancel(&self, link_id: &LinkId) -> bool {
        match self.pending.lock().remove(link_id) {
            Some(handle) => {
                let was_pending = !handle.is_finished();
                handle.abort();
                was_pending
            }
            None => false,
        }
    }

    /// Aborts every pending wake (teardown).
    pub fn cancel_all(&self) -> usize {
        let mut pending = self.pending.lock();
        let count = pending.values().filter(|h| !h.is_finished()).count();
        for (_, handle) in pending.drain() {
            handle.abort();
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .values()
            .filter(|h| !h.is_finished())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn link(n: u32) -> LinkId {
        LinkId::from_endpoints(
            &topo_types::InterfaceId::new("A", n),
            &topo_types::InterfaceId::new("B", n),
        )
    }

    fn counting_wake(counter: &Arc<AtomicU32>) -> impl Future<Output = ()> + Send + 'static {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wake_fires_after_delay() {
        let timer = LinkUpTimer::new(Duration::from_secs(10));
        let fired = Arc::new(AtomicU32::new(0));
        timer.schedule(link(1), counting_wake(&fired));

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(timer.pending_count(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(timer.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_previous_wake() {
        let timer = LinkUpTimer::new(Duration::from_secs(10));
        let fired = Arc::new(AtomicU32::new(0));
        timer.schedule(link(1), counting_wake(&fired));
        tokio::time::sleep(Duration::from_secs(5)).await;
        timer.schedule(link(1), counting_wake(&fired));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let timer = LinkUpTimer::new(Duration::from_secs(10));
        let fired = Arc::new(AtomicU32::new(0));
        timer.schedule(link(1), counting_wake(&fired));
        timer.schedule(link(2), counting_wake(&fired));

        assert!(timer.cancel(&link(1)));
        assert!(!timer.cancel(&link(1)));
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(timer.cancel_all(), 0);
    }
}
