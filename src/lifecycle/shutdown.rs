//! Shutdown coordination for the router.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{self, Instant};

/// Coordinator for graceful shutdown.
///
/// Provides a broadcast channel that all long-running tasks (sweeper,
/// admin server, reload loop) subscribe to. A task's receiver is dropped
/// when it exits, which is how [`Shutdown::drain`] observes completion.
pub struct Shutdown {
    /// Broadcast channel sender.
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Get the number of active subscribers (tasks still running).
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Wait until every subscriber has gone away or `timeout` elapses.
    /// Returns the number of tasks still running.
    pub async fn drain(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        while self.receiver_count() > 0 && Instant::now() < deadline {
            time::sleep(Duration::from_millis(10)).await;
        }
        let remaining = self.receiver_count();
        if remaining > 0 {
            tracing::warn!(remaining, "Shutdown drain timed out");
        }
        remaining
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
