//! Observable pool events

use std::time::Duration;
use tokio::sync::broadcast;

/// Default capacity of the event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Something observable happened inside the pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    /// A discovery source yielded relays
    SourceFetch { source: String, relays: Vec<String> },
    /// A discovery source failed; the remaining sources still run
    SourceFetchError { source: String, error: String },
    ProbeSuccess { relay: String, latency: Duration },
    /// Probe reached the target but got a non-2xx status
    ProbeStatusFailure { relay: String, status: u16 },
    /// Probe timed out or could not connect
    ProbeTransportFailure { relay: String, error: String },
    /// A test batch finished with at least one working relay
    Ready,
    RefreshError { error: String },
}

/// Fan-out of [`PoolEvent`]s to any number of subscribers
///
/// Events sent while nobody is subscribed are dropped. Slow subscribers
/// lag rather than block the pool.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PoolEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn emit(&self, event: PoolEvent) {
        // Err only means there are no subscribers right now.
        let _ = self.sender.send(event);
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.sender.subscribe()
    }
}
