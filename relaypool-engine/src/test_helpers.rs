//! Test doubles shared by the engine's unit tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};

use crate::discovery::{DiscoveryError, DiscoverySource};
use crate::events::PoolEvent;
use crate::health::{ProbeRequest, ProbeResponse, ProbeTransport, TransportError};

/// Drain every event currently queued on `rx`
pub fn collect_events(rx: &mut broadcast::Receiver<PoolEvent>) -> Vec<PoolEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[derive(Default)]
struct InFlight {
    current: AtomicUsize,
    max: AtomicUsize,
    calls: AtomicUsize,
}

impl InFlight {
    fn enter(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Source that sleeps before answering and records its peak concurrency
#[derive(Clone)]
pub struct GatedSource {
    delay: Duration,
    stats: Arc<InFlight>,
}

impl GatedSource {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            stats: Arc::default(),
        }
    }

    pub fn calls(&self) -> usize {
        self.stats.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.stats.max.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DiscoverySource for GatedSource {
    async fn fetch(&self) -> Result<Vec<String>, DiscoveryError> {
        self.stats.enter();
        tokio::time::sleep(self.delay).await;
        self.stats.leave();
        Ok(vec!["http://gated:1".to_string()])
    }
}

/// Source that blocks until released, counting invocations
#[derive(Clone, Default)]
pub struct BlockingSource {
    relays: Vec<String>,
    calls: Arc<AtomicUsize>,
    release: Arc<Notify>,
}

impl BlockingSource {
    pub fn new(relays: &[&str]) -> Self {
        Self {
            relays: relays.iter().map(ToString::to_string).collect(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl DiscoverySource for BlockingSource {
    async fn fetch(&self) -> Result<Vec<String>, DiscoveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.release.notified().await;
        Ok(self.relays.clone())
    }
}

/// Canned answer for one relay
#[derive(Debug, Clone)]
pub enum Scripted {
    Status(u16, Duration),
    Fail(Duration),
    Hang,
}

/// Transport that answers per relay from a script; unknown relays fail
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<HashMap<String, Scripted>>>,
    probed: Arc<Mutex<Vec<String>>>,
    stats: Arc<InFlight>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, relay: &str, answer: Scripted) -> Self {
        self.script.lock().insert(relay.to_string(), answer);
        self
    }

    /// Relays in the order their probes were issued
    pub fn probed(&self) -> Vec<String> {
        self.probed.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.stats.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.stats.max.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProbeTransport for ScriptedTransport {
    async fn execute(&self, request: ProbeRequest) -> Result<ProbeResponse, TransportError> {
        let relay = request.relay.clone().unwrap_or_default();
        self.probed.lock().push(relay.clone());
        let answer = self
            .script
            .lock()
            .get(&relay)
            .cloned()
            .unwrap_or(Scripted::Fail(Duration::ZERO));

        self.stats.enter();
        let result = match answer {
            Scripted::Status(status, elapsed) => {
                tokio::time::sleep(elapsed).await;
                Ok(ProbeResponse { status, elapsed })
            }
            Scripted::Fail(after) => {
                tokio::time::sleep(after).await;
                Err(TransportError::Connect(format!("connection refused by {relay}")))
            }
            Scripted::Hang => std::future::pending().await,
        };
        self.stats.leave();
        result
    }
}
