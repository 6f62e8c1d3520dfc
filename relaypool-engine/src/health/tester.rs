//! Batch health tester
//!
//! Probes the most promising relays with bounded concurrency. Until the pool
//! has seen its first working relay, keeps testing further batches while
//! relays remain that were not probed recently.

use chrono::Utc;
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use relaypool_core::config::PoolConfig;
use relaypool_core::ranking;
use relaypool_core::Registry;

use super::probe::{ProbeTemplate, ProbeTransport, TransportError};
use crate::events::{EventBus, PoolEvent};
use crate::pool::readiness::Readiness;

/// Tester tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TesterConfig {
    pub batch_size: usize,
    pub concurrency: usize,
    pub probe_timeout: Duration,
    pub retest_after: Duration,
}

impl Default for TesterConfig {
    fn default() -> Self {
        Self::from(&PoolConfig::default())
    }
}

impl From<&PoolConfig> for TesterConfig {
    fn from(config: &PoolConfig) -> Self {
        Self {
            batch_size: config.max_candidates_per_batch,
            concurrency: config.test_concurrency.max(1),
            probe_timeout: config.probe_timeout(),
            retest_after: config.retest_after(),
        }
    }
}

/// Result of a single probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbeOutcome {
    Success,
    StatusFailure,
    TransportFailure,
}

/// Totals over all batches of one test run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestReport {
    pub batches: usize,
    pub probed: usize,
    pub succeeded: usize,
}

pub struct HealthTester {
    registry: Arc<Registry>,
    transport: Arc<dyn ProbeTransport>,
    readiness: Arc<Readiness>,
    events: EventBus,
    config: TesterConfig,
}

impl HealthTester {
    #[must_use]
    pub fn new(
        registry: Arc<Registry>,
        transport: Arc<dyn ProbeTransport>,
        readiness: Arc<Readiness>,
        events: EventBus,
        config: TesterConfig,
    ) -> Self {
        Self {
            registry,
            transport,
            readiness,
            events,
            config,
        }
    }

    /// Test batches until the pool is ready or nothing is left to try
    ///
    /// The first batch takes the best candidates overall. Later batches only
    /// take relays that were not probed within `retest_after`, so every
    /// batch moves on to relays the run has not reached yet.
    pub async fn run(&self, template: &dyn ProbeTemplate) -> TestReport {
        let mut report = TestReport::default();
        let mut candidates = self.candidates(None);

        loop {
            let (probed, succeeded) = self.probe_batch(template, candidates).await;
            report.batches += 1;
            report.probed += probed;
            report.succeeded += succeeded;

            if self.readiness.is_ready() || probed == 0 {
                break;
            }

            let due = ranking::due_for_test(
                &self.registry.snapshot(),
                self.config.retest_after,
                Utc::now(),
            );
            if due.is_empty() {
                tracing::debug!("No further candidates to test");
                break;
            }
            tracing::debug!(remaining = due.len(), "Pool not ready, testing more candidates");
            candidates = self.candidates(Some(&due));
        }

        if tracing::enabled!(tracing::Level::TRACE) {
            match self.registry.to_json() {
                Ok(json) => tracing::trace!(registry = %json, "Relay registry after testing"),
                Err(e) => tracing::warn!(error = %e, "Failed to serialize registry"),
            }
        }

        report
    }

    /// Probe the top candidates once. Returns `(probed, succeeded)`.
    pub async fn test_batch(&self, template: &dyn ProbeTemplate) -> (usize, usize) {
        let candidates = self.candidates(None);
        self.probe_batch(template, candidates).await
    }

    /// Up to `batch_size` relays in test order, optionally limited to `due`
    fn candidates(&self, due: Option<&[String]>) -> Vec<String> {
        let order = ranking::test_order(&self.registry.snapshot(), Utc::now());
        match due {
            None => order.into_iter().take(self.config.batch_size).collect(),
            Some(due) => {
                let due: HashSet<&str> = due.iter().map(String::as_str).collect();
                order
                    .into_iter()
                    .filter(|id| due.contains(id.as_str()))
                    .take(self.config.batch_size)
                    .collect()
            }
        }
    }

    /// The ready signal is only raised after every probe in the batch has
    /// completed, so waiters see the whole batch.
    async fn probe_batch(&self, template: &dyn ProbeTemplate, candidates: Vec<String>) -> (usize, usize) {
        let probed = candidates.len();

        let outcomes: Vec<ProbeOutcome> = futures::stream::iter(candidates)
            .map(|relay| self.probe(template, relay))
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;

        let succeeded = outcomes.iter().filter(|o| **o == ProbeOutcome::Success).count();
        tracing::debug!(probed, succeeded, "Test batch finished");

        if succeeded > 0 {
            self.readiness.announce();
            self.events.emit(PoolEvent::Ready);
        }

        (probed, succeeded)
    }

    async fn probe(&self, template: &dyn ProbeTemplate, relay: String) -> ProbeOutcome {
        tracing::trace!(relay = %relay, "Testing relay");
        let timeout = self.config.probe_timeout;
        let request = template.build().with_relay(relay.clone()).with_timeout(timeout);

        let result = tokio::time::timeout(timeout, self.transport.execute(request))
            .await
            .unwrap_or(Err(TransportError::Timeout(timeout)));

        match result {
            Ok(response) if response.is_success() => {
                self.registry.record_success(&relay, response.elapsed, Utc::now());
                self.readiness.mark_ready();
                tracing::debug!(
                    relay = %relay,
                    latency_ms = response.elapsed.as_millis() as u64,
                    "Relay test successful"
                );
                self.events.emit(PoolEvent::ProbeSuccess {
                    relay,
                    latency: response.elapsed,
                });
                ProbeOutcome::Success
            }
            Ok(response) => {
                self.registry.update(&relay, false, Utc::now());
                tracing::debug!(relay = %relay, status = response.status, "Relay returned bad status");
                self.events.emit(PoolEvent::ProbeStatusFailure {
                    relay,
                    status: response.status,
                });
                ProbeOutcome::StatusFailure
            }
            Err(e) => {
                self.registry.update(&relay, false, Utc::now());
                tracing::debug!(relay = %relay, error = %e, "Relay test failed");
                self.events.emit(PoolEvent::ProbeTransportFailure {
                    relay,
                    error: e.to_string(),
                });
                ProbeOutcome::TransportFailure
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::probe::StaticProbe;
    use crate::test_helpers::{collect_events, Scripted, ScriptedTransport};
    use relaypool_core::HealthState;

    const MS: Duration = Duration::from_millis(1);

    fn tester(transport: ScriptedTransport, config: TesterConfig) -> (HealthTester, Arc<Registry>, Arc<Readiness>, EventBus) {
        let registry = Arc::new(Registry::new());
        let readiness = Arc::new(Readiness::new());
        let events = EventBus::default();
        let tester = HealthTester::new(
            registry.clone(),
            Arc::new(transport),
            readiness.clone(),
            events.clone(),
            config,
        );
        (tester, registry, readiness, events)
    }

    fn config(batch_size: usize, concurrency: usize) -> TesterConfig {
        TesterConfig {
            batch_size,
            concurrency,
            probe_timeout: Duration::from_secs(1),
            retest_after: Duration::from_secs(60),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_outcomes_update_registry() {
        let transport = ScriptedTransport::new()
            .respond("http://ok:1", Scripted::Status(200, 40 * MS))
            .respond("http://bad-status:1", Scripted::Status(502, 10 * MS))
            .respond("http://down:1", Scripted::Fail(5 * MS));
        let (tester, registry, readiness, events) = tester(transport, config(50, 10));
        let mut rx = events.subscribe();
        registry.extend(["http://ok:1", "http://bad-status:1", "http://down:1"], Utc::now());

        let report = tester.run(&StaticProbe::default()).await;
        assert_eq!(report, TestReport { batches: 1, probed: 3, succeeded: 1 });
        assert!(readiness.is_ready());
        assert!(readiness.is_announced());

        let ok = registry.get("http://ok:1").unwrap();
        assert_eq!(ok.state(), HealthState::Healthy);
        assert_eq!(ok.latency, Some(40 * MS));
        assert_eq!(registry.get("http://bad-status:1").unwrap().state(), HealthState::Failing);
        assert_eq!(registry.get("http://down:1").unwrap().state(), HealthState::Failing);

        let events = collect_events(&mut rx);
        assert!(events.contains(&PoolEvent::ProbeSuccess {
            relay: "http://ok:1".to_string(),
            latency: 40 * MS,
        }));
        assert!(events.contains(&PoolEvent::ProbeStatusFailure {
            relay: "http://bad-status:1".to_string(),
            status: 502,
        }));
        assert!(events.iter().any(|e| matches!(e, PoolEvent::ProbeTransportFailure { relay, .. } if relay == "http://down:1")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_announced_after_whole_batch() {
        let transport = ScriptedTransport::new()
            .respond("http://fast:1", Scripted::Status(200, 10 * MS))
            .respond("http://slow:1", Scripted::Status(200, 300 * MS));
        let (tester, registry, readiness, events) = tester(transport, config(50, 10));
        let mut rx = events.subscribe();
        registry.extend(["http://fast:1", "http://slow:1"], Utc::now());

        tester.run(&StaticProbe::default()).await;
        assert!(readiness.is_announced());

        let events = collect_events(&mut rx);
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], PoolEvent::ProbeSuccess { relay, .. } if relay == "http://fast:1"));
        assert!(matches!(&events[1], PoolEvent::ProbeSuccess { relay, .. } if relay == "http://slow:1"));
        assert_eq!(events[2], PoolEvent::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_respects_size_and_concurrency() {
        let transport = ScriptedTransport::new();
        let (tester, registry, _readiness, _events) = tester(transport.clone(), config(4, 2));
        for i in 0..10 {
            registry.add(&format!("http://relay-{i}:1"), Utc::now());
        }

        let (probed, succeeded) = tester.test_batch(&StaticProbe::default()).await;
        assert_eq!((probed, succeeded), (4, 0));
        assert_eq!(transport.calls(), 4);
        assert!(transport.max_in_flight() <= 2);
        let mut probed = transport.probed();
        probed.sort();
        assert_eq!(
            probed,
            ["http://relay-0:1", "http://relay-1:1", "http://relay-2:1", "http://relay-3:1"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_keeps_batching_until_candidates_exhausted() {
        // every relay fails; batches of two cover all five relays
        let transport = ScriptedTransport::new();
        let (tester, registry, readiness, _events) = tester(transport.clone(), config(2, 2));
        for i in 0..5 {
            registry.add(&format!("http://relay-{i}:1"), Utc::now());
        }

        let report = tester.run(&StaticProbe::default()).await;
        assert_eq!(report, TestReport { batches: 3, probed: 5, succeeded: 0 });
        assert!(!readiness.is_ready());

        // each relay probed exactly once
        let mut probed = transport.probed();
        probed.sort();
        assert_eq!(
            probed,
            ["http://relay-0:1", "http://relay-1:1", "http://relay-2:1", "http://relay-3:1", "http://relay-4:1"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_later_batches_reach_untested_relays() {
        // caller feedback ranks the two failing relays above the untested ones
        let transport = ScriptedTransport::new()
            .respond("http://fresh-0:1", Scripted::Status(200, 20 * MS))
            .respond("http://fresh-1:1", Scripted::Status(200, 30 * MS));
        let (tester, registry, readiness, _events) = tester(transport.clone(), config(2, 2));
        let reported_at = Utc::now() - chrono::TimeDelta::seconds(1);
        registry.extend(
            ["http://reported-0:1", "http://reported-1:1", "http://fresh-0:1", "http://fresh-1:1"],
            reported_at,
        );
        registry.update("http://reported-0:1", true, reported_at);
        registry.update("http://reported-1:1", true, reported_at);

        let report = tester.run(&StaticProbe::default()).await;
        assert_eq!(report, TestReport { batches: 2, probed: 4, succeeded: 2 });
        assert!(readiness.is_ready());

        let probed = transport.probed();
        assert_eq!(probed.len(), 4);
        assert!(probed[..2].iter().all(|relay| relay.starts_with("http://reported-")));
        assert!(probed[2..].iter().all(|relay| relay.starts_with("http://fresh-")));
        assert_eq!(registry.get("http://reported-0:1").unwrap().state(), HealthState::Stale);
        assert_eq!(registry.get("http://fresh-0:1").unwrap().state(), HealthState::Healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_after_first_ready_batch() {
        let transport = ScriptedTransport::new().respond("http://relay-0:1", Scripted::Status(200, MS));
        let (tester, registry, readiness, _events) = tester(transport.clone(), config(2, 2));
        for i in 0..5 {
            registry.add(&format!("http://relay-{i}:1"), Utc::now());
        }

        let report = tester.run(&StaticProbe::default()).await;
        assert_eq!(report.batches, 1);
        assert_eq!(transport.calls(), 2);
        assert!(readiness.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_probe_times_out() {
        let transport = ScriptedTransport::new().respond("http://hang:1", Scripted::Hang);
        let (tester, registry, _readiness, events) = tester(transport, config(50, 1));
        let mut rx = events.subscribe();
        registry.add("http://hang:1", Utc::now());

        let (probed, succeeded) = tester.test_batch(&StaticProbe::default()).await;
        assert_eq!((probed, succeeded), (1, 0));
        assert_eq!(registry.get("http://hang:1").unwrap().state(), HealthState::Failing);
        assert!(matches!(
            collect_events(&mut rx).as_slice(),
            [PoolEvent::ProbeTransportFailure { .. }]
        ));
    }

    #[tokio::test]
    async fn test_empty_registry() {
        let (tester, _registry, readiness, _events) = tester(ScriptedTransport::new(), config(50, 10));
        let report = tester.run(&StaticProbe::default()).await;
        assert_eq!(report, TestReport { batches: 1, probed: 0, succeeded: 0 });
        assert!(!readiness.is_ready());
    }
}
