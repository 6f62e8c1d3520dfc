//! The relay pool: refresh cycles, the refresh timer and the
//! readiness-gated query API.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use relaypool_core::config::{PoolConfig, SkipDiscoveryConfig};
use relaypool_core::{ranking, BanDuration, FilterOptions, HealthRecord, Registry};

use super::readiness::Readiness;
use crate::discovery::{DiscoverySource, NamedSource, SourceAggregator};
use crate::error::Result;
use crate::events::{EventBus, PoolEvent};
use crate::health::{HealthTester, HttpTransport, ProbeTemplate, ProbeTransport, StaticProbe, TesterConfig};

/// Query options for [`Pool::get`] and [`Pool::filter`]
///
/// Unset thresholds fall back to the pool's configured filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetOptions {
    pub max_age: Option<Duration>,
    pub max_latency: Option<Duration>,
    /// How long `get` waits for readiness; `None` waits indefinitely
    pub timeout: Option<Duration>,
    /// Reference instant, defaults to now
    pub now: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl GetOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    #[must_use]
    pub const fn with_max_latency(mut self, max_latency: Duration) -> Self {
        self.max_latency = Some(max_latency);
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub const fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// What the discovery step of a refresh did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryPhase {
    /// Enough healthy relays were on hand
    Skipped { healthy: usize },
    Ran {
        succeeded: usize,
        failed: usize,
        new_relays: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Another refresh was in progress; nothing was done
    AlreadyRefreshing,
    Completed {
        discovery: DiscoveryPhase,
        batches: usize,
        probed: usize,
        succeeded: usize,
    },
}

/// Clears the refreshing flag however the cycle ends
struct RefreshGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RefreshGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct RefreshTimer {
    period: Duration,
    /// Present while the timer task runs
    cancel: Option<CancellationToken>,
}

struct PoolInner {
    config: PoolConfig,
    registry: Arc<Registry>,
    readiness: Arc<Readiness>,
    events: EventBus,
    transport: Arc<dyn ProbeTransport>,
    sources: RwLock<Vec<NamedSource>>,
    template: RwLock<Arc<dyn ProbeTemplate>>,
    refreshing: AtomicBool,
    timer: Mutex<RefreshTimer>,
    shutdown: CancellationToken,
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Live pool of relays
///
/// Cloning is cheap and every clone drives the same pool.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("relays", &self.inner.registry.len())
            .field("ready", &self.is_ready())
            .field("refreshing", &self.is_refreshing())
            .finish_non_exhaustive()
    }
}

impl Pool {
    /// Pool probing through [`HttpTransport`]
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        let transport = HttpTransport::new().with_timeout(config.probe_timeout());
        Self::with_transport(config, Arc::new(transport))
    }

    #[must_use]
    pub fn with_transport(config: PoolConfig, transport: Arc<dyn ProbeTransport>) -> Self {
        let timer = RefreshTimer {
            period: config.refresh_interval(),
            cancel: None,
        };
        Self {
            inner: Arc::new(PoolInner {
                config,
                registry: Arc::new(Registry::new()),
                readiness: Arc::new(Readiness::new()),
                events: EventBus::default(),
                transport,
                sources: RwLock::new(Vec::new()),
                template: RwLock::new(Arc::new(StaticProbe::default())),
                refreshing: AtomicBool::new(false),
                timer: Mutex::new(timer),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn add_source(&self, name: impl Into<String>, source: impl DiscoverySource + 'static) -> &Self {
        let source = NamedSource::new(name, Arc::new(source));
        tracing::debug!(source = %source.name, "Discovery source registered");
        self.inner.sources.write().push(source);
        self
    }

    pub fn set_probe_template(&self, template: impl ProbeTemplate + 'static) -> &Self {
        *self.inner.template.write() = Arc::new(template);
        self
    }

    /// Change the refresh period, re-arming the timer if it is running.
    /// A zero period stops periodic refreshes.
    pub fn set_refresh_interval(&self, period: Duration) {
        let mut timer = self.inner.timer.lock();
        timer.period = period;
        if let Some(cancel) = timer.cancel.take() {
            cancel.cancel();
            timer.cancel = self.spawn_timer(period);
        }
    }

    /// Start periodic refreshes. The first one fires after one period.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut timer = self.inner.timer.lock();
        if let Some(cancel) = timer.cancel.take() {
            cancel.cancel();
        }
        timer.cancel = self.spawn_timer(timer.period);
    }

    /// Stop periodic refreshes. A refresh already running completes.
    pub fn shutdown(&self) {
        tracing::info!("Relay pool shutting down");
        self.inner.shutdown.cancel();
        self.inner.timer.lock().cancel = None;
    }

    fn spawn_timer(&self, period: Duration) -> Option<CancellationToken> {
        if period.is_zero() || self.inner.shutdown.is_cancelled() {
            tracing::debug!("Periodic refresh disabled");
            return None;
        }

        let cancel = self.inner.shutdown.child_token();
        let token = cancel.clone();
        let weak: Weak<PoolInner> = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = token.cancelled() => {
                        tracing::debug!("Refresh timer stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        let Some(inner) = weak.upgrade() else { return };
                        let pool = Pool { inner };
                        // failures are already logged and emitted by refresh
                        let _ = pool.refresh().await;
                    }
                }
            }
        });

        tracing::debug!(period_secs = period.as_secs_f64(), "Refresh timer armed");
        Some(cancel)
    }

    /// Run one refresh cycle: discovery (unless enough healthy relays are on
    /// hand) followed by testing.
    ///
    /// Returns [`RefreshOutcome::AlreadyRefreshing`] without doing anything
    /// when a cycle is already in progress. A discovery failure ends the
    /// cycle before testing and is returned.
    pub async fn refresh(&self) -> Result<RefreshOutcome> {
        let Some(_guard) = RefreshGuard::acquire(&self.inner.refreshing) else {
            tracing::debug!("Refresh already in progress, skipping");
            return Ok(RefreshOutcome::AlreadyRefreshing);
        };

        tracing::debug!(relays = self.inner.registry.len(), "Refreshing relay pool");
        let result = self.run_cycle().await;
        match &result {
            Ok(outcome) => tracing::info!(?outcome, "Refresh complete"),
            Err(e) => {
                tracing::warn!(error = %e, "Refresh failed");
                self.inner.events.emit(PoolEvent::RefreshError { error: e.to_string() });
            }
        }
        result
    }

    async fn run_cycle(&self) -> Result<RefreshOutcome> {
        let inner = &self.inner;

        let discovery = match self.healthy_on_hand(&inner.config.skip_discovery) {
            Some(healthy) => {
                tracing::debug!(healthy, "Skipping discovery, enough healthy relays");
                DiscoveryPhase::Skipped { healthy }
            }
            None => {
                let sources = inner.sources.read().clone();
                let aggregator = SourceAggregator::new(
                    inner.registry.clone(),
                    inner.events.clone(),
                    inner.config.discovery_concurrency,
                );
                let report = aggregator.run(&sources).await?;
                DiscoveryPhase::Ran {
                    succeeded: report.succeeded,
                    failed: report.failed,
                    new_relays: report.new_relays,
                }
            }
        };

        let template = inner.template.read().clone();
        let tester = HealthTester::new(
            inner.registry.clone(),
            inner.transport.clone(),
            inner.readiness.clone(),
            inner.events.clone(),
            TesterConfig::from(&inner.config),
        );
        let report = tester.run(template.as_ref()).await;

        Ok(RefreshOutcome::Completed {
            discovery,
            batches: report.batches,
            probed: report.probed,
            succeeded: report.succeeded,
        })
    }

    /// Number of healthy relays when there are enough to skip discovery
    fn healthy_on_hand(&self, policy: &SkipDiscoveryConfig) -> Option<usize> {
        if !policy.enabled {
            return None;
        }
        let records = self.inner.registry.snapshot();
        let healthy = ranking::exposure_order(&records, &policy.options(), Utc::now());
        let best_is_fresh = healthy
            .first()
            .and_then(|best| records.iter().find(|(id, _)| id == best))
            .is_some_and(|(_, record)| !record.is_stale());

        (healthy.len() > policy.min_relays && best_is_fresh).then_some(healthy.len())
    }

    /// Best relays, once the pool is ready or `options.timeout` elapses
    ///
    /// Never fails: on timeout the list is whatever passes the filter at
    /// that moment, possibly nothing.
    pub async fn get(&self, options: GetOptions) -> Vec<String> {
        if self.inner.readiness.is_announced() {
            tokio::task::yield_now().await;
        } else if !self.inner.readiness.wait(options.timeout).await {
            tracing::debug!(timeout = ?options.timeout, "Timed out waiting for a ready relay");
        }
        self.filter(&options)
    }

    /// Current exposure list, without waiting for readiness
    pub fn filter(&self, options: &GetOptions) -> Vec<String> {
        let defaults = self.inner.config.filter.options();
        let filter = FilterOptions {
            max_age: options.max_age.unwrap_or(defaults.max_age),
            max_latency: options.max_latency.unwrap_or(defaults.max_latency),
        };
        let now = options.now.unwrap_or_else(Utc::now);

        let mut relays = ranking::exposure_order(&self.inner.registry.snapshot(), &filter, now);
        if let Some(limit) = options.limit {
            relays.truncate(limit);
        }
        relays
    }

    /// Register a relay directly, bypassing discovery
    pub fn add(&self, id: &str) -> bool {
        self.inner.registry.add(id, Utc::now())
    }

    /// Caller feedback on a relay; unknown ids are ignored
    pub fn update(&self, id: &str, success: bool) -> bool {
        self.inner.registry.update(id, success, Utc::now())
    }

    /// Suppress a relay, permanently or for a while from `now` (default:
    /// the current time). Unknown ids and zero durations are ignored.
    pub fn blacklist(&self, id: &str, duration: impl Into<BanDuration>, now: Option<DateTime<Utc>>) -> bool {
        let applied = self
            .inner
            .registry
            .blacklist(id, duration.into(), now.unwrap_or_else(Utc::now));
        if applied {
            tracing::info!(relay = %id, "Relay blacklisted");
        }
        applied
    }

    /// Forget every relay not in `allow`, returning how many were removed
    pub fn trim<I, S>(&self, allow: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.inner.registry.trim(allow)
    }

    pub fn records(&self) -> Vec<(String, HealthRecord)> {
        self.inner.registry.snapshot()
    }

    pub fn dump_json(&self) -> Result<String> {
        Ok(self.inner.registry.to_json()?)
    }

    pub fn is_ready(&self) -> bool {
        self.inner.readiness.is_ready()
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.refreshing.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.inner.events.subscribe()
    }
}
