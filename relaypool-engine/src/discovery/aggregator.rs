//! Runs discovery sources with bounded concurrency and merges their output
//! into the registry.

use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;

use relaypool_core::Registry;

use super::source::NamedSource;
use crate::error::{Error, Result};
use crate::events::{EventBus, PoolEvent};

/// Outcome of one discovery pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub succeeded: usize,
    pub failed: usize,
    /// Relays that were not registered before this pass
    pub new_relays: usize,
}

pub struct SourceAggregator {
    registry: Arc<Registry>,
    events: EventBus,
    concurrency: usize,
}

impl SourceAggregator {
    #[must_use]
    pub fn new(registry: Arc<Registry>, events: EventBus, concurrency: usize) -> Self {
        Self {
            registry,
            events,
            concurrency: concurrency.max(1),
        }
    }

    /// Fetch from every source, at most `concurrency` at a time.
    ///
    /// A failing source is reported and skipped. Only a source task that
    /// dies without reporting (a panic) fails the pass, after the remaining
    /// sources have finished.
    pub async fn run(&self, sources: &[NamedSource]) -> Result<DiscoveryReport> {
        let mut report = DiscoveryReport::default();
        let mut aborted = None;

        let mut fetches = futures::stream::iter(sources.iter().cloned())
            .map(|entry| {
                tracing::debug!(source = %entry.name, "Requesting relays from source");
                let source = entry.source;
                let task = tokio::spawn(async move { source.fetch().await });
                async move { (entry.name, task.await) }
            })
            .buffer_unordered(self.concurrency);

        while let Some((name, outcome)) = fetches.next().await {
            match outcome {
                Ok(Ok(relays)) => {
                    let added = self.registry.extend(&relays, Utc::now());
                    tracing::debug!(
                        source = %name,
                        fetched = relays.len(),
                        new = added,
                        "Source fetch complete"
                    );
                    report.succeeded += 1;
                    report.new_relays += added;
                    self.events.emit(PoolEvent::SourceFetch { source: name, relays });
                }
                Ok(Err(e)) => {
                    tracing::warn!(source = %name, error = %e, "Source fetch failed");
                    report.failed += 1;
                    self.events.emit(PoolEvent::SourceFetchError {
                        source: name,
                        error: e.to_string(),
                    });
                }
                Err(join_error) => {
                    tracing::error!(source = %name, error = %join_error, "Source task aborted");
                    report.failed += 1;
                    self.events.emit(PoolEvent::SourceFetchError {
                        source: name.clone(),
                        error: join_error.to_string(),
                    });
                    aborted.get_or_insert(format!("source {name}: {join_error}"));
                }
            }
        }

        match aborted {
            Some(reason) => Err(Error::Discovery(reason)),
            None => Ok(report),
        }
    }
}
