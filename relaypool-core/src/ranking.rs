//! Ranking and filtering of relays
//!
//! Pure functions over a registry snapshot. Both orders drop relays with an
//! active ban at the reference instant; ties keep snapshot (insertion) order.

use chrono::{DateTime, TimeDelta, Utc};
use std::cmp::Ordering;
use std::time::Duration;

use crate::models::{HealthRecord, HealthState};

/// Default maximum age of the last success for an exposed relay
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(60 * 60);

/// Default latency ceiling for an exposed relay
pub const DEFAULT_MAX_LATENCY: Duration = Duration::from_secs(30);

/// Thresholds for the exposure order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterOptions {
    /// Oldest acceptable last success
    pub max_age: Duration,
    /// Exclusive latency ceiling
    pub max_latency: Duration,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            max_age: DEFAULT_MAX_AGE,
            max_latency: DEFAULT_MAX_LATENCY,
        }
    }
}

impl FilterOptions {
    #[must_use]
    pub const fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    #[must_use]
    pub const fn with_max_latency(mut self, max_latency: Duration) -> Self {
        self.max_latency = max_latency;
        self
    }

    fn accepts(&self, record: &HealthRecord, now: DateTime<Utc>) -> bool {
        let Some(last_successful) = record.last_successful else {
            return false;
        };
        if now.signed_duration_since(last_successful) > to_delta(self.max_age) {
            return false;
        }
        record.latency.is_some_and(|latency| latency < self.max_latency)
    }
}

/// Order in which relays should be probed.
///
/// Healthy relays come first by ascending latency, then relays that failed
/// since their last success (also by latency), then never-tested relays,
/// then relays that never succeeded, least recently tested first.
#[must_use]
pub fn test_order(records: &[(String, HealthRecord)], now: DateTime<Utc>) -> Vec<String> {
    let mut candidates: Vec<&(String, HealthRecord)> = records
        .iter()
        .filter(|(_, record)| !record.is_blacklisted(now))
        .collect();
    candidates.sort_by(|(_, a), (_, b)| compare_for_test(a, b));
    candidates.into_iter().map(|(id, _)| id.clone()).collect()
}

/// Relays a caller may use, best first.
///
/// Keeps relays whose last success is within `options.max_age` of `now`
/// and whose latency is below `options.max_latency`. Relays that failed
/// since their last success sort after all others; latency breaks ties.
#[must_use]
pub fn exposure_order(
    records: &[(String, HealthRecord)],
    options: &FilterOptions,
    now: DateTime<Utc>,
) -> Vec<String> {
    let mut candidates: Vec<&(String, HealthRecord)> = records
        .iter()
        .filter(|(_, record)| !record.is_blacklisted(now) && options.accepts(record, now))
        .collect();
    tracing::trace!(
        total = records.len(),
        accepted = candidates.len(),
        "Filtered relays for exposure"
    );
    candidates.sort_by(|(_, a), (_, b)| {
        a.is_stale()
            .cmp(&b.is_stale())
            .then_with(|| latency_key(a).cmp(&latency_key(b)))
    });
    candidates.into_iter().map(|(id, _)| id.clone()).collect()
}

/// Non-banned relays that have not been probed since `now - window`
#[must_use]
pub fn due_for_test(
    records: &[(String, HealthRecord)],
    window: Duration,
    now: DateTime<Utc>,
) -> Vec<String> {
    let cutoff = now
        .checked_sub_signed(to_delta(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    records
        .iter()
        .filter(|(_, record)| !record.is_blacklisted(now) && !record.tested_since(cutoff))
        .map(|(id, _)| id.clone())
        .collect()
}

fn compare_for_test(a: &HealthRecord, b: &HealthRecord) -> Ordering {
    let (state_a, state_b) = (a.state(), b.state());
    tier(state_a).cmp(&tier(state_b)).then_with(|| match state_a {
        HealthState::Healthy | HealthState::Stale => latency_key(a).cmp(&latency_key(b)),
        HealthState::Failing => a.last_tested.cmp(&b.last_tested),
        HealthState::Untested => Ordering::Equal,
    })
}

const fn tier(state: HealthState) -> u8 {
    match state {
        HealthState::Healthy => 0,
        HealthState::Stale => 1,
        HealthState::Untested => 2,
        HealthState::Failing => 3,
    }
}

// Unknown latency ranks behind any measured one.
fn latency_key(record: &HealthRecord) -> Duration {
    record.latency.unwrap_or(Duration::MAX)
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}
