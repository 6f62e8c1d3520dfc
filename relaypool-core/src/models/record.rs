//! Per-relay health record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::blacklist::Ban;

/// Health of a relay as far as ranking is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Last probe succeeded
    Healthy,
    /// Succeeded at some point, but failed since
    Stale,
    /// Never probed
    Untested,
    /// Probed, never succeeded
    Failing,
}

/// Health tracking for one relay identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthRecord {
    /// First registration; never changes afterwards
    pub created: DateTime<Utc>,
    pub last_tested: Option<DateTime<Utc>>,
    pub last_successful: Option<DateTime<Utc>>,
    /// Duration of the most recent successful probe. Kept after a failure,
    /// so it may describe an older, now stale, success.
    pub latency: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blacklist: Option<Ban>,
}

impl HealthRecord {
    #[must_use]
    pub const fn new(created: DateTime<Utc>) -> Self {
        Self {
            created,
            last_tested: None,
            last_successful: None,
            latency: None,
            blacklist: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> HealthState {
        match (self.last_successful, self.last_tested) {
            (Some(success), Some(tested)) if success >= tested => HealthState::Healthy,
            (Some(_), None) => HealthState::Healthy,
            (Some(_), Some(_)) => HealthState::Stale,
            (None, None) => HealthState::Untested,
            (None, Some(_)) => HealthState::Failing,
        }
    }

    /// Failed since its last success
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.state() == HealthState::Stale
    }

    #[must_use]
    pub fn is_blacklisted(&self, now: DateTime<Utc>) -> bool {
        self.blacklist.is_some_and(|ban| ban.is_active(now))
    }

    /// Whether the record was probed at or after `cutoff`
    #[must_use]
    pub fn tested_since(&self, cutoff: DateTime<Utc>) -> bool {
        self.last_tested.is_some_and(|tested| tested >= cutoff)
    }

    pub(crate) fn mark_tested(&mut self, success: bool, now: DateTime<Utc>) {
        self.last_tested = Some(now);
        if success {
            self.last_successful = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap()
    }

    #[test]
    fn test_state_transitions() {
        let mut record = HealthRecord::new(at(0));
        assert_eq!(record.state(), HealthState::Untested);

        record.mark_tested(false, at(10));
        assert_eq!(record.state(), HealthState::Failing);

        record.mark_tested(true, at(20));
        assert_eq!(record.state(), HealthState::Healthy);
        assert_eq!(record.last_successful, record.last_tested);

        record.mark_tested(false, at(30));
        assert_eq!(record.state(), HealthState::Stale);
        assert!(record.is_stale());
        assert_eq!(record.last_successful, Some(at(20)));
    }

    #[test]
    fn test_blacklist_expiry() {
        let mut record = HealthRecord::new(at(0));
        assert!(!record.is_blacklisted(at(0)));

        record.blacklist = Some(Ban::Until(at(100)));
        assert!(record.is_blacklisted(at(99)));
        assert!(!record.is_blacklisted(at(100)));
    }

    #[test]
    fn test_json_shape() {
        let record = HealthRecord::new(at(0));
        let json = serde_json::to_value(&record).unwrap();

        assert!(json.get("blacklist").is_none());
        assert!(json["last_tested"].is_null());
        assert!(json["latency"].is_null());
    }
}
