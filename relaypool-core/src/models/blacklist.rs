//! Relay suppression markers

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// An active or expired ban on a relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "until", rename_all = "snake_case")]
pub enum Ban {
    /// Never expires
    Permanent,
    /// Suppressed while the reference time is before this instant
    Until(DateTime<Utc>),
}

impl Ban {
    /// Whether the ban suppresses the relay at `now`
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        match self {
            Self::Permanent => true,
            Self::Until(until) => *until > now,
        }
    }
}

/// Requested length of a ban
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanDuration {
    Permanent,
    For(Duration),
}

impl BanDuration {
    /// Resolve into a ban starting at `now`.
    ///
    /// Returns `None` for a zero-length ban. A duration that overflows the
    /// calendar is treated as permanent.
    #[must_use]
    pub fn starting_at(self, now: DateTime<Utc>) -> Option<Ban> {
        match self {
            Self::Permanent => Some(Ban::Permanent),
            Self::For(duration) if duration.is_zero() => None,
            Self::For(duration) => Some(
                TimeDelta::from_std(duration)
                    .ok()
                    .and_then(|delta| now.checked_add_signed(delta))
                    .map_or(Ban::Permanent, Ban::Until),
            ),
        }
    }
}

impl From<Duration> for BanDuration {
    fn from(duration: Duration) -> Self {
        Self::For(duration)
    }
}
