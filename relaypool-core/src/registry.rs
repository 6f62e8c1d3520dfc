//! In-memory relay registry
//!
//! Maps relay identifiers to their [`HealthRecord`]. Every mutation is a
//! single synchronous step under the write lock, so overlapping probe
//! completions never tear a record. The lock is never held across an await.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::time::Duration;

use crate::error::Result;
use crate::models::{BanDuration, HealthRecord};

/// Registry of every relay accepted so far
///
/// Insertion order is preserved and acts as the stable tie-break for the
/// ranking functions.
#[derive(Debug, Default)]
pub struct Registry {
    records: RwLock<IndexMap<String, HealthRecord>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` if it is not known yet.
    ///
    /// Returns `true` when a fresh record was created.
    pub fn add(&self, id: &str, now: DateTime<Utc>) -> bool {
        let mut records = self.records.write();
        if records.contains_key(id) {
            tracing::trace!(relay = %id, "Relay already registered");
            return false;
        }
        records.insert(id.to_string(), HealthRecord::new(now));
        true
    }

    /// Register every id in `ids`, returning how many were new
    pub fn extend<I, S>(&self, ids: I, now: DateTime<Utc>) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut records = self.records.write();
        let mut added = 0;
        for id in ids {
            let id = id.as_ref();
            if !records.contains_key(id) {
                records.insert(id.to_string(), HealthRecord::new(now));
                added += 1;
            }
        }
        added
    }

    /// Record a test result for `id`.
    ///
    /// Unknown ids are ignored; returns whether a record was touched.
    pub fn update(&self, id: &str, success: bool, now: DateTime<Utc>) -> bool {
        let mut records = self.records.write();
        let Some(record) = records.get_mut(id) else {
            tracing::debug!(relay = %id, "Ignoring update for unknown relay");
            return false;
        };
        record.mark_tested(success, now);
        true
    }

    /// Record a successful probe together with its latency
    pub fn record_success(&self, id: &str, latency: Duration, now: DateTime<Utc>) -> bool {
        let mut records = self.records.write();
        let Some(record) = records.get_mut(id) else {
            return false;
        };
        record.mark_tested(true, now);
        record.latency = Some(latency);
        true
    }

    /// Suppress `id` permanently or for a period starting at `now`.
    ///
    /// A later call replaces an earlier ban. Unknown ids and zero durations
    /// are ignored.
    pub fn blacklist(&self, id: &str, duration: BanDuration, now: DateTime<Utc>) -> bool {
        let Some(ban) = duration.starting_at(now) else {
            return false;
        };
        let mut records = self.records.write();
        let Some(record) = records.get_mut(id) else {
            tracing::debug!(relay = %id, "Ignoring blacklist for unknown relay");
            return false;
        };
        record.blacklist = Some(ban);
        tracing::debug!(relay = %id, ban = ?ban, "Relay blacklisted");
        true
    }

    /// Delete every record whose id is not in `allow`, returning how many
    /// were removed
    pub fn trim<I, S>(&self, allow: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keep: HashSet<String> = allow.into_iter().map(|id| id.as_ref().to_string()).collect();
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|id, _| keep.contains(id));
        let removed = before - records.len();
        tracing::debug!(kept = records.len(), removed, "Trimmed relay registry");
        removed
    }

    /// Insert or replace a record verbatim
    pub fn insert(&self, id: impl Into<String>, record: HealthRecord) {
        self.records.write().insert(id.into(), record);
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<HealthRecord> {
        self.records.read().get(id).cloned()
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.records.read().contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Owned copy of all records in insertion order
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, HealthRecord)> {
        self.records
            .read()
            .iter()
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect()
    }

    /// Serialize all records as a JSON object keyed by relay id
    pub fn to_json(&self) -> Result<String> {
        let records = self.records.read();
        Ok(serde_json::to_string(&*records)?)
    }
}
