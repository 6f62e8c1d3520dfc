use config::{Config as ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::logging::LogFormat;
use crate::ranking::FilterOptions;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pool: PoolConfig,
    pub probe: ProbeConfig,
    pub sources: SourcesConfig,
    pub logging: LoggingConfig,
}

/// Relay pool tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub refresh_interval_secs: u64,
    pub probe_timeout_secs: u64,
    /// Relays probed per test batch
    pub max_candidates_per_batch: usize,
    pub discovery_concurrency: usize,
    pub test_concurrency: usize,
    /// Relays probed within this window count as tested when deciding
    /// whether another batch is needed before the pool is ready
    pub retest_after_secs: u64,
    pub filter: FilterConfig,
    pub skip_discovery: SkipDiscoveryConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 60,
            probe_timeout_secs: 20,
            max_candidates_per_batch: 50,
            discovery_concurrency: 10,
            test_concurrency: 10,
            retest_after_secs: 60,
            filter: FilterConfig::default(),
            skip_discovery: SkipDiscoveryConfig::default(),
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub const fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    #[must_use]
    pub const fn retest_after(&self) -> Duration {
        Duration::from_secs(self.retest_after_secs)
    }
}

/// Default thresholds for the exposed relay list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub max_age_secs: u64,
    pub max_latency_ms: u64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            max_age_secs: 60 * 60,
            max_latency_ms: 30_000,
        }
    }
}

impl FilterConfig {
    #[must_use]
    pub const fn options(&self) -> FilterOptions {
        FilterOptions {
            max_age: Duration::from_secs(self.max_age_secs),
            max_latency: Duration::from_millis(self.max_latency_ms),
        }
    }
}

/// When to skip querying discovery sources during a refresh
///
/// Discovery is skipped when more than `min_relays` relays pass the filter
/// with the tighter `max_latency_ms` ceiling and the best of them is not
/// stale.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SkipDiscoveryConfig {
    pub enabled: bool,
    pub min_relays: usize,
    pub max_age_secs: u64,
    pub max_latency_ms: u64,
}

impl Default for SkipDiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_relays: 4,
            max_age_secs: 60 * 60,
            max_latency_ms: 15_000,
        }
    }
}

impl SkipDiscoveryConfig {
    #[must_use]
    pub const fn options(&self) -> FilterOptions {
        FilterOptions {
            max_age: Duration::from_secs(self.max_age_secs),
            max_latency: Duration::from_millis(self.max_latency_ms),
        }
    }
}

/// Health check request template
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            method: "GET".to_string(),
            url: "https://google.com".to_string(),
            headers: BTreeMap::new(),
        }
    }
}

/// Where candidate relays come from
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// Relay identifiers registered as-is
    pub relays: Vec<String>,
    /// URLs serving newline-separated relay lists
    pub list_urls: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    ///
    /// Priority order:
    /// 1. Environment variables (highest priority)
    /// 2. Config file
    /// 3. Default values (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // RELAYPOOL_POOL__PROBE_TIMEOUT_SECS, RELAYPOOL_LOGGING__LEVEL, ...
        builder = builder.add_source(
            Environment::with_prefix("RELAYPOOL")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("sources.relays")
                .with_list_parse_key("sources.list_urls"),
        );

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Check values that would make the pool misbehave.
    ///
    /// Every problem found is reported in one `Error::InvalidConfig`.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        let pool = &self.pool;

        if pool.refresh_interval_secs == 0 {
            errors.push("pool.refresh_interval_secs must be greater than 0".to_string());
        }
        if pool.probe_timeout_secs == 0 {
            errors.push("pool.probe_timeout_secs must be greater than 0".to_string());
        }
        if pool.max_candidates_per_batch == 0 {
            errors.push("pool.max_candidates_per_batch must be greater than 0".to_string());
        }
        if pool.discovery_concurrency == 0 {
            errors.push("pool.discovery_concurrency must be greater than 0".to_string());
        }
        if pool.test_concurrency == 0 {
            errors.push("pool.test_concurrency must be greater than 0".to_string());
        }
        if self.probe.url.is_empty() {
            errors.push("probe.url must not be empty".to_string());
        }
        if self.logging.format.parse::<LogFormat>().is_err() {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\", got \"{}\"",
                self.logging.format
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidConfig(errors))
        }
    }
}
