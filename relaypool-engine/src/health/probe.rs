//! Probe request template and transport capability

use async_trait::async_trait;
use reqwest::Method;
use std::time::Duration;
use thiserror::Error;

use relaypool_core::config::ProbeConfig;

use crate::error::{Error, Result};

/// Target used when no probe template is configured
pub const DEFAULT_PROBE_URL: &str = "https://google.com";

/// A single health-check request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// Relay the request must egress through
    pub relay: Option<String>,
    pub timeout: Option<Duration>,
}

impl ProbeRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            relay: None,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_relay(mut self, relay: impl Into<String>) -> Self {
        self.relay = Some(relay.into());
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Builds the request template for each probe; the tester fills in the
/// relay and the timeout
pub trait ProbeTemplate: Send + Sync {
    fn build(&self) -> ProbeRequest;
}

impl<F> ProbeTemplate for F
where
    F: Fn() -> ProbeRequest + Send + Sync,
{
    fn build(&self) -> ProbeRequest {
        self()
    }
}

/// Template that always yields the same request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticProbe {
    request: ProbeRequest,
}

impl Default for StaticProbe {
    fn default() -> Self {
        Self::new(ProbeRequest::get(DEFAULT_PROBE_URL))
    }
}

impl StaticProbe {
    #[must_use]
    pub const fn new(request: ProbeRequest) -> Self {
        Self { request }
    }

    pub fn from_config(config: &ProbeConfig) -> Result<Self> {
        let method = Method::from_bytes(config.method.to_uppercase().as_bytes())
            .map_err(|e| Error::InvalidProbe(format!("method {:?}: {e}", config.method)))?;
        if config.url.is_empty() {
            return Err(Error::InvalidProbe("empty probe url".to_string()));
        }
        let request = config
            .headers
            .iter()
            .fold(ProbeRequest::new(method, &config.url), |request, (name, value)| {
                request.with_header(name, value)
            });
        Ok(Self::new(request))
    }
}

impl ProbeTemplate for StaticProbe {
    fn build(&self) -> ProbeRequest {
        self.request.clone()
    }
}

/// Answer to a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    /// Time until the response arrived
    pub elapsed: Duration,
}

impl ProbeResponse {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Probe could not get a response through the relay
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("invalid relay {relay}: {reason}")]
    InvalidRelay { relay: String, reason: String },

    #[error("request failed: {0}")]
    Request(String),
}

/// Executes probe requests
#[async_trait]
pub trait ProbeTransport: Send + Sync {
    async fn execute(&self, request: ProbeRequest) -> std::result::Result<ProbeResponse, TransportError>;
}
