//! HTTP probe transport backed by reqwest

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

use relaypool_core::config::PoolConfig;

use super::probe::{ProbeRequest, ProbeResponse, ProbeTransport, TransportError};

/// Sends each probe through its relay with a fresh client
///
/// A client is bound to one proxy, so clients are not shared between relays.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    /// Applied when a request carries no timeout of its own
    default_timeout: Duration,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self {
            default_timeout: PoolConfig::default().probe_timeout(),
        }
    }
}

impl HttpTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    fn timeout_for(&self, request: &ProbeRequest) -> Duration {
        request.timeout.unwrap_or(self.default_timeout)
    }

    fn client_for(&self, request: &ProbeRequest) -> Result<reqwest::Client, TransportError> {
        let mut builder = reqwest::Client::builder().timeout(self.timeout_for(request));

        if let Some(relay) = &request.relay {
            let proxy = reqwest::Proxy::all(relay).map_err(|e| TransportError::InvalidRelay {
                relay: relay.clone(),
                reason: e.to_string(),
            })?;
            builder = builder.proxy(proxy);
        } else {
            builder = builder.no_proxy();
        }

        builder
            .build()
            .map_err(|e| TransportError::Request(format!("failed to build client: {e}")))
    }
}

#[async_trait]
impl ProbeTransport for HttpTransport {
    async fn execute(&self, request: ProbeRequest) -> Result<ProbeResponse, TransportError> {
        let client = self.client_for(&request)?;
        let timeout = self.timeout_for(&request);

        let mut builder = client.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let start = Instant::now();
        let response = builder.send().await.map_err(|e| classify(e, timeout))?;
        let elapsed = start.elapsed();

        tracing::trace!(
            relay = ?request.relay,
            status = response.status().as_u16(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Probe response"
        );

        Ok(ProbeResponse {
            status: response.status().as_u16(),
            elapsed,
        })
    }
}

fn classify(error: reqwest::Error, timeout: Duration) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(timeout)
    } else if error.is_connect() {
        TransportError::Connect(error.to_string())
    } else {
        TransportError::Request(error.to_string())
    }
}
