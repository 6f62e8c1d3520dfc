//! Discovery from a plain-text relay list served over HTTP
//!
//! One relay per line. Blank lines and `#` comments are skipped; bare
//! `host:port` entries are treated as HTTP relays.

use async_trait::async_trait;
use std::time::Duration;

use super::source::{DiscoveryError, DiscoverySource};

/// Timeout for fetching a relay list
const LIST_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct HttpListSource {
    url: String,
    client: reqwest::Client,
}

impl HttpListSource {
    pub fn new(url: impl Into<String>) -> Result<Self, DiscoveryError> {
        let client = reqwest::Client::builder()
            .timeout(LIST_FETCH_TIMEOUT)
            .build()?;
        Ok(Self::with_client(url, client))
    }

    pub fn with_client(url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            url: url.into(),
            client,
        }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl DiscoverySource for HttpListSource {
    async fn fetch(&self) -> Result<Vec<String>, DiscoveryError> {
        let body = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        parse_relay_list(&body)
    }
}

/// Parse a newline-separated relay list
pub fn parse_relay_list(body: &str) -> Result<Vec<String>, DiscoveryError> {
    let mut relays = Vec::new();
    for (number, line) in body.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.contains(char::is_whitespace) {
            return Err(DiscoveryError::InvalidList(format!(
                "line {}: unexpected whitespace in {line:?}",
                number + 1
            )));
        }
        if line.contains("://") {
            relays.push(line.to_string());
        } else {
            relays.push(format!("http://{line}"));
        }
    }
    Ok(relays)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_parse_relay_list() {
        let body = "# fresh list\n10.0.0.1:3128\n\n  socks5://10.0.0.2:1080  \nhttp://10.0.0.3:80\n";
        assert_eq!(
            parse_relay_list(body).unwrap(),
            [
                "http://10.0.0.1:3128",
                "socks5://10.0.0.2:1080",
                "http://10.0.0.3:80",
            ]
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = parse_relay_list("10.0.0.1:3128\n10.0.0.2 3128\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[tokio::test]
    async fn test_fetch_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/relays.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("10.1.1.1:8080\n10.1.1.2:8080\n"))
            .expect(1)
            .mount(&server)
            .await;

        let source = HttpListSource::new(format!("{}/relays.txt", server.uri())).unwrap();
        assert_eq!(
            source.fetch().await.unwrap(),
            ["http://10.1.1.1:8080", "http://10.1.1.2:8080"]
        );
    }

    #[tokio::test]
    async fn test_fetch_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let source = HttpListSource::new(server.uri()).unwrap();
        assert!(matches!(source.fetch().await, Err(DiscoveryError::Http(_))));
    }
}
