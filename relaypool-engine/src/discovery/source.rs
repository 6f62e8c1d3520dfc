//! Discovery source capability

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Failure of a single discovery source
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid relay list: {0}")]
    InvalidList(String),

    #[error("{0}")]
    Other(String),
}

/// Produces candidate relay identifiers
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<String>, DiscoveryError>;
}

/// A registered source and the name it reports under
#[derive(Clone)]
pub struct NamedSource {
    pub name: String,
    pub source: Arc<dyn DiscoverySource>,
}

impl NamedSource {
    pub fn new(name: impl Into<String>, source: Arc<dyn DiscoverySource>) -> Self {
        Self {
            name: name.into(),
            source,
        }
    }
}

impl std::fmt::Debug for NamedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedSource").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Fixed list of relays
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    relays: Vec<String>,
}

impl StaticSource {
    pub fn new<I, S>(relays: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            relays: relays.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl DiscoverySource for StaticSource {
    async fn fetch(&self) -> Result<Vec<String>, DiscoveryError> {
        Ok(self.relays.clone())
    }
}

/// Adapts an async closure into a [`DiscoverySource`]
pub struct FnSource<F>(pub F);

#[async_trait]
impl<F, Fut> DiscoverySource for FnSource<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<String>, DiscoveryError>> + Send,
{
    async fn fetch(&self) -> Result<Vec<String>, DiscoveryError> {
        (self.0)().await
    }
}
