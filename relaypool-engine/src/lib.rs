//! Relay pool engine: discovery, health testing and the pool controller.

pub mod discovery;
pub mod health;
pub mod pool;
pub mod events;
pub mod error;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use error::{Error, Result};
pub use events::{EventBus, PoolEvent};
pub use discovery::{DiscoveryError, DiscoverySource, FnSource, HttpListSource, SourceAggregator, StaticSource};
pub use health::{HealthTester, HttpTransport, ProbeRequest, ProbeTemplate, ProbeTransport, StaticProbe, TransportError};
pub use pool::{DiscoveryPhase, GetOptions, Pool, RefreshOutcome};
