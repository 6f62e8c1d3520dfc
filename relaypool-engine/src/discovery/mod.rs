//! Relay discovery
//!
//! Pluggable sources of candidate relays and the aggregator that merges
//! their output into the registry.

pub mod source;
pub mod http_list;
pub mod aggregator;

pub use aggregator::{DiscoveryReport, SourceAggregator};
pub use http_list::HttpListSource;
pub use source::{DiscoveryError, DiscoverySource, FnSource, NamedSource, StaticSource};
