//! Pool controller
//!
//! Owns the registry, drives refresh cycles and serves the readiness-gated
//! relay list.

pub mod controller;
pub mod readiness;

pub use controller::{DiscoveryPhase, GetOptions, Pool, RefreshOutcome};
pub use readiness::Readiness;
