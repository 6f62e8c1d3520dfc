//! Relay health data model

pub mod blacklist;
pub mod record;

pub use blacklist::{Ban, BanDuration};
pub use record::{HealthRecord, HealthState};
