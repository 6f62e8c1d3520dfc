pub mod models;
pub mod registry;
pub mod ranking;
pub mod config;
pub mod error;
pub mod logging;

pub use config::Config;
pub use error::{Error, Result};
pub use models::{Ban, BanDuration, HealthRecord, HealthState};
pub use ranking::FilterOptions;
pub use registry::Registry;
