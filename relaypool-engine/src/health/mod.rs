//! Relay health testing

pub mod probe;
pub mod transport;
pub mod tester;

pub use probe::{ProbeRequest, ProbeResponse, ProbeTemplate, ProbeTransport, StaticProbe, TransportError};
pub use tester::{HealthTester, TestReport, TesterConfig};
pub use transport::HttpTransport;
