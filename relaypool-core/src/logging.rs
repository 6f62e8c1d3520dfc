//! Tracing subscriber setup for the relaypool binaries
//!
//! Logs go to stderr or to a file. Stdout is left to relay listings.

use std::str::FromStr;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::config::LoggingConfig;

/// Crates whose events follow the configured level. Everything else,
/// including reqwest and hyper, is held at `warn`.
const OWN_TARGETS: [&str; 3] = ["relaypool", "relaypool_core", "relaypool_engine"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => Err(anyhow::anyhow!("Invalid log format: {other}")),
        }
    }
}

/// Install the global subscriber described by `config`.
///
/// `RUST_LOG` replaces the configured filter when set. The configured level
/// is still checked so a typo fails startup instead of silencing logs.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let format: LogFormat = config.format.parse()?;
    let directives = filter_directives(&config.level)?;
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&directives))?;

    let (writer, ansi) = match &config.file_path {
        Some(path) => (BoxMakeWriter::new(Arc::new(open_log_file(path)?)), false),
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    let layer = match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .compact()
            .with_target(true)
            .with_ansi(ansi)
            .with_writer(writer)
            .boxed(),
    };

    tracing_subscriber::registry().with(filter).with(layer).try_init()?;
    Ok(())
}

/// `warn` globally, `level` for the relaypool crates
fn filter_directives(level: &str) -> anyhow::Result<String> {
    let level: Level = level
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid log level: {level}"))?;
    let level = level.as_str().to_ascii_lowercase();

    let mut directives = vec!["warn".to_string()];
    directives.extend(OWN_TARGETS.iter().map(|target| format!("{target}={level}")));
    Ok(directives.join(","))
}

fn open_log_file(path: &str) -> std::io::Result<std::fs::File> {
    std::fs::OpenOptions::new().create(true).append(true).open(path)
}
