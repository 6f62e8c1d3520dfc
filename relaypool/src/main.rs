use anyhow::Result;
use clap::Parser;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use relaypool_core::{logging, Config, Error};
use relaypool_engine::{GetOptions, HttpListSource, Pool, PoolEvent, StaticProbe, StaticSource};

#[derive(Parser, Debug)]
#[command(name = "relaypool")]
#[command(about = "Discover, health-check and rank network relays", long_about = None)]
struct Args {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, env = "RELAYPOOL_CONFIG")]
    config: Option<String>,

    /// Relay to register as-is, repeatable
    #[arg(long = "relay")]
    relays: Vec<String>,

    /// URL serving a newline-separated relay list, repeatable
    #[arg(long = "source-url")]
    source_urls: Vec<String>,

    /// How long to wait for the first working relay
    #[arg(long, default_value = "30000")]
    timeout_ms: u64,

    /// Drop relays slower than this
    #[arg(long)]
    max_latency_ms: Option<u64>,

    /// Drop relays whose last success is older than this
    #[arg(long)]
    max_age_secs: Option<u64>,

    /// Print at most this many relays
    #[arg(long)]
    limit: Option<usize>,

    /// Keep refreshing and print the list whenever a test batch finds working relays
    #[arg(long)]
    watch: bool,
}

impl Args {
    fn get_options(&self) -> GetOptions {
        GetOptions {
            max_age: self.max_age_secs.map(Duration::from_secs),
            max_latency: self.max_latency_ms.map(Duration::from_millis),
            timeout: Some(Duration::from_millis(self.timeout_ms)),
            now: None,
            limit: self.limit,
        }
    }
}

fn build_pool(config: &Config, args: &Args) -> Result<Pool> {
    let pool = Pool::new(config.pool.clone());
    pool.set_probe_template(StaticProbe::from_config(&config.probe)?);

    let relays: Vec<&String> = config.sources.relays.iter().chain(&args.relays).collect();
    let list_urls: Vec<&String> = config.sources.list_urls.iter().chain(&args.source_urls).collect();
    if relays.is_empty() && list_urls.is_empty() {
        return Err(anyhow::anyhow!(
            "No relay sources configured; pass --relay or --source-url, or set sources in the config file"
        ));
    }

    if !relays.is_empty() {
        info!(count = relays.len(), "Using static relays");
        pool.add_source("static", StaticSource::new(relays.into_iter().cloned()));
    }
    for url in list_urls {
        let source = HttpListSource::new(url.clone())?;
        info!(url = %source.url(), "Using relay list");
        pool.add_source(url.clone(), source);
    }

    Ok(pool)
}

fn print_relays(relays: &[String]) {
    if relays.is_empty() {
        warn!("No working relays");
    }
    for relay in relays {
        println!("{relay}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load configuration
    let config = Config::load(args.config.as_deref())?;
    if let Err(e) = config.validate() {
        if let Error::InvalidConfig(errors) = &e {
            for problem in errors {
                eprintln!("Config validation error: {problem}");
            }
        }
        return Err(e.into());
    }

    // 2. Logging
    logging::init_logging(&config.logging)?;
    info!("relaypool starting");

    // 3. Pool
    let pool = build_pool(&config, &args)?;
    let mut events = pool.subscribe();
    pool.start();

    {
        let pool = pool.clone();
        tokio::spawn(async move {
            if let Err(e) = pool.refresh().await {
                error!(error = %e, "Initial refresh failed");
            }
        });
    }

    let options = args.get_options();
    print_relays(&pool.get(options.clone()).await);

    if !args.watch {
        pool.shutdown();
        return Ok(());
    }

    // 4. Watch until interrupted
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
            event = events.recv() => match event {
                Ok(PoolEvent::Ready) => {
                    println!();
                    print_relays(&pool.filter(&options));
                }
                Ok(PoolEvent::RefreshError { error }) => warn!(error = %error, "Refresh failed"),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Missed pool events"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    pool.shutdown();
    info!("relaypool stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_get_options_from_args() {
        let args = Args::parse_from([
            "relaypool",
            "--relay",
            "http://10.0.0.1:3128",
            "--relay",
            "http://10.0.0.2:3128",
            "--max-latency-ms",
            "1500",
            "--limit",
            "5",
        ]);
        assert_eq!(args.relays.len(), 2);

        let options = args.get_options();
        assert_eq!(options.max_latency, Some(Duration::from_millis(1500)));
        assert_eq!(options.max_age, None);
        assert_eq!(options.timeout, Some(Duration::from_secs(30)));
        assert_eq!(options.limit, Some(5));
    }

    #[test]
    fn test_build_pool_requires_a_source() {
        let args = Args::parse_from(["relaypool"]);
        assert!(build_pool(&Config::default(), &args).is_err());

        let args = Args::parse_from(["relaypool", "--source-url", "http://lists.invalid/relays.txt"]);
        assert!(build_pool(&Config::default(), &args).is_ok());
    }
}
