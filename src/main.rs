//! Rummage scrape node entry point
//!
//! This is the command-line interface for running a scrape node.

use anyhow::Context;
use clap::Parser;
use rummage::config::{load_config_with_hash, Config};
use rummage::ScrapeNode;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Rummage: a scrape node for a distributed crawler
///
/// Consumes crawl tasks from the message broker (or the job API), scrapes
/// each page and reports the results to the page store, processing queue and
/// big broker.
#[derive(Parser, Debug)]
#[command(name = "rummage-node")]
#[command(version)]
#[command(about = "Scrape node for a distributed crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG", env = "RUMMAGE_NODE_CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate the configuration, print a summary and exit
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);

    if cli.check_config {
        print_config_summary(&config);
        return Ok(());
    }

    let node = ScrapeNode::new(config).context("Failed to initialise scrape node")?;
    node.run().await.context("Scrape node stopped with an error")?;

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("rummage=info,warn"),
            1 => EnvFilter::new("rummage=debug,info"),
            2 => EnvFilter::new("rummage=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles --check-config: shows what the node would connect to
fn print_config_summary(config: &Config) {
    println!("=== Rummage Node Configuration ===\n");

    println!("Node:");
    println!("  Job API: {}", config.node.listen_address);
    println!("  Tick interval: {}ms", config.node.tick_interval_ms);

    println!("\nScraper:");
    println!("  User agent: {}", config.scraper.user_agent);
    println!("  Timeout: {}ms", config.scraper.timeout_ms);

    println!("\nPeers:");
    println!("  Page store: {}", config.page_store_api.endpoint);
    println!("  Processing queue: {}", config.processing_queue_api.endpoint);
    println!("  Big broker: {}", config.big_broker_api.endpoint);

    let messaging = &config.messaging;
    println!("\nBroker:");
    println!(
        "  {}@{}:{}",
        messaging.connection.username, messaging.connection.host, messaging.connection.port
    );
    for exchange in &messaging.exchanges {
        println!("  Exchange: {} ({:?})", exchange.name, exchange.exchange_type);
    }
    println!(
        "  Consumer queue: {} (durable: {})",
        messaging.consumer.name, messaging.consumer.durable
    );
    for queue in &messaging.publishers {
        println!("  Publish queue: {} (durable: {})", queue.name, queue.durable);
    }
}
