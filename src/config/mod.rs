//! Configuration module for a scrape node
//!
//! This module handles loading, parsing, and validating the node's TOML
//! configuration: peer service endpoints, broker credentials and topology,
//! scraper settings and the tick loop pacing.
//!
//! # Example
//!
//! ```no_run
//! use rummage::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("node.toml")).unwrap();
//! println!("Page store at: {}", config.page_store_api.endpoint);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, ConnectionSettings, ExchangeSettings, ExchangeType, MessagingConfig, NodeConfig,
    PeerApiConfig, QueueSettings, ScraperConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};

#[cfg(test)]
pub(crate) use parser::SAMPLE_CONFIG;
