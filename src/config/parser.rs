use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use rummage::config::load_config;
///
/// let config = load_config(Path::new("node.toml")).unwrap();
/// println!("Consuming from: {}", config.messaging.consumer.name);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses and validates configuration from TOML text
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// SHA-256 hex digest of a configuration file
///
/// Logged at startup so operators can tell which revision of a config a node runs.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    Ok(digest(&content))
}

/// Loads a configuration together with the digest of the exact text parsed
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config = parse_config(&content)?;
    Ok((config, digest(&content)))
}

fn digest(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

#[cfg(test)]
pub(crate) const SAMPLE_CONFIG: &str = r#"
[node]
listen-address = "127.0.0.1:9000"
auth-key = "node-key"

[page-store-api]
endpoint = "http://page-store:8080"
auth-key = "store-key"

[processing-queue-api]
endpoint = "http://processing-queue:8080"
auth-key = "queue-key"

[big-broker-api]
endpoint = "http://big-broker:8080"
auth-key = "broker-key"

[messaging.connection]
host = "rabbit"
username = "node"
password = "hunter2"

[[messaging.exchanges]]
name = "crawl"
exchange-type = "topic"

[messaging.consumer]
name = "scrape-tasks"
durable = true
exchange = "crawl"
routing-keys = ["scrape.new"]

[[messaging.publishers]]
name = "scrape-results"
"#;
