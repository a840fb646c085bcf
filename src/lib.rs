//! Rummage: a scrape node for a distributed crawling platform
//!
//! A scrape node receives crawl tasks (from the message broker or its job API),
//! fetches and scrapes the page, then walks the result through a chain of
//! peer-service calls driven entirely by scheduler events:
//!
//! ```text
//! NewScrapeTask -> StoreResults -> AddLinksToQueue -> SendCompleteTask
//! ```
//!
//! The broker connection runs on its own supervised task and reconnects with
//! linear backoff; the scheduler runs on the node's tick loop and processes one
//! ready event per tick.

pub mod broker;
pub mod config;
pub mod events;
pub mod node;
pub mod scraper;
pub mod workflow;

use thiserror::Error;

/// Main error type for Rummage operations
#[derive(Debug, Error)]
pub enum RummageError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Broker error: {0}")]
    Broker(#[from] broker::BrokerError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] events::SchedulerError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Rummage operations
pub type Result<T> = std::result::Result<T, RummageError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use events::{Event, EventScheduler, EventTag, SchedulerHandle};
pub use node::ScrapeNode;
