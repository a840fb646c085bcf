use crate::config::types::{Config, MessagingConfig, NodeConfig, PeerApiConfig, QueueSettings};
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_node_config(&config.node)?;

    if config.scraper.timeout_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "scraper timeout-ms must be >= 100ms, got {}ms",
            config.scraper.timeout_ms
        )));
    }

    validate_peer_api("page-store-api", &config.page_store_api)?;
    validate_peer_api("processing-queue-api", &config.processing_queue_api)?;
    validate_peer_api("big-broker-api", &config.big_broker_api)?;
    validate_messaging(&config.messaging)?;
    Ok(())
}

fn validate_node_config(config: &NodeConfig) -> Result<(), ConfigError> {
    if config.listen_address.is_empty() {
        return Err(ConfigError::Validation(
            "node listen-address cannot be empty".to_string(),
        ));
    }

    if config.auth_key.is_empty() {
        return Err(ConfigError::Validation(
            "node auth-key cannot be empty".to_string(),
        ));
    }

    if config.tick_interval_ms < 1 || config.tick_interval_ms > 10_000 {
        return Err(ConfigError::Validation(format!(
            "tick-interval-ms must be between 1 and 10000, got {}",
            config.tick_interval_ms
        )));
    }

    Ok(())
}

fn validate_peer_api(section: &str, config: &PeerApiConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.endpoint).map_err(|e| {
        ConfigError::InvalidUrl(format!("{} endpoint '{}': {}", section, config.endpoint, e))
    })?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "{} endpoint '{}' must use http or https",
            section, config.endpoint
        )));
    }

    if config.auth_key.is_empty() {
        return Err(ConfigError::Validation(format!(
            "{} auth-key cannot be empty",
            section
        )));
    }

    Ok(())
}

fn validate_messaging(config: &MessagingConfig) -> Result<(), ConfigError> {
    let connection = &config.connection;
    if connection.host.is_empty() {
        return Err(ConfigError::Validation(
            "messaging host cannot be empty".to_string(),
        ));
    }
    if connection.username.is_empty() {
        return Err(ConfigError::Validation(
            "messaging username cannot be empty".to_string(),
        ));
    }
    if connection.port == 0 {
        return Err(ConfigError::Validation(
            "messaging port must be non-zero".to_string(),
        ));
    }

    let mut exchanges = HashSet::new();
    for exchange in &config.exchanges {
        if exchange.name.is_empty() {
            return Err(ConfigError::Validation(
                "exchange name cannot be empty".to_string(),
            ));
        }
        if !exchanges.insert(exchange.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "exchange '{}' is declared more than once",
                exchange.name
            )));
        }
    }

    let mut queue_names = HashSet::new();
    for queue in std::iter::once(&config.consumer).chain(config.publishers.iter()) {
        validate_queue(queue, &exchanges)?;
        if !queue_names.insert(queue.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "queue '{}' is declared more than once",
                queue.name
            )));
        }
    }

    Ok(())
}

fn validate_queue(queue: &QueueSettings, exchanges: &HashSet<&str>) -> Result<(), ConfigError> {
    if queue.name.is_empty() {
        return Err(ConfigError::Validation(
            "queue name cannot be empty".to_string(),
        ));
    }

    match &queue.exchange {
        Some(exchange) => {
            if !exchanges.contains(exchange.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "queue '{}' is bound to unknown exchange '{}'",
                    queue.name, exchange
                )));
            }
            if queue.routing_keys.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "queue '{}' is bound to '{}' but lists no routing keys",
                    queue.name, exchange
                )));
            }
        }
        None if !queue.routing_keys.is_empty() => {
            return Err(ConfigError::Validation(format!(
                "queue '{}' has routing keys but no exchange",
                queue.name
            )));
        }
        None => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::SAMPLE_CONFIG;
    use crate::config::{ExchangeSettings, ExchangeType};

    fn sample() -> Config {
        toml::from_str(SAMPLE_CONFIG).unwrap()
    }

    #[test]
    fn test_sample_config_is_valid() {
        assert!(validate(&sample()).is_ok());
    }

    #[test]
    fn test_empty_node_auth_key() {
        let mut config = sample();
        config.node.auth_key.clear();
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_tick_interval_bounds() {
        let mut config = sample();
        config.node.tick_interval_ms = 10_001;
        assert!(validate(&config).is_err());

        config.node.tick_interval_ms = 10_000;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_scraper_timeout_too_small() {
        let mut config = sample();
        config.scraper.timeout_ms = 99;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_invalid_peer_endpoint() {
        let mut config = sample();
        config.page_store_api.endpoint = "not a url".to_string();
        assert!(matches!(validate(&config), Err(ConfigError::InvalidUrl(_))));
    }

    #[test]
    fn test_peer_endpoint_wrong_scheme() {
        let mut config = sample();
        config.big_broker_api.endpoint = "ftp://big-broker".to_string();
        assert!(matches!(validate(&config), Err(ConfigError::InvalidUrl(_))));
    }

    #[test]
    fn test_empty_peer_auth_key() {
        let mut config = sample();
        config.processing_queue_api.auth_key.clear();
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_zero_broker_port() {
        let mut config = sample();
        config.messaging.connection.port = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_binding_to_unknown_exchange() {
        let mut config = sample();
        config.messaging.consumer.exchange = Some("missing".to_string());
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_binding_without_routing_keys() {
        let mut config = sample();
        config.messaging.consumer.routing_keys.clear();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_routing_keys_without_exchange() {
        let mut config = sample();
        config.messaging.publishers[0].routing_keys = vec!["orphan".to_string()];
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_duplicate_queue_names() {
        let mut config = sample();
        config.messaging.publishers[0].name = config.messaging.consumer.name.clone();
        config.messaging.publishers[0].durable = true;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_duplicate_exchange_names() {
        let mut config = sample();
        config.messaging.exchanges.push(ExchangeSettings {
            name: "crawl".to_string(),
            exchange_type: ExchangeType::Fanout,
        });
        assert!(validate(&config).is_err());
    }
}
