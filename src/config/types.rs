use serde::Deserialize;

/// Main configuration structure for a scrape node
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub node: NodeConfig,
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(rename = "page-store-api")]
    pub page_store_api: PeerApiConfig,
    #[serde(rename = "processing-queue-api")]
    pub processing_queue_api: PeerApiConfig,
    #[serde(rename = "big-broker-api")]
    pub big_broker_api: PeerApiConfig,
    pub messaging: MessagingConfig,
}

/// Node runtime configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Bind address of the job API
    #[serde(rename = "listen-address")]
    pub listen_address: String,

    /// Value expected in the `AuthKey` header of job API requests
    #[serde(rename = "auth-key")]
    pub auth_key: String,

    /// Sleep between scheduler ticks (milliseconds)
    #[serde(rename = "tick-interval-ms", default = "default_tick_interval")]
    pub tick_interval_ms: u64,
}

/// Page fetch settings
#[derive(Debug, Clone, Deserialize)]
pub struct ScraperConfig {
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout (milliseconds)
    #[serde(rename = "timeout-ms", default = "default_scrape_timeout")]
    pub timeout_ms: u64,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_ms: default_scrape_timeout(),
        }
    }
}

/// Endpoint and credentials of a peer service
#[derive(Debug, Clone, Deserialize)]
pub struct PeerApiConfig {
    /// Base URL, e.g. `http://page-store:8080`
    pub endpoint: String,

    #[serde(rename = "auth-key")]
    pub auth_key: String,
}

/// Broker connection and topology
#[derive(Debug, Clone, Deserialize)]
pub struct MessagingConfig {
    pub connection: ConnectionSettings,
    #[serde(default)]
    pub exchanges: Vec<ExchangeSettings>,
    pub consumer: QueueSettings,
    #[serde(default)]
    pub publishers: Vec<QueueSettings>,
}

/// Broker credentials and address
#[derive(Clone, Deserialize)]
pub struct ConnectionSettings {
    #[serde(default = "default_broker_host")]
    pub host: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    #[serde(default = "default_guest")]
    pub username: String,
    #[serde(default = "default_guest")]
    pub password: String,
}

impl std::fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"REDACTED")
            .finish()
    }
}

/// Exchange declared at connection-open time
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExchangeSettings {
    pub name: String,
    #[serde(rename = "exchange-type", default)]
    pub exchange_type: ExchangeType,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeType {
    #[default]
    Direct,
    Fanout,
    Topic,
    Headers,
}

/// Queue descriptor, read once when the connection opens
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QueueSettings {
    pub name: String,

    #[serde(default)]
    pub durable: bool,

    /// Exchange the queue is bound to
    #[serde(default)]
    pub exchange: Option<String>,

    #[serde(rename = "routing-keys", default)]
    pub routing_keys: Vec<String>,
}

impl QueueSettings {
    /// Unbound queue with the given name
    pub fn new(name: impl Into<String>, durable: bool) -> Self {
        Self {
            name: name.into(),
            durable,
            exchange: None,
            routing_keys: Vec::new(),
        }
    }

    /// Binds the queue to `exchange` under each of `routing_keys`
    pub fn bound_to(mut self, exchange: impl Into<String>, routing_keys: Vec<String>) -> Self {
        self.exchange = Some(exchange.into());
        self.routing_keys = routing_keys;
        self
    }
}

fn default_tick_interval() -> u64 {
    100
}

fn default_user_agent() -> String {
    "Mozilla/5.0".to_string()
}

fn default_scrape_timeout() -> u64 {
    2000
}

fn default_broker_host() -> String {
    "localhost".to_string()
}

fn default_broker_port() -> u16 {
    5672
}

fn default_guest() -> String {
    "guest".to_string()
}
