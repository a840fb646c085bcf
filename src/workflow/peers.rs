//! HTTP client for peer services

use crate::config::{Config, PeerApiConfig};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Header carrying the shared secret on every peer request
pub const AUTH_HEADER: &str = "AuthKey";

const PEER_TIMEOUT: Duration = Duration::from_secs(10);

/// Classified answer from a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerResponse {
    /// 200 OK
    Ok,
    /// 406 Not Acceptable; the record already exists
    AlreadyExists,
    /// Any other status
    Rejected { status: u16, body: String },
    /// No HTTP answer at all
    Unreachable(String),
}

impl PeerResponse {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl fmt::Display for PeerResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::AlreadyExists => write!(f, "already exists"),
            Self::Rejected { status, body } => write!(f, "status code {} ({})", status, body),
            Self::Unreachable(error) => write!(f, "unreachable: {}", error),
        }
    }
}

/// Client for one peer service
#[derive(Debug, Clone)]
pub struct PeerClient {
    name: &'static str,
    client: Client,
    endpoint: String,
    auth_key: String,
}

impl PeerClient {
    pub fn new(name: &'static str, client: Client, config: &PeerApiConfig) -> Self {
        Self {
            name,
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            auth_key: config.auth_key.clone(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// POSTs `body` as JSON to `route` on this peer
    pub async fn post<T: Serialize + ?Sized>(&self, route: &str, body: &T) -> PeerResponse {
        let url = format!("{}{}", self.endpoint, route);

        let response = match self
            .client
            .post(&url)
            .header(AUTH_HEADER, &self.auth_key)
            .json(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return PeerResponse::Unreachable(e.to_string()),
        };

        match response.status() {
            StatusCode::OK => PeerResponse::Ok,
            StatusCode::NOT_ACCEPTABLE => PeerResponse::AlreadyExists,
            status => PeerResponse::Rejected {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            },
        }
    }
}

/// The three peers the crawl workflow talks to
#[derive(Debug, Clone)]
pub struct PeerClients {
    pub page_store: PeerClient,
    pub processing_queue: PeerClient,
    pub big_broker: PeerClient,
}

impl PeerClients {
    /// Builds clients for the peers named in `config`, sharing one connection pool
    pub fn from_config(config: &Config) -> Result<Self, reqwest::Error> {
        Self::new(
            &config.page_store_api,
            &config.processing_queue_api,
            &config.big_broker_api,
        )
    }

    pub fn new(
        page_store: &PeerApiConfig,
        processing_queue: &PeerApiConfig,
        big_broker: &PeerApiConfig,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(PEER_TIMEOUT).build()?;

        Ok(Self {
            page_store: PeerClient::new("page store", client.clone(), page_store),
            processing_queue: PeerClient::new("processing queue", client.clone(), processing_queue),
            big_broker: PeerClient::new("big broker", client, big_broker),
        })
    }
}
