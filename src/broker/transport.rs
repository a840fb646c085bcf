//! Transport seam between the connection state machine and a broker client

use crate::broker::BrokerResult;
use crate::config::{ExchangeSettings, QueueSettings};
use async_trait::async_trait;
use std::fmt;

/// Message delivered from the consumer queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub body: Vec<u8>,
}

impl Delivery {
    pub fn new(delivery_tag: u64, body: impl Into<Vec<u8>>) -> Self {
        Self {
            delivery_tag,
            exchange: String::new(),
            routing_key: String::new(),
            redelivered: false,
            body: body.into(),
        }
    }
}

/// Why the broker or the transport ended a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    /// AMQP reply code, or `0` when the transport failed without one
    pub code: u16,
    pub text: String,
}

impl CloseReason {
    /// Reply code for a declare that conflicts with existing topology
    pub const PRECONDITION_FAILED: u16 = 406;

    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }

    /// Transport failure without a broker reply code
    pub fn transport(text: impl Into<String>) -> Self {
        Self::new(0, text)
    }

    /// Topology precondition mismatch; reconnecting cannot help
    pub fn is_fatal(&self) -> bool {
        self.code == Self::PRECONDITION_FAILED
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.text, self.code)
    }
}

/// Something observed on an open consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Delivery(Delivery),
    Closed(CloseReason),
}

/// Broker client operations used by [`crate::broker::BrokerConnection`]
///
/// Operations that fail because the broker closed the channel return
/// [`crate::broker::BrokerError::ChannelClosed`] with the broker's reason, so
/// the connection can classify the failure.
#[async_trait]
pub trait BrokerTransport: Send {
    /// Opens the network connection
    async fn connect(&mut self) -> BrokerResult<()>;

    async fn open_channel(&mut self) -> BrokerResult<()>;

    async fn declare_exchange(&mut self, exchange: &ExchangeSettings) -> BrokerResult<()>;

    async fn declare_queue(&mut self, queue: &QueueSettings) -> BrokerResult<()>;

    async fn bind_queue(&mut self, queue: &str, exchange: &str, routing_key: &str)
        -> BrokerResult<()>;

    async fn set_prefetch(&mut self, count: u16) -> BrokerResult<()>;

    /// Starts consuming `queue` and returns the consumer tag
    async fn start_consuming(&mut self, queue: &str) -> BrokerResult<String>;

    /// Waits for the next delivery or closure
    ///
    /// Must be cancel-safe: the connection polls it alongside commands and
    /// stop requests.
    async fn next_event(&mut self) -> TransportEvent;

    /// Hands a message to the broker without waiting for confirmation
    async fn publish(&mut self, exchange: &str, routing_key: &str, body: &[u8])
        -> BrokerResult<()>;

    async fn ack(&mut self, delivery_tag: u64) -> BrokerResult<()>;

    async fn cancel_consumer(&mut self, consumer_tag: &str) -> BrokerResult<()>;

    /// Closes the channel and the connection
    async fn close(&mut self) -> BrokerResult<()>;
}
