//! Message broker client
//!
//! This module keeps one long-lived consumer connection to an AMQP broker:
//!
//! - `state`: connection phases and per-cycle flags
//! - `transport`: the client seam (`BrokerTransport`) and its events
//! - `amqp`: the `lapin`-backed transport
//! - `connection`: the connect/declare/consume state machine
//! - `supervisor`: reconnect loop with linear backoff, plus control handles

mod amqp;
mod connection;
mod state;
mod supervisor;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

use thiserror::Error;

pub use amqp::AmqpTransport;
pub use connection::{
    BrokerCommand, BrokerConnection, DeliveryHandler, Disposition, StopMode, PREFETCH_COUNT,
};
pub use state::{ConnectionFlags, ConnectionPhase, ConnectionState};
pub use supervisor::{BrokerHandle, ConnectionSupervisor, ReconnectBackoff, SupervisorHandle};
pub use transport::{BrokerTransport, CloseReason, Delivery, TransportEvent};

/// Broker-specific errors
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Not connected to the broker")]
    NotConnected,

    #[error("Invalid connection transition from {from} to {to}")]
    InvalidTransition {
        from: ConnectionPhase,
        to: ConnectionPhase,
    },

    #[error("Broker closed the channel: {0}")]
    ChannelClosed(CloseReason),

    #[error("Unrecoverable broker closure ({code}): {text}")]
    FatalClosure { code: u16, text: String },

    #[error("Broker transport error: {0}")]
    Transport(String),

    #[error("Broker supervisor has exited")]
    SupervisorExited,
}

/// Result type alias for broker operations
pub type BrokerResult<T> = std::result::Result<T, BrokerError>;
