//! Connection phases and flags
//!
//! A [`ConnectionState`] lives for exactly one connect cycle. Reconnecting
//! builds a fresh one through [`ConnectionState::reset_for_reconnect`] rather
//! than clearing flags in place.

use crate::broker::transport::CloseReason;
use crate::broker::{BrokerError, BrokerResult};
use std::fmt;

/// Phase of the connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionPhase {
    #[default]
    Disconnected,
    Connecting,
    ChannelOpen,
    Declaring,
    SettingQos,
    Consuming,
    Closing,
}

impl ConnectionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::ChannelOpen => "channel-open",
            Self::Declaring => "declaring",
            Self::SettingQos => "setting-qos",
            Self::Consuming => "consuming",
            Self::Closing => "closing",
        }
    }

    /// Returns true if `next` is a legal successor of this phase
    ///
    /// Any phase with a live transport may drop straight to `Disconnected`
    /// when the transport is lost.
    pub fn can_transition_to(&self, next: ConnectionPhase) -> bool {
        use ConnectionPhase::*;

        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, ChannelOpen)
                | (Connecting, Disconnected)
                | (ChannelOpen, Declaring)
                | (Declaring, SettingQos)
                | (SettingQos, Consuming)
                | (ChannelOpen | Declaring | SettingQos | Consuming, Closing)
                | (ChannelOpen | Declaring | SettingQos | Consuming, Disconnected)
                | (Closing, Disconnected)
        )
    }

    /// Returns true if messages may be published in this phase
    pub fn allows_publish(&self) -> bool {
        matches!(self, Self::ChannelOpen | Self::Consuming)
    }
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Flags describing one connect cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionFlags {
    pub connected: bool,
    pub consuming: bool,
    /// Consumption was reached at some point during this cycle
    pub was_consuming: bool,
    pub should_reconnect: bool,
    /// Explicit shutdown requested
    pub closing: bool,
    /// Unrecoverable failure; never reconnect
    pub fatal: bool,
}

/// Phase plus flags for a single connect cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    phase: ConnectionPhase,
    flags: ConnectionFlags,
    close_reason: Option<CloseReason>,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn flags(&self) -> ConnectionFlags {
        self.flags
    }

    /// Reason reported by the transport when this cycle ended, if any
    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.close_reason.as_ref()
    }

    /// Moves to `next`, updating the connected/consuming flags
    pub fn transition(&mut self, next: ConnectionPhase) -> BrokerResult<()> {
        if !self.phase.can_transition_to(next) {
            return Err(BrokerError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }

        match next {
            ConnectionPhase::ChannelOpen => self.flags.connected = true,
            ConnectionPhase::Consuming => {
                self.flags.consuming = true;
                self.flags.was_consuming = true;
            }
            ConnectionPhase::Closing => self.flags.consuming = false,
            ConnectionPhase::Disconnected => {
                self.flags.connected = false;
                self.flags.consuming = false;
            }
            ConnectionPhase::Connecting
            | ConnectionPhase::Declaring
            | ConnectionPhase::SettingQos => {}
        }

        self.phase = next;
        Ok(())
    }

    /// Records a closure reported by the broker or the transport
    ///
    /// A fatal reason marks the cycle unrecoverable. Any other reason asks for a
    /// reconnect unless a shutdown was requested.
    pub fn record_closure(&mut self, reason: CloseReason) {
        if reason.is_fatal() {
            self.flags.fatal = true;
            self.flags.should_reconnect = false;
        } else if !self.flags.closing {
            self.flags.should_reconnect = true;
        }
        self.close_reason = Some(reason);
    }

    /// Records an explicit shutdown request
    pub fn request_close(&mut self) {
        self.flags.closing = true;
        self.flags.should_reconnect = false;
    }

    pub fn is_fatal(&self) -> bool {
        self.flags.fatal
    }

    pub fn was_consuming(&self) -> bool {
        self.flags.was_consuming
    }

    /// Reconnect wanted and not blocked by a fatal closure
    pub fn should_reconnect(&self) -> bool {
        self.flags.should_reconnect && !self.flags.fatal
    }

    /// Fresh `Disconnected` state carrying over only the fatal flag
    pub fn reset_for_reconnect(&self) -> Self {
        Self {
            phase: ConnectionPhase::Disconnected,
            flags: ConnectionFlags {
                fatal: self.flags.fatal,
                ..ConnectionFlags::default()
            },
            close_reason: None,
        }
    }
}
