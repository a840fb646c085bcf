//! Event definitions for the scheduler
//!
//! An event is a tag selecting its handler, an opaque JSON payload, and an
//! optional fire time.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Closed set of event identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTag {
    /// Scrape a page for a newly assigned task
    NewScrapeTask,

    /// Post scraped page metadata to the page store
    StoreResults,

    /// Post discovered links to the processing queue
    AddLinksToQueue,

    /// Report task completion to the big broker
    SendCompleteTask,

    /// Callback: URL currently being scraped, if any
    QueryActiveUrl,
}

impl EventTag {
    /// Returns the tag's name as used in log output
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewScrapeTask => "new_scrape_task",
            Self::StoreResults => "store_results",
            Self::AddLinksToQueue => "add_links_to_queue",
            Self::SendCompleteTask => "send_complete_task",
            Self::QueryActiveUrl => "query_active_url",
        }
    }

    /// Returns all event tags
    pub fn all_tags() -> Vec<Self> {
        vec![
            Self::NewScrapeTask,
            Self::StoreResults,
            Self::AddLinksToQueue,
            Self::SendCompleteTask,
            Self::QueryActiveUrl,
        ]
    }
}

impl fmt::Display for EventTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A unit of work for the scheduler
///
/// `fire_at` is a relative delay in milliseconds while the event is owned by
/// its producer, and the absolute deadline (epoch milliseconds) once the
/// scheduler has accepted it. `0` means ready immediately.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    tag: EventTag,
    payload: Value,
    pub(crate) fire_at: u64,
}

impl Event {
    /// Creates an immediate event without a payload
    pub fn new(tag: EventTag) -> Self {
        Self {
            tag,
            payload: Value::Null,
            fire_at: 0,
        }
    }

    /// Creates an immediate event carrying a raw JSON payload
    pub fn with_value(tag: EventTag, payload: Value) -> Self {
        Self {
            tag,
            payload,
            fire_at: 0,
        }
    }

    /// Creates an immediate event carrying `body` serialized to JSON
    pub fn with_payload<T: Serialize>(tag: EventTag, body: &T) -> serde_json::Result<Self> {
        Ok(Self::with_value(tag, serde_json::to_value(body)?))
    }

    /// Sets a relative delay before the event becomes ready
    ///
    /// Takes effect when the event is (re-)enqueued.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.fire_at = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn tag(&self) -> EventTag {
        self.tag
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Deserializes the payload into a typed body
    pub fn payload_as<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.payload)
    }

    /// Delay (before enqueue) or deadline (after enqueue) in milliseconds
    pub fn fire_at(&self) -> u64 {
        self.fire_at
    }

    /// Returns true if the event may be dispatched at `now_ms`
    pub(crate) fn is_ready(&self, now_ms: u64) -> bool {
        self.fire_at == 0 || self.fire_at <= now_ms
    }
}
