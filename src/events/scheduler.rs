//! Deferred/immediate event scheduler
//!
//! The scheduler owns the handler tables and the pending list. It is driven by
//! a host tick loop: each call to [`EventScheduler::dispatch_one`] runs at most
//! one ready event to completion, then returns so the host can interleave other
//! work (handoffs, shutdown checks) between ticks.
//!
//! Other execution contexts never touch the pending list directly. They submit
//! events through a [`SchedulerHandle`], which forwards them over a channel that
//! the tick loop drains with [`EventScheduler::receive_handoffs`].

use crate::events::clock::{Clock, SystemClock};
use crate::events::event::{Event, EventTag};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors raised by the scheduler
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("No handler registered for event '{0}'")]
    UnknownEvent(EventTag),

    #[error("No callback handler registered for event '{0}'")]
    UnknownCallback(EventTag),

    #[error("Scheduler is no longer receiving events")]
    HandoffClosed,
}

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Fire-and-forget event handler
///
/// The returned events are follow-ups (the next workflow step, or the same
/// event delayed for a retry). The scheduler enqueues them as soon as the
/// handler completes.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Event) -> Vec<Event>;
}

/// Synchronous query handler
pub type CallbackHandler = Arc<dyn Fn() -> Value + Send + Sync>;

/// Adapts an async closure into an [`EventHandler`]
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = Vec<Event>> + Send + 'static,
{
    async fn handle(&self, event: Event) -> Vec<Event> {
        (self.0)(event).await
    }
}

/// Wraps `f` as a shareable event handler
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Vec<Event>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Tables readable from any context
#[derive(Default)]
struct SharedTables {
    handler_tags: RwLock<HashSet<EventTag>>,
    callbacks: RwLock<HashMap<EventTag, CallbackHandler>>,
}

impl SharedTables {
    fn has_handler(&self, tag: EventTag) -> bool {
        self.handler_tags
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&tag)
    }

    fn query(&self, tag: EventTag) -> SchedulerResult<Value> {
        let callback = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&tag)
            .cloned()
            .ok_or(SchedulerError::UnknownCallback(tag))?;

        Ok(callback())
    }
}

/// Single-threaded cooperative event scheduler
pub struct EventScheduler {
    handlers: HashMap<EventTag, Arc<dyn EventHandler>>,
    shared: Arc<SharedTables>,
    pending: VecDeque<Event>,
    clock: Arc<dyn Clock>,
    inbox_tx: mpsc::UnboundedSender<Event>,
    inbox_rx: mpsc::UnboundedReceiver<Event>,
}

impl Default for EventScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventScheduler {
    /// Creates a scheduler using the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates a scheduler reading deadlines from `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();

        Self {
            handlers: HashMap::new(),
            shared: Arc::new(SharedTables::default()),
            pending: VecDeque::new(),
            clock,
            inbox_tx,
            inbox_rx,
        }
    }

    /// Registers the fire-and-forget handler for `tag`
    ///
    /// The first registration wins; later calls are ignored and return `false`.
    pub fn register(&mut self, tag: EventTag, handler: Arc<dyn EventHandler>) -> bool {
        if self.handlers.contains_key(&tag) {
            tracing::debug!("Handler for '{}' already registered, ignoring", tag);
            return false;
        }

        self.handlers.insert(tag, handler);
        self.shared
            .handler_tags
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tag);
        true
    }

    /// Registers the callback handler for `tag`
    ///
    /// The first registration wins; later calls are ignored and return `false`.
    pub fn register_callback<F>(&mut self, tag: EventTag, callback: F) -> bool
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        let mut callbacks = self
            .shared
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if callbacks.contains_key(&tag) {
            tracing::debug!("Callback for '{}' already registered, ignoring", tag);
            return false;
        }

        callbacks.insert(tag, Arc::new(callback));
        true
    }

    /// Returns true if a fire-and-forget handler exists for `tag`
    pub fn is_registered(&self, tag: EventTag) -> bool {
        self.handlers.contains_key(&tag)
    }

    /// Adds an event to the pending list
    ///
    /// A non-zero `fire_at` is treated as a delay relative to now and stored as
    /// an absolute deadline.
    pub fn enqueue(&mut self, mut event: Event) -> SchedulerResult<()> {
        if !self.handlers.contains_key(&event.tag()) {
            tracing::error!("Rejected event '{}': no handler registered", event.tag());
            return Err(SchedulerError::UnknownEvent(event.tag()));
        }

        if event.fire_at > 0 {
            event.fire_at = self.clock.now_millis().saturating_add(event.fire_at);
        }

        tracing::trace!("Queued '{}' (fire_at={})", event.tag(), event.fire_at);
        self.pending.push_back(event);
        Ok(())
    }

    /// Dispatches the first ready event, if any
    ///
    /// Scans the pending list in insertion order, removes the first event whose
    /// deadline has passed and awaits its handler to completion. The handler's
    /// follow-up events are then enqueued. At most one event is handled per
    /// call.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(tag))` - An event with `tag` was handled
    /// * `Ok(None)` - Nothing was ready
    /// * `Err(SchedulerError)` - A follow-up event had no registered handler
    pub async fn dispatch_one(&mut self) -> SchedulerResult<Option<EventTag>> {
        let now = self.clock.now_millis();

        let Some(index) = self.pending.iter().position(|event| event.is_ready(now)) else {
            return Ok(None);
        };
        let Some(mut event) = self.pending.remove(index) else {
            return Ok(None);
        };

        let tag = event.tag();
        let handler = self
            .handlers
            .get(&tag)
            .cloned()
            .ok_or(SchedulerError::UnknownEvent(tag))?;

        // Back in the handler's hands the event is immediate again; a retry
        // sets a fresh relative delay.
        event.fire_at = 0;

        tracing::debug!("Dispatching '{}'", tag);
        let follow_ups = handler.handle(event).await;

        let mut first_error = None;
        for follow_up in follow_ups {
            if let Err(e) = self.enqueue(follow_up) {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(Some(tag)),
        }
    }

    /// Invokes the callback handler for `tag` and returns its answer
    pub fn query(&self, tag: EventTag) -> SchedulerResult<Value> {
        self.shared.query(tag)
    }

    /// Moves events submitted through handles into the pending list
    ///
    /// Returns the number of events accepted.
    pub fn receive_handoffs(&mut self) -> usize {
        let mut accepted = 0;

        while let Ok(event) = self.inbox_rx.try_recv() {
            match self.enqueue(event) {
                Ok(()) => accepted += 1,
                Err(e) => tracing::error!("Dropped handed-off event: {}", e),
            }
        }

        accepted
    }

    /// Drops every pending event
    pub fn clear(&mut self) {
        if !self.pending.is_empty() {
            tracing::info!("Discarding {} pending events", self.pending.len());
        }
        self.pending.clear();
    }

    /// Returns the pending events in insertion order
    pub fn pending(&self) -> impl Iterator<Item = &Event> {
        self.pending.iter()
    }

    /// Returns the number of pending events
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns whether no events are pending
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Returns a handle for submitting events and queries from other contexts
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            inbox: self.inbox_tx.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Thread-safe entry point into a scheduler owned by another context
#[derive(Clone)]
pub struct SchedulerHandle {
    inbox: mpsc::UnboundedSender<Event>,
    shared: Arc<SharedTables>,
}

impl SchedulerHandle {
    /// Hands `event` to the scheduler's tick loop
    ///
    /// Fails immediately if no handler is registered for the event's tag.
    pub fn submit(&self, event: Event) -> SchedulerResult<()> {
        if !self.shared.has_handler(event.tag()) {
            tracing::error!("Rejected event '{}': no handler registered", event.tag());
            return Err(SchedulerError::UnknownEvent(event.tag()));
        }

        self.inbox
            .send(event)
            .map_err(|_| SchedulerError::HandoffClosed)
    }

    /// Invokes the callback handler for `tag` and returns its answer
    pub fn query(&self, tag: EventTag) -> SchedulerResult<Value> {
        self.shared.query(tag)
    }
}
