//! Event scheduling for the crawl workflow
//!
//! # Components
//!
//! - `Event` / `EventTag`: a tagged unit of work with an optional fire time
//! - `EventScheduler`: handler tables plus the ordered pending list
//! - `SchedulerHandle`: cross-context submission and callback queries
//! - `Clock`: deadline time source (system or manually advanced)

mod clock;
mod event;
mod scheduler;

pub use clock::{Clock, ManualClock, SystemClock};
pub use event::{Event, EventTag};
pub use scheduler::{
    handler_fn, CallbackHandler, EventHandler, EventScheduler, FnHandler, SchedulerError,
    SchedulerHandle, SchedulerResult,
};
