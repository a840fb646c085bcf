//! Crawl workflow
//!
//! ```text
//! NewScrapeTask -> StoreResults -> AddLinksToQueue -> SendCompleteTask
//! ```
//!
//! Every step after the scrape is a single POST to a peer service. Failed
//! posts are retried every [`RETRY_DELAY`] with no limit.

mod contracts;
mod orchestrator;
mod peers;

pub use contracts::{
    GeneralSettings, LinkBatch, LinkEntry, PageMetadata, QueueLinksRequest, ScrapeTask,
    StorePageRequest, TaskCompletion,
};
pub use orchestrator::{
    query_active_url, WorkflowOrchestrator, COMPLETE_TASK_ROUTE, QUEUE_LINKS_ROUTE, RETRY_DELAY,
    STORE_PAGE_ROUTE,
};
pub use peers::{PeerClient, PeerClients, PeerResponse, AUTH_HEADER};
