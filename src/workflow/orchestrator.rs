//! Crawl lifecycle handlers
//!
//! Each handler performs one step and returns the next step as a follow-up
//! event. A failed peer call returns the same event with [`RETRY_DELAY`], so a
//! step is retried until the peer accepts it.

use crate::events::{
    Event, EventHandler, EventScheduler, EventTag, SchedulerHandle, SchedulerResult,
};
use crate::scraper::{PageScraper, ScrapeReport};
use crate::workflow::contracts::{
    LinkBatch, QueueLinksRequest, ScrapeTask, StorePageRequest, TaskCompletion,
};
use crate::workflow::peers::{PeerClient, PeerClients, PeerResponse};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Fixed delay before a failed step is retried
pub const RETRY_DELAY: Duration = Duration::from_secs(10);

pub const STORE_PAGE_ROUTE: &str = "/webpage/add";
pub const QUEUE_LINKS_ROUTE: &str = "/queue/add";
pub const COMPLETE_TASK_ROUTE: &str = "/task/complete_task";

/// Registers the crawl workflow with a scheduler
pub struct WorkflowOrchestrator {
    scraper: PageScraper,
    peers: PeerClients,
}

impl WorkflowOrchestrator {
    pub fn new(scraper: PageScraper, peers: PeerClients) -> Self {
        Self { scraper, peers }
    }

    /// Registers every workflow handler and the active-URL callback
    ///
    /// Handlers already registered for a tag are left in place.
    pub fn register(&self, scheduler: &mut EventScheduler) {
        scheduler.register(
            EventTag::NewScrapeTask,
            Arc::new(NewScrapeTaskHandler {
                scraper: self.scraper.clone(),
            }),
        );
        scheduler.register(
            EventTag::StoreResults,
            Arc::new(StoreResultsHandler {
                page_store: self.peers.page_store.clone(),
            }),
        );
        scheduler.register(
            EventTag::AddLinksToQueue,
            Arc::new(AddLinksToQueueHandler {
                processing_queue: self.peers.processing_queue.clone(),
            }),
        );
        scheduler.register(
            EventTag::SendCompleteTask,
            Arc::new(SendCompleteTaskHandler {
                big_broker: self.peers.big_broker.clone(),
            }),
        );

        let active = self.scraper.active_url_tracker();
        scheduler.register_callback(EventTag::QueryActiveUrl, move || {
            active.get().map(Value::String).unwrap_or(Value::Null)
        });
    }
}

/// Asks the scheduler which URL, if any, is being scraped
pub fn query_active_url(handle: &SchedulerHandle) -> SchedulerResult<Option<String>> {
    let answer = handle.query(EventTag::QueryActiveUrl)?;
    Ok(answer.as_str().map(str::to_string))
}

/// Decodes an event payload, logging and discarding malformed ones
fn decode<T: DeserializeOwned>(event: &Event) -> Option<T> {
    match event.payload_as() {
        Ok(body) => Some(body),
        Err(e) => {
            tracing::error!("Discarding '{}' event with malformed payload: {}", event.tag(), e);
            None
        }
    }
}

fn next_step<T: Serialize>(tag: EventTag, body: &T) -> Vec<Event> {
    match Event::with_payload(tag, body) {
        Ok(event) => vec![event],
        Err(e) => {
            tracing::error!("Failed to build '{}' event: {}", tag, e);
            Vec::new()
        }
    }
}

fn retry(event: Event, peer: &PeerClient, response: &PeerResponse) -> Vec<Event> {
    tracing::error!(
        "Posting '{}' to {} failed ({}), a retry will occur in {} seconds",
        event.tag(),
        peer.name(),
        response,
        RETRY_DELAY.as_secs()
    );
    vec![event.delayed(RETRY_DELAY)]
}

struct NewScrapeTaskHandler {
    scraper: PageScraper,
}

#[async_trait]
impl EventHandler for NewScrapeTaskHandler {
    async fn handle(&self, event: Event) -> Vec<Event> {
        let Some(task) = decode::<ScrapeTask>(&event) else {
            return Vec::new();
        };

        let report = self
            .scraper
            .scrape_page(&task.url, &task.task_type, &task.task_id)
            .await;

        next_step(EventTag::StoreResults, &report)
    }
}

struct StoreResultsHandler {
    page_store: PeerClient,
}

#[async_trait]
impl EventHandler for StoreResultsHandler {
    async fn handle(&self, event: Event) -> Vec<Event> {
        let Some(report) = decode::<ScrapeReport>(&event) else {
            return Vec::new();
        };

        tracing::info!("Posting results for task {} to the page store", report.task_id);
        let response = self
            .page_store
            .post(STORE_PAGE_ROUTE, &StorePageRequest::from(&report))
            .await;

        match response {
            PeerResponse::Ok | PeerResponse::AlreadyExists => {
                if !report.success {
                    tracing::info!("Task {} failed to scrape; nothing to queue", report.task_id);
                    return Vec::new();
                }

                next_step(
                    EventTag::AddLinksToQueue,
                    &LinkBatch {
                        links: report.links,
                        task_id: report.task_id,
                    },
                )
            }
            failure => retry(event, &self.page_store, &failure),
        }
    }
}

struct AddLinksToQueueHandler {
    processing_queue: PeerClient,
}

#[async_trait]
impl EventHandler for AddLinksToQueueHandler {
    async fn handle(&self, event: Event) -> Vec<Event> {
        let Some(batch) = decode::<LinkBatch>(&event) else {
            return Vec::new();
        };

        tracing::info!(
            "Adding {} links from task {} to the processing queue",
            batch.links.len(),
            batch.task_id
        );
        let response = self
            .processing_queue
            .post(QUEUE_LINKS_ROUTE, &QueueLinksRequest::from(&batch))
            .await;

        if !response.is_ok() {
            return retry(event, &self.processing_queue, &response);
        }

        next_step(
            EventTag::SendCompleteTask,
            &TaskCompletion {
                task_id: batch.task_id,
                is_successful: true,
            },
        )
    }
}

struct SendCompleteTaskHandler {
    big_broker: PeerClient,
}

#[async_trait]
impl EventHandler for SendCompleteTaskHandler {
    async fn handle(&self, event: Event) -> Vec<Event> {
        let Some(completion) = decode::<TaskCompletion>(&event) else {
            return Vec::new();
        };

        let response = self.big_broker.post(COMPLETE_TASK_ROUTE, &completion).await;

        if !response.is_ok() {
            return retry(event, &self.big_broker, &response);
        }

        tracing::info!("Task {} reported complete", completion.task_id);
        Vec::new()
    }
}
