//! Turns broker deliveries into scrape events

use crate::broker::{Delivery, DeliveryHandler, Disposition};
use crate::events::{Event, EventTag, SchedulerError, SchedulerHandle};
use crate::workflow::ScrapeTask;

/// Hands scrape tasks from the consumer queue to the scheduler
pub struct TaskDeliveryHandler {
    scheduler: SchedulerHandle,
}

impl TaskDeliveryHandler {
    pub fn new(scheduler: SchedulerHandle) -> Self {
        Self { scheduler }
    }
}

impl DeliveryHandler for TaskDeliveryHandler {
    fn on_delivery(&self, delivery: &Delivery) -> Disposition {
        let task: ScrapeTask = match serde_json::from_slice(&delivery.body) {
            Ok(task) => task,
            Err(e) => {
                // Redelivery would fail the same way
                tracing::error!(
                    "Dropping malformed task message {}: {}",
                    delivery.delivery_tag,
                    e
                );
                return Disposition::Acknowledge;
            }
        };

        let event = match Event::with_payload(EventTag::NewScrapeTask, &task) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!("Failed to build scrape event for {}: {}", task.task_id, e);
                return Disposition::Acknowledge;
            }
        };

        match self.scheduler.submit(event) {
            Ok(()) => {
                tracing::info!("Received task {} for {}", task.task_id, task.url);
                Disposition::Acknowledge
            }
            Err(SchedulerError::HandoffClosed) => {
                tracing::warn!("Scheduler stopped; leaving task {} for redelivery", task.task_id);
                Disposition::Leave
            }
            Err(e) => {
                tracing::error!("Failed to schedule task {}: {}", task.task_id, e);
                Disposition::Acknowledge
            }
        }
    }
}
