//! Scrape node host
//!
//! Wires the pieces together and runs the tick loop:
//!
//! 1. The broker supervisor consumes task messages on its own task and hands
//!    them to the scheduler through a [`SchedulerHandle`].
//! 2. The job API accepts tasks over HTTP the same way.
//! 3. The tick loop moves handed-off events into the scheduler, dispatches at
//!    most one ready event, then sleeps for the tick interval.

mod api;
mod delivery;

pub use api::{router, JobApiState};
pub use delivery::TaskDeliveryHandler;

use crate::broker::{AmqpTransport, ConnectionSupervisor, SupervisorHandle};
use crate::config::Config;
use crate::events::{EventScheduler, EventTag, SchedulerHandle, SchedulerResult};
use crate::scraper::PageScraper;
use crate::workflow::{PeerClients, WorkflowOrchestrator};
use crate::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// A configured scrape node
pub struct ScrapeNode {
    config: Config,
    scheduler: EventScheduler,
}

impl ScrapeNode {
    /// Builds the scheduler and registers the crawl workflow
    pub fn new(config: Config) -> Result<Self> {
        let scraper = PageScraper::new(&config.scraper)?;
        let peers = PeerClients::from_config(&config)?;

        let mut scheduler = EventScheduler::new();
        WorkflowOrchestrator::new(scraper, peers).register(&mut scheduler);

        Ok(Self { config, scheduler })
    }

    pub fn scheduler(&self) -> &EventScheduler {
        &self.scheduler
    }

    pub fn scheduler_handle(&self) -> SchedulerHandle {
        self.scheduler.handle()
    }

    /// One tick: accept handed-off events, then dispatch at most one
    pub async fn tick(&mut self) -> SchedulerResult<Option<EventTag>> {
        self.scheduler.receive_handoffs();
        self.scheduler.dispatch_one().await
    }

    /// Runs the node until Ctrl-C or a fatal broker closure
    pub async fn run(mut self) -> Result<()> {
        let topology = Arc::new(self.config.messaging.clone());
        let connection = self.config.messaging.connection.clone();
        let delivery_handler = Arc::new(TaskDeliveryHandler::new(self.scheduler.handle()));

        tracing::info!(
            "Connecting to broker at {}:{}",
            connection.host,
            connection.port
        );
        let (supervisor, _broker) =
            ConnectionSupervisor::spawn(topology, delivery_handler, move || {
                AmqpTransport::new(&connection)
            });

        let listener = tokio::net::TcpListener::bind(&self.config.node.listen_address).await?;
        tracing::info!("Job API listening on {}", self.config.node.listen_address);
        let app = router(JobApiState::new(
            &self.config.node.auth_key,
            self.scheduler.handle(),
        ));
        let api = tokio::spawn(async move { axum::serve(listener, app).await });

        let loop_result = self.tick_loop(&supervisor).await;

        api.abort();
        supervisor.stop();
        let broker_result = supervisor.join().await;
        self.scheduler.clear();

        loop_result?;
        broker_result?;
        tracing::info!("Scrape node stopped");
        Ok(())
    }

    async fn tick_loop(&mut self, supervisor: &SupervisorHandle) -> Result<()> {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        };
        self.run_ticks(ctrl_c, || supervisor.is_finished()).await
    }

    /// Ticks until `shutdown` resolves or `supervisor_done` reports true
    ///
    /// Shutdown is raced against the tick itself as well as the sleep between
    /// ticks.
    async fn run_ticks<F, D>(&mut self, shutdown: F, supervisor_done: D) -> Result<()>
    where
        F: Future<Output = ()>,
        D: Fn() -> bool,
    {
        let tick_interval = Duration::from_millis(self.config.node.tick_interval_ms);
        tokio::pin!(shutdown);

        loop {
            if supervisor_done() {
                tracing::warn!("Broker supervisor exited, stopping node");
                return Ok(());
            }

            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested during a tick");
                    return Ok(());
                }
                result = self.tick() => {
                    result?;
                }
            }

            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested");
                    return Ok(());
                }
                _ = tokio::time::sleep(tick_interval) => {}
            }
        }
    }
}
