//! Broker connection state machine
//!
//! One [`BrokerConnection`] drives one connect cycle:
//!
//! ```text
//! Disconnected -> Connecting -> ChannelOpen -> Declaring -> SettingQos -> Consuming
//!                                                                            |
//!                                  Disconnected <- Closing <-----------------+
//! ```
//!
//! [`BrokerConnection::run`] returns once the cycle is back in `Disconnected`.
//! The supervisor then inspects the flags and decides whether to rebuild the
//! connection with [`BrokerConnection::reset_for_reconnect`].

use crate::broker::state::{ConnectionPhase, ConnectionState};
use crate::broker::transport::{BrokerTransport, CloseReason, Delivery, TransportEvent};
use crate::broker::{BrokerError, BrokerResult};
use crate::config::MessagingConfig;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Messages in flight per consumer
pub const PREFETCH_COUNT: u16 = 1;

/// Outcome of handling a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Acknowledge immediately
    Acknowledge,
    /// Leave unacknowledged; the caller acknowledges later through a handle
    Leave,
}

/// Consumer-side handling of deliveries
pub trait DeliveryHandler: Send + Sync {
    fn on_delivery(&self, delivery: &Delivery) -> Disposition;
}

/// Request sent to the connection from other contexts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerCommand {
    Publish {
        exchange: String,
        routing_key: String,
        body: Vec<u8>,
    },
    Ack {
        delivery_tag: u64,
    },
}

/// Shutdown request observed by a running connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopMode {
    #[default]
    Running,
    /// Cancel the consumer, then close
    Graceful,
    /// Close without cancelling
    Forced,
}

impl StopMode {
    pub fn is_requested(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// A single connect cycle against the broker
pub struct BrokerConnection<T> {
    transport: T,
    topology: Arc<MessagingConfig>,
    handler: Arc<dyn DeliveryHandler>,
    state: ConnectionState,
    phase_tx: Arc<watch::Sender<ConnectionPhase>>,
    consumer_tag: Option<String>,
}

impl<T: BrokerTransport> BrokerConnection<T> {
    /// Creates a disconnected connection
    ///
    /// # Arguments
    ///
    /// * `transport` - Unconnected broker client
    /// * `topology` - Exchanges and queues declared when the channel opens
    /// * `handler` - Receives each delivery from the consumer queue
    /// * `phase_tx` - Publishes phase changes to [`crate::broker::BrokerHandle`]s
    pub fn new(
        transport: T,
        topology: Arc<MessagingConfig>,
        handler: Arc<dyn DeliveryHandler>,
        phase_tx: Arc<watch::Sender<ConnectionPhase>>,
    ) -> Self {
        phase_tx.send_replace(ConnectionPhase::Disconnected);

        Self {
            transport,
            topology,
            handler,
            state: ConnectionState::new(),
            phase_tx,
            consumer_tag: None,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.state.phase()
    }

    pub fn is_fatal(&self) -> bool {
        self.state.is_fatal()
    }

    pub fn was_consuming(&self) -> bool {
        self.state.was_consuming()
    }

    pub fn should_reconnect(&self) -> bool {
        self.state.should_reconnect()
    }

    /// Discards this cycle and returns a fresh `Disconnected` connection
    ///
    /// Only the fatal flag survives; everything else, including the transport,
    /// is replaced.
    pub fn reset_for_reconnect(self, transport: T) -> Self {
        let state = self.state.reset_for_reconnect();
        self.phase_tx.send_replace(state.phase());

        Self {
            transport,
            topology: self.topology,
            handler: self.handler,
            state,
            phase_tx: self.phase_tx,
            consumer_tag: None,
        }
    }

    fn set_phase(&mut self, next: ConnectionPhase) -> BrokerResult<()> {
        self.state.transition(next)?;
        self.phase_tx.send_replace(next);
        tracing::debug!("Broker connection {}", next);
        Ok(())
    }

    /// Runs one connect cycle until the connection is `Disconnected`
    ///
    /// Returns immediately if a stop was already requested or the connection
    /// previously hit a fatal closure.
    pub async fn run(
        &mut self,
        commands: &mut mpsc::UnboundedReceiver<BrokerCommand>,
        stop: &mut watch::Receiver<StopMode>,
    ) {
        if self.state.is_fatal() || stop.borrow().is_requested() {
            return;
        }

        let stale = discard_stale_commands(commands);
        if stale > 0 {
            tracing::warn!("Discarded {} broker commands from a previous connection", stale);
        }

        if let Err(e) = self.set_phase(ConnectionPhase::Connecting) {
            tracing::error!("Cannot start connect cycle: {}", e);
            return;
        }

        let opened = tokio::select! {
            result = self.open() => Some(result),
            _ = stop.changed() => None,
        };

        match opened {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                self.fail(e).await;
                return;
            }
            None => {
                let mode = stop_mode(stop);
                tracing::info!("Stop requested while connecting");
                self.state.request_close();
                self.close(mode).await;
                return;
            }
        }

        tracing::info!("Consuming from '{}'", self.topology.consumer.name);
        self.consume(commands, stop).await;
    }

    /// Connect, declare topology, set prefetch and start consuming
    async fn open(&mut self) -> BrokerResult<()> {
        self.transport.connect().await?;
        self.transport.open_channel().await?;
        self.set_phase(ConnectionPhase::ChannelOpen)?;

        self.set_phase(ConnectionPhase::Declaring)?;
        self.declare_topology().await?;

        self.set_phase(ConnectionPhase::SettingQos)?;
        self.transport.set_prefetch(PREFETCH_COUNT).await?;

        let tag = self
            .transport
            .start_consuming(&self.topology.consumer.name)
            .await?;
        self.consumer_tag = Some(tag);
        self.set_phase(ConnectionPhase::Consuming)
    }

    async fn declare_topology(&mut self) -> BrokerResult<()> {
        let topology = Arc::clone(&self.topology);

        for exchange in &topology.exchanges {
            self.transport.declare_exchange(exchange).await?;
        }

        for queue in std::iter::once(&topology.consumer).chain(&topology.publishers) {
            self.transport.declare_queue(queue).await?;

            if let Some(exchange) = &queue.exchange {
                for routing_key in &queue.routing_keys {
                    self.transport
                        .bind_queue(&queue.name, exchange, routing_key)
                        .await?;
                }
            }
        }

        Ok(())
    }

    async fn consume(
        &mut self,
        commands: &mut mpsc::UnboundedReceiver<BrokerCommand>,
        stop: &mut watch::Receiver<StopMode>,
    ) {
        loop {
            tokio::select! {
                event = self.transport.next_event() => match event {
                    TransportEvent::Delivery(delivery) => self.deliver(delivery).await,
                    TransportEvent::Closed(reason) => {
                        self.closed_by_peer(reason).await;
                        return;
                    }
                },
                command = commands.recv() => match command {
                    Some(command) => self.execute(command).await,
                    None => {
                        tracing::info!("All broker handles dropped, closing");
                        self.state.request_close();
                        self.close(StopMode::Graceful).await;
                        return;
                    }
                },
                _ = stop.changed() => {
                    let mode = stop_mode(stop);
                    self.state.request_close();
                    self.close(mode).await;
                    return;
                }
            }
        }
    }

    async fn deliver(&mut self, delivery: Delivery) {
        tracing::debug!(
            "Delivery {} from '{}' ({} bytes)",
            delivery.delivery_tag,
            delivery.routing_key,
            delivery.body.len()
        );

        if self.handler.on_delivery(&delivery) == Disposition::Acknowledge {
            if let Err(e) = self.acknowledge(delivery.delivery_tag).await {
                tracing::warn!("Failed to acknowledge delivery {}: {}", delivery.delivery_tag, e);
            }
        }
    }

    async fn execute(&mut self, command: BrokerCommand) {
        let result = match command {
            BrokerCommand::Publish {
                exchange,
                routing_key,
                body,
            } => self.publish(&exchange, &routing_key, &body).await,
            BrokerCommand::Ack { delivery_tag } => self.acknowledge(delivery_tag).await,
        };

        if let Err(e) = result {
            tracing::warn!("Broker command failed: {}", e);
        }
    }

    /// Hands a message to the transport
    ///
    /// Fails with [`BrokerError::NotConnected`] unless the channel is open.
    pub async fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
    ) -> BrokerResult<()> {
        if !self.phase().allows_publish() {
            return Err(BrokerError::NotConnected);
        }
        self.transport.publish(exchange, routing_key, body).await
    }

    /// Acknowledges one delivery; only valid while consuming
    pub async fn acknowledge(&mut self, delivery_tag: u64) -> BrokerResult<()> {
        if self.phase() != ConnectionPhase::Consuming {
            return Err(BrokerError::NotConnected);
        }
        self.transport.ack(delivery_tag).await
    }

    /// The broker or the network ended the connection
    ///
    /// Goes through `Closing` and closes the transport so the client connection
    /// is released before the next cycle.
    async fn closed_by_peer(&mut self, reason: CloseReason) {
        if reason.is_fatal() {
            tracing::error!("Broker closed the channel: {}", reason);
        } else {
            tracing::warn!("Closing after peer closure: {}", reason);
        }

        self.state.record_closure(reason);

        if let Err(e) = self.set_phase(ConnectionPhase::Closing) {
            tracing::debug!("{}", e);
        }
        if let Err(e) = self.transport.close().await {
            tracing::debug!("Close after peer closure: {}", e);
        }
        self.drop_to_disconnected();
    }

    /// An operation failed before or during setup
    async fn fail(&mut self, error: BrokerError) {
        let reason = match error {
            BrokerError::ChannelClosed(reason) => reason,
            other => CloseReason::transport(other.to_string()),
        };

        if reason.is_fatal() {
            tracing::error!("Broker rejected topology: {}", reason);
        } else {
            tracing::warn!("Broker connection failed: {}", reason);
        }

        self.state.record_closure(reason);

        if let Err(e) = self.transport.close().await {
            tracing::debug!("Close after failure: {}", e);
        }
        self.drop_to_disconnected();
    }

    /// Issues the close sequence for a requested stop
    async fn close(&mut self, mode: StopMode) {
        if self.phase() == ConnectionPhase::Connecting {
            if let Err(e) = self.transport.close().await {
                tracing::debug!("Close while connecting: {}", e);
            }
            self.drop_to_disconnected();
            return;
        }

        if let Err(e) = self.set_phase(ConnectionPhase::Closing) {
            tracing::debug!("{}", e);
        }

        if mode == StopMode::Graceful {
            if let Some(tag) = self.consumer_tag.take() {
                if let Err(e) = self.transport.cancel_consumer(&tag).await {
                    tracing::warn!("Failed to cancel consumer '{}': {}", tag, e);
                }
            }
        }

        if let Err(e) = self.transport.close().await {
            tracing::warn!("Failed to close broker connection: {}", e);
        }

        self.drop_to_disconnected();
        tracing::info!("Broker connection closed");
    }

    fn drop_to_disconnected(&mut self) {
        self.consumer_tag = None;
        if self.phase() != ConnectionPhase::Disconnected {
            if let Err(e) = self.set_phase(ConnectionPhase::Disconnected) {
                tracing::error!("{}", e);
            }
        }
    }
}

fn stop_mode(stop: &watch::Receiver<StopMode>) -> StopMode {
    match *stop.borrow() {
        StopMode::Running => StopMode::Forced,
        mode => mode,
    }
}

fn discard_stale_commands(commands: &mut mpsc::UnboundedReceiver<BrokerCommand>) -> usize {
    let mut discarded = 0;
    while commands.try_recv().is_ok() {
        discarded += 1;
    }
    discarded
}
