//! Reconnect driver for the broker connection
//!
//! The supervisor owns the [`BrokerConnection`] on its own tokio task. Each
//! loop iteration runs one connect cycle, then either stops (explicit stop or
//! fatal closure) or sleeps for the backoff delay and rebuilds the connection
//! from a fresh transport.

use crate::broker::connection::{BrokerCommand, BrokerConnection, DeliveryHandler, StopMode};
use crate::broker::state::ConnectionPhase;
use crate::broker::transport::BrokerTransport;
use crate::broker::{BrokerError, BrokerResult};
use crate::config::MessagingConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Linear reconnect backoff
///
/// Yields `0, 2, 4, ... 60, 60` seconds for consecutive failures. A failure
/// that follows a cycle which reached consumption starts again at zero.
#[derive(Debug, Clone, Default)]
pub struct ReconnectBackoff {
    next: Duration,
}

impl ReconnectBackoff {
    pub const STEP: Duration = Duration::from_secs(2);
    pub const MAX_DELAY: Duration = Duration::from_secs(60);

    pub fn new() -> Self {
        Self::default()
    }

    /// Delay to wait before the next attempt
    ///
    /// # Arguments
    ///
    /// * `was_consuming` - Whether the failed cycle had reached consumption
    pub fn next_delay(&mut self, was_consuming: bool) -> Duration {
        if was_consuming {
            self.next = Duration::ZERO;
        }

        let delay = self.next;
        self.next = (self.next + Self::STEP).min(Self::MAX_DELAY);
        delay
    }
}

/// Cloneable access to the supervised connection
#[derive(Clone)]
pub struct BrokerHandle {
    commands: mpsc::UnboundedSender<BrokerCommand>,
    phase: watch::Receiver<ConnectionPhase>,
}

impl BrokerHandle {
    /// Current connection phase
    pub fn phase(&self) -> ConnectionPhase {
        *self.phase.borrow()
    }

    /// Publishes a message on the current connection
    ///
    /// Fails with [`BrokerError::NotConnected`] when the connection is not in a
    /// phase that allows publishing. Delivery is not confirmed.
    pub fn publish(
        &self,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        body: Vec<u8>,
    ) -> BrokerResult<()> {
        if !self.phase().allows_publish() {
            return Err(BrokerError::NotConnected);
        }

        self.send(BrokerCommand::Publish {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            body,
        })
    }

    /// Acknowledges a delivery left unacknowledged by the delivery handler
    pub fn acknowledge(&self, delivery_tag: u64) -> BrokerResult<()> {
        if self.phase() != ConnectionPhase::Consuming {
            return Err(BrokerError::NotConnected);
        }

        self.send(BrokerCommand::Ack { delivery_tag })
    }

    /// Waits until the connection reaches `phase`
    ///
    /// Returns an error if the supervisor has exited.
    pub async fn wait_for_phase(&mut self, phase: ConnectionPhase) -> BrokerResult<()> {
        loop {
            if *self.phase.borrow_and_update() == phase {
                return Ok(());
            }
            self.phase
                .changed()
                .await
                .map_err(|_| BrokerError::SupervisorExited)?;
        }
    }

    fn send(&self, command: BrokerCommand) -> BrokerResult<()> {
        self.commands
            .send(command)
            .map_err(|_| BrokerError::NotConnected)
    }
}

/// Control over a running supervisor task
pub struct SupervisorHandle {
    stop: watch::Sender<StopMode>,
    task: JoinHandle<BrokerResult<()>>,
}

impl SupervisorHandle {
    /// Requests a graceful stop: cancel consumption, close, exit
    ///
    /// Idempotent; repeated calls and calls after `shutdown()` do nothing.
    pub fn stop(&self) {
        let requested = self.stop.send_if_modified(|mode| {
            if *mode == StopMode::Running {
                *mode = StopMode::Graceful;
                true
            } else {
                false
            }
        });

        if requested {
            tracing::info!("Stopping broker connection");
        }
    }

    /// Forces the connection closed without a graceful cancel
    ///
    /// Idempotent and safe at any phase, including before consumption started.
    pub fn shutdown(&self) {
        let requested = self.stop.send_if_modified(|mode| {
            if *mode == StopMode::Forced {
                false
            } else {
                *mode = StopMode::Forced;
                true
            }
        });

        if requested {
            tracing::info!("Shutting down broker connection");
        }
    }

    /// Returns true once the supervisor task has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the supervisor to exit
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Stopped on request
    /// * `Err(BrokerError::FatalClosure)` - The broker reported an unrecoverable closure
    pub async fn join(self) -> BrokerResult<()> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(BrokerError::Transport(format!(
                "Supervisor task failed: {}",
                e
            ))),
        }
    }
}

/// Keeps a broker connection alive for the life of the process
pub struct ConnectionSupervisor;

impl ConnectionSupervisor {
    /// Starts supervising a connection on a new tokio task
    ///
    /// # Arguments
    ///
    /// * `topology` - Exchanges and queues declared on every connect
    /// * `handler` - Receives deliveries from the consumer queue
    /// * `new_transport` - Builds a fresh, unconnected transport for each cycle
    ///
    /// # Returns
    ///
    /// The control handle for the supervisor and a handle for publishing and
    /// acknowledging on the connection.
    pub fn spawn<T, F>(
        topology: Arc<MessagingConfig>,
        handler: Arc<dyn DeliveryHandler>,
        mut new_transport: F,
    ) -> (SupervisorHandle, BrokerHandle)
    where
        T: BrokerTransport + 'static,
        F: FnMut() -> T + Send + 'static,
    {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(StopMode::Running);
        let (phase_tx, phase_rx) = watch::channel(ConnectionPhase::Disconnected);

        let connection =
            BrokerConnection::new(new_transport(), topology, handler, Arc::new(phase_tx));

        let task = tokio::spawn(supervise(
            connection,
            new_transport,
            commands_rx,
            stop_rx,
        ));

        (
            SupervisorHandle {
                stop: stop_tx,
                task,
            },
            BrokerHandle {
                commands: commands_tx,
                phase: phase_rx,
            },
        )
    }
}

async fn supervise<T, F>(
    mut connection: BrokerConnection<T>,
    mut new_transport: F,
    mut commands: mpsc::UnboundedReceiver<BrokerCommand>,
    mut stop: watch::Receiver<StopMode>,
) -> BrokerResult<()>
where
    T: BrokerTransport,
    F: FnMut() -> T,
{
    let mut backoff = ReconnectBackoff::new();

    loop {
        connection.run(&mut commands, &mut stop).await;

        if connection.is_fatal() {
            let (code, text) = connection
                .state()
                .close_reason()
                .map(|reason| (reason.code, reason.text.clone()))
                .unwrap_or_default();
            tracing::error!("Broker connection failed permanently, not reconnecting");
            return Err(BrokerError::FatalClosure { code, text });
        }

        if stop.borrow().is_requested() || !connection.should_reconnect() {
            tracing::info!("Broker supervisor stopped");
            return Ok(());
        }

        let delay = backoff.next_delay(connection.was_consuming());
        tracing::info!("Reconnecting to broker in {}s", delay.as_secs());

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stop.changed() => {
                tracing::info!("Broker supervisor stopped during backoff");
                return Ok(());
            }
        }

        connection = connection.reset_for_reconnect(new_transport());
    }
}
