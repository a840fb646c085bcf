//! Scripted in-memory broker for connection and supervisor tests

use crate::broker::connection::{DeliveryHandler, Disposition};
use crate::broker::transport::{BrokerTransport, CloseReason, Delivery, TransportEvent};
use crate::broker::{BrokerError, BrokerResult};
use crate::config::{
    ConnectionSettings, ExchangeSettings, ExchangeType, MessagingConfig, QueueSettings,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub(crate) fn sample_topology() -> MessagingConfig {
    MessagingConfig {
        connection: ConnectionSettings {
            host: "localhost".to_string(),
            port: 5672,
            username: "guest".to_string(),
            password: "guest".to_string(),
        },
        exchanges: vec![ExchangeSettings {
            name: "crawl".to_string(),
            exchange_type: ExchangeType::Topic,
        }],
        consumer: QueueSettings::new("scrape-tasks", true)
            .bound_to("crawl", vec!["scrape.new".to_string()]),
        publishers: vec![QueueSettings::new("scrape-results", false)],
    }
}

#[derive(Default)]
struct MockState {
    refused_connections: usize,
    declare_failure: Option<CloseReason>,
    cycles: VecDeque<Vec<TransportEvent>>,
    calls: Vec<String>,
    connect_attempts: usize,
}

/// Shared script and call log; every transport it hands out records here
#[derive(Clone, Default)]
pub(crate) struct MockBroker {
    state: Arc<Mutex<MockState>>,
}

impl MockBroker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Refuses the next `count` connection attempts
    pub(crate) fn refuse_connections(&self, count: usize) {
        self.state.lock().unwrap().refused_connections = count;
    }

    /// Fails every queue declare with `reason`
    pub(crate) fn fail_declare(&self, reason: CloseReason) {
        self.state.lock().unwrap().declare_failure = Some(reason);
    }

    /// Events delivered by the next successful connection, in order
    ///
    /// Once a cycle's events run out the consumer waits forever.
    pub(crate) fn script_cycle(&self, events: Vec<TransportEvent>) {
        self.state.lock().unwrap().cycles.push_back(events);
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn connect_attempts(&self) -> usize {
        self.state.lock().unwrap().connect_attempts
    }

    pub(crate) fn transport(&self) -> MockTransport {
        MockTransport {
            broker: self.clone(),
            events: VecDeque::new(),
        }
    }

    fn record(&self, call: impl Into<String>) {
        self.state.lock().unwrap().calls.push(call.into());
    }
}

pub(crate) struct MockTransport {
    broker: MockBroker,
    events: VecDeque<TransportEvent>,
}

#[async_trait]
impl BrokerTransport for MockTransport {
    async fn connect(&mut self) -> BrokerResult<()> {
        let mut state = self.broker.state.lock().unwrap();
        state.calls.push("connect".to_string());
        state.connect_attempts += 1;

        if state.refused_connections > 0 {
            state.refused_connections -= 1;
            return Err(BrokerError::Transport("connection refused".to_string()));
        }

        self.events = state.cycles.pop_front().unwrap_or_default().into();
        Ok(())
    }

    async fn open_channel(&mut self) -> BrokerResult<()> {
        self.broker.record("open_channel");
        Ok(())
    }

    async fn declare_exchange(&mut self, exchange: &ExchangeSettings) -> BrokerResult<()> {
        self.broker
            .record(format!("declare_exchange {}", exchange.name));
        Ok(())
    }

    async fn declare_queue(&mut self, queue: &QueueSettings) -> BrokerResult<()> {
        self.broker.record(format!(
            "declare_queue {} durable={}",
            queue.name, queue.durable
        ));

        let failure = self.broker.state.lock().unwrap().declare_failure.clone();
        match failure {
            Some(reason) => Err(BrokerError::ChannelClosed(reason)),
            None => Ok(()),
        }
    }

    async fn bind_queue(
        &mut self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> BrokerResult<()> {
        self.broker
            .record(format!("bind {} {} {}", queue, exchange, routing_key));
        Ok(())
    }

    async fn set_prefetch(&mut self, count: u16) -> BrokerResult<()> {
        self.broker.record(format!("prefetch {}", count));
        Ok(())
    }

    async fn start_consuming(&mut self, queue: &str) -> BrokerResult<String> {
        self.broker.record(format!("consume {}", queue));
        Ok("rummage-test".to_string())
    }

    async fn next_event(&mut self) -> TransportEvent {
        match self.events.pop_front() {
            Some(event) => event,
            None => std::future::pending().await,
        }
    }

    async fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        _body: &[u8],
    ) -> BrokerResult<()> {
        self.broker
            .record(format!("publish {} {}", exchange, routing_key));
        Ok(())
    }

    async fn ack(&mut self, delivery_tag: u64) -> BrokerResult<()> {
        self.broker.record(format!("ack {}", delivery_tag));
        Ok(())
    }

    async fn cancel_consumer(&mut self, consumer_tag: &str) -> BrokerResult<()> {
        self.broker.record(format!("cancel {}", consumer_tag));
        Ok(())
    }

    async fn close(&mut self) -> BrokerResult<()> {
        self.broker.record("close");
        Ok(())
    }
}

/// Delivery handler that remembers what it saw
pub(crate) struct RecordingHandler {
    disposition: Disposition,
    seen: Mutex<Vec<Delivery>>,
}

impl RecordingHandler {
    pub(crate) fn new(disposition: Disposition) -> Self {
        Self {
            disposition,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn delivery_tags(&self) -> Vec<u64> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|d| d.delivery_tag)
            .collect()
    }
}

impl DeliveryHandler for RecordingHandler {
    fn on_delivery(&self, delivery: &Delivery) -> Disposition {
        self.seen.lock().unwrap().push(delivery.clone());
        self.disposition
    }
}
