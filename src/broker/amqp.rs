//! AMQP 0-9-1 transport backed by `lapin`

use crate::broker::transport::{BrokerTransport, CloseReason, Delivery, TransportEvent};
use crate::broker::{BrokerError, BrokerResult};
use crate::config::{ConnectionSettings, ExchangeSettings, ExchangeType, QueueSettings};
use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions,
    BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::uri::{AMQPAuthority, AMQPUri, AMQPUserInfo};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};

const NORMAL_SHUTDOWN: u16 = 200;

/// Live connection to an AMQP broker
pub struct AmqpTransport {
    uri: AMQPUri,
    consumer_tag: String,
    connection: Option<Connection>,
    channel: Option<Channel>,
    consumer: Option<Consumer>,
}

impl AmqpTransport {
    /// Creates an unconnected transport for `settings`
    pub fn new(settings: &ConnectionSettings) -> Self {
        Self {
            uri: broker_uri(settings),
            consumer_tag: format!("rummage-{}", std::process::id()),
            connection: None,
            channel: None,
            consumer: None,
        }
    }

    fn channel(&self) -> BrokerResult<&Channel> {
        self.channel.as_ref().ok_or(BrokerError::NotConnected)
    }
}

/// Builds the broker address on the default vhost
///
/// Credentials are passed through as fields rather than formatted into a URI
/// string, so reserved characters in them need no escaping.
fn broker_uri(settings: &ConnectionSettings) -> AMQPUri {
    AMQPUri {
        authority: AMQPAuthority {
            userinfo: AMQPUserInfo {
                username: settings.username.clone(),
                password: settings.password.clone(),
            },
            host: settings.host.clone(),
            port: settings.port,
        },
        vhost: "/".to_string(),
        ..AMQPUri::default()
    }
}

/// Maps a client error to a broker closure when the broker supplied a reason
fn classify(err: lapin::Error) -> BrokerError {
    match &err {
        lapin::Error::ProtocolError(amqp) => {
            BrokerError::ChannelClosed(CloseReason::new(amqp.get_id(), err.to_string()))
        }
        _ => BrokerError::Transport(err.to_string()),
    }
}

fn exchange_kind(exchange_type: ExchangeType) -> ExchangeKind {
    match exchange_type {
        ExchangeType::Direct => ExchangeKind::Direct,
        ExchangeType::Fanout => ExchangeKind::Fanout,
        ExchangeType::Topic => ExchangeKind::Topic,
        ExchangeType::Headers => ExchangeKind::Headers,
    }
}

#[async_trait]
impl BrokerTransport for AmqpTransport {
    async fn connect(&mut self) -> BrokerResult<()> {
        let connection = Connection::connect_uri(self.uri.clone(), ConnectionProperties::default())
            .await
            .map_err(classify)?;
        self.connection = Some(connection);
        Ok(())
    }

    async fn open_channel(&mut self) -> BrokerResult<()> {
        let connection = self.connection.as_ref().ok_or(BrokerError::NotConnected)?;
        let channel = connection.create_channel().await.map_err(classify)?;
        self.channel = Some(channel);
        Ok(())
    }

    async fn declare_exchange(&mut self, exchange: &ExchangeSettings) -> BrokerResult<()> {
        self.channel()?
            .exchange_declare(
                &exchange.name,
                exchange_kind(exchange.exchange_type),
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(classify)
    }

    async fn declare_queue(&mut self, queue: &QueueSettings) -> BrokerResult<()> {
        let options = QueueDeclareOptions {
            durable: queue.durable,
            ..QueueDeclareOptions::default()
        };

        self.channel()?
            .queue_declare(&queue.name, options, FieldTable::default())
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn bind_queue(
        &mut self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> BrokerResult<()> {
        self.channel()?
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(classify)
    }

    async fn set_prefetch(&mut self, count: u16) -> BrokerResult<()> {
        self.channel()?
            .basic_qos(count, BasicQosOptions::default())
            .await
            .map_err(classify)
    }

    async fn start_consuming(&mut self, queue: &str) -> BrokerResult<String> {
        let consumer = self
            .channel()?
            .basic_consume(
                queue,
                &self.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(classify)?;

        self.consumer = Some(consumer);
        Ok(self.consumer_tag.clone())
    }

    async fn next_event(&mut self) -> TransportEvent {
        let Some(consumer) = self.consumer.as_mut() else {
            return TransportEvent::Closed(CloseReason::transport("no active consumer"));
        };

        match consumer.next().await {
            Some(Ok(delivery)) => TransportEvent::Delivery(Delivery {
                delivery_tag: delivery.delivery_tag,
                exchange: delivery.exchange.as_str().to_string(),
                routing_key: delivery.routing_key.as_str().to_string(),
                redelivered: delivery.redelivered,
                body: delivery.data,
            }),
            Some(Err(e)) => {
                self.consumer = None;
                let reason = match classify(e) {
                    BrokerError::ChannelClosed(reason) => reason,
                    other => CloseReason::transport(other.to_string()),
                };
                TransportEvent::Closed(reason)
            }
            None => {
                self.consumer = None;
                TransportEvent::Closed(CloseReason::transport("consumer cancelled by broker"))
            }
        }
    }

    async fn publish(&mut self, exchange: &str, routing_key: &str, body: &[u8]) -> BrokerResult<()> {
        // The returned confirm is dropped; delivery is not awaited
        self.channel()?
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                BasicProperties::default(),
            )
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn ack(&mut self, delivery_tag: u64) -> BrokerResult<()> {
        self.channel()?
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(classify)
    }

    async fn cancel_consumer(&mut self, consumer_tag: &str) -> BrokerResult<()> {
        self.channel()?
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
            .map_err(classify)
    }

    async fn close(&mut self) -> BrokerResult<()> {
        self.consumer = None;

        if let Some(channel) = self.channel.take() {
            if let Err(e) = channel.close(NORMAL_SHUTDOWN, "Normal shutdown").await {
                tracing::debug!("Channel close failed: {}", e);
            }
        }

        if let Some(connection) = self.connection.take() {
            connection
                .close(NORMAL_SHUTDOWN, "Normal shutdown")
                .await
                .map_err(classify)?;
        }

        Ok(())
    }
}
