// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connection and Channel (lapin)
//!
//! This module implements the transport seams on top of lapin. A connection
//! is dialed from the `RabbitMQConfigs` credentials; every channel it opens
//! is switched to publisher-confirm mode and given its prefetch bound before
//! it is returned.

use crate::{
    configs::{AppConfigs, RabbitMQConfigs},
    errors::AmqpError,
    queue::QueueDefinition,
    transport::{
        AmqpChannel, AmqpConnection, ChannelSettings, Connector, DeliveryAcker, DeliveryStream,
        InboundDelivery,
    },
};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    acker::Acker,
    message::Delivery,
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions,
        BasicQosOptions, BasicRecoverOptions, BasicRejectOptions, ConfirmSelectOptions,
        QueueDeclareOptions,
    },
    types::{FieldTable, LongString},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, error};

const REPLY_SUCCESS: u16 = 200;

/// Builds the AMQP URI for the configured broker.
///
/// Credentials and vhost are percent-encoded, so reserved characters in a
/// password and the default `/` vhost survive the URI. The heartbeat
/// interval travels as a query parameter.
pub fn amqp_uri(cfg: &RabbitMQConfigs) -> String {
    format!(
        "amqp://{}:{}@{}:{}/{}?heartbeat={}",
        urlencoding::encode(&cfg.user),
        urlencoding::encode(&cfg.password),
        cfg.host,
        cfg.port,
        urlencoding::encode(&cfg.vhost),
        cfg.heartbeat
    )
}

/// Dials RabbitMQ with lapin.
pub struct LapinConnector {
    uri: String,
    connection_name: String,
}

impl LapinConnector {
    pub fn new(app: &AppConfigs, cfg: &RabbitMQConfigs) -> LapinConnector {
        LapinConnector {
            uri: amqp_uri(cfg),
            connection_name: app.name.clone(),
        }
    }
}

#[async_trait]
impl Connector for LapinConnector {
    async fn connect(&self) -> Result<Arc<dyn AmqpConnection>, AmqpError> {
        debug!("creating amqp connection...");
        let options = ConnectionProperties::default()
            .with_connection_name(LongString::from(self.connection_name.clone()));

        match Connection::connect(&self.uri, options).await {
            Ok(conn) => {
                debug!("amqp connected");
                Ok(Arc::new(LapinConnection { conn }))
            }
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                Err(AmqpError::ConnectionError(err.to_string()))
            }
        }
    }
}

pub struct LapinConnection {
    conn: Connection,
}

#[async_trait]
impl AmqpConnection for LapinConnection {
    async fn open_channel(
        &self,
        settings: &ChannelSettings,
    ) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        debug!("creating amqp channel...");
        let channel = self.conn.create_channel().await.map_err(|err| {
            error!(error = err.to_string(), "error to create the channel");
            stale_or(err, AmqpError::ChannelError)
        })?;

        channel
            .basic_qos(settings.prefetch_count, BasicQosOptions { global: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to configure qos");
                stale_or(err, AmqpError::QoSDeclarationError)
            })?;

        channel
            .confirm_select(ConfirmSelectOptions { nowait: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to enable publisher confirms");
                stale_or(err, AmqpError::ConfirmSelectError)
            })?;

        debug!(
            channel_id = channel.id(),
            prefetch = settings.prefetch_count,
            "channel created"
        );

        Ok(Arc::new(LapinChannel {
            channel,
            confirm_timeout: settings.confirm_timeout,
        }))
    }

    fn is_connected(&self) -> bool {
        self.conn.status().connected()
    }

    async fn close(&self) -> Result<(), AmqpError> {
        if !self.is_connected() {
            return Ok(());
        }

        self.conn
            .close(REPLY_SUCCESS, "closing connection")
            .await
            .map_err(|err| AmqpError::ConnectionError(err.to_string()))
    }
}

pub struct LapinChannel {
    channel: Channel,
    confirm_timeout: Duration,
}

#[async_trait]
impl AmqpChannel for LapinChannel {
    fn is_open(&self) -> bool {
        self.channel.status().connected()
    }

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), AmqpError> {
        debug!("creating queue: {}", def.name);

        match self
            .channel
            .queue_declare(
                &def.name,
                QueueDeclareOptions {
                    passive: false,
                    durable: def.durable,
                    exclusive: false,
                    auto_delete: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), name = def.name, "error to declare the queue");
                Err(AmqpError::DeclareQueueError(def.name.clone()))
            }
            _ => {
                debug!("queue: {} was created", def.name);
                Ok(())
            }
        }
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError> {
        let confirm = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                payload,
                properties,
            )
            .await
            .map_err(|err| stale_or(err, AmqpError::PublishingError))?;

        match tokio::time::timeout(self.confirm_timeout, confirm).await {
            Err(_) => Err(AmqpError::ConfirmTimeoutError),
            Ok(Err(err)) => Err(stale_or(err, AmqpError::PublishingError)),
            Ok(Ok(confirmation)) if confirmation.is_nack() => Err(AmqpError::PublishNackError),
            Ok(Ok(_)) => Ok(()),
        }
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, AmqpError> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to create the consumer");
                AmqpError::BindingConsumerError(queue.to_owned())
            })?;

        Ok(consumer
            .map(|result| {
                result
                    .map(into_inbound)
                    .map_err(|err| AmqpError::ConsumerError(err.to_string()))
            })
            .boxed())
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), AmqpError> {
        self.channel
            .basic_cancel(consumer_tag, BasicCancelOptions { nowait: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to cancel the consumer");
                stale_or(err, AmqpError::ConsumerError)
            })?;

        // unacked deliveries of the cancelled consumer would stay pinned to
        // this channel otherwise
        self.channel
            .basic_recover(BasicRecoverOptions { requeue: true })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to recover deliveries");
                stale_or(err, AmqpError::ConsumerError)
            })
    }

    async fn close(&self) -> Result<(), AmqpError> {
        if !self.is_open() {
            return Ok(());
        }

        self.channel
            .close(REPLY_SUCCESS, "closing channel")
            .await
            .map_err(|err| AmqpError::ChannelError(err.to_string()))
    }
}

struct LapinAcker(Acker);

#[async_trait]
impl DeliveryAcker for LapinAcker {
    async fn ack(&self) -> Result<(), AmqpError> {
        self.0
            .ack(BasicAckOptions { multiple: false })
            .await
            .map(|_| ())
            .map_err(|err| AmqpError::AckMessageError(err.to_string()))
    }

    async fn reject(&self, requeue: bool) -> Result<(), AmqpError> {
        self.0
            .reject(BasicRejectOptions { requeue })
            .await
            .map(|_| ())
            .map_err(|err| AmqpError::RejectMessageError(err.to_string()))
    }
}

fn into_inbound(delivery: Delivery) -> InboundDelivery {
    let Delivery {
        data,
        properties,
        redelivered,
        acker,
        ..
    } = delivery;

    InboundDelivery::new(data, properties, redelivered, Box::new(LapinAcker(acker)))
}

/// Maps lapin's "already closed" states to `ChannelClosedError` and every
/// other failure through `other`.
fn stale_or(err: lapin::Error, other: fn(String) -> AmqpError) -> AmqpError {
    match err {
        lapin::Error::InvalidChannelState(_) | lapin::Error::InvalidConnectionState(_) => {
            AmqpError::ChannelClosedError
        }
        err => other(err.to_string()),
    }
}
