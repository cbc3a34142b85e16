// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Transport Seams
//!
//! The broker client, publisher and consumer talk to RabbitMQ only through
//! the traits in this module. `channel` provides the lapin implementation;
//! tests plug in mocks or an in-memory broker.

use crate::{errors::AmqpError, queue::QueueDefinition};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use lapin::{protocol::basic::AMQPProperties, BasicProperties};
use std::{sync::Arc, time::Duration};

#[cfg(test)]
use mockall::automock;

/// Name of the default (nameless direct) exchange.
pub const DEFAULT_EXCHANGE: &str = "";

/// Facts applied to every channel before it is handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSettings {
    /// Upper bound of unacknowledged deliveries on the channel
    pub prefetch_count: u16,
    /// How long a publish waits for the broker confirmation
    pub confirm_timeout: Duration,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            prefetch_count: 1,
            confirm_timeout: Duration::from_secs(5),
        }
    }
}

/// Establishes connections to the broker.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    /// Dials the broker. Fails with `AmqpError::ConnectionError` when the
    /// network is unreachable or the credentials are refused.
    async fn connect(&self) -> Result<Arc<dyn AmqpConnection>, AmqpError>;
}

/// An open connection to the broker.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AmqpConnection: Send + Sync {
    /// Opens a channel with the prefetch bound and publisher confirms
    /// already in effect.
    ///
    /// Returns `AmqpError::ChannelClosedError` when the connection handle is
    /// stale.
    async fn open_channel(
        &self,
        settings: &ChannelSettings,
    ) -> Result<Arc<dyn AmqpChannel>, AmqpError>;

    fn is_connected(&self) -> bool;

    async fn close(&self) -> Result<(), AmqpError>;
}

/// A channel multiplexed over an `AmqpConnection`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AmqpChannel: Send + Sync {
    fn is_open(&self) -> bool;

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), AmqpError>;

    /// Publishes `payload` and waits for the broker confirmation.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError>;

    /// Subscribes to `queue` with manual acknowledgement.
    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, AmqpError>;

    /// Cancels the subscription `consumer_tag` and hands its unacknowledged
    /// deliveries back to the queue.
    async fn cancel(&self, consumer_tag: &str) -> Result<(), AmqpError>;

    async fn close(&self) -> Result<(), AmqpError>;
}

/// Settles a single delivery with the broker.
#[async_trait]
pub trait DeliveryAcker: Send + Sync {
    async fn ack(&self) -> Result<(), AmqpError>;

    async fn reject(&self, requeue: bool) -> Result<(), AmqpError>;
}

/// Stream of deliveries produced by `AmqpChannel::consume`.
pub type DeliveryStream = BoxStream<'static, Result<InboundDelivery, AmqpError>>;

/// A message received from the broker.
pub struct InboundDelivery {
    pub data: Vec<u8>,
    pub properties: AMQPProperties,
    pub redelivered: bool,
    acker: Box<dyn DeliveryAcker>,
}

impl InboundDelivery {
    pub fn new(
        data: Vec<u8>,
        properties: AMQPProperties,
        redelivered: bool,
        acker: Box<dyn DeliveryAcker>,
    ) -> Self {
        Self {
            data,
            properties,
            redelivered,
            acker,
        }
    }

    pub async fn ack(&self) -> Result<(), AmqpError> {
        self.acker.ack().await
    }

    pub async fn reject(&self, requeue: bool) -> Result<(), AmqpError> {
        self.acker.reject(requeue).await
    }
}

impl std::fmt::Debug for InboundDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundDelivery")
            .field("data", &String::from_utf8_lossy(&self.data))
            .field("redelivered", &self.redelivered)
            .finish()
    }
}
