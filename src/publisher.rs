// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Resilient Event Publisher
//!
//! Publishes events to the default exchange as persistent JSON messages.
//! Transport failures are retried: each failed attempt resets the shared
//! broker client and the next attempt starts again from channel acquisition.
//! The attempt counter lives for one external call; once it exceeds
//! `MAX_PUBLISH_RETRIES` the call fails with `PublishError::Connection`.

use crate::{
    client::AmqpClient,
    errors::{AmqpError, PublishError},
    event::Event,
    otel,
    retry::MAX_PUBLISH_RETRIES,
    transport::DEFAULT_EXCHANGE,
};
use async_trait::async_trait;
use lapin::{types::ShortString, BasicProperties};
use opentelemetry::Context;
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";
/// AMQP delivery mode of messages that survive a broker restart
pub const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// Something that can put an event on the broker.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes `event` to the queue named `routing_key`.
    ///
    /// The event is validated and encoded first; an unusable event fails
    /// with `PublishError::Validation` without touching the broker.
    /// `ResilientPublisher` then makes up to `MAX_PUBLISH_RETRIES + 1`
    /// attempts, resetting the broker client after each failed one.
    ///
    /// # Parameters
    /// * `ctx` - OpenTelemetry context injected into the message headers
    /// * `event` - The event to publish
    /// * `routing_key` - Name of the destination queue
    ///
    /// # Returns
    /// * `Result<(), PublishError>` - `Ok` once the broker confirmed the
    ///   message, `PublishError::Connection` with every attempt's cause once
    ///   the retries are spent
    ///
    /// # Example
    /// ```ignore
    /// let event = Event::new("signup", json!({"id": 42})).stamped();
    /// publisher.publish(&Context::current(), &event, "user_events_queue").await?;
    /// ```
    async fn publish(
        &self,
        ctx: &Context,
        event: &Event,
        routing_key: &str,
    ) -> Result<(), PublishError>;
}

pub struct ResilientPublisher {
    client: Arc<AmqpClient>,
    max_retries: u32,
}

impl ResilientPublisher {
    pub fn new(client: Arc<AmqpClient>) -> Arc<ResilientPublisher> {
        Arc::new(ResilientPublisher {
            client,
            max_retries: MAX_PUBLISH_RETRIES,
        })
    }

    fn properties(ctx: &Context, event: &Event) -> BasicProperties {
        let timestamp = event
            .timestamp
            .map(|ts| ts.timestamp().max(0) as u64)
            .unwrap_or_else(|| chrono::Utc::now().timestamp().max(0) as u64);

        BasicProperties::default()
            .with_content_type(ShortString::from(JSON_CONTENT_TYPE))
            .with_type(ShortString::from(event.kind.clone()))
            .with_message_id(ShortString::from(Uuid::new_v4().to_string()))
            .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
            .with_timestamp(timestamp)
            .with_headers(otel::inject_headers(ctx))
    }

    /// One attempt: acquire a channel and publish on it. Returns the
    /// generation of the channel used, if one was acquired.
    async fn attempt(
        &self,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> (Result<(), AmqpError>, Option<u64>) {
        match self.client.channel().await {
            Ok(lease) => (
                lease
                    .channel
                    .publish(DEFAULT_EXCHANGE, routing_key, payload, properties)
                    .await,
                Some(lease.generation),
            ),
            Err(err) => (Err(err), None),
        }
    }
}

#[async_trait]
impl Publisher for ResilientPublisher {
    async fn publish(
        &self,
        ctx: &Context,
        event: &Event,
        routing_key: &str,
    ) -> Result<(), PublishError> {
        event.validate()?;
        let payload = event.encode()?;
        let properties = Self::properties(ctx, event);

        let mut attempts: u32 = 0;
        let mut causes = vec![];

        loop {
            let (result, generation) = self
                .attempt(routing_key, &payload, properties.clone())
                .await;

            let err = match result {
                Ok(()) => {
                    debug!(
                        event_type = event.kind,
                        routing_key,
                        attempts = attempts + 1,
                        "event published"
                    );
                    return Ok(());
                }
                Err(err) => err,
            };

            attempts += 1;
            causes.push(err.clone());

            if attempts > self.max_retries {
                error!(
                    error = err.to_string(),
                    attempts,
                    event_type = event.kind,
                    "giving up publishing event"
                );
                return Err(PublishError::Connection {
                    attempts,
                    cause: err,
                    causes,
                });
            }

            warn!(
                error = err.to_string(),
                attempt = attempts,
                "publish attempt failed, resetting broker connection"
            );

            match generation {
                Some(generation) => {
                    self.client.reset_generation(generation).await;
                }
                None => self.client.reset().await,
            }
        }
    }
}
