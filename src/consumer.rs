// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Event Consumer Loop
//!
//! A single long-lived task subscribed to the events queue. Every delivery
//! is parsed, traced, and handed to the job queue as-is; business logic and
//! field validation never run inline. The broker ack is sent right after the
//! handoff, so delivery is at-least-once: a crash between the two
//! redelivers the message.
//!
//! Any failure ends the session and the loop subscribes again after an
//! exponential, jittered delay. The delay counter starts over once a
//! session has stayed up for `RestartPolicy::healthy_after`. Only transport
//! failures reset the shared broker client; a body that is not JSON or a
//! refused enqueue just cancels the subscription.

use crate::{
    client::AmqpClient,
    errors::HandoffError,
    event::FIELD_TYPE,
    jobs::JobQueue,
    otel,
    queue::QueueDefinition,
    retry::Backoff,
    transport::{AmqpChannel, InboundDelivery},
};
use futures_util::StreamExt;
use opentelemetry::{
    global,
    trace::{Span, Status},
};
use serde_json::Value;
use std::{
    borrow::Cow,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Span and log name of messages without a usable `type`.
const UNKNOWN_EVENT_TYPE: &str = "unknown";

/// How the consumer loop paces its restarts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RestartPolicy {
    pub backoff: Backoff,
    /// A session that lived this long resets the backoff
    pub healthy_after: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            backoff: Backoff::exponential(Duration::from_secs(1), Duration::from_secs(60)),
            healthy_after: Duration::from_secs(30),
        }
    }
}

pub struct ConsumerLoop {
    client: Arc<AmqpClient>,
    queue: QueueDefinition,
    consumer_tag: String,
    jobs: Arc<dyn JobQueue>,
    restart: RestartPolicy,
}

impl ConsumerLoop {
    pub fn new(
        client: Arc<AmqpClient>,
        queue: QueueDefinition,
        consumer_tag: &str,
        jobs: Arc<dyn JobQueue>,
    ) -> ConsumerLoop {
        ConsumerLoop {
            client,
            queue,
            consumer_tag: consumer_tag.to_owned(),
            jobs,
            restart: RestartPolicy::default(),
        }
    }

    pub fn with_restart_policy(mut self, restart: RestartPolicy) -> Self {
        self.restart = restart;
        self
    }

    /// Starts the loop on its own task. It runs until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Consumes the events queue until `cancel` fires.
    ///
    /// Each session acquires a channel from the shared client, declares the
    /// queue and hands every delivery to the job queue. When a session ends,
    /// for whatever reason, the loop waits for the restart delay and starts
    /// a new one.
    ///
    /// # Parameters
    /// * `cancel` - Token that stops the loop, including during a restart delay
    ///
    /// # Example
    /// ```ignore
    /// let consumer = ConsumerLoop::new(client, queue, "events-gateway-consumer", jobs);
    /// consumer.run(cancel.child_token()).await;
    /// ```
    pub async fn run(self, cancel: CancellationToken) {
        info!(queue = self.queue.name, "starting event consumer");
        let mut failures: u32 = 0;

        loop {
            let started = Instant::now();

            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.session() => outcome,
            };

            if started.elapsed() >= self.restart.healthy_after {
                failures = 0;
            }
            failures = failures.saturating_add(1);
            let delay = self.restart.backoff.delay(failures);

            match outcome {
                Err(err) => error!(
                    severity = "fatal",
                    error = err.to_string(),
                    restarts = failures,
                    retry_in_ms = delay.as_millis() as u64,
                    "consumer error, restarting subscription"
                ),
                Ok(()) => warn!(
                    restarts = failures,
                    retry_in_ms = delay.as_millis() as u64,
                    "subscription closed by the broker, restarting"
                ),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!(queue = self.queue.name, "event consumer stopped");
    }

    /// One subscription, from channel acquisition until the stream ends or
    /// fails.
    async fn session(&self) -> Result<(), HandoffError> {
        let lease = self.client.channel().await?;

        let result = self.subscribe(lease.channel.as_ref()).await;
        match &result {
            Err(err) if err.is_transport() => {
                self.client.reset_generation(lease.generation).await;
            }
            Err(_) => {
                if let Err(err) = lease.channel.cancel(&self.consumer_tag).await {
                    warn!(error = err.to_string(), "failure to cancel consumer");
                    self.client.reset_generation(lease.generation).await;
                }
            }
            Ok(()) => {}
        }

        result
    }

    async fn subscribe(&self, channel: &dyn AmqpChannel) -> Result<(), HandoffError> {
        channel.declare_queue(&self.queue).await?;

        let mut deliveries = channel
            .consume(&self.queue.name, &self.consumer_tag)
            .await?;
        info!(queue = self.queue.name, tag = self.consumer_tag, "subscribed");

        while let Some(delivery) = deliveries.next().await {
            self.handoff(delivery?).await?;
        }

        Ok(())
    }

    /// Parses one delivery, enqueues its raw payload as a job and acks it.
    ///
    /// Only the JSON syntax is checked here; missing fields are the job's
    /// concern, so such messages end up in the dead set instead of vanishing.
    pub async fn handoff(&self, delivery: InboundDelivery) -> Result<(), HandoffError> {
        let value: Value = match serde_json::from_slice(&delivery.data) {
            Ok(value) => value,
            Err(err) => {
                // redelivery cannot fix the payload, drop it before restarting
                if let Err(reject_err) = delivery.reject(false).await {
                    warn!(error = reject_err.to_string(), "failure to reject message");
                }
                return Err(HandoffError::Undecodable(err.to_string()));
            }
        };

        let event_type = value
            .get(FIELD_TYPE)
            .and_then(Value::as_str)
            .filter(|kind| !kind.is_empty())
            .unwrap_or(UNKNOWN_EVENT_TYPE);

        let (_ctx, mut span) = otel::new_span(
            &delivery.properties,
            &global::tracer("amqp consumer"),
            event_type,
        );

        info!(
            event_type,
            redelivered = delivery.redelivered,
            "consumed event"
        );

        let job_id = match self.jobs.enqueue(delivery.data.clone()).await {
            Ok(job_id) => job_id,
            Err(err) => {
                span.record_error(&err);
                span.set_status(Status::Error {
                    description: Cow::from("failure to enqueue job"),
                });
                if let Err(reject_err) = delivery.reject(true).await {
                    warn!(error = reject_err.to_string(), "failure to requeue message");
                }
                return Err(HandoffError::Enqueue(err));
            }
        };

        if let Err(err) = delivery.ack().await {
            error!(job_id = %job_id, error = err.to_string(), "error whiling ack msg");
            span.record_error(&err);
            span.set_status(Status::Error {
                description: Cow::from("error to ack msg"),
            });
            return Err(err.into());
        }

        debug!(job_id = %job_id, event_type, "message handed off");
        span.set_status(Status::Ok);

        Ok(())
    }
}
