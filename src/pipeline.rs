// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Event Processing Pipeline
//!
//! The job handler the runtime calls for every consumed payload: decode,
//! validate, then pass the event to the business `EventHandler`.
//!
//! Decoding and validation failures are `JobError::Validation` and never
//! reach the handler. Handler failures are logged with the event and a
//! bounded error chain and returned as `JobError::Processing`, leaving
//! retry and dead-lettering to the runtime.
//!
//! Delivery is at-least-once, so handlers must tolerate seeing the same
//! event twice.

use crate::{
    errors::JobError,
    event::Event,
    jobs::JobHandler,
};
use async_trait::async_trait;
use std::{error::Error, sync::Arc};
use tracing::{error, info};

/// Error type business handlers may fail with.
pub type HandlerError = Box<dyn Error + Send + Sync>;

/// How many entries of an error's source chain end up in the logs.
const ERROR_CHAIN_DEPTH: usize = 5;

/// Business logic applied to each decoded event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> Result<(), HandlerError>;
}

/// Records every event in the log and does nothing else.
pub struct LoggingEventHandler;

#[async_trait]
impl EventHandler for LoggingEventHandler {
    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        info!(
            event_type = event.kind,
            event_data = %event.data,
            "event logged"
        );
        Ok(())
    }
}

pub struct EventProcessingPipeline {
    handler: Arc<dyn EventHandler>,
}

impl EventProcessingPipeline {
    pub fn new(handler: Arc<dyn EventHandler>) -> Arc<EventProcessingPipeline> {
        Arc::new(EventProcessingPipeline { handler })
    }

    /// Runs one attempt over a raw payload and returns the decoded event.
    ///
    /// # Parameters
    /// * `payload` - The message body exactly as the consumer received it
    ///
    /// # Returns
    /// * `Ok(Event)` - The handler accepted the event
    /// * `Err(JobError::Validation)` - The payload is not a JSON object, or
    ///   `type` or `data` is missing; the handler is not called
    /// * `Err(JobError::Processing)` - The handler failed; the job runtime
    ///   may retry it
    pub async fn process(&self, payload: &[u8]) -> Result<Event, JobError> {
        let event = Event::decode(payload).map_err(|err| {
            error!(
                error = err.to_string(),
                payload = %String::from_utf8_lossy(payload),
                "invalid event payload"
            );
            JobError::from(err)
        })?;

        info!(
            event_type = event.kind,
            event_data = %event.data,
            "processing event"
        );

        if let Err(err) = self.handler.handle(&event).await {
            error!(
                error = err.to_string(),
                chain = ?error_chain(&*err, ERROR_CHAIN_DEPTH),
                event_type = event.kind,
                payload = %String::from_utf8_lossy(payload),
                "event processing failed"
            );
            return Err(JobError::Processing(err.to_string()));
        }

        Ok(event)
    }
}

#[async_trait]
impl JobHandler for EventProcessingPipeline {
    async fn perform(&self, payload: &[u8]) -> Result<(), JobError> {
        self.process(payload).await.map(|_| ())
    }
}

/// Collects `err` and its sources, at most `depth` entries.
pub fn error_chain(err: &(dyn Error + 'static), depth: usize) -> Vec<String> {
    std::iter::successors(Some(err), |err: &&(dyn Error + 'static)| (*err).source())
        .take(depth)
        .map(|err| err.to_string())
        .collect()
}
