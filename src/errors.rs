// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Events Gateway
//!
//! This module provides the error taxonomy shared by the broker client, the
//! publisher, the consumer loop and the job pipeline:
//!
//! - `AmqpError`: anything the broker transport reports (dial, channel,
//!   publish, confirm, ack). These are the failures the publisher absorbs
//!   with a reset between attempts.
//! - `PublishError`: what a publish call surfaces to its caller once the
//!   retry budget is spent, or when the event itself is unusable.
//! - `EventError`: decoding and field validation of an event payload.
//! - `JobError`: the outcome of a unit of work, driving the job runtime's
//!   retry and dead-letter policy.
//! - `HandoffError`: why a consumer session ended. Only its transport
//!   variant touches the shared broker client.

use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
///
/// Every variant carries the transport's own description so the cause chain
/// survives into logs and into `PublishError::Connection`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// The network dial failed or the broker rejected the credentials
    #[error("failure to connect: {0}")]
    ConnectionError(String),

    /// Error creating a channel from an established connection
    #[error("failure to create a channel: {0}")]
    ChannelError(String),

    /// The channel (or the connection under it) was already closed
    #[error("channel already closed")]
    ChannelClosedError,

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error switching the channel into publisher-confirm mode
    #[error("failure to enable publisher confirms `{0}`")]
    ConfirmSelectError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error publishing a message
    #[error("failure to publish: {0}")]
    PublishingError(String),

    /// The broker negatively acknowledged a publish
    #[error("publish was rejected by the broker")]
    PublishNackError,

    /// The broker did not confirm a publish in time
    #[error("publish confirmation timed out")]
    ConfirmTimeoutError,

    /// Error binding a consumer to a queue
    #[error("failure to declare consumer `{0}`")]
    BindingConsumerError(String),

    /// Error consuming a message
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),

    /// Error acknowledging a message
    #[error("failure to ack message `{0}`")]
    AckMessageError(String),

    /// Error rejecting a message
    #[error("failure to reject message `{0}`")]
    RejectMessageError(String),
}

/// Errors surfaced by a publish call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The broker stayed unusable for the whole retry budget.
    ///
    /// `attempts` counts every failed attempt of the call and `causes` holds
    /// them in order; `cause` is the last one.
    #[error("broker operation failed after {attempts} attempts: {cause}")]
    Connection {
        attempts: u32,
        cause: AmqpError,
        causes: Vec<AmqpError>,
    },

    /// The event cannot be published as-is; never retried.
    #[error("invalid event: {0}")]
    Validation(String),
}

/// Errors decoding or validating an event payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("failure to encode event: {0}")]
    Encode(String),
}

/// Outcome of a failed unit of work.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// The payload can never succeed; the job is dead-lettered at once.
    #[error("validation error: {0}")]
    Validation(String),

    /// The business handler failed; the job runtime retries it.
    #[error("processing error: {0}")]
    Processing(String),

    /// The job queue is not accepting work.
    #[error("job queue closed")]
    QueueClosed,
}

impl JobError {
    /// Whether the job runtime should schedule another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobError::Processing(_))
    }
}

/// Reasons a consumer session stops.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandoffError {
    /// The subscription itself failed
    #[error(transparent)]
    Transport(#[from] AmqpError),

    /// The message body is not JSON
    #[error("undecodable message: {0}")]
    Undecodable(String),

    /// The job queue refused the payload
    #[error("failure to enqueue job: {0}")]
    Enqueue(JobError),
}

impl HandoffError {
    /// Whether the broker connection is suspect and must be reset.
    pub fn is_transport(&self) -> bool {
        matches!(self, HandoffError::Transport(_))
    }
}

impl From<EventError> for JobError {
    fn from(err: EventError) -> Self {
        JobError::Validation(err.to_string())
    }
}

impl From<EventError> for PublishError {
    fn from(err: EventError) -> Self {
        PublishError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_error_reports_attempts_and_cause() {
        let err = PublishError::Connection {
            attempts: 4,
            cause: AmqpError::ChannelClosedError,
            causes: vec![AmqpError::ChannelClosedError; 4],
        };

        assert_eq!(
            err.to_string(),
            "broker operation failed after 4 attempts: channel already closed"
        );
    }

    #[test]
    fn only_processing_errors_are_retryable() {
        assert!(JobError::Processing("boom".into()).is_retryable());
        assert!(!JobError::Validation("missing field: type".into()).is_retryable());
        assert!(!JobError::QueueClosed.is_retryable());
    }

    #[test]
    fn event_errors_become_validation_errors() {
        let err: JobError = EventError::MissingField("data").into();
        assert_eq!(err, JobError::Validation("missing field: data".into()));

        let err: PublishError = EventError::MissingField("type").into();
        assert_eq!(err, PublishError::Validation("missing field: type".into()));
    }

    #[test]
    fn only_transport_failures_concern_the_connection() {
        assert!(HandoffError::from(AmqpError::ChannelClosedError).is_transport());
        assert!(!HandoffError::Undecodable("expected value".into()).is_transport());
        assert!(!HandoffError::Enqueue(JobError::QueueClosed).is_transport());
    }
}
