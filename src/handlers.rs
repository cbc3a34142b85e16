// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # HTTP Handlers
//!
//! `POST /api/events` (and `/api/v1/events`) turns a JSON body with `type`
//! and `data` into an event and publishes it:
//!
//! - 202 `{"status": "Event published!"}` once the broker confirmed it
//! - 400 `{"error": ...}` when the body is not usable JSON
//! - 422 `{"error": ...}` when `type` or `data` is missing or empty
//! - 503 `{"error": "Service unavailable"}` when the broker stayed unreachable
//!
//! Acceptance says nothing about whether the event will be processed
//! successfully later on.

use crate::{
    errors::{EventError, PublishError},
    event::Event,
    publisher::Publisher,
};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use opentelemetry::Context;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

pub const PUBLISHED_MESSAGE: &str = "Event published!";
pub const UNAVAILABLE_MESSAGE: &str = "Service unavailable";

/// State shared by the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub publisher: Arc<dyn Publisher>,
    /// Queue the events are routed to
    pub routing_key: String,
}

#[derive(Debug, Serialize)]
pub struct PublishedResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

pub async fn api_root() -> Redirect {
    Redirect::permanent("/api/docs")
}

pub async fn api_docs() -> Json<Value> {
    Json(json!({
        "endpoints": [
            {
                "method": "POST",
                "path": "/api/v1/events",
                "aliases": ["/api/events"],
                "body": {
                    "type": "string, required, non-empty",
                    "data": "any JSON value, required, not null",
                    "timestamp": "RFC 3339 string, optional"
                },
                "responses": {
                    "202": {"status": PUBLISHED_MESSAGE},
                    "400": {"error": "body is not a JSON object"},
                    "422": {"error": "param is missing or the value is empty: <field>"},
                    "503": {"error": UNAVAILABLE_MESSAGE}
                }
            },
            {
                "method": "GET",
                "path": "/health",
                "responses": {"200": "OK"}
            }
        ]
    }))
}

pub async fn publish_event(State(state): State<AppState>, body: Bytes) -> Response {
    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(err) => {
            warn!(error = err.to_string(), "unreadable event body");
            return error_response(StatusCode::BAD_REQUEST, err.to_string());
        }
    };

    let event = match Event::from_value(value) {
        Ok(event) if event.timestamp.is_some() => event,
        Ok(event) => event.stamped(),
        Err(EventError::MissingField(field)) => {
            return error_response(
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("param is missing or the value is empty: {field}"),
            );
        }
        Err(err) => return error_response(StatusCode::BAD_REQUEST, err.to_string()),
    };

    match state
        .publisher
        .publish(&Context::current(), &event, &state.routing_key)
        .await
    {
        Ok(()) => {
            info!(event_type = event.kind, "event accepted");
            (
                StatusCode::ACCEPTED,
                Json(PublishedResponse {
                    status: PUBLISHED_MESSAGE,
                }),
            )
                .into_response()
        }
        Err(PublishError::Connection { attempts, cause, .. }) => {
            warn!(
                attempts,
                error = cause.to_string(),
                "broker unavailable, rejecting event"
            );
            error_response(StatusCode::SERVICE_UNAVAILABLE, UNAVAILABLE_MESSAGE)
        }
        Err(PublishError::Validation(msg)) => error_response(StatusCode::BAD_REQUEST, msg),
    }
}
