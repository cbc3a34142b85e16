// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod otel;

pub mod channel;
pub mod client;
pub mod configs;
pub mod consumer;
pub mod errors;
pub mod event;
pub mod handlers;
pub mod jobs;
pub mod logging;
pub mod pipeline;
pub mod publisher;
pub mod queue;
pub mod retry;
pub mod server;
pub mod transport;
