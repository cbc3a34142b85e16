// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Environment-Driven Configuration
//!
//! Every setting has a default and can be overridden by an environment
//! variable named `<SECTION>_<FIELD>` (for example `RABBITMQ_HOST` or
//! `JOBS_MAX_ATTEMPTS`). A `.env` file in the working directory is loaded
//! first when present.

use config::{Config, ConfigError, Environment, Map};
use serde::{de::DeserializeOwned, Deserialize};
use std::time::Duration;

/// Top-level configuration for the gateway process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Configs {
    pub app: AppConfigs,
    pub rabbitmq: RabbitMQConfigs,
    pub http: HttpConfigs,
    pub jobs: JobsConfigs,
    pub log: LogConfigs,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfigs {
    pub name: String,
}

impl Default for AppConfigs {
    fn default() -> Self {
        Self {
            name: "events-gateway".to_owned(),
        }
    }
}

/// Broker connection and channel settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RabbitMQConfigs {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub vhost: String,
    /// Heartbeat interval in seconds
    pub heartbeat: u16,
    /// Upper bound of unacknowledged deliveries per channel
    pub prefetch: u16,
    pub confirm_timeout_ms: u64,
    /// Queue the events are routed to and consumed from
    pub queue: String,
}

impl Default for RabbitMQConfigs {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 5672,
            user: "guest".to_owned(),
            password: "guest".to_owned(),
            vhost: "/".to_owned(),
            heartbeat: 30,
            prefetch: 1,
            confirm_timeout_ms: 5_000,
            queue: "user_events_queue".to_owned(),
        }
    }
}

impl RabbitMQConfigs {
    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpConfigs {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfigs {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 3000,
        }
    }
}

impl HttpConfigs {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Settings of the in-process job runtime.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct JobsConfigs {
    pub workers: usize,
    /// Total attempts a job gets before it is dead-lettered
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub capacity: usize,
}

impl Default for JobsConfigs {
    fn default() -> Self {
        Self {
            workers: 4,
            max_attempts: 3,
            retry_base_delay_ms: 1_000,
            capacity: 1_024,
        }
    }
}

impl JobsConfigs {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfigs {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfigs {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: LogFormat::Json,
        }
    }
}

/// Loads the configuration from `.env` (if any) and the process environment.
pub fn load() -> Result<Configs, ConfigError> {
    let _ = dotenvy::dotenv();
    load_from(None)
}

/// Loads the configuration from the given variables instead of the process
/// environment when `vars` is set.
pub fn load_from(vars: Option<Map<String, String>>) -> Result<Configs, ConfigError> {
    Ok(Configs {
        app: section("APP", &vars)?,
        rabbitmq: section("RABBITMQ", &vars)?,
        http: section("HTTP", &vars)?,
        jobs: section("JOBS", &vars)?,
        log: section("LOG", &vars)?,
    })
}

fn section<T>(prefix: &str, vars: &Option<Map<String, String>>) -> Result<T, ConfigError>
where
    T: DeserializeOwned,
{
    Config::builder()
        .add_source(
            Environment::with_prefix(prefix)
                .try_parsing(true)
                .source(vars.clone()),
        )
        .build()?
        .try_deserialize()
}
