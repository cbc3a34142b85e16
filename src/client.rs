// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Client
//!
//! `AmqpClient` owns the process-wide connection and channel. It is built
//! once at startup and shared by `Arc` between the HTTP publishers and the
//! consumer loop.
//!
//! Both handles are established lazily on first use. All acquisition and
//! reset goes through a single async mutex, so a reset can never interleave
//! with another caller's acquisition: a caller either sees the previous
//! channel, or a new one whose prefetch bound and confirm mode are already
//! in effect.

use crate::{
    errors::AmqpError,
    transport::{AmqpChannel, AmqpConnection, ChannelSettings, Connector},
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// A channel handed out by `AmqpClient::channel`.
///
/// `generation` identifies the channel instance, see
/// `AmqpClient::reset_generation`.
#[derive(Clone)]
pub struct ChannelLease {
    pub channel: Arc<dyn AmqpChannel>,
    pub generation: u64,
}

#[derive(Default)]
struct ClientState {
    connection: Option<Arc<dyn AmqpConnection>>,
    channel: Option<Arc<dyn AmqpChannel>>,
    generation: u64,
}

pub struct AmqpClient {
    connector: Arc<dyn Connector>,
    settings: ChannelSettings,
    state: Mutex<ClientState>,
}

impl AmqpClient {
    pub fn new(connector: Arc<dyn Connector>, settings: ChannelSettings) -> AmqpClient {
        AmqpClient {
            connector,
            settings,
            state: Mutex::new(ClientState::default()),
        }
    }

    /// Returns the cached channel, opening one on the current connection
    /// when absent.
    ///
    /// A new channel is stored and handed out only once its prefetch bound
    /// and publisher-confirm mode are in effect. If opening fails because
    /// the connection handle is stale, the client is reset and the open is
    /// retried exactly once.
    ///
    /// # Returns
    /// * `Result<ChannelLease, AmqpError>` - The channel together with its
    ///   generation, or the dial/open failure. Dial failures are never
    ///   retried here.
    ///
    /// # Example
    /// ```ignore
    /// let lease = client.channel().await?;
    /// if lease.channel.publish("", "user_events_queue", &payload, props).await.is_err() {
    ///     client.reset_generation(lease.generation).await;
    /// }
    /// ```
    pub async fn channel(&self) -> Result<ChannelLease, AmqpError> {
        let mut state = self.state.lock().await;

        if let Some(channel) = state.channel.clone() {
            if channel.is_open() {
                return Ok(ChannelLease {
                    channel,
                    generation: state.generation,
                });
            }

            debug!(generation = state.generation, "cached channel is closed");
            state.channel = None;
            if let Err(err) = channel.close().await {
                debug!(error = err.to_string(), "ignoring channel close failure");
            }
        }

        let connection = self.ensure_connection(&mut state).await?;

        let channel = match connection.open_channel(&self.settings).await {
            Ok(channel) => channel,
            Err(AmqpError::ChannelClosedError) => {
                warn!("stale connection while opening a channel, resetting");
                Self::teardown(&mut state).await;
                let connection = self.ensure_connection(&mut state).await?;
                connection.open_channel(&self.settings).await?
            }
            Err(err) => return Err(err),
        };

        state.generation += 1;
        state.channel = Some(channel.clone());
        debug!(generation = state.generation, "channel ready");

        Ok(ChannelLease {
            channel,
            generation: state.generation,
        })
    }

    /// Closes and discards the channel and the connection.
    ///
    /// Close failures are logged and ignored; afterwards the client is back
    /// to its unestablished state.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        Self::teardown(&mut state).await;
    }

    /// Resets the client only if `generation` still names the current
    /// channel. Returns whether a reset happened.
    ///
    /// Lets concurrent callers that failed on the same channel reset it once
    /// without tearing down a channel another caller already rebuilt.
    pub async fn reset_generation(&self, generation: u64) -> bool {
        let mut state = self.state.lock().await;

        if state.channel.is_none() || state.generation != generation {
            debug!(
                requested = generation,
                current = state.generation,
                "channel already replaced, skipping reset"
            );
            return false;
        }

        Self::teardown(&mut state).await;
        true
    }

    /// Closes everything; used at process shutdown.
    pub async fn close(&self) {
        info!("closing broker client");
        self.reset().await;
    }

    /// Returns the cached connection, dialing a new one when there is none
    /// or the cached one is no longer connected.
    async fn ensure_connection(
        &self,
        state: &mut ClientState,
    ) -> Result<Arc<dyn AmqpConnection>, AmqpError> {
        if let Some(connection) = &state.connection {
            if connection.is_connected() {
                return Ok(connection.clone());
            }

            debug!("cached connection is closed, discarding");
            Self::teardown(state).await;
        }

        let connection = self.connector.connect().await?;
        info!("broker connection established");
        state.connection = Some(connection.clone());

        Ok(connection)
    }

    async fn teardown(state: &mut ClientState) {
        if let Some(channel) = state.channel.take() {
            if let Err(err) = channel.close().await {
                debug!(error = err.to_string(), "ignoring channel close failure");
            }
        }

        if let Some(connection) = state.connection.take() {
            if let Err(err) = connection.close().await {
                debug!(error = err.to_string(), "ignoring connection close failure");
            }
        }

        info!("broker connection reset");
    }
}
