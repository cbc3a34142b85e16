// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

use events_gateway::{
    channel::LapinConnector,
    client::AmqpClient,
    configs,
    consumer::ConsumerLoop,
    handlers::AppState,
    jobs::{DeadSet, WorkerPool, WorkerPoolConfig},
    logging,
    pipeline::{EventProcessingPipeline, LoggingEventHandler},
    publisher::ResilientPublisher,
    queue::QueueDefinition,
    server,
    transport::ChannelSettings,
};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use std::{error::Error, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cfg = configs::load()?;
    logging::init(&cfg.log);
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    info!(app = cfg.app.name, "starting");

    let cancel = CancellationToken::new();

    let client = Arc::new(AmqpClient::new(
        Arc::new(LapinConnector::new(&cfg.app, &cfg.rabbitmq)),
        ChannelSettings {
            prefetch_count: cfg.rabbitmq.prefetch,
            confirm_timeout: cfg.rabbitmq.confirm_timeout(),
        },
    ));

    let dead_set = DeadSet::new();
    let workers = WorkerPool::start(
        WorkerPoolConfig::from(&cfg.jobs),
        EventProcessingPipeline::new(Arc::new(LoggingEventHandler)),
        dead_set.clone(),
        cancel.child_token(),
    );

    let consumer = ConsumerLoop::new(
        client.clone(),
        QueueDefinition::new(&cfg.rabbitmq.queue).durable(),
        &format!("{}-consumer", cfg.app.name),
        workers.queue(),
    )
    .spawn(cancel.child_token());

    let router = server::create_router(AppState {
        publisher: ResilientPublisher::new(client.clone()),
        routing_key: cfg.rabbitmq.queue.clone(),
    });
    let listener = TcpListener::bind(cfg.http.addr()).await?;

    tokio::spawn(shutdown_signal(cancel.clone()));

    if let Err(err) = server::serve(listener, router, cancel.clone()).await {
        error!(error = err.to_string(), "HTTP server failed");
        cancel.cancel();
    }

    if let Err(err) = consumer.await {
        error!(error = err.to_string(), "consumer task panicked");
    }
    workers.shutdown(SHUTDOWN_TIMEOUT).await;
    client.close().await;

    let dead = dead_set.len().await;
    if dead > 0 {
        warn!(dead, "jobs left in the dead set at shutdown");
    }

    info!("stopped");
    Ok(())
}

/// Cancels `cancel` on CTRL+C or SIGTERM.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = err.to_string(), "failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = err.to_string(), "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received CTRL+C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }

    cancel.cancel();
}
