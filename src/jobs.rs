// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Job Runtime
//!
//! The consumer loop hands every received payload to a `JobQueue` instead of
//! processing it inline. `WorkerPool` is the in-process runtime behind that
//! seam: a bounded queue drained by a fixed number of workers that call a
//! `JobHandler`.
//!
//! Each job gets `max_attempts` attempts in total. A retryable failure
//! schedules the next attempt after an exponential delay; a job that runs
//! out of attempts, or fails validation, is handed to the `DeadLetterSink`.
//!
//! ```text
//! Pending -> Processing -> Completed
//!                       -> Retrying(n) -> Processing ...
//!                       -> DeadLettered
//! ```

use crate::{configs::JobsConfigs, errors::JobError, retry::Backoff};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub type JobId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    /// Failed attempt `n`, another one is scheduled
    Retrying(u32),
    DeadLettered,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::DeadLettered)
    }
}

/// A state change of one job, broadcast to `WorkerPool::subscribe`rs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTransition {
    pub job_id: JobId,
    pub state: JobState,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub payload: Vec<u8>,
    /// Attempts already made
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

/// A job that exhausted its attempts or can never succeed.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetterRecord {
    pub job_id: JobId,
    pub payload: Vec<u8>,
    pub attempts: u32,
    pub error: JobError,
    pub dead_at: DateTime<Utc>,
}

/// Fire-and-forget scheduling of a unit of work.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, payload: Vec<u8>) -> Result<JobId, JobError>;
}

/// Performs one attempt of a job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn perform(&self, payload: &[u8]) -> Result<(), JobError>;
}

/// Keeps dead-lettered jobs.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn bury(&self, record: DeadLetterRecord);
}

/// In-memory dead set.
#[derive(Default)]
pub struct DeadSet {
    records: Mutex<Vec<DeadLetterRecord>>,
}

impl DeadSet {
    pub fn new() -> Arc<DeadSet> {
        Arc::new(DeadSet::default())
    }

    pub async fn records(&self) -> Vec<DeadLetterRecord> {
        self.records.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl DeadLetterSink for DeadSet {
    async fn bury(&self, record: DeadLetterRecord) {
        self.records.lock().await.push(record);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerPoolConfig {
    pub workers: usize,
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub capacity: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        WorkerPoolConfig::from(&JobsConfigs::default())
    }
}

impl From<&JobsConfigs> for WorkerPoolConfig {
    fn from(cfg: &JobsConfigs) -> Self {
        WorkerPoolConfig {
            workers: cfg.workers.max(1),
            max_attempts: cfg.max_attempts.max(1),
            backoff: Backoff::exponential(cfg.retry_base_delay(), Duration::from_secs(300)),
            capacity: cfg.capacity.max(1),
        }
    }
}

/// Cloneable handle that schedules jobs on a `WorkerPool`.
#[derive(Clone)]
pub struct JobSender {
    sender: mpsc::Sender<Job>,
    transitions: broadcast::Sender<JobTransition>,
}

#[async_trait]
impl JobQueue for JobSender {
    async fn enqueue(&self, payload: Vec<u8>) -> Result<JobId, JobError> {
        let job = Job {
            id: Uuid::new_v4(),
            payload,
            attempts: 0,
            enqueued_at: Utc::now(),
        };
        let job_id = job.id;

        // announced first so no worker transition can precede it
        let _ = self.transitions.send(JobTransition {
            job_id,
            state: JobState::Pending,
        });

        self.sender
            .send(job)
            .await
            .map_err(|_| JobError::QueueClosed)?;
        debug!(job_id = %job_id, "job enqueued");

        Ok(job_id)
    }
}

pub struct WorkerPool {
    sender: JobSender,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns the workers; they run until `cancel` fires.
    pub fn start(
        config: WorkerPoolConfig,
        handler: Arc<dyn JobHandler>,
        dead: Arc<dyn DeadLetterSink>,
        cancel: CancellationToken,
    ) -> WorkerPool {
        let (sender, receiver) = mpsc::channel(config.capacity);
        let (transitions, _) = broadcast::channel(config.capacity.max(16));
        let sender = JobSender {
            sender,
            transitions,
        };
        let receiver = Arc::new(Mutex::new(receiver));
        let config = Arc::new(config);

        info!(workers = config.workers, "spawning job workers");

        let handles = (0..config.workers)
            .map(|worker_id| {
                let worker = Worker {
                    id: worker_id,
                    config: config.clone(),
                    handler: handler.clone(),
                    dead: dead.clone(),
                    sender: sender.clone(),
                    receiver: receiver.clone(),
                    cancel: cancel.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        WorkerPool {
            sender,
            cancel,
            handles,
        }
    }

    pub fn queue(&self) -> Arc<dyn JobQueue> {
        Arc::new(self.sender.clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobTransition> {
        self.sender.transitions.subscribe()
    }

    /// Stops the workers, letting in-flight attempts finish within `timeout`.
    pub async fn shutdown(self, timeout: Duration) {
        self.cancel.cancel();

        let join = futures_util::future::join_all(self.handles);
        match tokio::time::timeout(timeout, join).await {
            Ok(results) => {
                for result in results {
                    if let Err(err) = result {
                        error!(error = err.to_string(), "job worker panicked");
                    }
                }
                info!("job workers stopped");
            }
            Err(_) => warn!(
                timeout_ms = timeout.as_millis() as u64,
                "job workers did not stop in time"
            ),
        }
    }
}

struct Worker {
    id: usize,
    config: Arc<WorkerPoolConfig>,
    handler: Arc<dyn JobHandler>,
    dead: Arc<dyn DeadLetterSink>,
    sender: JobSender,
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self) {
        debug!(worker_id = self.id, "job worker started");

        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => break,
                job = async { self.receiver.lock().await.recv().await } => job,
            };

            match next {
                Some(job) => self.execute(job).await,
                None => break,
            }
        }

        debug!(worker_id = self.id, "job worker stopped");
    }

    async fn execute(&self, mut job: Job) {
        job.attempts += 1;
        let attempt = job.attempts;
        self.notify(job.id, JobState::Processing);

        let err = match self.handler.perform(&job.payload).await {
            Ok(()) => {
                debug!(job_id = %job.id, attempt, "job completed");
                self.notify(job.id, JobState::Completed);
                return;
            }
            Err(err) => err,
        };

        if err.is_retryable() && attempt < self.config.max_attempts {
            let delay = self.config.backoff.delay(attempt);
            warn!(
                job_id = %job.id,
                attempt,
                error = err.to_string(),
                retry_in_ms = delay.as_millis() as u64,
                "job failed, scheduling retry"
            );
            self.notify(job.id, JobState::Retrying(attempt));
            self.schedule_retry(job, delay);
            return;
        }

        error!(
            job_id = %job.id,
            attempts = attempt,
            error = err.to_string(),
            "job moved to the dead set"
        );
        let job_id = job.id;
        self.dead
            .bury(DeadLetterRecord {
                job_id,
                payload: job.payload,
                attempts: attempt,
                error: err,
                dead_at: Utc::now(),
            })
            .await;
        self.notify(job_id, JobState::DeadLettered);
    }

    fn schedule_retry(&self, job: Job, delay: Duration) {
        let sender = self.sender.sender.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!(job_id = %job.id, "shutdown before retry, job dropped");
                }
                _ = tokio::time::sleep(delay) => {
                    let job_id = job.id;
                    if sender.send(job).await.is_err() {
                        error!(job_id = %job_id, "job queue closed, retry dropped");
                    }
                }
            }
        });
    }

    fn notify(&self, job_id: JobId, state: JobState) {
        let _ = self
            .sender
            .transitions
            .send(JobTransition { job_id, state });
    }
}
