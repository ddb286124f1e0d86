//! Worker pool that drains the work queue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value as JsonValue;
use tokio::sync::{broadcast, mpsc};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use recon_core::defaults::{
    EVENT_BUS_CAPACITY, JOB_CONCURRENCY, JOB_POLL_INTERVAL_MS, JOB_TIMEOUT_SECS,
};
use recon_core::{
    JobKind, JobRecordRepository, PersistedStatus, QueueId, QueueStatus, Result, StatusUpdate,
};

use crate::handler::{HandlerRegistry, JobContext, JobHandler, JobResult};
use crate::queue::{ClaimedJob, WorkQueue};

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Sleep between polls when the queue is empty.
    pub poll_interval_ms: u64,
    /// Number of jobs processed at once.
    pub concurrency: usize,
    /// Handler run time after which the job is recorded as errored.
    pub job_timeout_secs: u64,
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: JOB_POLL_INTERVAL_MS,
            concurrency: JOB_CONCURRENCY,
            job_timeout_secs: JOB_TIMEOUT_SECS,
            enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `JOB_WORKER_ENABLED` | `true` |
    /// | `JOB_CONCURRENCY` | `2` |
    /// | `JOB_TIMEOUT_SECS` | `3600` |
    /// | `JOB_POLL_INTERVAL_MS` | `2000` |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let enabled = std::env::var("JOB_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(defaults.enabled);
        let concurrency = std::env::var("JOB_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults.concurrency)
            .max(1);
        let job_timeout_secs = std::env::var("JOB_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults.job_timeout_secs);
        let poll_interval_ms = std::env::var("JOB_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults.poll_interval_ms);

        Self {
            poll_interval_ms,
            concurrency,
            job_timeout_secs,
            enabled,
        }
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_job_timeout(mut self, secs: u64) -> Self {
        self.job_timeout_secs = secs;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Event emitted by the worker pool.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    JobStarted {
        job_id: Uuid,
        queue_id: QueueId,
        kind: JobKind,
    },
    JobProgress {
        job_id: Uuid,
        percent: u32,
        message: Option<String>,
    },
    JobCompleted {
        job_id: Uuid,
        kind: JobKind,
    },
    JobFailed {
        job_id: Uuid,
        kind: JobKind,
        error: String,
    },
    /// Timed out, panicked, or had no handler.
    JobErrored {
        job_id: Uuid,
        kind: JobKind,
        error: String,
    },
    WorkerStarted,
    WorkerStopped,
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Signal the worker to shut down after the current batch.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| recon_core::Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

enum Outcome {
    Completed(Option<JsonValue>),
    Failed(String),
    /// Handler returned after a stop request; keeps what it got done.
    Stopped(Option<JsonValue>),
    Errored(String),
}

pub struct JobWorker {
    queue: Arc<dyn WorkQueue>,
    records: Arc<dyn JobRecordRepository>,
    handlers: HandlerRegistry,
    config: WorkerConfig,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl JobWorker {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        records: Arc<dyn JobRecordRepository>,
        handlers: HandlerRegistry,
        config: WorkerConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            queue,
            records,
            handlers,
            config,
            event_tx,
        }
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    /// Claim up to `concurrency` jobs, run them together, repeat. Sleeps
    /// only when the queue is empty.
    #[instrument(skip(self, shutdown_rx), fields(subsystem = "jobs", component = "worker"))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Job worker is disabled, not starting");
            return;
        }

        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            concurrency = self.config.concurrency,
            "Job worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            if shutdown_rx.try_recv().is_ok() {
                info!("Job worker received shutdown signal");
                break;
            }

            let kinds = self.handlers.kinds().await;
            let mut tasks = tokio::task::JoinSet::new();
            for _ in 0..self.config.concurrency {
                match self.queue.claim(&kinds).await {
                    Ok(Some(job)) => {
                        let runner = self.runner();
                        tasks.spawn(async move { runner.execute(job).await });
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!(error = %e, "Failed to claim job");
                        break;
                    }
                }
            }

            if tasks.is_empty() {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Job worker received shutdown signal");
                        break;
                    }
                    _ = sleep(poll_interval) => {}
                }
            } else {
                debug!(claimed = tasks.len(), "Processing job batch");
                while let Some(result) = tasks.join_next().await {
                    if let Err(e) = result {
                        error!(error = ?e, "Job task panicked");
                    }
                }
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Job worker stopped");
    }

    fn runner(&self) -> JobRunner {
        JobRunner {
            queue: self.queue.clone(),
            records: self.records.clone(),
            handlers: self.handlers.clone(),
            event_tx: self.event_tx.clone(),
            timeout: Duration::from_secs(self.config.job_timeout_secs),
        }
    }
}

/// What a spawned task needs to run one job.
struct JobRunner {
    queue: Arc<dyn WorkQueue>,
    records: Arc<dyn JobRecordRepository>,
    handlers: HandlerRegistry,
    event_tx: broadcast::Sender<WorkerEvent>,
    timeout: Duration,
}

impl JobRunner {
    async fn execute(self, job: ClaimedJob) {
        let start = Instant::now();
        let ClaimedJob {
            queue_id,
            job_id,
            kind,
            cancel,
        } = job;

        let record = match self
            .records
            .update_status(job_id, StatusUpdate::to(PersistedStatus::Running))
            .await
        {
            Ok(record) => record,
            Err(e) => {
                error!(%job_id, %queue_id, error = %e, "Cannot load job record; failing queue entry");
                self.finish_queue(queue_id, QueueStatus::Failed).await;
                return;
            }
        };
        if record.status.is_terminal() {
            // Reconciled to a terminal status before the worker got to it.
            debug!(%job_id, status = record.status.as_str(), "Job record already terminal");
            self.finish_queue(queue_id, QueueStatus::Failed).await;
            return;
        }

        info!(%job_id, %queue_id, kind = kind.as_str(), "Processing job");
        let _ = self.event_tx.send(WorkerEvent::JobStarted {
            job_id,
            queue_id,
            kind,
        });

        let stopped = cancel.clone();
        let outcome = match self.handlers.get(kind).await {
            Some(handler) => self.run_handler(handler, record, cancel).await,
            None => {
                warn!(kind = kind.as_str(), "No handler registered for job kind");
                Outcome::Errored(format!("no handler for job kind '{}'", kind.as_str()))
            }
        };

        let outcome = match outcome {
            Outcome::Completed(result) if stopped.is_cancelled() => Outcome::Stopped(result),
            other => other,
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let (update, queue_status, event) = match outcome {
            Outcome::Completed(result) => {
                info!(%job_id, kind = kind.as_str(), duration_ms, "Job completed");
                (
                    StatusUpdate::to(PersistedStatus::Completed).with_result(result),
                    QueueStatus::Finished,
                    WorkerEvent::JobCompleted { job_id, kind },
                )
            }
            Outcome::Failed(error) => {
                warn!(%job_id, kind = kind.as_str(), %error, duration_ms, "Job failed");
                (
                    StatusUpdate::to(PersistedStatus::Failed).with_error(error.clone()),
                    QueueStatus::Failed,
                    WorkerEvent::JobFailed { job_id, kind, error },
                )
            }
            Outcome::Stopped(result) => {
                let error = String::from("job was stopped before it finished");
                info!(%job_id, kind = kind.as_str(), duration_ms, "Job stopped");
                (
                    StatusUpdate::to(PersistedStatus::Failed)
                        .with_result(result)
                        .with_error(error.clone()),
                    QueueStatus::Stopped,
                    WorkerEvent::JobFailed { job_id, kind, error },
                )
            }
            Outcome::Errored(error) => {
                error!(%job_id, kind = kind.as_str(), %error, duration_ms, "Job errored");
                (
                    StatusUpdate::to(PersistedStatus::Errored).with_error(error.clone()),
                    QueueStatus::Failed,
                    WorkerEvent::JobErrored { job_id, kind, error },
                )
            }
        };

        // Persisted record first, so a terminal queue status implies a
        // terminal record.
        let result = update.result.clone();
        match self.records.update_status(job_id, update).await {
            // A stop reconciled the record first; keep what the handler committed.
            Ok(stored) if stored.result.is_none() => {
                if let Some(result) = result {
                    if let Err(e) = self.records.attach_result(job_id, result).await {
                        error!(%job_id, error = %e, "Failed to attach job result");
                    }
                }
            }
            Ok(_) => {}
            Err(e) => error!(%job_id, error = %e, "Failed to write final job status"),
        }
        self.finish_queue(queue_id, queue_status).await;
        let _ = self.event_tx.send(event);
    }

    async fn run_handler(
        &self,
        handler: Arc<dyn JobHandler>,
        record: recon_core::JobRecord,
        cancel: tokio_util::sync::CancellationToken,
    ) -> Outcome {
        let job_id = record.id;
        let event_tx = self.event_tx.clone();
        let ctx = JobContext::new(record, cancel).with_progress_callback(move |percent, message| {
            let _ = event_tx.send(WorkerEvent::JobProgress {
                job_id,
                percent,
                message: message.map(String::from),
            });
        });

        // Spawned so a panicking handler surfaces as a JoinError.
        let mut task = tokio::spawn(async move { handler.execute(ctx).await });
        match tokio::time::timeout(self.timeout, &mut task).await {
            Ok(Ok(JobResult::Success(result))) => Outcome::Completed(result),
            Ok(Ok(JobResult::Failed(e))) => Outcome::Failed(e.to_string()),
            Ok(Err(join_error)) => {
                Outcome::Errored(format!("job handler panicked: {}", join_error))
            }
            Err(_) => {
                task.abort();
                Outcome::Errored(format!(
                    "job exceeded timeout of {}s",
                    self.timeout.as_secs()
                ))
            }
        }
    }

    async fn finish_queue(&self, queue_id: QueueId, status: QueueStatus) {
        if let Err(e) = self.queue.finish(queue_id, status).await {
            warn!(%queue_id, error = %e, "Failed to record final queue status");
        }
    }
}

/// Builder for creating a worker with handlers.
pub struct WorkerBuilder {
    queue: Arc<dyn WorkQueue>,
    records: Arc<dyn JobRecordRepository>,
    handlers: HandlerRegistry,
    pending: Vec<Arc<dyn JobHandler>>,
    config: WorkerConfig,
}

impl WorkerBuilder {
    pub fn new(queue: Arc<dyn WorkQueue>, records: Arc<dyn JobRecordRepository>) -> Self {
        Self {
            queue,
            records,
            handlers: HandlerRegistry::new(),
            pending: Vec::new(),
            config: WorkerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a registry with the orchestrator's synchronous path.
    pub fn with_registry(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn with_handler<H: JobHandler + 'static>(mut self, handler: H) -> Self {
        self.pending.push(Arc::new(handler));
        self
    }

    pub async fn build(self) -> JobWorker {
        for handler in self.pending {
            self.handlers.register(handler).await;
        }
        JobWorker::new(self.queue, self.records, self.handlers, self.config)
    }
}
