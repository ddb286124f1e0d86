//! Job orchestrator.
//!
//! A job has two independently updated views: the live queue entry (queue
//! vocabulary) and the persisted record (persisted vocabulary). The queue is
//! authoritative while it still knows the job; afterwards the persisted
//! record is. [`JobOrchestrator::reconcile`] writes the queue's view into the
//! record using [`map_queue_status`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use recon_core::{
    Capabilities, Error, JobRecord, JobRecordRepository, PersistedStatus, QueueId, QueueStatus,
    Result, StatusUpdate, WorkSpec,
};

use crate::handler::{HandlerRegistry, JobContext, JobResult};
use crate::queue::{StopOutcome, WorkQueue};

const LEFT_QUEUE_ERROR: &str = "job left the queue without recording a final status";
const STOPPED_ERROR: &str = "job was stopped";

/// Persisted equivalent of a queue status. Total over the queue vocabulary;
/// `stopped` maps to `failed` since nothing persisted means "cancelled".
pub fn map_queue_status(status: QueueStatus) -> PersistedStatus {
    match status {
        QueueStatus::Queued => PersistedStatus::Scheduled,
        QueueStatus::Started => PersistedStatus::Running,
        QueueStatus::Finished => PersistedStatus::Completed,
        QueueStatus::Failed => PersistedStatus::Failed,
        QueueStatus::Stopped => PersistedStatus::Failed,
    }
}

/// Queue status reported for a job the queue no longer knows, derived from
/// its persisted record. A non-terminal record here means the job vanished.
pub fn fallback_queue_status(status: PersistedStatus) -> QueueStatus {
    match status {
        PersistedStatus::Completed => QueueStatus::Finished,
        PersistedStatus::Failed | PersistedStatus::Errored => QueueStatus::Failed,
        PersistedStatus::Pending | PersistedStatus::Scheduled | PersistedStatus::Running => {
            QueueStatus::Stopped
        }
    }
}

/// Where a status answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusSource {
    Queue,
    Persisted,
}

/// Answer to a poll, always in queue vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub status: QueueStatus,
    pub source: StatusSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelOutcome {
    pub outcome: StopOutcome,
    /// Persisted status after reconciliation, when a record exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persisted_status: Option<PersistedStatus>,
}

/// Result of [`JobOrchestrator::run`].
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Ran in-process; carries the handler's result.
    Inline(JsonValue),
    /// Handed to the worker pool.
    Queued(JobRecord),
}

pub struct JobOrchestrator {
    queue: Arc<dyn WorkQueue>,
    records: Arc<dyn JobRecordRepository>,
    handlers: HandlerRegistry,
}

impl JobOrchestrator {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        records: Arc<dyn JobRecordRepository>,
        handlers: HandlerRegistry,
    ) -> Self {
        Self {
            queue,
            records,
            handlers,
        }
    }

    pub fn records(&self) -> &Arc<dyn JobRecordRepository> {
        &self.records
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Create a `pending` record and enqueue it. The record is written first
    /// so a worker never claims a job without one.
    #[instrument(skip(self, spec), fields(subsystem = "jobs", component = "orchestrator", op = "submit", kind = spec.kind.as_str()))]
    pub async fn submit(&self, spec: &WorkSpec) -> Result<JobRecord> {
        let queue_id = Uuid::new_v4();
        let record = JobRecord::new(queue_id, spec);
        self.records.create(&record).await?;

        if let Err(e) = self.queue.enqueue(queue_id, record.id, spec.kind).await {
            warn!(job_id = %record.id, error = %e, "Enqueue failed; marking record errored");
            self.records
                .update_status(
                    record.id,
                    StatusUpdate::to(PersistedStatus::Errored).with_error(e.to_string()),
                )
                .await?;
            return Err(Error::Job(format!("failed to enqueue job: {}", e)));
        }

        info!(job_id = %record.id, %queue_id, "Job submitted");
        Ok(record)
    }

    /// Live status, falling back to the persisted record once the queue has
    /// forgotten the job or cannot be reached.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "orchestrator", op = "poll"))]
    pub async fn poll(&self, queue_id: QueueId) -> Result<JobStatusView> {
        match self.queue.status(queue_id).await {
            Ok(Some(status)) => {
                let mut view = JobStatusView {
                    status,
                    source: StatusSource::Queue,
                    error: None,
                    result: None,
                };
                if status.is_terminal() {
                    if let Some(record) = self.records.get_by_queue_id(queue_id).await? {
                        view.error = record.error;
                        view.result = record.result;
                    }
                    if status == QueueStatus::Stopped && view.error.is_none() {
                        view.error = Some(STOPPED_ERROR.to_string());
                    }
                }
                return Ok(view);
            }
            Ok(None) => debug!("Job left the live queue; using persisted record"),
            Err(e) => warn!(error = %e, "Queue unreachable; using persisted record"),
        }

        let record = self
            .records
            .get_by_queue_id(queue_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("job {}", queue_id)))?;
        let status = fallback_queue_status(record.status);
        let error = match (&record.error, record.status.is_terminal()) {
            (Some(error), _) => Some(error.clone()),
            (None, false) => Some(LEFT_QUEUE_ERROR.to_string()),
            (None, true) => None,
        };
        Ok(JobStatusView {
            status,
            source: StatusSource::Persisted,
            error,
            result: record.result,
        })
    }

    /// Idempotent stop. A finished or unknown job is not an error, and the
    /// persisted record is always reconciled afterwards.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "orchestrator", op = "cancel"))]
    pub async fn cancel(&self, queue_id: QueueId) -> Result<CancelOutcome> {
        let outcome = match self.queue.stop(queue_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Stop request failed; treating job as gone");
                StopOutcome::NotFound
            }
        };

        let persisted_status = match self.records.get_by_queue_id(queue_id).await? {
            Some(record) => Some(self.reconcile(record.id).await?.status),
            None => None,
        };

        info!(outcome = ?outcome, persisted = ?persisted_status, "Cancel handled");
        Ok(CancelOutcome {
            outcome,
            persisted_status,
        })
    }

    /// Write the queue's view of a job into its persisted record. Terminal
    /// records are returned unchanged.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "orchestrator", op = "reconcile"))]
    pub async fn reconcile(&self, job_id: Uuid) -> Result<JobRecord> {
        let record = self
            .records
            .get(job_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("job record {}", job_id)))?;
        if record.status.is_terminal() {
            return Ok(record);
        }

        let update = match self.queue.status(record.queue_id).await {
            Ok(Some(status)) => {
                let update = StatusUpdate::to(map_queue_status(status));
                match status {
                    QueueStatus::Stopped => update.with_error(STOPPED_ERROR),
                    QueueStatus::Failed => update.with_error("job failed in the queue"),
                    _ => update,
                }
            }
            Ok(None) => StatusUpdate::to(PersistedStatus::Failed).with_error(LEFT_QUEUE_ERROR),
            Err(e) => {
                warn!(error = %e, "Queue unreachable; record left as is");
                return Ok(record);
            }
        };

        if update.status == record.status {
            return Ok(record);
        }
        let from = record.status;
        let updated = self.records.update_status(job_id, update).await?;
        info!(
            from = from.as_str(),
            to = updated.status.as_str(),
            "Job record reconciled"
        );
        Ok(updated)
    }

    /// Submit when the caller asked for async and may watch the queue;
    /// otherwise run the same work in-process and wait for it.
    #[instrument(skip(self, spec), fields(subsystem = "jobs", component = "orchestrator", op = "run", kind = spec.kind.as_str()))]
    pub async fn run(&self, spec: &WorkSpec, caps: Capabilities) -> Result<RunOutcome> {
        if spec.prefer_async && caps.may_view_queue {
            return self.submit(spec).await.map(RunOutcome::Queued);
        }
        if spec.prefer_async {
            debug!("Caller cannot view the queue; running synchronously");
        }

        let handler = self.handlers.get(spec.kind).await.ok_or_else(|| {
            Error::Job(format!("no handler for job kind '{}'", spec.kind.as_str()))
        })?;
        let record = JobRecord::new(Uuid::new_v4(), spec);
        let ctx = JobContext::new(record, CancellationToken::new());
        match handler.execute(ctx).await {
            JobResult::Success(result) => Ok(RunOutcome::Inline(result.unwrap_or(JsonValue::Null))),
            JobResult::Failed(e) => Err(e),
        }
    }
}
