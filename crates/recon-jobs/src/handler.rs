//! Job handlers for each job kind.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use recon_core::{Error, JobKind, JobRecord, QueueId};

/// Progress callback type for job handlers.
pub type ProgressCallback = Box<dyn Fn(u32, Option<&str>) + Send + Sync>;

/// Context provided to job handlers.
pub struct JobContext {
    /// The job being processed.
    pub record: JobRecord,
    cancel: CancellationToken,
    progress_callback: Option<ProgressCallback>,
}

impl JobContext {
    pub fn new(record: JobRecord, cancel: CancellationToken) -> Self {
        Self {
            record,
            cancel,
            progress_callback: None,
        }
    }

    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(u32, Option<&str>) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    pub fn report_progress(&self, percent: u32, message: Option<&str>) {
        if let Some(ref callback) = self.progress_callback {
            callback(percent, message);
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.record.id
    }

    pub fn queue_id(&self) -> QueueId {
        self.record.queue_id
    }

    pub fn payload(&self) -> &JsonValue {
        &self.record.payload
    }

    /// Fires when the job is stopped through the queue. Handlers check it
    /// between units of work.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Result of job execution.
#[derive(Debug)]
pub enum JobResult {
    /// Job completed with optional result data.
    Success(Option<JsonValue>),
    /// Job failed. The error keeps its category for synchronous callers.
    Failed(Error),
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The job kind this handler processes.
    fn kind(&self) -> JobKind;

    async fn execute(&self, ctx: JobContext) -> JobResult;

    fn can_handle(&self, kind: JobKind) -> bool {
        self.kind() == kind
    }
}

/// Handlers by job kind, shared by the worker pool and synchronous execution.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<HashMap<JobKind, Arc<dyn JobHandler>>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, handler: Arc<dyn JobHandler>) {
        let kind = handler.kind();
        self.handlers.write().await.insert(kind, handler);
        debug!(kind = kind.as_str(), "Registered job handler");
    }

    pub async fn get(&self, kind: JobKind) -> Option<Arc<dyn JobHandler>> {
        self.handlers.read().await.get(&kind).cloned()
    }

    pub async fn kinds(&self) -> Vec<JobKind> {
        self.handlers.read().await.keys().copied().collect()
    }
}

/// Handler that echoes its payload back as the result.
pub struct NoOpHandler {
    kind: JobKind,
}

impl NoOpHandler {
    pub fn new(kind: JobKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl JobHandler for NoOpHandler {
    fn kind(&self) -> JobKind {
        self.kind
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        ctx.report_progress(100, Some("Done"));
        JobResult::Success(Some(ctx.payload().clone()))
    }
}
