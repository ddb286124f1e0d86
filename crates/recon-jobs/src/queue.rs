//! Live work queue.
//!
//! The queue tracks jobs in the queue vocabulary (`queued -> started ->
//! {finished | stopped | failed}`). Terminal entries stay visible for a
//! retention window and then disappear, after which callers must fall back
//! to the persisted job record.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use recon_core::defaults::QUEUE_RETENTION_SECS;
use recon_core::{Error, JobKind, QueueId, QueueStatus, Result};

/// What a stop request found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    /// The job was queued or running and is now stopped.
    Stopped,
    /// The job had already reached a terminal queue status.
    AlreadyFinished,
    /// The queue no longer knows the job.
    NotFound,
}

/// A job handed to a worker by [`WorkQueue::claim`].
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub queue_id: QueueId,
    pub job_id: Uuid,
    pub kind: JobKind,
    pub cancel: CancellationToken,
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn enqueue(&self, queue_id: QueueId, job_id: Uuid, kind: JobKind) -> Result<()>;

    /// Live status. `None` means the job has left the queue.
    async fn status(&self, queue_id: QueueId) -> Result<Option<QueueStatus>>;

    /// Idempotent stop request.
    async fn stop(&self, queue_id: QueueId) -> Result<StopOutcome>;

    /// Oldest queued job of one of `kinds`, moved to `started`.
    async fn claim(&self, kinds: &[JobKind]) -> Result<Option<ClaimedJob>>;

    /// Record a worker's final status. A stopped job stays stopped.
    async fn finish(&self, queue_id: QueueId, status: QueueStatus) -> Result<()>;
}

struct Entry {
    job_id: Uuid,
    kind: JobKind,
    status: QueueStatus,
    cancel: CancellationToken,
    finished_at: Option<Instant>,
}

impl Entry {
    fn close(&mut self, status: QueueStatus) {
        self.status = status;
        self.finished_at = Some(Instant::now());
    }
}

#[derive(Default)]
struct QueueState {
    entries: HashMap<QueueId, Entry>,
    order: VecDeque<QueueId>,
}

/// In-process queue.
pub struct LocalQueue {
    state: Mutex<QueueState>,
    retention: Duration,
}

impl Default for LocalQueue {
    fn default() -> Self {
        Self::new(Duration::from_secs(QUEUE_RETENTION_SECS))
    }
}

impl LocalQueue {
    pub fn new(retention: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            retention,
        }
    }

    /// Entries still visible, terminal or not.
    pub async fn len(&self) -> usize {
        let mut state = self.state.lock().await;
        self.evict_expired(&mut state);
        state.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn evict_expired(&self, state: &mut QueueState) {
        let retention = self.retention;
        let before = state.entries.len();
        state.entries.retain(|_, entry| match entry.finished_at {
            Some(at) => at.elapsed() < retention,
            None => true,
        });
        let evicted = before - state.entries.len();
        if evicted > 0 {
            let QueueState { entries, order } = state;
            order.retain(|id| entries.contains_key(id));
            debug!(evicted, "Evicted expired queue entries");
        }
    }
}

#[async_trait]
impl WorkQueue for LocalQueue {
    async fn enqueue(&self, queue_id: QueueId, job_id: Uuid, kind: JobKind) -> Result<()> {
        let mut state = self.state.lock().await;
        self.evict_expired(&mut state);
        if state.entries.contains_key(&queue_id) {
            return Err(Error::Job(format!("queue id {} already in use", queue_id)));
        }
        state.entries.insert(
            queue_id,
            Entry {
                job_id,
                kind,
                status: QueueStatus::Queued,
                cancel: CancellationToken::new(),
                finished_at: None,
            },
        );
        state.order.push_back(queue_id);
        debug!(%queue_id, %job_id, kind = kind.as_str(), "Job enqueued");
        Ok(())
    }

    async fn status(&self, queue_id: QueueId) -> Result<Option<QueueStatus>> {
        let mut state = self.state.lock().await;
        self.evict_expired(&mut state);
        Ok(state.entries.get(&queue_id).map(|e| e.status))
    }

    async fn stop(&self, queue_id: QueueId) -> Result<StopOutcome> {
        let mut state = self.state.lock().await;
        self.evict_expired(&mut state);
        let Some(entry) = state.entries.get_mut(&queue_id) else {
            return Ok(StopOutcome::NotFound);
        };
        if entry.status.is_terminal() {
            return Ok(StopOutcome::AlreadyFinished);
        }
        let was = entry.status;
        entry.close(QueueStatus::Stopped);
        entry.cancel.cancel();
        info!(%queue_id, job_id = %entry.job_id, was = ?was, "Job stopped");
        Ok(StopOutcome::Stopped)
    }

    async fn claim(&self, kinds: &[JobKind]) -> Result<Option<ClaimedJob>> {
        let mut state = self.state.lock().await;
        self.evict_expired(&mut state);
        let QueueState { entries, order } = &mut *state;

        let next = order.iter().copied().find(|id| {
            entries
                .get(id)
                .is_some_and(|e| e.status == QueueStatus::Queued && kinds.contains(&e.kind))
        });
        let Some(queue_id) = next else {
            return Ok(None);
        };
        let Some(entry) = entries.get_mut(&queue_id) else {
            return Ok(None);
        };
        entry.status = QueueStatus::Started;
        Ok(Some(ClaimedJob {
            queue_id,
            job_id: entry.job_id,
            kind: entry.kind,
            cancel: entry.cancel.clone(),
        }))
    }

    async fn finish(&self, queue_id: QueueId, status: QueueStatus) -> Result<()> {
        if !status.is_terminal() {
            return Err(Error::Job(format!(
                "finish requires a terminal status, got {:?}",
                status
            )));
        }
        let mut state = self.state.lock().await;
        let Some(entry) = state.entries.get_mut(&queue_id) else {
            return Ok(());
        };
        if entry.status == QueueStatus::Stopped {
            debug!(%queue_id, "Ignoring finish for stopped job");
            return Ok(());
        }
        entry.close(status);
        Ok(())
    }
}
