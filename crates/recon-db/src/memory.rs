//! In-memory job-record repository, used when no PostgreSQL URL is configured.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use recon_core::{
    Error, JobRecord, JobRecordRepository, PersistedStatus, QueueId, Result, StatusUpdate,
};

/// In-memory implementation of [`JobRecordRepository`].
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    records: RwLock<HashMap<Uuid, JobRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRecordRepository for MemoryJobStore {
    async fn create(&self, record: &JobRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(Error::Conflict(format!("job record {} already exists", record.id)));
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn get_by_queue_id(&self, queue_id: QueueId) -> Result<Option<JobRecord>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .find(|r| r.queue_id == queue_id)
            .cloned())
    }

    async fn update_status(&self, id: Uuid, update: StatusUpdate) -> Result<JobRecord> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("job record {}", id)))?;

        if record.status.is_terminal() {
            debug!(job_id = %id, status = record.status.as_str(), "Status write skipped; record is terminal");
            return Ok(record.clone());
        }

        let now = Utc::now();
        record.status = update.status;
        if update.result.is_some() {
            record.result = update.result;
        }
        if update.error.is_some() {
            record.error = update.error;
        }
        if update.status == PersistedStatus::Running && record.started_at.is_none() {
            record.started_at = Some(now);
        }
        if update.status.is_terminal() {
            record.completed_at = Some(now);
        }
        Ok(record.clone())
    }

    async fn attach_result(&self, id: Uuid, result: JsonValue) -> Result<JobRecord> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("job record {}", id)))?;
        if record.result.is_none() {
            record.result = Some(result);
        }
        Ok(record.clone())
    }
}
