//! PostgreSQL job-record repository.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use recon_core::{
    Error, JobKind, JobRecord, JobRecordRepository, PersistedStatus, QueueId, Result,
    StatusUpdate,
};

const COLUMNS: &str = "id, queue_id, kind, status, payload, result, error, estimated_count, \
                       created_at, started_at, completed_at";

/// PostgreSQL implementation of [`JobRecordRepository`].
pub struct PgJobRecordRepository {
    pool: Pool<Postgres>,
}

impl PgJobRecordRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: sqlx::postgres::PgRow) -> Result<JobRecord> {
        let kind: String = row.get("kind");
        let status: String = row.get("status");
        Ok(JobRecord {
            id: row.get("id"),
            queue_id: row.get("queue_id"),
            kind: kind.parse::<JobKind>()?,
            status: status.parse::<PersistedStatus>()?,
            payload: row.get("payload"),
            result: row.get("result"),
            error: row.get("error"),
            estimated_count: row.get("estimated_count"),
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
        })
    }
}

#[async_trait]
impl JobRecordRepository for PgJobRecordRepository {
    async fn create(&self, record: &JobRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO recon_job_records
                (id, queue_id, kind, status, payload, estimated_count, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(record.id)
        .bind(record.queue_id)
        .bind(record.kind.as_str())
        .bind(record.status.as_str())
        .bind(&record.payload)
        .bind(record.estimated_count)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM recon_job_records WHERE id = $1",
            COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        row.map(Self::parse_row).transpose()
    }

    async fn get_by_queue_id(&self, queue_id: QueueId) -> Result<Option<JobRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM recon_job_records WHERE queue_id = $1",
            COLUMNS
        ))
        .bind(queue_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        row.map(Self::parse_row).transpose()
    }

    async fn update_status(&self, id: Uuid, update: StatusUpdate) -> Result<JobRecord> {
        let now = Utc::now();
        let terminal = update.status.is_terminal();

        // Terminal rows are excluded by the WHERE clause, so a write against
        // one touches nothing and falls through to the read below.
        let row = sqlx::query(&format!(
            "UPDATE recon_job_records SET
                status = $2,
                result = COALESCE($3, result),
                error = COALESCE($4, error),
                started_at = CASE WHEN $2 = 'running' AND started_at IS NULL THEN $5 ELSE started_at END,
                completed_at = CASE WHEN $6 THEN $5 ELSE completed_at END
             WHERE id = $1 AND status NOT IN ('completed', 'failed', 'errored')
             RETURNING {}",
            COLUMNS
        ))
        .bind(id)
        .bind(update.status.as_str())
        .bind(&update.result)
        .bind(&update.error)
        .bind(now)
        .bind(terminal)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        match row {
            Some(row) => Self::parse_row(row),
            None => {
                debug!(job_id = %id, "Status write skipped; record is terminal or missing");
                self.get(id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("job record {}", id)))
            }
        }
    }

    async fn attach_result(&self, id: Uuid, result: JsonValue) -> Result<JobRecord> {
        let row = sqlx::query(&format!(
            "UPDATE recon_job_records SET result = $2
             WHERE id = $1 AND result IS NULL
             RETURNING {}",
            COLUMNS
        ))
        .bind(id)
        .bind(&result)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        match row {
            Some(row) => Self::parse_row(row),
            None => self
                .get(id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("job record {}", id))),
        }
    }
}
