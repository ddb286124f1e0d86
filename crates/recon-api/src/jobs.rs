//! Job handlers for searches and bulk imports run through the queue.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use recon_core::{Capabilities, JobKind};
use recon_engine::{ImportExecutor, ImportRequest, SearchRequest, SearchService};
use recon_jobs::{JobContext, JobHandler, JobResult};

/// Payload of an import job. Capabilities travel with the job since the
/// worker has no request to read them from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportJob {
    pub request: ImportRequest,
    pub capabilities: Capabilities,
}

pub struct SearchJobHandler {
    search: Arc<SearchService>,
}

impl SearchJobHandler {
    pub fn new(search: Arc<SearchService>) -> Self {
        Self { search }
    }
}

#[async_trait]
impl JobHandler for SearchJobHandler {
    fn kind(&self) -> JobKind {
        JobKind::Search
    }

    #[instrument(skip(self, ctx), fields(subsystem = "jobs", component = "search_job", job_id = %ctx.job_id()))]
    async fn execute(&self, ctx: JobContext) -> JobResult {
        let request: SearchRequest = match serde_json::from_value(ctx.payload().clone()) {
            Ok(r) => r,
            Err(e) => return JobResult::Failed(e.into()),
        };
        ctx.report_progress(10, Some("Searching"));

        match self.search.search(&request).await {
            Ok(response) => {
                ctx.report_progress(100, Some("Done"));
                match serde_json::to_value(&response) {
                    Ok(value) => JobResult::Success(Some(value)),
                    Err(e) => JobResult::Failed(e.into()),
                }
            }
            Err(e) => JobResult::Failed(e),
        }
    }
}

pub struct ImportJobHandler {
    importer: Arc<ImportExecutor>,
}

impl ImportJobHandler {
    pub fn new(importer: Arc<ImportExecutor>) -> Self {
        Self { importer }
    }
}

#[async_trait]
impl JobHandler for ImportJobHandler {
    fn kind(&self) -> JobKind {
        JobKind::Import
    }

    #[instrument(skip(self, ctx), fields(subsystem = "jobs", component = "import_job", job_id = %ctx.job_id()))]
    async fn execute(&self, ctx: JobContext) -> JobResult {
        let start = Instant::now();
        let job: ImportJob = match serde_json::from_value(ctx.payload().clone()) {
            Ok(j) => j,
            Err(e) => return JobResult::Failed(e.into()),
        };

        // Mixed outcomes are still a successful job; the summary says what
        // happened to each record.
        let summary = match self
            .importer
            .import_bulk(&job.request, job.capabilities, ctx.cancellation())
            .await
        {
            Ok(summary) => summary,
            Err(e) => return JobResult::Failed(e),
        };

        info!(
            success = summary.counts.success,
            failed = summary.counts.failed,
            skipped = summary.counts.skipped,
            cancelled = summary.cancelled,
            duration_ms = start.elapsed().as_millis() as u64,
            "Import job finished"
        );
        ctx.report_progress(100, Some("Done"));
        match serde_json::to_value(&summary) {
            Ok(value) => JobResult::Success(Some(value)),
            Err(e) => JobResult::Failed(e.into()),
        }
    }
}
