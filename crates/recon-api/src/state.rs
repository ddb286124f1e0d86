//! Application wiring.

use std::sync::Arc;

use tracing::info;

use recon_core::defaults::CACHE_MAX_ENTRIES;
use recon_core::{AssetRepository, JobRecordRepository, MonitoringSource, Result};
use recon_engine::{ImportExecutor, ResultCache, SearchService, SessionSelections, ValidationEngine};
use recon_jobs::{HandlerRegistry, JobOrchestrator, JobWorker, LocalQueue, WorkerBuilder};

use crate::config::AppConfig;
use crate::jobs::{ImportJobHandler, SearchJobHandler};

/// Shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub search: Arc<SearchService>,
    pub importer: Arc<ImportExecutor>,
    pub jobs: Arc<JobOrchestrator>,
}

/// Everything the binary starts: request state plus the worker pool that
/// drains the same queue.
pub struct App {
    pub state: AppState,
    pub worker: JobWorker,
}

impl App {
    /// Wire services from configuration. Collaborators are passed in so
    /// tests can swap the source and the stores.
    pub async fn build(
        config: &AppConfig,
        source: Arc<dyn MonitoringSource>,
        assets: Arc<dyn AssetRepository>,
        records: Arc<dyn JobRecordRepository>,
    ) -> Result<Self> {
        let profiles = Arc::new(config.profiles()?);
        let interface_types = Arc::new(config.interface_types()?);
        info!(
            subsystem = "api",
            profiles = profiles.len(),
            active = %profiles.active().key,
            interface_rules = interface_types.len(),
            "Configuration normalized"
        );

        let engine = Arc::new(ValidationEngine::new(assets, config.naming.clone()));
        let search = Arc::new(SearchService::new(
            source,
            profiles,
            engine,
            ResultCache::new(CACHE_MAX_ENTRIES),
            SessionSelections::new(config.session_ttl()),
        ));
        let importer = Arc::new(ImportExecutor::new(search.clone(), interface_types));

        let queue = Arc::new(LocalQueue::new(config.jobs.queue_retention()));
        let registry = HandlerRegistry::new();
        let worker = WorkerBuilder::new(queue.clone(), records.clone())
            .with_config(config.jobs.worker_config())
            .with_registry(registry.clone())
            .with_handler(SearchJobHandler::new(search.clone()))
            .with_handler(ImportJobHandler::new(importer.clone()))
            .build()
            .await;
        let jobs = Arc::new(JobOrchestrator::new(queue, records, registry));

        Ok(Self {
            state: AppState {
                search,
                importer,
                jobs,
            },
            worker,
        })
    }
}
