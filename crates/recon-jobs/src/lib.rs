//! # recon-jobs
//!
//! Background jobs for long searches and bulk imports.
//!
//! This crate provides:
//! - A live work queue with stop requests and a retention window
//! - A worker pool that keeps persisted job records in step with the queue
//! - The orchestrator: submit, poll, cancel, reconcile, and
//!   capability-aware synchronous fallback
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use recon_db::MemoryJobStore;
//! use recon_jobs::{HandlerRegistry, JobOrchestrator, LocalQueue, NoOpHandler, WorkerBuilder};
//!
//! let queue = Arc::new(LocalQueue::default());
//! let records = Arc::new(MemoryJobStore::new());
//! let registry = HandlerRegistry::new();
//!
//! let worker = WorkerBuilder::new(queue.clone(), records.clone())
//!     .with_registry(registry.clone())
//!     .with_handler(NoOpHandler::new(JobKind::Search))
//!     .build()
//!     .await;
//! let handle = worker.start();
//!
//! let jobs = JobOrchestrator::new(queue, records, registry);
//! let record = jobs.submit(&spec).await?;
//! let view = jobs.poll(record.queue_id).await?;
//!
//! handle.shutdown().await?;
//! ```

pub mod handler;
pub mod orchestrator;
pub mod queue;
pub mod worker;

pub use handler::{HandlerRegistry, JobContext, JobHandler, JobResult, NoOpHandler};
pub use orchestrator::{
    fallback_queue_status, map_queue_status, CancelOutcome, JobOrchestrator, JobStatusView,
    RunOutcome, StatusSource,
};
pub use queue::{ClaimedJob, LocalQueue, StopOutcome, WorkQueue};
pub use worker::{JobWorker, WorkerBuilder, WorkerConfig, WorkerEvent, WorkerHandle};
