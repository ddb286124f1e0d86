//! # recon-db
//!
//! Storage for inventory reconciliation.
//!
//! This crate provides:
//! - Job-record repositories, in-memory and PostgreSQL
//! - Connection pool management and migrations
//! - An in-memory asset repository ([`test_fixtures::MemoryAssetStore`])

pub mod jobs;
pub mod memory;
pub mod pool;

// Always compiled so integration tests in other crates and the API binary can use it.
pub mod test_fixtures;

pub use jobs::PgJobRecordRepository;
pub use memory::MemoryJobStore;
#[cfg(feature = "migrations")]
pub use pool::migrate;
pub use pool::{create_pool, create_pool_with_config, PoolConfig};
pub use test_fixtures::MemoryAssetStore;
