//! # recon-api
//!
//! HTTP surface for inventory reconciliation: search, validate, import,
//! job polling and cancellation, server-profile diagnostics.

pub mod capabilities;
pub mod config;
pub mod error;
pub mod jobs;
pub mod routes;
pub mod state;

pub use capabilities::{Caps, CAN_VIEW_QUEUE_HEADER, CAN_WRITE_HEADER};
pub use config::{AppConfig, JobsConfig, ServerSettings, SessionConfig};
pub use error::ApiError;
pub use jobs::{ImportJob, ImportJobHandler, SearchJobHandler};
pub use routes::router;
pub use state::{App, AppState};
