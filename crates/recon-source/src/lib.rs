//! # recon-source
//!
//! Access to monitoring-source (LibreNMS) instances.
//!
//! - [`config`]: server profiles, both the keyed and the legacy flat shape
//! - [`client`]: the HTTP client implementing [`recon_core::MonitoringSource`]
//! - [`filters`]: search-filter semantics
//! - [`mapping`]: interface-type mapping table

pub mod client;
pub mod config;
pub mod filters;
pub mod mapping;

pub use client::LibreNmsClient;
pub use config::{substitute_env_vars, ProfileSet, ServerConfig, SourceConfig};
pub use filters::{matches, server_query, validate_filters};
pub use mapping::{InterfaceTypeMap, InterfaceTypeRule};
