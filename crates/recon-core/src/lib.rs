//! # recon-core
//!
//! Core types, traits, and abstractions for reconciling a network-monitoring
//! source of truth with an asset database.
//!
//! This crate provides the data model and trait seams the other recon crates
//! depend on.

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;
