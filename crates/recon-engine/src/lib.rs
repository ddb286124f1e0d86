//! # recon-engine
//!
//! The search-validate-import pipeline.
//!
//! - [`cache`]: fingerprinted TTL cache
//! - [`matching`]: validation against the asset database
//! - [`stack`]: virtual-chassis detection
//! - [`pipeline`]: search and validate requests, tying the above together
//! - [`import`]: per-record transactional import

pub mod cache;
pub mod import;
pub mod matching;
pub mod naming;
pub mod pipeline;
pub mod session;
pub mod stack;

pub use cache::{filter_fingerprint, fingerprint, Cached, ResultCache};
pub use import::{chassis_plan, ImportCandidate, ImportExecutor, ImportOptions, ImportRequest};
pub use matching::{auto_match, check_selections, resolve_selections, ValidationEngine};
pub use naming::{strip_domain, NamingPolicy};
pub use pipeline::{
    Candidate, SearchRequest, SearchResponse, SearchService, ValidateRequest, DATA_DEVICE,
    DATA_DEVICES, DATA_INVENTORY, DATA_REFERENCE,
};
pub use session::SessionSelections;
pub use stack::{select_primary, stack_members, StackDetector};
