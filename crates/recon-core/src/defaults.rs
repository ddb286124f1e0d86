//! Centralized default constants for inventory reconciliation.
//!
//! All crates reference these constants instead of defining their own magic
//! numbers. Organized by subsystem.

// =============================================================================
// MONITORING SOURCE
// =============================================================================

/// Name given to the implicit profile built from the legacy flat config shape.
pub const DEFAULT_PROFILE: &str = "default";

/// Cache TTL for source data and reference data, in seconds.
pub const CACHE_TIMEOUT_SECS: u64 = 300;

/// Timeout for outbound requests to the monitoring source, in seconds.
pub const SOURCE_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Port field used for interface names when a profile does not say.
pub const INTERFACE_NAME_FIELD: &str = "ifDescr";

/// Upper bound on cache entries across all fingerprints.
pub const CACHE_MAX_ENTRIES: u64 = 10_000;

// =============================================================================
// NAMING
// =============================================================================

/// Suffix appended to the primary name to build stack member names.
pub const VC_MEMBER_NAME_PATTERN: &str = "-M{position}";

/// Fallback interface type when no mapping rule applies.
pub const INTERFACE_TYPE_FALLBACK: &str = "other";

// =============================================================================
// SESSION
// =============================================================================

/// Idle lifetime of remembered manual selections, in seconds.
pub const SESSION_TTL_SECS: u64 = 3600;

// =============================================================================
// JOB PROCESSING
// =============================================================================

/// Number of concurrent queue consumers.
pub const JOB_CONCURRENCY: usize = 2;

/// Maximum job execution time before the worker records it as errored.
pub const JOB_TIMEOUT_SECS: u64 = 3600;

/// How long a finished, failed, or stopped job stays visible in the live queue.
pub const QUEUE_RETENTION_SECS: u64 = 500;

/// Suggested client polling interval for async jobs, in milliseconds.
pub const JOB_POLL_INTERVAL_MS: u64 = 2000;

/// Broadcast channel capacity for worker events.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 3000;
