//! Structured logging field names shared by every crate.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events, operation completions |
//! | DEBUG | Decision points (cache hit/miss, primary selection) |
//! | TRACE | Per-item iteration |

/// Subsystem originating the log event.
/// Values: "api", "source", "engine", "database", "jobs"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "cache", "matcher", "stack", "importer", "worker"
pub const COMPONENT: &str = "component";

/// Logical operation name.
pub const OPERATION: &str = "op";

/// Server profile key.
pub const PROFILE: &str = "profile";

/// Cache fingerprint.
pub const FINGERPRINT: &str = "fingerprint";

/// Monitoring-source device identifier.
pub const DEVICE_ID: &str = "device_id";

/// Queue-side job identifier.
pub const QUEUE_ID: &str = "queue_id";

/// Persisted job record identifier.
pub const JOB_ID: &str = "job_id";

/// Number of records returned or processed.
pub const RESULT_COUNT: &str = "result_count";

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";
