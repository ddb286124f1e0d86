//! Trait seams between the reconciliation crates.
//!
//! The monitoring source, the asset database, and the persisted job store are
//! external collaborators; everything else talks to them through these traits.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    AssetObject, ConnectionStatus, DeviceRegistration, ImportPlan, InventoryEntry, JobRecord,
    ObjectRef, PortRecord, QueueId, ReferenceData, SearchFilters, ServerProfile, SourceRecord,
    StatusUpdate,
};

/// Read access to a monitoring-source instance (plus device registration).
#[async_trait]
pub trait MonitoringSource: Send + Sync {
    /// Search devices. Filters combine with AND semantics; an empty filter
    /// set is a validation error.
    async fn search(
        &self,
        profile: &ServerProfile,
        filters: &SearchFilters,
    ) -> Result<Vec<SourceRecord>>;

    /// Fetch one device by its external id.
    async fn fetch_device(
        &self,
        profile: &ServerProfile,
        device_id: i64,
    ) -> Result<Option<SourceRecord>>;

    /// Fetch the full entPhysical inventory tree for a device.
    async fn fetch_inventory(
        &self,
        profile: &ServerProfile,
        device_id: i64,
    ) -> Result<Vec<InventoryEntry>>;

    /// Fetch the ports of a device.
    async fn fetch_ports(&self, profile: &ServerProfile, device_id: i64)
        -> Result<Vec<PortRecord>>;

    /// Connection diagnostic. Never fails; problems are reported in the status.
    async fn test_connection(&self, profile: &ServerProfile) -> ConnectionStatus;

    /// Add a device to the monitoring source.
    async fn register_device(
        &self,
        profile: &ServerProfile,
        registration: &DeviceRegistration,
    ) -> Result<JsonValue>;
}

/// The asset database, seen as a repository.
#[async_trait]
pub trait AssetRepository: Send + Sync {
    /// Sites, device types, platforms, roles, clusters and racks.
    async fn reference_data(&self) -> Result<ReferenceData>;

    /// Objects of either kind carrying the given linking identifier.
    async fn find_by_source_id(&self, source_id: i64) -> Result<Vec<AssetObject>>;

    /// Objects of either kind whose name equals `name` exactly (case-sensitive).
    async fn find_by_name(&self, name: &str) -> Result<Vec<AssetObject>>;

    /// Objects whose primary address is `ip`.
    async fn find_by_primary_ip(&self, ip: &str) -> Result<Vec<AssetObject>>;

    /// Physical devices with the given serial number.
    async fn find_by_serial(&self, serial: &str) -> Result<Vec<AssetObject>>;

    /// Apply one import plan in a single transaction. On error nothing from
    /// the plan is visible.
    async fn apply(&self, plan: &ImportPlan) -> Result<ObjectRef>;
}

/// Durable store of job records.
#[async_trait]
pub trait JobRecordRepository: Send + Sync {
    async fn create(&self, record: &JobRecord) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>>;

    async fn get_by_queue_id(&self, queue_id: QueueId) -> Result<Option<JobRecord>>;

    /// Write a status. Terminal records are immutable: the write is skipped
    /// and the stored record returned as-is.
    async fn update_status(&self, id: Uuid, update: StatusUpdate) -> Result<JobRecord>;

    /// Attach a result to a record that has none, whatever its status. A
    /// job stopped mid-run may be reconciled to `failed` before its handler
    /// returns; this keeps what the handler reports it committed.
    async fn attach_result(&self, id: Uuid, result: JsonValue) -> Result<JobRecord>;
}
