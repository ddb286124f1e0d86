//! Data model shared across the reconciliation crates.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Error;

/// Accept the many ways the monitoring source encodes a boolean flag
/// (`true`, `1`, `"1"`, `"up"`, `null`).
fn deserialize_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(match value {
        Some(JsonValue::Bool(b)) => b,
        Some(JsonValue::Number(n)) => n.as_i64().map(|n| n != 0).unwrap_or(false),
        Some(JsonValue::String(s)) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "up" | "yes"
        ),
        _ => false,
    })
}

/// Integers occasionally arrive as strings or null.
fn deserialize_lenient_i64<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(match value {
        Some(JsonValue::Number(n)) => n.as_i64().unwrap_or(0),
        Some(JsonValue::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

// =============================================================================
// SOURCE RECORDS
// =============================================================================

/// A device as known to the monitoring source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceRecord {
    #[serde(deserialize_with = "deserialize_lenient_i64")]
    pub device_id: i64,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default, rename = "sysName")]
    pub sys_name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub hardware: Option<String>,
    #[serde(default)]
    pub os: Option<String>,
    #[serde(default, rename = "type")]
    pub device_type: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    /// Reachability as last polled (up = true).
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub status: bool,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub disabled: bool,
}

impl SourceRecord {
    pub fn hostname(&self) -> Option<&str> {
        non_empty(&self.hostname)
    }

    pub fn sys_name(&self) -> Option<&str> {
        non_empty(&self.sys_name)
    }

    pub fn location(&self) -> Option<&str> {
        non_empty(&self.location)
    }

    pub fn hardware(&self) -> Option<&str> {
        non_empty(&self.hardware)
    }

    pub fn os(&self) -> Option<&str> {
        non_empty(&self.os)
    }

    pub fn ip(&self) -> Option<&str> {
        non_empty(&self.ip)
    }

    pub fn serial(&self) -> Option<&str> {
        non_empty(&self.serial)
    }
}

/// One entPhysical row from the source's inventory tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InventoryEntry {
    #[serde(rename = "entPhysicalIndex", deserialize_with = "deserialize_lenient_i64", default)]
    pub index: i64,
    #[serde(rename = "entPhysicalClass", default)]
    pub class: Option<String>,
    #[serde(rename = "entPhysicalName", default)]
    pub name: Option<String>,
    #[serde(rename = "entPhysicalDescr", default)]
    pub descr: Option<String>,
    #[serde(rename = "entPhysicalModelName", default)]
    pub model: Option<String>,
    #[serde(rename = "entPhysicalSerialNum", default)]
    pub serial: Option<String>,
    #[serde(
        rename = "entPhysicalContainedIn",
        deserialize_with = "deserialize_lenient_i64",
        default
    )]
    pub contained_in: i64,
    #[serde(
        rename = "entPhysicalParentRelPos",
        deserialize_with = "deserialize_lenient_i64",
        default
    )]
    pub parent_rel_pos: i64,
}

impl InventoryEntry {
    pub fn is_class(&self, class: &str) -> bool {
        self.class
            .as_deref()
            .is_some_and(|c| c.eq_ignore_ascii_case(class))
    }
}

/// A network port as reported by the monitoring source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortRecord {
    #[serde(deserialize_with = "deserialize_lenient_i64", default)]
    pub port_id: i64,
    #[serde(rename = "ifName", default)]
    pub if_name: Option<String>,
    #[serde(rename = "ifDescr", default)]
    pub if_descr: Option<String>,
    #[serde(rename = "ifAlias", default)]
    pub if_alias: Option<String>,
    #[serde(rename = "ifType", default)]
    pub if_type: Option<String>,
    /// Bits per second.
    #[serde(rename = "ifSpeed", default)]
    pub if_speed: Option<u64>,
    #[serde(rename = "ifAdminStatus", default)]
    pub if_admin_status: Option<String>,
    #[serde(rename = "ifOperStatus", default)]
    pub if_oper_status: Option<String>,
    #[serde(rename = "ifPhysAddress", default)]
    pub if_phys_address: Option<String>,
    #[serde(rename = "ifMtu", default)]
    pub if_mtu: Option<i64>,
}

impl PortRecord {
    /// Interface name per the profile's preferred field, falling back to the other.
    pub fn name(&self, field: InterfaceNameField) -> Option<&str> {
        let (preferred, other) = match field {
            InterfaceNameField::IfName => (&self.if_name, &self.if_descr),
            InterfaceNameField::IfDescr => (&self.if_descr, &self.if_name),
        };
        non_empty(preferred).or_else(|| non_empty(other))
    }

    pub fn speed_kbps(&self) -> Option<u64> {
        self.if_speed.map(|bps| bps / 1000)
    }
}

// =============================================================================
// SEARCH FILTERS
// =============================================================================

/// Operator-supplied search filters. Combined with AND semantics.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchFilters {
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub device_type: Option<String>,
    #[serde(default)]
    pub os: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub sys_name: Option<String>,
    #[serde(default)]
    pub hardware: Option<String>,
    #[serde(default)]
    pub include_disabled: bool,
}

impl SearchFilters {
    /// Trim every value and drop the empty ones.
    pub fn normalized(&self) -> Self {
        let clean = |v: &Option<String>| non_empty(v).map(str::to_string);
        Self {
            location: clean(&self.location),
            device_type: clean(&self.device_type),
            os: clean(&self.os),
            hostname: clean(&self.hostname),
            sys_name: clean(&self.sys_name),
            hardware: clean(&self.hardware),
            include_disabled: self.include_disabled,
        }
    }

    /// Non-empty filter values as key/value pairs, in a fixed order.
    pub fn pairs(&self) -> Vec<(&'static str, String)> {
        let normalized = self.normalized();
        let mut pairs = Vec::new();
        let fields = [
            ("location", normalized.location),
            ("device_type", normalized.device_type),
            ("os", normalized.os),
            ("hostname", normalized.hostname),
            ("sys_name", normalized.sys_name),
            ("hardware", normalized.hardware),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                pairs.push((key, value));
            }
        }
        if self.include_disabled {
            pairs.push(("include_disabled", "true".to_string()));
        }
        pairs
    }

    /// Number of value filters set (`include_disabled` is a modifier, not a filter).
    pub fn active_count(&self) -> usize {
        self.pairs()
            .iter()
            .filter(|(k, _)| *k != "include_disabled")
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.active_count() == 0
    }
}

// =============================================================================
// SERVER PROFILES
// =============================================================================

/// Port field used to name imported interfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum InterfaceNameField {
    #[serde(rename = "ifName")]
    IfName,
    #[default]
    #[serde(rename = "ifDescr")]
    IfDescr,
}

impl FromStr for InterfaceNameField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ifName" => Ok(Self::IfName),
            "ifDescr" => Ok(Self::IfDescr),
            other => Err(Error::Configuration(format!(
                "interface_name_field must be 'ifName' or 'ifDescr', got '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for InterfaceNameField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IfName => write!(f, "ifName"),
            Self::IfDescr => write!(f, "ifDescr"),
        }
    }
}

/// Named configuration for one monitoring-source instance.
#[derive(Clone, Serialize)]
pub struct ServerProfile {
    pub key: String,
    pub display_name: String,
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_token: String,
    pub cache_timeout_secs: u64,
    pub verify_ssl: bool,
    pub interface_name_field: InterfaceNameField,
    pub request_timeout_secs: u64,
}

impl fmt::Debug for ServerProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerProfile")
            .field("key", &self.key)
            .field("display_name", &self.display_name)
            .field("base_url", &self.base_url)
            .field("api_token", &"<redacted>")
            .field("cache_timeout_secs", &self.cache_timeout_secs)
            .field("verify_ssl", &self.verify_ssl)
            .field("interface_name_field", &self.interface_name_field)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// Outcome of a connection diagnostic. Never an error value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionStatus {
    pub ok: bool,
    pub server: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// SNMP parameters for registering a device with the monitoring source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "version")]
pub enum SnmpCredentials {
    #[serde(rename = "v2c")]
    V2c { community: String },
    #[serde(rename = "v3")]
    V3 {
        authlevel: String,
        authname: String,
        #[serde(default)]
        authpass: Option<String>,
        #[serde(default)]
        authalgo: Option<String>,
        #[serde(default)]
        cryptopass: Option<String>,
        #[serde(default)]
        cryptoalgo: Option<String>,
    },
}

/// Request to add a device to the monitoring source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceRegistration {
    pub hostname: String,
    #[serde(flatten)]
    pub snmp: SnmpCredentials,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
    #[serde(default)]
    pub force_add: bool,
}

// =============================================================================
// ASSET DATABASE REFERENCE DATA
// =============================================================================

/// Lightweight reference to an asset-database object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectRef {
    pub id: i64,
    pub name: String,
}

impl ObjectRef {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Site {
    pub id: i64,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceType {
    pub id: i64,
    pub model: String,
    pub slug: String,
    #[serde(default)]
    pub manufacturer: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Platform {
    pub id: i64,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Role {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cluster {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rack {
    pub id: i64,
    pub name: String,
    pub site_id: i64,
}

/// Snapshot of the asset database's lookup tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReferenceData {
    #[serde(default)]
    pub sites: Vec<Site>,
    #[serde(default)]
    pub device_types: Vec<DeviceType>,
    #[serde(default)]
    pub platforms: Vec<Platform>,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub clusters: Vec<Cluster>,
    #[serde(default)]
    pub racks: Vec<Rack>,
}

impl ReferenceData {
    pub fn site(&self, id: i64) -> Option<&Site> {
        self.sites.iter().find(|s| s.id == id)
    }

    pub fn device_type(&self, id: i64) -> Option<&DeviceType> {
        self.device_types.iter().find(|t| t.id == id)
    }

    pub fn platform(&self, id: i64) -> Option<&Platform> {
        self.platforms.iter().find(|p| p.id == id)
    }

    pub fn role(&self, id: i64) -> Option<&Role> {
        self.roles.iter().find(|r| r.id == id)
    }

    pub fn cluster(&self, id: i64) -> Option<&Cluster> {
        self.clusters.iter().find(|c| c.id == id)
    }

    pub fn rack(&self, id: i64) -> Option<&Rack> {
        self.racks.iter().find(|r| r.id == id)
    }
}

// =============================================================================
// VALIDATION
// =============================================================================

/// Kind of asset-database object a source record is imported as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    #[default]
    Device,
    VirtualMachine,
}

impl TargetKind {
    /// Fields that must be resolved before a record of this kind is ready.
    pub fn required_fields(&self) -> &'static [RequiredField] {
        match self {
            Self::Device => &[
                RequiredField::Site,
                RequiredField::DeviceType,
                RequiredField::Role,
            ],
            Self::VirtualMachine => &[RequiredField::Cluster],
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device => write!(f, "device"),
            Self::VirtualMachine => write!(f, "virtual machine"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredField {
    Site,
    DeviceType,
    Role,
    Cluster,
}

impl fmt::Display for RequiredField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Site => write!(f, "site"),
            Self::DeviceType => write!(f, "device_type"),
            Self::Role => write!(f, "role"),
            Self::Cluster => write!(f, "cluster"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationStatus {
    Ready,
    NeedsReview,
    AlreadyExists,
    Blocked,
}

/// Operator-chosen object ids. A selection overrides any auto-match.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManualSelections {
    #[serde(default)]
    pub site: Option<i64>,
    #[serde(default)]
    pub device_type: Option<i64>,
    #[serde(default)]
    pub role: Option<i64>,
    #[serde(default)]
    pub platform: Option<i64>,
    #[serde(default)]
    pub cluster: Option<i64>,
    #[serde(default)]
    pub rack: Option<i64>,
}

/// An existing asset-database object that may correspond to a source record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssetObject {
    pub kind: TargetKind,
    pub id: i64,
    pub name: String,
    /// Linking identifier: the source's external device id.
    #[serde(default)]
    pub source_id: Option<i64>,
    #[serde(default)]
    pub primary_ip: Option<String>,
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default)]
    pub site_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateRule {
    /// Object carries the source's external id. Authoritative.
    LinkingId,
    /// Exact name match against exactly one target kind.
    Name,
    /// Primary address already assigned elsewhere. Informational only.
    PrimaryAddress,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExistingMatch {
    pub rule: DuplicateRule,
    pub object: AssetObject,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Resolved value for each selectable field, whichever way it was resolved.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResolvedFields {
    pub site: Option<ObjectRef>,
    pub device_type: Option<ObjectRef>,
    pub role: Option<ObjectRef>,
    pub platform: Option<ObjectRef>,
    pub cluster: Option<ObjectRef>,
    pub rack: Option<ObjectRef>,
}

impl ResolvedFields {
    pub fn get(&self, field: RequiredField) -> Option<&ObjectRef> {
        match field {
            RequiredField::Site => self.site.as_ref(),
            RequiredField::DeviceType => self.device_type.as_ref(),
            RequiredField::Role => self.role.as_ref(),
            RequiredField::Cluster => self.cluster.as_ref(),
        }
    }
}

/// Candidates the engine matched on its own, before manual overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AutoMatches {
    pub site: Option<ObjectRef>,
    pub device_type: Option<ObjectRef>,
    pub platform: Option<ObjectRef>,
}

/// Per-record, per-target-kind readiness verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationResult {
    pub device_id: i64,
    pub target_kind: TargetKind,
    pub status: ValidationStatus,
    pub suggested_name: String,
    pub missing_fields: BTreeSet<RequiredField>,
    pub resolved: ResolvedFields,
    pub auto_matched: AutoMatches,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing: Option<ExistingMatch>,
    /// The name matches objects of both target kinds. Proceeding is the operator's call.
    #[serde(default)]
    pub conflict: bool,
    pub warnings: Vec<String>,
    pub reasons: Vec<String>,
    pub field_errors: Vec<FieldError>,
}

// =============================================================================
// STACKS
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackMember {
    pub position: i64,
    pub serial: Option<String>,
    pub model: Option<String>,
    pub suggested_name: String,
    /// The inventory marks this unit as the stack master/active unit.
    pub designated: bool,
    /// Asset object already representing this unit, matched by serial.
    pub existing: Option<AssetObject>,
}

/// An inferred multi-unit device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackGroup {
    pub device_id: i64,
    pub name_pattern: String,
    /// Ordered by position.
    pub members: Vec<StackMember>,
    pub primary_position: i64,
}

impl StackGroup {
    pub fn primary(&self) -> Option<&StackMember> {
        self.members
            .iter()
            .find(|m| m.position == self.primary_position)
    }
}

// =============================================================================
// IMPORT
// =============================================================================

/// Permission capabilities granted to the caller by the gate in front of us.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub may_write: bool,
    pub may_view_queue: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationalStatus {
    Active,
    Offline,
}

impl OperationalStatus {
    pub fn from_up(up: bool) -> Self {
        if up {
            Self::Active
        } else {
            Self::Offline
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterfacePlan {
    pub name: String,
    pub interface_type: String,
    pub enabled: bool,
    pub mtu: Option<i64>,
    pub mac_address: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemberPlan {
    pub name: String,
    pub position: i64,
    pub serial: Option<String>,
    pub is_primary: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VirtualChassisPlan {
    pub name: String,
    pub members: Vec<MemberPlan>,
}

/// Everything one create-or-update transaction writes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImportPlan {
    pub kind: TargetKind,
    /// Set when updating an existing object in place.
    pub existing_id: Option<i64>,
    pub name: String,
    pub source_id: i64,
    pub status: OperationalStatus,
    pub site_id: Option<i64>,
    pub device_type_id: Option<i64>,
    pub role_id: Option<i64>,
    pub platform_id: Option<i64>,
    pub cluster_id: Option<i64>,
    pub rack_id: Option<i64>,
    pub serial: Option<String>,
    pub primary_ip: Option<std::net::IpAddr>,
    pub interfaces: Vec<InterfacePlan>,
    pub virtual_chassis: Option<VirtualChassisPlan>,
}

/// Per-record import result. Created once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ImportOutcome {
    Success { device_id: i64, object: ObjectRef },
    Failure { device_id: i64, error: String },
    Skip { device_id: i64, reason: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportCounts {
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub stacks_created: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SuccessEntry {
    pub device_id: i64,
    pub object: ObjectRef,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReasonEntry {
    pub device_id: i64,
    pub reason: String,
}

/// Aggregate of a bulk import: each list plus counts that are always present.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BulkImportSummary {
    pub successes: Vec<SuccessEntry>,
    pub failures: Vec<ReasonEntry>,
    pub skips: Vec<ReasonEntry>,
    pub counts: ImportCounts,
    /// True when the run stopped early on cancellation.
    #[serde(default)]
    pub cancelled: bool,
}

impl BulkImportSummary {
    pub fn record(&mut self, outcome: ImportOutcome) {
        match outcome {
            ImportOutcome::Success { device_id, object } => {
                self.counts.success += 1;
                self.successes.push(SuccessEntry { device_id, object });
            }
            ImportOutcome::Failure { device_id, error } => {
                self.counts.failed += 1;
                self.failures.push(ReasonEntry {
                    device_id,
                    reason: error,
                });
            }
            ImportOutcome::Skip { device_id, reason } => {
                self.counts.skipped += 1;
                self.skips.push(ReasonEntry { device_id, reason });
            }
        }
    }

    pub fn is_partial_failure(&self) -> bool {
        self.counts.failed > 0 && self.counts.success > 0
    }
}

// =============================================================================
// JOBS
// =============================================================================

/// Queue-side job identifier.
pub type QueueId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Search,
    Import,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Import => "import",
        }
    }
}

impl FromStr for JobKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "search" => Ok(Self::Search),
            "import" => Ok(Self::Import),
            other => Err(Error::validation("kind", format!("unknown job kind '{}'", other))),
        }
    }
}

/// Durable job status. Has no "cancelled" value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistedStatus {
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
    Errored,
}

impl PersistedStatus {
    pub const ALL: [PersistedStatus; 6] = [
        Self::Pending,
        Self::Scheduled,
        Self::Running,
        Self::Completed,
        Self::Failed,
        Self::Errored,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Errored)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Errored => "errored",
        }
    }
}

impl FromStr for PersistedStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| Error::Internal(format!("unknown persisted job status '{}'", s)))
    }
}

/// Live status as reported by the work queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Queued,
    Started,
    Finished,
    Stopped,
    Failed,
}

impl QueueStatus {
    pub const ALL: [QueueStatus; 5] = [
        Self::Queued,
        Self::Started,
        Self::Finished,
        Self::Stopped,
        Self::Failed,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Stopped | Self::Failed)
    }
}

/// What a caller asks the orchestrator to run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkSpec {
    pub kind: JobKind,
    pub payload: JsonValue,
    #[serde(default)]
    pub estimated_count: Option<i64>,
    #[serde(default)]
    pub prefer_async: bool,
}

/// Durable record of one unit of asynchronous work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub id: Uuid,
    pub queue_id: QueueId,
    pub kind: JobKind,
    pub status: PersistedStatus,
    pub payload: JsonValue,
    pub result: Option<JsonValue>,
    pub error: Option<String>,
    pub estimated_count: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new(queue_id: QueueId, spec: &WorkSpec) -> Self {
        Self {
            id: Uuid::now_v7(),
            queue_id,
            kind: spec.kind,
            status: PersistedStatus::Pending,
            payload: spec.payload.clone(),
            result: None,
            error: None,
            estimated_count: spec.estimated_count,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// A status write against a persisted job record.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: PersistedStatus,
    pub result: Option<JsonValue>,
    pub error: Option<String>,
}

impl StatusUpdate {
    pub fn to(status: PersistedStatus) -> Self {
        Self {
            status,
            result: None,
            error: None,
        }
    }

    pub fn with_result(mut self, result: Option<JsonValue>) -> Self {
        self.result = result;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}
