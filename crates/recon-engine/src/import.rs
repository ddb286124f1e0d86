//! Import executor.
//!
//! Each record is validated afresh, turned into an [`ImportPlan`] and applied
//! in its own asset-database transaction. A failing record never affects the
//! others in the same batch.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use recon_core::{
    BulkImportSummary, Capabilities, Error, ImportOutcome, ImportPlan, InterfacePlan,
    ManualSelections, MemberPlan, ObjectRef, OperationalStatus, ReferenceData, Result, ServerProfile,
    SourceRecord, StackGroup, TargetKind, ValidationResult, ValidationStatus, VirtualChassisPlan,
};
use recon_source::InterfaceTypeMap;

use crate::matching::check_selections;
use crate::pipeline::SearchService;

/// One confirmed candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportCandidate {
    pub device_id: i64,
    #[serde(default)]
    pub target_kind: TargetKind,
    #[serde(default)]
    pub selections: ManualSelections,
    #[serde(default)]
    pub update_existing: bool,
    /// Create the object even though its name matches both a device and a
    /// virtual machine.
    #[serde(default)]
    pub accept_conflict: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ImportOptions {
    #[serde(default)]
    pub sync_interfaces: bool,
    #[serde(default)]
    pub detect_stacks: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportRequest {
    #[serde(default)]
    pub server: Option<String>,
    pub candidates: Vec<ImportCandidate>,
    #[serde(flatten)]
    pub options: ImportOptions,
    #[serde(default)]
    pub session: Option<String>,
}

/// Result of importing one record, plus whether it materialized a stack.
struct RecordResult {
    outcome: ImportOutcome,
    stack_created: bool,
}

impl RecordResult {
    fn failure(device_id: i64, error: impl Into<String>) -> Self {
        Self {
            outcome: ImportOutcome::Failure {
                device_id,
                error: error.into(),
            },
            stack_created: false,
        }
    }

    fn skip(device_id: i64, reason: impl Into<String>) -> Self {
        Self {
            outcome: ImportOutcome::Skip {
                device_id,
                reason: reason.into(),
            },
            stack_created: false,
        }
    }
}

fn require_write(capabilities: Capabilities) -> Result<()> {
    if capabilities.may_write {
        Ok(())
    } else {
        Err(Error::Forbidden(
            "importing requires the write capability".to_string(),
        ))
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_primary_ip(record: &SourceRecord) -> Option<IpAddr> {
    let raw = record.ip()?;
    match raw.parse::<IpAddr>() {
        Ok(ip) => Some(ip),
        Err(_) => {
            warn!(
                device_id = record.device_id,
                ip = raw,
                "Ignoring unparseable primary address"
            );
            None
        }
    }
}

/// Failure message for a record that is not ready.
fn not_ready_message(validation: &ValidationResult) -> String {
    if validation.reasons.is_empty() {
        format!("record is not ready for import ({:?})", validation.status)
    } else {
        validation.reasons.join("; ")
    }
}

/// The name conflict is the only thing keeping the record from being ready.
fn conflict_only(validation: &ValidationResult) -> bool {
    validation.conflict
        && validation.missing_fields.is_empty()
        && validation.field_errors.is_empty()
}

/// Virtual-chassis plan for a stack. Only the primary carries the linking id,
/// which the plan's top-level object does.
pub fn chassis_plan(stack: &StackGroup, name: &str) -> VirtualChassisPlan {
    VirtualChassisPlan {
        name: name.to_string(),
        members: stack
            .members
            .iter()
            .map(|m| MemberPlan {
                name: m.suggested_name.clone(),
                position: m.position,
                serial: m.serial.clone(),
                is_primary: m.position == stack.primary_position,
            })
            .collect(),
    }
}

pub struct ImportExecutor {
    search: Arc<SearchService>,
    interface_types: Arc<InterfaceTypeMap>,
}

impl ImportExecutor {
    pub fn new(search: Arc<SearchService>, interface_types: Arc<InterfaceTypeMap>) -> Self {
        Self {
            search,
            interface_types,
        }
    }

    /// Import a single record in one transaction.
    ///
    /// Unlike a bulk import, an unknown device or an invalid selection is
    /// returned as an error instead of a failure outcome.
    #[instrument(
        skip(self, candidate, options, capabilities),
        fields(subsystem = "engine", component = "importer", device_id = candidate.device_id)
    )]
    pub async fn import_one(
        &self,
        server: Option<&str>,
        candidate: &ImportCandidate,
        options: ImportOptions,
        session: Option<&str>,
        capabilities: Capabilities,
    ) -> Result<ImportOutcome> {
        require_write(capabilities)?;
        let profile = self.search.profile(server)?;
        // Reference data is read fresh so objects created earlier are visible.
        let reference = self.search.engine().assets().reference_data().await?;
        let record = self.fetch(&profile, candidate.device_id).await?;
        check_selections(&record, &candidate.selections, &reference)?;

        let device_id = candidate.device_id;
        let outcome = match self
            .import_fetched(&profile, record, candidate, options, session, &reference)
            .await
        {
            Ok(result) => result.outcome,
            Err(e) => {
                warn!(device_id, error = %e, "Import failed");
                ImportOutcome::Failure {
                    device_id,
                    error: e.to_string(),
                }
            }
        };
        Ok(outcome)
    }

    /// Import every candidate, one transaction each. Stops between records
    /// when `cancel` fires; committed records stay committed.
    #[instrument(
        skip(self, request, capabilities, cancel),
        fields(subsystem = "engine", component = "importer", op = "import_bulk", result_count = request.candidates.len())
    )]
    pub async fn import_bulk(
        &self,
        request: &ImportRequest,
        capabilities: Capabilities,
        cancel: &CancellationToken,
    ) -> Result<BulkImportSummary> {
        require_write(capabilities)?;
        let start = Instant::now();
        let profile = self.search.profile(request.server.as_deref())?;
        let reference = self.search.engine().assets().reference_data().await?;

        let mut summary = BulkImportSummary::default();
        for candidate in &request.candidates {
            if cancel.is_cancelled() {
                info!(
                    processed = summary.successes.len() + summary.failures.len() + summary.skips.len(),
                    "Bulk import cancelled between records"
                );
                summary.cancelled = true;
                break;
            }
            let result = self
                .import_record(
                    &profile,
                    candidate,
                    request.options,
                    request.session.as_deref(),
                    &reference,
                )
                .await;
            if result.stack_created {
                summary.counts.stacks_created += 1;
            }
            summary.record(result.outcome);
        }

        if summary.is_partial_failure() {
            let partial = Error::PartialBatchFailure {
                succeeded: summary.counts.success,
                failed: summary.counts.failed,
            };
            warn!(error = %partial, "Bulk import finished with failures");
        }
        info!(
            profile = %profile.key,
            success = summary.counts.success,
            failed = summary.counts.failed,
            skipped = summary.counts.skipped,
            stacks_created = summary.counts.stacks_created,
            duration_ms = start.elapsed().as_millis() as u64,
            "Bulk import complete"
        );
        Ok(summary)
    }

    /// Every error for this record ends up in its outcome.
    async fn import_record(
        &self,
        profile: &ServerProfile,
        candidate: &ImportCandidate,
        options: ImportOptions,
        session: Option<&str>,
        reference: &ReferenceData,
    ) -> RecordResult {
        let device_id = candidate.device_id;
        match self
            .try_import(profile, candidate, options, session, reference)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                warn!(device_id, error = %e, "Import failed");
                RecordResult::failure(device_id, e.to_string())
            }
        }
    }

    async fn try_import(
        &self,
        profile: &ServerProfile,
        candidate: &ImportCandidate,
        options: ImportOptions,
        session: Option<&str>,
        reference: &ReferenceData,
    ) -> Result<RecordResult> {
        let record = self.fetch(profile, candidate.device_id).await?;
        self.import_fetched(profile, record, candidate, options, session, reference)
            .await
    }

    async fn fetch(&self, profile: &ServerProfile, device_id: i64) -> Result<SourceRecord> {
        self.search
            .source()
            .fetch_device(profile, device_id)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("device {} on server '{}'", device_id, profile.key))
            })
    }

    async fn import_fetched(
        &self,
        profile: &ServerProfile,
        record: SourceRecord,
        candidate: &ImportCandidate,
        options: ImportOptions,
        session: Option<&str>,
        reference: &ReferenceData,
    ) -> Result<RecordResult> {
        let device_id = candidate.device_id;
        let mut selections = candidate.selections.clone();
        self.search.sessions().prefill(session, &mut selections).await;

        let validation = self
            .search
            .engine()
            .validate(&record, candidate.target_kind, &selections, reference)
            .await?;

        let plan = match validation.status {
            ValidationStatus::Ready => {
                self.new_object_plan(profile, &record, &validation, candidate, options)
                    .await?
            }
            ValidationStatus::NeedsReview
                if candidate.accept_conflict && conflict_only(&validation) =>
            {
                warn!(
                    device_id,
                    name = %validation.suggested_name,
                    "Importing despite ambiguous name; operator accepted the conflict"
                );
                self.new_object_plan(profile, &record, &validation, candidate, options)
                    .await?
            }
            ValidationStatus::AlreadyExists if candidate.update_existing => {
                let interfaces = self.interfaces(profile, &record, options).await?;
                self.update_plan(&record, &validation, interfaces)?
            }
            ValidationStatus::AlreadyExists => {
                return Ok(RecordResult::skip(device_id, not_ready_message(&validation)));
            }
            ValidationStatus::NeedsReview | ValidationStatus::Blocked => {
                return Ok(RecordResult::failure(
                    device_id,
                    not_ready_message(&validation),
                ));
            }
        };

        let stack_created = plan.existing_id.is_none() && plan.virtual_chassis.is_some();
        let object = self.search.engine().assets().apply(&plan).await?;
        info!(
            device_id,
            object_id = object.id,
            name = %object.name,
            updated = plan.existing_id.is_some(),
            "Record imported"
        );
        Ok(RecordResult {
            outcome: ImportOutcome::Success { device_id, object },
            stack_created,
        })
    }

    async fn new_object_plan(
        &self,
        profile: &ServerProfile,
        record: &SourceRecord,
        validation: &ValidationResult,
        candidate: &ImportCandidate,
        options: ImportOptions,
    ) -> Result<ImportPlan> {
        let stack = if options.detect_stacks && candidate.target_kind == TargetKind::Device {
            self.search
                .stack_for(profile, record, &validation.suggested_name)
                .await
        } else {
            None
        };
        let interfaces = self.interfaces(profile, record, options).await?;
        Ok(self.create_plan(record, validation, interfaces, stack.as_ref()))
    }

    fn create_plan(
        &self,
        record: &SourceRecord,
        validation: &ValidationResult,
        interfaces: Vec<InterfacePlan>,
        stack: Option<&StackGroup>,
    ) -> ImportPlan {
        let resolved = &validation.resolved;
        let id = |r: &Option<ObjectRef>| r.as_ref().map(|o| o.id);
        let primary = stack.and_then(StackGroup::primary);

        // The primary unit's serial identifies the stack's top-level device.
        let serial = match primary {
            Some(member) => member.serial.clone(),
            None => non_empty(&record.serial),
        };
        let kind = validation.target_kind;
        let is_device = kind == TargetKind::Device;

        ImportPlan {
            kind,
            existing_id: None,
            name: validation.suggested_name.clone(),
            source_id: record.device_id,
            status: OperationalStatus::from_up(record.status),
            site_id: if is_device { id(&resolved.site) } else { None },
            device_type_id: if is_device { id(&resolved.device_type) } else { None },
            role_id: id(&resolved.role),
            platform_id: id(&resolved.platform),
            cluster_id: if is_device { None } else { id(&resolved.cluster) },
            rack_id: if is_device { id(&resolved.rack) } else { None },
            serial: if is_device { serial } else { None },
            primary_ip: parse_primary_ip(record),
            interfaces,
            virtual_chassis: stack.map(|s| chassis_plan(s, &validation.suggested_name)),
        }
    }

    fn update_plan(
        &self,
        record: &SourceRecord,
        validation: &ValidationResult,
        interfaces: Vec<InterfacePlan>,
    ) -> Result<ImportPlan> {
        let existing = validation.existing.as_ref().ok_or_else(|| {
            Error::Internal(format!(
                "device {} marked existing without a match",
                record.device_id
            ))
        })?;
        let object = &existing.object;
        Ok(ImportPlan {
            kind: object.kind,
            existing_id: Some(object.id),
            name: object.name.clone(),
            source_id: record.device_id,
            status: OperationalStatus::from_up(record.status),
            site_id: None,
            device_type_id: None,
            role_id: None,
            platform_id: validation.resolved.platform.as_ref().map(|p| p.id),
            cluster_id: None,
            rack_id: None,
            serial: if object.kind == TargetKind::Device {
                non_empty(&record.serial)
            } else {
                None
            },
            primary_ip: parse_primary_ip(record),
            interfaces,
            virtual_chassis: None,
        })
    }

    async fn interfaces(
        &self,
        profile: &ServerProfile,
        record: &SourceRecord,
        options: ImportOptions,
    ) -> Result<Vec<InterfacePlan>> {
        if !options.sync_interfaces {
            return Ok(Vec::new());
        }
        let ports = self
            .search
            .source()
            .fetch_ports(profile, record.device_id)
            .await?;

        let plans: Vec<InterfacePlan> = ports
            .iter()
            .filter_map(|port| {
                let name = port.name(profile.interface_name_field)?;
                Some(InterfacePlan {
                    name: name.to_string(),
                    interface_type: self
                        .interface_types
                        .resolve(port.if_type.as_deref(), port.speed_kbps()),
                    enabled: port
                        .if_admin_status
                        .as_deref()
                        .is_some_and(|s| s.eq_ignore_ascii_case("up")),
                    mtu: port.if_mtu,
                    mac_address: non_empty(&port.if_phys_address),
                    description: non_empty(&port.if_alias),
                })
            })
            .collect();
        debug!(
            device_id = record.device_id,
            ports = ports.len(),
            interfaces = plans.len(),
            "Interface plan built"
        );
        Ok(plans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recon_core::StackMember;

    fn member(position: i64, serial: &str, name: &str) -> StackMember {
        StackMember {
            position,
            serial: Some(serial.into()),
            model: None,
            suggested_name: name.into(),
            designated: false,
            existing: None,
        }
    }

    #[test]
    fn test_chassis_plan_marks_exactly_one_primary() {
        let stack = StackGroup {
            device_id: 1,
            name_pattern: "-M{position}".into(),
            members: vec![member(1, "A", "sw-M1"), member(2, "B", "sw")],
            primary_position: 2,
        };
        let plan = chassis_plan(&stack, "sw");
        assert_eq!(plan.name, "sw");
        let primaries: Vec<&MemberPlan> = plan.members.iter().filter(|m| m.is_primary).collect();
        assert_eq!(primaries.len(), 1);
        assert_eq!(primaries[0].serial.as_deref(), Some("B"));
    }

    #[test]
    fn test_write_capability_required() {
        assert!(matches!(
            require_write(Capabilities::default()),
            Err(Error::Forbidden(_))
        ));
        assert!(require_write(Capabilities {
            may_write: true,
            may_view_queue: false
        })
        .is_ok());
    }

    #[test]
    fn test_import_request_flattens_options() {
        let request: ImportRequest = serde_json::from_value(serde_json::json!({
            "candidates": [{"device_id": 4, "target_kind": "virtual_machine"}],
            "sync_interfaces": true
        }))
        .unwrap();
        assert!(request.options.sync_interfaces);
        assert!(!request.options.detect_stacks);
        assert_eq!(request.candidates[0].target_kind, TargetKind::VirtualMachine);
        assert!(!request.candidates[0].update_existing);
        assert!(!request.candidates[0].accept_conflict);
    }
}
