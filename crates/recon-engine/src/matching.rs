//! Matching and validation of source records against the asset database.
//!
//! Every call recomputes the whole [`ValidationResult`]: required fields
//! depend on the target kind, so a change to any input can change the status.
//!
//! Matching is exact:
//!
//! | Field | Rule |
//! |-------|------|
//! | site | location == site name, case-sensitive |
//! | device type | hardware == model, case-sensitive |
//! | platform | os == name or slug, case-insensitive |
//! | role, cluster | never auto-matched |
//!
//! Duplicate detection runs in priority order: linking identifier, then an
//! exact name match against exactly one target kind, then a primary-address
//! match that only produces a warning.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use tracing::{debug, instrument};

use recon_core::{
    AssetObject, AssetRepository, AutoMatches, DuplicateRule, Error, ExistingMatch, FieldError,
    ManualSelections, ObjectRef, ReferenceData, ResolvedFields, Result, SourceRecord, TargetKind,
    ValidationResult, ValidationStatus,
};

use crate::naming::NamingPolicy;

/// Candidates found by exact matching, before manual selections apply.
pub fn auto_match(record: &SourceRecord, reference: &ReferenceData) -> AutoMatches {
    let site = record.location().and_then(|location| {
        reference
            .sites
            .iter()
            .find(|s| s.name == location)
            .map(|s| ObjectRef::new(s.id, s.name.clone()))
    });

    let device_type = record.hardware().and_then(|hardware| {
        reference
            .device_types
            .iter()
            .find(|t| t.model == hardware)
            .map(|t| ObjectRef::new(t.id, t.model.clone()))
    });

    let platform = record.os().and_then(|os| {
        reference
            .platforms
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(os) || p.slug.eq_ignore_ascii_case(os))
            .map(|p| ObjectRef::new(p.id, p.name.clone()))
    });

    AutoMatches {
        site,
        device_type,
        platform,
    }
}

fn lookup(
    errors: &mut Vec<FieldError>,
    field: &str,
    id: i64,
    found: Option<(i64, &String)>,
) -> Option<ObjectRef> {
    match found {
        Some((id, name)) => Some(ObjectRef::new(id, name.clone())),
        None => {
            errors.push(FieldError {
                field: field.to_string(),
                message: format!("selected {} {} does not exist", field.replace('_', " "), id),
            });
            None
        }
    }
}

/// Apply manual selections on top of auto-matches.
///
/// A selection pointing at a missing object, or a rack outside the resolved
/// site, is reported as a field error and leaves that field unresolved.
pub fn resolve_selections(
    auto: &AutoMatches,
    selections: &ManualSelections,
    reference: &ReferenceData,
) -> (ResolvedFields, Vec<FieldError>) {
    let mut errors = Vec::new();

    let site = match selections.site {
        Some(id) => lookup(&mut errors, "site", id, reference.site(id).map(|s| (s.id, &s.name))),
        None => auto.site.clone(),
    };
    let device_type = match selections.device_type {
        Some(id) => lookup(
            &mut errors,
            "device_type",
            id,
            reference.device_type(id).map(|t| (t.id, &t.model)),
        ),
        None => auto.device_type.clone(),
    };
    let platform = match selections.platform {
        Some(id) => lookup(
            &mut errors,
            "platform",
            id,
            reference.platform(id).map(|p| (p.id, &p.name)),
        ),
        None => auto.platform.clone(),
    };
    let role = selections.role.and_then(|id| {
        lookup(&mut errors, "role", id, reference.role(id).map(|r| (r.id, &r.name)))
    });
    let cluster = selections.cluster.and_then(|id| {
        lookup(
            &mut errors,
            "cluster",
            id,
            reference.cluster(id).map(|c| (c.id, &c.name)),
        )
    });

    let rack = match selections.rack {
        None => None,
        Some(id) => match reference.rack(id) {
            None => lookup(&mut errors, "rack", id, None),
            Some(rack) if site.as_ref().map(|s| s.id) == Some(rack.site_id) => {
                Some(ObjectRef::new(rack.id, rack.name.clone()))
            }
            Some(_) => {
                errors.push(FieldError {
                    field: "rack".to_string(),
                    message: format!("rack {} does not belong to the selected site", id),
                });
                None
            }
        },
    };

    (
        ResolvedFields {
            site,
            device_type,
            role,
            platform,
            cluster,
            rack,
        },
        errors,
    )
}

/// Reject conflicting selections outright, naming the offending field.
pub fn check_selections(
    record: &SourceRecord,
    selections: &ManualSelections,
    reference: &ReferenceData,
) -> Result<()> {
    let auto = auto_match(record, reference);
    let (_, errors) = resolve_selections(&auto, selections, reference);
    match errors.into_iter().next() {
        Some(error) => Err(Error::validation(error.field, error.message)),
        None => Ok(()),
    }
}

/// Computes validation results against the asset database.
pub struct ValidationEngine {
    assets: Arc<dyn AssetRepository>,
    naming: NamingPolicy,
}

impl ValidationEngine {
    pub fn new(assets: Arc<dyn AssetRepository>, naming: NamingPolicy) -> Self {
        Self { assets, naming }
    }

    pub fn naming(&self) -> &NamingPolicy {
        &self.naming
    }

    pub fn assets(&self) -> &Arc<dyn AssetRepository> {
        &self.assets
    }

    /// Validate `record` as `kind`.
    ///
    /// Missing fields and conflicts are reported inside the result. Only a
    /// failing asset-database lookup is returned as an error.
    #[instrument(
        skip(self, record, selections, reference),
        fields(subsystem = "engine", component = "matcher", device_id = record.device_id, kind = %kind)
    )]
    pub async fn validate(
        &self,
        record: &SourceRecord,
        kind: TargetKind,
        selections: &ManualSelections,
        reference: &ReferenceData,
    ) -> Result<ValidationResult> {
        let suggested_name = self.naming.device_name(record);
        let auto_matched = auto_match(record, reference);
        let (resolved, field_errors) = resolve_selections(&auto_matched, selections, reference);

        let missing_fields: BTreeSet<_> = kind
            .required_fields()
            .iter()
            .copied()
            .filter(|f| resolved.get(*f).is_none())
            .collect();

        let mut reasons = Vec::new();
        let mut warnings = Vec::new();

        let blocked = record.hostname().is_none();
        if blocked {
            reasons.push("source record has no hostname".to_string());
        }

        let (existing, ambiguous) = self.find_existing(record, &suggested_name).await?;
        if ambiguous {
            warnings.push(format!(
                "conflict: '{}' exists as both a device and a virtual machine; \
                 cannot tell which one this record is",
                suggested_name
            ));
        }

        if let Some(ip) = record.ip() {
            let skip_id = existing.as_ref().map(|e| (e.object.kind, e.object.id));
            for object in self.assets.find_by_primary_ip(ip).await? {
                if Some((object.kind, object.id)) == skip_id {
                    continue;
                }
                warnings.push(format!(
                    "primary address {} is already assigned to {} '{}'",
                    ip, object.kind, object.name
                ));
            }
        }

        let status = if blocked {
            ValidationStatus::Blocked
        } else if existing.is_some() {
            ValidationStatus::AlreadyExists
        } else if !ambiguous && missing_fields.is_empty() && field_errors.is_empty() {
            ValidationStatus::Ready
        } else {
            ValidationStatus::NeedsReview
        };

        match status {
            ValidationStatus::AlreadyExists => {
                if let Some(found) = &existing {
                    reasons.push(format!(
                        "already exists: {} {}",
                        found.object.kind, found.object.name
                    ));
                }
            }
            ValidationStatus::NeedsReview => {
                for field in &missing_fields {
                    reasons.push(format!("missing required field: {}", field));
                }
                for error in &field_errors {
                    reasons.push(format!("{}: {}", error.field, error.message));
                }
                if ambiguous {
                    reasons.push("ambiguous name match".to_string());
                }
            }
            _ => {}
        }

        debug!(status = ?status, missing = missing_fields.len(), "Validation complete");

        Ok(ValidationResult {
            device_id: record.device_id,
            target_kind: kind,
            status,
            suggested_name,
            missing_fields,
            resolved,
            auto_matched,
            existing,
            conflict: ambiguous,
            warnings,
            reasons,
            field_errors,
        })
    }

    /// Duplicate detection. Returns the match and whether the name was ambiguous.
    async fn find_existing(
        &self,
        record: &SourceRecord,
        name: &str,
    ) -> Result<(Option<ExistingMatch>, bool)> {
        let linked = self.assets.find_by_source_id(record.device_id).await?;
        if let Some(object) = linked.into_iter().next() {
            return Ok((
                Some(ExistingMatch {
                    rule: DuplicateRule::LinkingId,
                    object,
                }),
                false,
            ));
        }

        let named: Vec<AssetObject> = self.assets.find_by_name(name).await?;
        let kinds: HashSet<TargetKind> = named.iter().map(|o| o.kind).collect();
        match kinds.len() {
            0 => Ok((None, false)),
            1 => Ok((
                named.into_iter().next().map(|object| ExistingMatch {
                    rule: DuplicateRule::Name,
                    object,
                }),
                false,
            )),
            _ => Ok((None, true)),
        }
    }
}
