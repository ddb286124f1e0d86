//! Search-validate pipeline.
//!
//! A request is fingerprinted, served from the cache or fetched from the
//! monitoring source, and every record is validated. Stack detection is
//! opt-in per request; without it no inventory is fetched.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use recon_core::{
    Error, InventoryEntry, ManualSelections, MonitoringSource, ReferenceData, Result,
    SearchFilters, ServerProfile, SourceRecord, StackGroup, TargetKind, ValidationResult,
};
use recon_source::{validate_filters, ProfileSet};

use crate::cache::{filter_fingerprint, fingerprint, ResultCache};
use crate::matching::ValidationEngine;
use crate::session::SessionSelections;
use crate::stack::StackDetector;

/// Cache discriminator for search results.
pub const DATA_DEVICES: &str = "devices";
/// Cache discriminator for a single device record.
pub const DATA_DEVICE: &str = "device";
/// Cache discriminator for a device's inventory tree.
pub const DATA_INVENTORY: &str = "inventory";
/// Cache discriminator for asset-database reference data.
pub const DATA_REFERENCE: &str = "reference";

const NO_PAIRS: &[(&str, &str)] = &[];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default)]
    pub filters: SearchFilters,
    #[serde(default)]
    pub target_kind: TargetKind,
    #[serde(default)]
    pub detect_stacks: bool,
    #[serde(default)]
    pub clear_cache: bool,
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub selections: ManualSelections,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub record: SourceRecord,
    pub validation: ValidationResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<StackGroup>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub server: String,
    pub fingerprint: String,
    pub from_cache: bool,
    pub fetched_at: DateTime<Utc>,
    pub candidates: Vec<Candidate>,
}

/// Recompute one candidate after its target kind or a selection changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateRequest {
    #[serde(default)]
    pub server: Option<String>,
    pub device_id: i64,
    #[serde(default)]
    pub target_kind: TargetKind,
    #[serde(default)]
    pub selections: ManualSelections,
    #[serde(default)]
    pub session: Option<String>,
}

pub struct SearchService {
    source: Arc<dyn MonitoringSource>,
    profiles: Arc<ProfileSet>,
    cache: ResultCache,
    engine: Arc<ValidationEngine>,
    detector: StackDetector,
    sessions: SessionSelections,
}

impl SearchService {
    pub fn new(
        source: Arc<dyn MonitoringSource>,
        profiles: Arc<ProfileSet>,
        engine: Arc<ValidationEngine>,
        cache: ResultCache,
        sessions: SessionSelections,
    ) -> Self {
        let detector = StackDetector::new(engine.naming().clone());
        Self {
            source,
            profiles,
            cache,
            engine,
            detector,
            sessions,
        }
    }

    pub fn source(&self) -> &Arc<dyn MonitoringSource> {
        &self.source
    }

    pub fn profiles(&self) -> &ProfileSet {
        &self.profiles
    }

    pub fn engine(&self) -> &Arc<ValidationEngine> {
        &self.engine
    }

    pub fn detector(&self) -> &StackDetector {
        &self.detector
    }

    pub fn sessions(&self) -> &SessionSelections {
        &self.sessions
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn profile(&self, name: Option<&str>) -> Result<ServerProfile> {
        self.profiles.resolve(name).cloned()
    }

    /// Number of records cached for this request, if any.
    pub async fn cached_count(&self, request: &SearchRequest) -> Option<usize> {
        let profile = self.profile(request.server.as_deref()).ok()?;
        let filters = validate_filters(&request.filters).ok()?;
        let key = filter_fingerprint(&profile.key, &filters, DATA_DEVICES);
        self.cache
            .get::<Vec<SourceRecord>>(&key)
            .await
            .map(|hit| hit.value.len())
    }

    /// Asset-database reference data, cached under the profile's TTL.
    pub async fn reference_data(&self, profile: &ServerProfile) -> Result<ReferenceData> {
        let key = fingerprint(&profile.key, NO_PAIRS, DATA_REFERENCE);
        if let Some(hit) = self.cache.get::<ReferenceData>(&key).await {
            return Ok(hit.value);
        }
        let reference = self.engine.assets().reference_data().await?;
        self.cache
            .put(&key, &reference, profile.cache_timeout_secs)
            .await?;
        Ok(reference)
    }

    /// Drop cached reference data so newly created asset objects show up.
    pub async fn invalidate_reference(&self, server: Option<&str>) -> Result<String> {
        let profile = self.profile(server)?;
        let key = fingerprint(&profile.key, NO_PAIRS, DATA_REFERENCE);
        self.cache.invalidate(&key).await;
        info!(profile = %profile.key, fingerprint = %key, "Reference data cache invalidated");
        Ok(key)
    }

    async fn inventory(
        &self,
        profile: &ServerProfile,
        device_id: i64,
    ) -> Result<Vec<InventoryEntry>> {
        let key = fingerprint(
            &profile.key,
            &[("device_id", device_id.to_string())],
            DATA_INVENTORY,
        );
        if let Some(hit) = self.cache.get::<Vec<InventoryEntry>>(&key).await {
            return Ok(hit.value);
        }
        let inventory = self.source.fetch_inventory(profile, device_id).await?;
        self.cache
            .put(&key, &inventory, profile.cache_timeout_secs)
            .await?;
        Ok(inventory)
    }

    /// Stack group for a record. Inventory or lookup failures are logged and
    /// yield no group.
    pub async fn stack_for(
        &self,
        profile: &ServerProfile,
        record: &SourceRecord,
        base_name: &str,
    ) -> Option<StackGroup> {
        let inventory = match self.inventory(profile, record.device_id).await {
            Ok(inventory) => inventory,
            Err(e) => {
                warn!(
                    device_id = record.device_id,
                    error = %e,
                    "Inventory fetch failed; skipping stack detection"
                );
                return None;
            }
        };
        match self
            .detector
            .detect_with_existing(record, &inventory, base_name, self.engine.assets().as_ref())
            .await
        {
            Ok(group) => group,
            Err(e) => {
                warn!(
                    device_id = record.device_id,
                    error = %e,
                    "Stack member lookup failed; skipping stack detection"
                );
                None
            }
        }
    }

    #[instrument(skip(self, request), fields(subsystem = "engine", op = "search"))]
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let start = Instant::now();
        let profile = self.profile(request.server.as_deref())?;
        let filters = validate_filters(&request.filters)?;
        let key = filter_fingerprint(&profile.key, &filters, DATA_DEVICES);

        if request.clear_cache {
            self.cache.invalidate(&key).await;
        }

        let (records, fetched_at, from_cache) =
            match self.cache.get::<Vec<SourceRecord>>(&key).await {
                Some(hit) => (hit.value, hit.fetched_at, true),
                None => {
                    // Errors return before the cache is touched.
                    let records = self.source.search(&profile, &filters).await?;
                    let fetched_at = self
                        .cache
                        .put(&key, &records, profile.cache_timeout_secs)
                        .await?;
                    (records, fetched_at, false)
                }
            };

        let reference = self.reference_data(&profile).await?;
        let mut selections = request.selections.clone();
        self.sessions
            .prefill(request.session.as_deref(), &mut selections)
            .await;

        let mut candidates = Vec::with_capacity(records.len());
        for record in records {
            let validation = self
                .engine
                .validate(&record, request.target_kind, &selections, &reference)
                .await?;
            let stack = if request.detect_stacks {
                self.stack_for(&profile, &record, &validation.suggested_name)
                    .await
            } else {
                None
            };
            candidates.push(Candidate {
                record,
                validation,
                stack,
            });
        }

        info!(
            profile = %profile.key,
            fingerprint = %key,
            from_cache,
            result_count = candidates.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Search complete"
        );

        Ok(SearchResponse {
            server: profile.key,
            fingerprint: key,
            from_cache,
            fetched_at,
            candidates,
        })
    }

    /// Fetch one record, cached per device.
    pub async fn device(&self, profile: &ServerProfile, device_id: i64) -> Result<SourceRecord> {
        let key = fingerprint(
            &profile.key,
            &[("device_id", device_id.to_string())],
            DATA_DEVICE,
        );
        if let Some(hit) = self.cache.get::<SourceRecord>(&key).await {
            return Ok(hit.value);
        }
        let record = self
            .source
            .fetch_device(profile, device_id)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "device {} on server '{}'",
                    device_id, profile.key
                ))
            })?;
        self.cache
            .put(&key, &record, profile.cache_timeout_secs)
            .await?;
        Ok(record)
    }

    /// Recompute one Validation Result, remembering the chosen role.
    #[instrument(skip(self, request), fields(subsystem = "engine", op = "validate", device_id = request.device_id))]
    pub async fn validate(&self, request: &ValidateRequest) -> Result<ValidationResult> {
        let profile = self.profile(request.server.as_deref())?;
        let record = self.device(&profile, request.device_id).await?;
        let reference = self.reference_data(&profile).await?;

        let mut selections = request.selections.clone();
        if let (Some(session), Some(role)) = (request.session.as_deref(), selections.role) {
            if reference.role(role).is_some() {
                self.sessions.remember_role(session, role).await;
            }
        }
        self.sessions
            .prefill(request.session.as_deref(), &mut selections)
            .await;

        self.engine
            .validate(&record, request.target_kind, &selections, &reference)
            .await
    }
}
