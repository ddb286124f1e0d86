//! In-memory asset repository for tests and local runs.
//!
//! [`MemoryAssetStore`] keeps reference data and a flat object list. Every
//! constraint an import plan can violate is checked before the first write,
//! so a rejected plan leaves the store untouched. Applied plans are logged
//! so tests can inspect what an import wrote.
//!
//! ```rust,ignore
//! use recon_db::test_fixtures::MemoryAssetStore;
//!
//! let store = MemoryAssetStore::new(reference());
//! executor.import_bulk(&request, caps, &cancel).await?;
//! let plan = store.applied("sw-1").await.unwrap();
//! assert_eq!(plan.interfaces.len(), 3);
//! ```

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use recon_core::{
    AssetObject, AssetRepository, Error, ImportPlan, ObjectRef, ReferenceData, Result, TargetKind,
};

/// JSON layout accepted by [`MemoryAssetStore::from_file`].
#[derive(Debug, Default, Deserialize)]
pub struct AssetSnapshot {
    #[serde(default)]
    pub reference: ReferenceData,
    #[serde(default)]
    pub objects: Vec<AssetObject>,
}

#[derive(Debug, Default)]
struct AssetState {
    reference: ReferenceData,
    objects: Vec<AssetObject>,
    applied: Vec<ImportPlan>,
    next_id: i64,
}

impl AssetState {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    /// Names are unique per kind within a site.
    fn check_name(&self, kind: TargetKind, name: &str, site_id: Option<i64>) -> Result<()> {
        let taken = self
            .objects
            .iter()
            .any(|o| o.kind == kind && o.name == name && o.site_id == site_id);
        if taken {
            return Err(Error::Constraint(format!(
                "{} name '{}' is already in use at this site",
                kind, name
            )));
        }
        Ok(())
    }

    fn check_serial(&self, serial: Option<&str>, except: Option<i64>) -> Result<()> {
        let Some(serial) = serial.filter(|s| !s.is_empty()) else {
            return Ok(());
        };
        if self.device_with_serial(serial).is_some_and(|o| Some(o.id) != except) {
            return Err(Error::Constraint(format!(
                "serial '{}' is already assigned to another device",
                serial
            )));
        }
        Ok(())
    }

    fn device_with_serial(&self, serial: &str) -> Option<&AssetObject> {
        self.objects
            .iter()
            .find(|o| o.kind == TargetKind::Device && o.serial.as_deref() == Some(serial))
    }

    fn check_references(&self, plan: &ImportPlan) -> Result<()> {
        let reference = &self.reference;
        let missing = |what: &str, id: i64| Error::Constraint(format!("{} {} does not exist", what, id));

        if let Some(id) = plan.site_id {
            reference.site(id).ok_or_else(|| missing("site", id))?;
        }
        if let Some(id) = plan.device_type_id {
            reference
                .device_type(id)
                .ok_or_else(|| missing("device type", id))?;
        }
        if let Some(id) = plan.role_id {
            reference.role(id).ok_or_else(|| missing("role", id))?;
        }
        if let Some(id) = plan.platform_id {
            reference.platform(id).ok_or_else(|| missing("platform", id))?;
        }
        if let Some(id) = plan.cluster_id {
            reference.cluster(id).ok_or_else(|| missing("cluster", id))?;
        }
        if let Some(id) = plan.rack_id {
            let rack = reference.rack(id).ok_or_else(|| missing("rack", id))?;
            if plan.site_id != Some(rack.site_id) {
                return Err(Error::Constraint(format!(
                    "rack {} does not belong to the device's site",
                    id
                )));
            }
        }
        Ok(())
    }

    fn update(&mut self, plan: &ImportPlan, id: i64) -> Result<ObjectRef> {
        self.check_serial(plan.serial.as_deref(), Some(id))?;
        let object = self
            .objects
            .iter_mut()
            .find(|o| o.kind == plan.kind && o.id == id)
            .ok_or_else(|| Error::NotFound(format!("{} {}", plan.kind, id)))?;

        if plan.serial.is_some() {
            object.serial = plan.serial.clone();
        }
        object.source_id = Some(plan.source_id);
        Ok(ObjectRef::new(object.id, object.name.clone()))
    }

    fn create(&mut self, plan: &ImportPlan) -> Result<ObjectRef> {
        self.check_references(plan)?;
        self.check_name(plan.kind, &plan.name, plan.site_id)?;
        if plan.kind == TargetKind::Device {
            self.check_serial(plan.serial.as_deref(), None)?;
        }

        // Members not adopted by serial become new devices; check them all up front.
        let mut new_members = Vec::new();
        if let Some(vc) = &plan.virtual_chassis {
            let mut names = HashSet::from([plan.name.as_str()]);
            for member in vc.members.iter().filter(|m| !m.is_primary) {
                let adopted = member
                    .serial
                    .as_deref()
                    .is_some_and(|s| self.device_with_serial(s).is_some());
                if adopted {
                    continue;
                }
                if !names.insert(member.name.as_str()) {
                    return Err(Error::Constraint(format!(
                        "stack member name '{}' is repeated",
                        member.name
                    )));
                }
                self.check_name(TargetKind::Device, &member.name, plan.site_id)?;
                new_members.push(member);
            }
        }

        let id = self.allocate_id();
        self.objects.push(AssetObject {
            kind: plan.kind,
            id,
            name: plan.name.clone(),
            source_id: Some(plan.source_id),
            primary_ip: plan.primary_ip.map(|ip| ip.to_string()),
            serial: plan.serial.clone(),
            site_id: plan.site_id,
        });
        for member in new_members {
            let member_id = self.allocate_id();
            self.objects.push(AssetObject {
                kind: TargetKind::Device,
                id: member_id,
                name: member.name.clone(),
                source_id: None,
                primary_ip: None,
                serial: member.serial.clone(),
                site_id: plan.site_id,
            });
        }
        Ok(ObjectRef::new(id, plan.name.clone()))
    }
}

/// Asset repository held in memory.
#[derive(Debug, Default)]
pub struct MemoryAssetStore {
    state: RwLock<AssetState>,
}

impl MemoryAssetStore {
    pub fn new(reference: ReferenceData) -> Self {
        Self::from_snapshot(AssetSnapshot {
            reference,
            objects: Vec::new(),
        })
    }

    pub fn from_snapshot(snapshot: AssetSnapshot) -> Self {
        let next_id = snapshot.objects.iter().map(|o| o.id).max().unwrap_or(0);
        Self {
            state: RwLock::new(AssetState {
                reference: snapshot.reference,
                objects: snapshot.objects,
                applied: Vec::new(),
                next_id,
            }),
        }
    }

    /// Load a JSON file in the [`AssetSnapshot`] layout.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!(
                "failed to read asset snapshot {}: {}",
                path.display(),
                e
            ))
        })?;
        let snapshot: AssetSnapshot = serde_json::from_str(&content)?;
        info!(
            subsystem = "database",
            component = "memory_assets",
            objects = snapshot.objects.len(),
            sites = snapshot.reference.sites.len(),
            "Loaded asset snapshot"
        );
        Ok(Self::from_snapshot(snapshot))
    }

    /// Add an object directly, bypassing import constraints.
    pub async fn insert(&self, object: AssetObject) {
        let mut state = self.state.write().await;
        state.next_id = state.next_id.max(object.id);
        state.objects.push(object);
    }

    pub async fn objects(&self) -> Vec<AssetObject> {
        self.state.read().await.objects.clone()
    }

    pub async fn find(&self, kind: TargetKind, name: &str) -> Option<AssetObject> {
        self.state
            .read()
            .await
            .objects
            .iter()
            .find(|o| o.kind == kind && o.name == name)
            .cloned()
    }

    /// The last plan committed for an object of this name.
    pub async fn applied(&self, name: &str) -> Option<ImportPlan> {
        self.state
            .read()
            .await
            .applied
            .iter()
            .rev()
            .find(|p| p.name == name)
            .cloned()
    }

    async fn filter_objects(&self, predicate: impl Fn(&AssetObject) -> bool) -> Vec<AssetObject> {
        self.state
            .read()
            .await
            .objects
            .iter()
            .filter(|o| predicate(o))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AssetRepository for MemoryAssetStore {
    async fn reference_data(&self) -> Result<ReferenceData> {
        Ok(self.state.read().await.reference.clone())
    }

    async fn find_by_source_id(&self, source_id: i64) -> Result<Vec<AssetObject>> {
        Ok(self
            .filter_objects(|o| o.source_id == Some(source_id))
            .await)
    }

    async fn find_by_name(&self, name: &str) -> Result<Vec<AssetObject>> {
        Ok(self.filter_objects(|o| o.name == name).await)
    }

    async fn find_by_primary_ip(&self, ip: &str) -> Result<Vec<AssetObject>> {
        Ok(self
            .filter_objects(|o| o.primary_ip.as_deref() == Some(ip))
            .await)
    }

    async fn find_by_serial(&self, serial: &str) -> Result<Vec<AssetObject>> {
        Ok(self
            .filter_objects(|o| o.kind == TargetKind::Device && o.serial.as_deref() == Some(serial))
            .await)
    }

    async fn apply(&self, plan: &ImportPlan) -> Result<ObjectRef> {
        let mut state = self.state.write().await;
        let object = match plan.existing_id {
            Some(id) => state.update(plan, id)?,
            None => state.create(plan)?,
        };
        state.applied.push(plan.clone());

        debug!(
            subsystem = "database",
            component = "memory_assets",
            object_id = object.id,
            name = %object.name,
            "Import plan committed"
        );
        Ok(object)
    }
}
