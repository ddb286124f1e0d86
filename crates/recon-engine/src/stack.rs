//! Virtual-chassis (stack) detection from entPhysical inventory.
//!
//! A stack shows up in the inventory tree either as a `stack` container with
//! chassis children, or as two or more top-level chassis entries. Anything
//! else yields no group.

use std::collections::HashSet;

use tracing::{debug, instrument};

use recon_core::{
    AssetRepository, InventoryEntry, Result, SourceRecord, StackGroup, StackMember,
};

use crate::naming::NamingPolicy;

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn is_designated(entry: &InventoryEntry) -> bool {
    [&entry.name, &entry.descr].into_iter().flatten().any(|text| {
        let text = text.to_ascii_lowercase();
        text.contains("master") || (text.contains("active") && !text.contains("inactive"))
    })
}

/// Chassis entries that make up a stack, or nothing when there is no stack.
pub fn stack_members(inventory: &[InventoryEntry]) -> Vec<&InventoryEntry> {
    let stack_indexes: HashSet<i64> = inventory
        .iter()
        .filter(|e| e.is_class("stack"))
        .map(|e| e.index)
        .collect();

    let mut members: Vec<&InventoryEntry> = if stack_indexes.is_empty() {
        inventory
            .iter()
            .filter(|e| e.is_class("chassis") && e.contained_in == 0)
            .collect()
    } else {
        inventory
            .iter()
            .filter(|e| e.is_class("chassis") && stack_indexes.contains(&e.contained_in))
            .collect()
    };

    if members.len() < 2 {
        return Vec::new();
    }
    members.sort_by_key(|e| (e.parent_rel_pos, e.index));
    members
}

/// Primary selection, in priority order:
///
/// 1. the member already linked to this source record
/// 2. a designated (master/active) member that has a primary address
/// 3. any member that has a primary address
/// 4. the lowest position
pub fn select_primary(record: &SourceRecord, members: &[StackMember]) -> Option<i64> {
    let linked = members.iter().find(|m| {
        m.existing
            .as_ref()
            .is_some_and(|e| e.source_id == Some(record.device_id))
    });
    let has_address = |m: &&StackMember| {
        m.existing
            .as_ref()
            .is_some_and(|e| e.primary_ip.as_deref().is_some_and(|ip| !ip.is_empty()))
    };
    let designated_with_address = members.iter().filter(has_address).find(|m| m.designated);
    let any_with_address = members.iter().find(has_address);
    let lowest = members.iter().min_by_key(|m| m.position);

    linked
        .or(designated_with_address)
        .or(any_with_address)
        .or(lowest)
        .map(|m| m.position)
}

/// Builds [`StackGroup`]s from inventory data.
#[derive(Debug, Clone, Default)]
pub struct StackDetector {
    naming: NamingPolicy,
}

impl StackDetector {
    pub fn new(naming: NamingPolicy) -> Self {
        Self { naming }
    }

    /// Group the record's inventory into a stack, without asset lookups.
    pub fn detect(
        &self,
        record: &SourceRecord,
        inventory: &[InventoryEntry],
        base_name: &str,
    ) -> Option<StackGroup> {
        let entries = stack_members(inventory);
        if entries.is_empty() {
            return None;
        }

        let mut seen = HashSet::new();
        let mut members: Vec<StackMember> = Vec::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            // Fall back to inventory order when the position is missing or
            // repeated, skipping positions already taken.
            let position = if entry.parent_rel_pos > 0 && seen.insert(entry.parent_rel_pos) {
                entry.parent_rel_pos
            } else {
                let mut fallback = i as i64 + 1;
                while !seen.insert(fallback) {
                    fallback += 1;
                }
                fallback
            };
            members.push(StackMember {
                position,
                serial: non_empty(&entry.serial),
                model: non_empty(&entry.model),
                suggested_name: String::new(),
                designated: is_designated(entry),
                existing: None,
            });
        }
        members.sort_by_key(|m| m.position);

        let mut group = StackGroup {
            device_id: record.device_id,
            name_pattern: self.naming.vc_member_name_pattern.clone(),
            members,
            primary_position: 0,
        };
        self.assign_primary(record, &mut group, base_name);
        Some(group)
    }

    /// Detect a stack and match its members to existing devices by serial.
    #[instrument(
        skip(self, record, inventory, assets),
        fields(subsystem = "engine", component = "stack", device_id = record.device_id)
    )]
    pub async fn detect_with_existing(
        &self,
        record: &SourceRecord,
        inventory: &[InventoryEntry],
        base_name: &str,
        assets: &dyn AssetRepository,
    ) -> Result<Option<StackGroup>> {
        let Some(mut group) = self.detect(record, inventory, base_name) else {
            return Ok(None);
        };
        for member in &mut group.members {
            if let Some(serial) = member.serial.as_deref() {
                member.existing = assets.find_by_serial(serial).await?.into_iter().next();
            }
        }
        self.assign_primary(record, &mut group, base_name);
        Ok(Some(group))
    }

    /// Pick the primary and name every member. The primary keeps the base name.
    fn assign_primary(&self, record: &SourceRecord, group: &mut StackGroup, base_name: &str) {
        let primary = select_primary(record, &group.members).unwrap_or(1);
        group.primary_position = primary;
        for member in &mut group.members {
            member.suggested_name = if member.position == primary {
                base_name.to_string()
            } else {
                self.naming
                    .member_name(base_name, member.position, member.serial.as_deref())
            };
        }
        debug!(
            members = group.members.len(),
            primary_position = primary,
            "Stack primary selected"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recon_core::{AssetObject, TargetKind};

    fn entry(index: i64, class: &str, contained_in: i64, pos: i64, serial: &str) -> InventoryEntry {
        InventoryEntry {
            index,
            class: Some(class.into()),
            name: Some(format!("Switch {}", pos)),
            descr: Some("c93xx Stack".into()),
            model: Some("C9300-48P".into()),
            serial: Some(serial.into()),
            contained_in,
            parent_rel_pos: pos,
        }
    }

    fn record() -> SourceRecord {
        SourceRecord {
            device_id: 77,
            hostname: Some("stack-a.example.com".into()),
            sys_name: Some("stack-a".into()),
            location: None,
            hardware: None,
            os: None,
            device_type: None,
            ip: Some("10.1.1.1".into()),
            serial: None,
            version: None,
            status: true,
            disabled: false,
        }
    }

    fn stack_inventory() -> Vec<InventoryEntry> {
        vec![
            entry(1, "stack", 0, 0, ""),
            entry(1000, "chassis", 1, 2, "FOC2"),
            entry(2000, "chassis", 1, 1, "FOC1"),
            entry(3000, "chassis", 1, 3, "FOC3"),
            entry(1001, "module", 1000, 1, "MOD1"),
        ]
    }

    fn existing(id: i64, source_id: Option<i64>, ip: Option<&str>) -> AssetObject {
        AssetObject {
            kind: TargetKind::Device,
            id,
            name: format!("dev-{}", id),
            source_id,
            primary_ip: ip.map(str::to_string),
            serial: None,
            site_id: None,
        }
    }

    fn member(position: i64, designated: bool, existing: Option<AssetObject>) -> StackMember {
        StackMember {
            position,
            serial: None,
            model: None,
            suggested_name: String::new(),
            designated,
            existing,
        }
    }

    #[test]
    fn test_detects_stack_container_members_in_position_order() {
        let detector = StackDetector::default();
        let group = detector
            .detect(&record(), &stack_inventory(), "stack-a")
            .unwrap();

        let positions: Vec<i64> = group.members.iter().map(|m| m.position).collect();
        assert_eq!(positions, vec![1, 2, 3]);
        assert_eq!(group.members[0].serial.as_deref(), Some("FOC1"));
        assert_eq!(group.primary_position, 1);
    }

    #[test]
    fn test_member_names_follow_pattern() {
        let detector = StackDetector::default();
        let group = detector
            .detect(&record(), &stack_inventory(), "stack-a")
            .unwrap();

        let names: Vec<&str> = group
            .members
            .iter()
            .map(|m| m.suggested_name.as_str())
            .collect();
        assert_eq!(names, vec!["stack-a", "stack-a-M2", "stack-a-M3"]);
    }

    #[test]
    fn test_single_chassis_is_not_a_stack() {
        let detector = StackDetector::default();
        let inventory = vec![
            entry(1, "chassis", 0, 0, "FOC1"),
            entry(2, "module", 1, 1, "MOD1"),
        ];
        assert!(detector.detect(&record(), &inventory, "sw").is_none());
        assert!(detector.detect(&record(), &[], "sw").is_none());
    }

    #[test]
    fn test_multiple_top_level_chassis_form_a_stack() {
        let detector = StackDetector::default();
        let inventory = vec![
            entry(1, "chassis", 0, 0, "A"),
            entry(2, "chassis", 0, 0, "B"),
        ];
        let group = detector.detect(&record(), &inventory, "sw").unwrap();
        let positions: Vec<i64> = group.members.iter().map(|m| m.position).collect();
        assert_eq!(positions, vec![1, 2]);
    }

    #[test]
    fn test_repeated_positions_stay_unique() {
        let detector = StackDetector::default();
        let inventory = vec![
            entry(1, "stack", 0, 0, ""),
            entry(1000, "chassis", 1, 3, "A"),
            entry(2000, "chassis", 1, 3, "B"),
            entry(3000, "chassis", 1, 3, "C"),
        ];
        let group = detector.detect(&record(), &inventory, "s").unwrap();

        let positions: Vec<i64> = group.members.iter().map(|m| m.position).collect();
        assert_eq!(positions, vec![2, 3, 4]);

        let names: HashSet<&str> = group
            .members
            .iter()
            .map(|m| m.suggested_name.as_str())
            .collect();
        assert_eq!(names.len(), 3);

        let primaries = group
            .members
            .iter()
            .filter(|m| m.position == group.primary_position)
            .count();
        assert_eq!(primaries, 1);
        assert_eq!(group.primary().unwrap().suggested_name, "s");
    }

    #[test]
    fn test_linking_id_beats_primary_address() {
        let members = vec![
            member(1, true, Some(existing(10, None, Some("10.1.1.1")))),
            member(2, false, Some(existing(11, Some(77), None))),
        ];
        assert_eq!(select_primary(&record(), &members), Some(2));
    }

    #[test]
    fn test_designated_with_address_beats_other_addresses() {
        let members = vec![
            member(1, false, Some(existing(10, None, Some("10.9.9.9")))),
            member(2, true, Some(existing(11, None, Some("10.1.1.1")))),
        ];
        assert_eq!(select_primary(&record(), &members), Some(2));
    }

    #[test]
    fn test_any_address_beats_lowest_position() {
        let members = vec![
            member(1, true, None),
            member(3, false, Some(existing(12, None, Some("10.9.9.9")))),
        ];
        assert_eq!(select_primary(&record(), &members), Some(3));
    }

    #[test]
    fn test_lowest_position_fallback() {
        let members = vec![member(4, false, None), member(2, false, None)];
        assert_eq!(select_primary(&record(), &members), Some(2));
    }

    #[tokio::test]
    async fn test_detect_with_existing_matches_serials() {
        let store = recon_db::MemoryAssetStore::default();
        let mut linked = existing(50, Some(77), None);
        linked.serial = Some("FOC3".into());
        store.insert(linked).await;

        let detector = StackDetector::default();
        let group = detector
            .detect_with_existing(&record(), &stack_inventory(), "stack-a", &store)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(group.primary_position, 3);
        assert_eq!(group.primary().unwrap().suggested_name, "stack-a");
        assert_eq!(group.members[0].suggested_name, "stack-a-M1");
    }
}
