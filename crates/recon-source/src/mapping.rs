//! Interface-type mapping from source `ifType`/speed to target interface types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use recon_core::defaults::INTERFACE_TYPE_FALLBACK;
use recon_core::{Error, Result};

/// One `[[interface_mappings]]` rule. A missing speed matches any speed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterfaceTypeRule {
    pub librenms_type: String,
    #[serde(default)]
    pub librenms_speed_kbps: Option<u64>,
    pub target_type: String,
}

#[derive(Debug, Clone, Default)]
pub struct InterfaceTypeMap {
    rules: HashMap<(String, Option<u64>), String>,
}

impl InterfaceTypeMap {
    /// Build the lookup table. Each `(type, speed)` pair may appear once.
    pub fn new(rules: Vec<InterfaceTypeRule>) -> Result<Self> {
        let mut table = HashMap::with_capacity(rules.len());
        for rule in rules {
            let key = (rule.librenms_type.trim().to_string(), rule.librenms_speed_kbps);
            if key.0.is_empty() {
                return Err(Error::Configuration(
                    "interface mapping has an empty librenms_type".into(),
                ));
            }
            if table.contains_key(&key) {
                return Err(Error::Configuration(format!(
                    "duplicate interface mapping for type '{}' speed {}",
                    key.0,
                    key.1
                        .map(|s| format!("{} kbps", s))
                        .unwrap_or_else(|| "any".into())
                )));
            }
            table.insert(key, rule.target_type);
        }
        Ok(Self { rules: table })
    }

    /// Exact `(type, speed)` rule, then the speed-agnostic rule, then `"other"`.
    pub fn resolve(&self, source_type: Option<&str>, speed_kbps: Option<u64>) -> String {
        let Some(source_type) = source_type.map(str::trim).filter(|t| !t.is_empty()) else {
            return INTERFACE_TYPE_FALLBACK.to_string();
        };
        if let Some(speed) = speed_kbps {
            if let Some(target) = self.rules.get(&(source_type.to_string(), Some(speed))) {
                return target.clone();
            }
        }
        self.rules
            .get(&(source_type.to_string(), None))
            .cloned()
            .unwrap_or_else(|| INTERFACE_TYPE_FALLBACK.to_string())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(t: &str, speed: Option<u64>, target: &str) -> InterfaceTypeRule {
        InterfaceTypeRule {
            librenms_type: t.into(),
            librenms_speed_kbps: speed,
            target_type: target.into(),
        }
    }

    fn map() -> InterfaceTypeMap {
        InterfaceTypeMap::new(vec![
            rule("ethernetCsmacd", None, "1000base-t"),
            rule("ethernetCsmacd", Some(10_000_000), "10gbase-x-sfpp"),
            rule("ieee8023adLag", None, "lag"),
        ])
        .unwrap()
    }

    #[test]
    fn test_exact_speed_rule_wins() {
        assert_eq!(
            map().resolve(Some("ethernetCsmacd"), Some(10_000_000)),
            "10gbase-x-sfpp"
        );
    }

    #[test]
    fn test_type_only_rule_matches_any_speed() {
        assert_eq!(
            map().resolve(Some("ethernetCsmacd"), Some(100_000)),
            "1000base-t"
        );
        assert_eq!(map().resolve(Some("ieee8023adLag"), None), "lag");
    }

    #[test]
    fn test_unknown_type_falls_back_to_other() {
        assert_eq!(map().resolve(Some("propVirtual"), Some(1_000)), "other");
        assert_eq!(map().resolve(None, None), "other");
    }

    #[test]
    fn test_duplicate_pair_rejected() {
        let err = InterfaceTypeMap::new(vec![
            rule("ethernetCsmacd", None, "1000base-t"),
            rule("ethernetCsmacd", None, "virtual"),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_same_type_different_speed_allowed() {
        let map = InterfaceTypeMap::new(vec![
            rule("ethernetCsmacd", Some(1_000_000), "1000base-t"),
            rule("ethernetCsmacd", Some(100_000), "100base-tx"),
        ])
        .unwrap();
        assert_eq!(map.len(), 2);
    }
}
