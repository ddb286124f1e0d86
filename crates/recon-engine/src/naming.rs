//! Target-name derivation.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use recon_core::defaults::VC_MEMBER_NAME_PATTERN;
use recon_core::SourceRecord;

fn default_true() -> bool {
    true
}

fn default_pattern() -> String {
    VC_MEMBER_NAME_PATTERN.to_string()
}

/// The `[naming]` configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NamingPolicy {
    /// Use sysName before hostname.
    #[serde(default = "default_true")]
    pub prefer_sys_name: bool,
    /// Cut everything after the first dot, unless the name is an IP address.
    #[serde(default)]
    pub strip_domain: bool,
    /// Appended to the stack's base name for non-primary members.
    /// Placeholders: `{position}`, `{serial}`.
    #[serde(default = "default_pattern")]
    pub vc_member_name_pattern: String,
}

impl Default for NamingPolicy {
    fn default() -> Self {
        Self {
            prefer_sys_name: true,
            strip_domain: false,
            vc_member_name_pattern: default_pattern(),
        }
    }
}

impl NamingPolicy {
    /// Name for the target object created from `record`.
    pub fn device_name(&self, record: &SourceRecord) -> String {
        let (first, second) = if self.prefer_sys_name {
            (record.sys_name(), record.hostname())
        } else {
            (record.hostname(), record.sys_name())
        };
        match first.or(second) {
            Some(name) if self.strip_domain => strip_domain(name),
            Some(name) => name.to_string(),
            None => format!("device-{}", record.device_id),
        }
    }

    /// Name for a stack member other than the primary.
    pub fn member_name(&self, base: &str, position: i64, serial: Option<&str>) -> String {
        let suffix = self
            .vc_member_name_pattern
            .replace("{position}", &position.to_string())
            .replace("{serial}", serial.unwrap_or(""));
        format!("{}{}", base, suffix)
    }
}

/// Drop the domain suffix from a hostname. IP addresses come back unchanged.
pub fn strip_domain(name: &str) -> String {
    let name = name.trim();
    if name.parse::<IpAddr>().is_ok() {
        return name.to_string();
    }
    match name.split_once('.') {
        Some((host, _)) if !host.is_empty() => host.to_string(),
        _ => name.to_string(),
    }
}
