//! Server-profile configuration.
//!
//! The `[source]` section accepts two shapes:
//!
//! ```toml
//! # keyed map, one entry per monitoring-source instance
//! [source]
//! default_server = "primary"
//!
//! [source.servers.primary]
//! display_name = "Primary NMS"
//! base_url = "https://nms.example.com"
//! api_token = "${NMS_TOKEN}"
//! cache_timeout = 300
//! ```
//!
//! ```toml
//! # legacy flat form, normalized into a single profile named "default"
//! [source]
//! base_url = "https://nms.example.com"
//! api_token = "${NMS_TOKEN}"
//! ```
//!
//! Normalization into a [`ProfileSet`] happens once at startup; nothing
//! downstream branches on the shape.

use std::collections::BTreeMap;
use std::env;

use serde::Deserialize;
use tracing::{debug, info};

use recon_core::defaults;
use recon_core::{Error, InterfaceNameField, Result, ServerProfile};

/// One `[source.servers.<key>]` block.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServerConfig {
    #[serde(default)]
    pub display_name: Option<String>,
    pub base_url: String,
    pub api_token: String,
    #[serde(default)]
    pub cache_timeout: Option<u64>,
    #[serde(default)]
    pub verify_ssl: Option<bool>,
    #[serde(default)]
    pub interface_name_field: Option<String>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

/// The `[source]` section as written, in either shape.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SourceConfig {
    #[serde(default)]
    pub servers: Option<BTreeMap<String, ServerConfig>>,
    #[serde(default)]
    pub default_server: Option<String>,

    // Legacy flat fields
    #[serde(default, alias = "librenms_url")]
    pub base_url: Option<String>,
    #[serde(default, alias = "librenms_token")]
    pub api_token: Option<String>,
    #[serde(default)]
    pub cache_timeout: Option<u64>,
    #[serde(default)]
    pub verify_ssl: Option<bool>,
    #[serde(default)]
    pub interface_name_field: Option<String>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

impl SourceConfig {
    /// Build the legacy flat shape from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `RECON_SOURCE_URL` | (required) |
    /// | `RECON_SOURCE_TOKEN` | (required) |
    /// | `RECON_CACHE_TIMEOUT` | `300` |
    /// | `RECON_VERIFY_SSL` | `true` |
    /// | `RECON_INTERFACE_NAME_FIELD` | `ifDescr` |
    /// | `RECON_REQUEST_TIMEOUT_SECS` | `30` |
    pub fn from_env() -> Self {
        Self {
            servers: None,
            default_server: None,
            base_url: env::var("RECON_SOURCE_URL").ok(),
            api_token: env::var("RECON_SOURCE_TOKEN").ok(),
            cache_timeout: env::var("RECON_CACHE_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok()),
            verify_ssl: env::var("RECON_VERIFY_SSL")
                .ok()
                .map(|v| v != "false" && v != "0"),
            interface_name_field: env::var("RECON_INTERFACE_NAME_FIELD").ok(),
            request_timeout_secs: env::var("RECON_REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok()),
        }
    }

    /// Normalize into a validated [`ProfileSet`].
    pub fn into_profiles(self) -> Result<ProfileSet> {
        ProfileSet::from_config(self)
    }
}

/// Replace `${VAR}` references with environment values. Unset variables are
/// left in place so validation reports them.
pub fn substitute_env_vars(content: &str) -> String {
    let re = match regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}") {
        Ok(re) => re,
        Err(_) => return content.to_string(),
    };
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
    })
    .to_string()
}

/// Every configured server profile plus the active one.
#[derive(Debug, Clone)]
pub struct ProfileSet {
    profiles: BTreeMap<String, ServerProfile>,
    active: String,
}

impl ProfileSet {
    pub fn from_config(config: SourceConfig) -> Result<Self> {
        let profiles = match config.servers {
            Some(servers) if !servers.is_empty() => {
                let mut profiles = BTreeMap::new();
                for (key, server) in servers {
                    let profile = build_profile(&key, server)?;
                    profiles.insert(key, profile);
                }
                profiles
            }
            _ => {
                debug!("No servers map configured, using legacy flat source settings");
                let server = ServerConfig {
                    display_name: None,
                    base_url: config.base_url.unwrap_or_default(),
                    api_token: config.api_token.unwrap_or_default(),
                    cache_timeout: config.cache_timeout,
                    verify_ssl: config.verify_ssl,
                    interface_name_field: config.interface_name_field,
                    request_timeout_secs: config.request_timeout_secs,
                };
                let profile = build_profile(defaults::DEFAULT_PROFILE, server)?;
                BTreeMap::from([(defaults::DEFAULT_PROFILE.to_string(), profile)])
            }
        };

        let active = match config.default_server {
            Some(name) if profiles.contains_key(&name) => name,
            Some(name) => {
                return Err(Error::Configuration(format!(
                    "default_server '{}' is not a configured server",
                    name
                )))
            }
            None if profiles.contains_key(defaults::DEFAULT_PROFILE) => {
                defaults::DEFAULT_PROFILE.to_string()
            }
            None => profiles
                .keys()
                .next()
                .cloned()
                .ok_or_else(|| Error::Configuration("no server profiles configured".into()))?,
        };

        info!(
            profiles = profiles.len(),
            active = %active,
            "Server profiles loaded"
        );

        Ok(Self { profiles, active })
    }

    /// The named profile, or the active one when no name is given.
    pub fn resolve(&self, name: Option<&str>) -> Result<&ServerProfile> {
        let key = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.active);
        self.profiles
            .get(key)
            .ok_or_else(|| Error::Configuration(format!("unknown server profile '{}'", key)))
    }

    pub fn active(&self) -> &ServerProfile {
        // Construction guarantees the active key is present.
        &self.profiles[&self.active]
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServerProfile> {
        self.profiles.values()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

fn build_profile(key: &str, server: ServerConfig) -> Result<ServerProfile> {
    if key.trim().is_empty() {
        return Err(Error::Configuration(
            "server profile key cannot be empty".into(),
        ));
    }

    let base_url = server.base_url.trim().trim_end_matches('/').to_string();
    if base_url.is_empty() {
        return Err(Error::Configuration(format!(
            "server '{}': base_url cannot be empty",
            key
        )));
    }
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(Error::Configuration(format!(
            "server '{}': base_url must start with http:// or https://, got: {}",
            key, base_url
        )));
    }
    if server.api_token.trim().is_empty() {
        return Err(Error::Configuration(format!(
            "server '{}': api_token cannot be empty",
            key
        )));
    }

    let interface_name_field = match server.interface_name_field {
        Some(field) => field.parse()?,
        None => InterfaceNameField::default(),
    };

    Ok(ServerProfile {
        key: key.to_string(),
        display_name: server.display_name.unwrap_or_else(|| key.to_string()),
        base_url,
        api_token: server.api_token.trim().to_string(),
        cache_timeout_secs: server
            .cache_timeout
            .unwrap_or(defaults::CACHE_TIMEOUT_SECS),
        verify_ssl: server.verify_ssl.unwrap_or(true),
        interface_name_field,
        request_timeout_secs: server
            .request_timeout_secs
            .unwrap_or(defaults::SOURCE_REQUEST_TIMEOUT_SECS),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> SourceConfig {
        toml::from_str(toml_src).unwrap()
    }

    #[test]
    fn test_legacy_flat_shape_becomes_default_profile() {
        let profiles = parse(
            r#"
            base_url = "https://nms.example.com/"
            api_token = "abc"
            "#,
        )
        .into_profiles()
        .unwrap();

        assert_eq!(profiles.len(), 1);
        let active = profiles.active();
        assert_eq!(active.key, "default");
        assert_eq!(active.base_url, "https://nms.example.com");
        assert_eq!(active.cache_timeout_secs, 300);
        assert!(active.verify_ssl);
        assert_eq!(active.interface_name_field, InterfaceNameField::IfDescr);
    }

    #[test]
    fn test_legacy_field_aliases() {
        let profiles = parse(
            r#"
            librenms_url = "http://nms.local"
            librenms_token = "abc"
            "#,
        )
        .into_profiles()
        .unwrap();
        assert_eq!(profiles.active().base_url, "http://nms.local");
    }

    #[test]
    fn test_keyed_shape_with_default_server() {
        let profiles = parse(
            r#"
            default_server = "lab"

            [servers.prod]
            base_url = "https://prod.example.com"
            api_token = "p"

            [servers.lab]
            display_name = "Lab NMS"
            base_url = "https://lab.example.com"
            api_token = "l"
            cache_timeout = 60
            verify_ssl = false
            interface_name_field = "ifName"
            "#,
        )
        .into_profiles()
        .unwrap();

        assert_eq!(profiles.len(), 2);
        let lab = profiles.resolve(None).unwrap();
        assert_eq!(lab.key, "lab");
        assert_eq!(lab.display_name, "Lab NMS");
        assert_eq!(lab.cache_timeout_secs, 60);
        assert!(!lab.verify_ssl);
        assert_eq!(lab.interface_name_field, InterfaceNameField::IfName);
        assert_eq!(profiles.resolve(Some("prod")).unwrap().key, "prod");
    }

    #[test]
    fn test_keyed_shape_without_default_uses_first_key() {
        let profiles = parse(
            r#"
            [servers.beta]
            base_url = "https://b.example.com"
            api_token = "b"

            [servers.alpha]
            base_url = "https://a.example.com"
            api_token = "a"
            "#,
        )
        .into_profiles()
        .unwrap();
        assert_eq!(profiles.active().key, "alpha");
    }

    #[test]
    fn test_unknown_profile_is_configuration_error() {
        let profiles = parse(
            r#"
            base_url = "https://nms.example.com"
            api_token = "abc"
            "#,
        )
        .into_profiles()
        .unwrap();

        let err = profiles.resolve(Some("missing")).unwrap_err();
        assert!(matches!(err, Error::Configuration(msg) if msg.contains("missing")));
    }

    #[test]
    fn test_unknown_default_server_rejected() {
        let err = parse(
            r#"
            default_server = "nope"
            [servers.prod]
            base_url = "https://prod.example.com"
            api_token = "p"
            "#,
        )
        .into_profiles()
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_invalid_url_rejected() {
        let err = parse(
            r#"
            base_url = "nms.example.com"
            api_token = "abc"
            "#,
        )
        .into_profiles()
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(msg) if msg.contains("http://")));
    }

    #[test]
    fn test_missing_token_rejected() {
        let err = parse(r#"base_url = "https://nms.example.com""#)
            .into_profiles()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(msg) if msg.contains("api_token")));
    }

    #[test]
    fn test_invalid_interface_field_rejected() {
        let err = parse(
            r#"
            base_url = "https://nms.example.com"
            api_token = "abc"
            interface_name_field = "ifAlias"
            "#,
        )
        .into_profiles()
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_env_var_substitution_with_value() {
        env::set_var("RECON_TEST_SUBSTITUTION_VAR", "test-value");
        let result = substitute_env_vars("api_token = \"${RECON_TEST_SUBSTITUTION_VAR}\"");
        env::remove_var("RECON_TEST_SUBSTITUTION_VAR");

        assert_eq!(result, "api_token = \"test-value\"");
    }

    #[test]
    fn test_env_var_substitution_missing_left_in_place() {
        let content = "api_token = \"${RECON_NONEXISTENT_TEST_VAR_12345}\"";
        assert_eq!(substitute_env_vars(content), content);
    }
}
