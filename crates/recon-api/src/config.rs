//! Application configuration.
//!
//! Loaded once at startup from `$RECON_CONFIG` (default `./recon.toml`).
//! Without a file, everything comes from environment variables.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use recon_core::defaults::{
    JOB_CONCURRENCY, JOB_POLL_INTERVAL_MS, JOB_TIMEOUT_SECS, QUEUE_RETENTION_SECS, SERVER_PORT,
    SESSION_TTL_SECS,
};
use recon_core::{Error, Result};
use recon_engine::NamingPolicy;
use recon_jobs::WorkerConfig;
use recon_source::{substitute_env_vars, InterfaceTypeMap, InterfaceTypeRule, ProfileSet, SourceConfig};

const DEFAULT_CONFIG_PATH: &str = "./recon.toml";

fn default_true() -> bool {
    true
}

/// The `[jobs]` section.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct JobsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,
    /// How long a finished job stays visible in the live queue.
    #[serde(default = "default_retention")]
    pub queue_retention_secs: u64,
}

fn default_concurrency() -> usize {
    JOB_CONCURRENCY
}

fn default_job_timeout() -> u64 {
    JOB_TIMEOUT_SECS
}

fn default_retention() -> u64 {
    QUEUE_RETENTION_SECS
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            concurrency: JOB_CONCURRENCY,
            job_timeout_secs: JOB_TIMEOUT_SECS,
            queue_retention_secs: QUEUE_RETENTION_SECS,
        }
    }
}

impl JobsConfig {
    /// Environment overrides, same variables as [`WorkerConfig::from_env`]
    /// plus `QUEUE_RETENTION_SECS`.
    fn apply_env(&mut self) {
        if let Ok(v) = env::var("JOB_WORKER_ENABLED") {
            self.enabled = v != "false" && v != "0";
        }
        if let Some(v) = env::var("JOB_CONCURRENCY").ok().and_then(|v| v.parse().ok()) {
            self.concurrency = v;
        }
        if let Some(v) = env::var("JOB_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()) {
            self.job_timeout_secs = v;
        }
        if let Some(v) = env::var("QUEUE_RETENTION_SECS").ok().and_then(|v| v.parse().ok()) {
            self.queue_retention_secs = v;
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig::default()
            .with_enabled(self.enabled)
            .with_concurrency(self.concurrency)
            .with_job_timeout(self.job_timeout_secs)
            .with_poll_interval(JOB_POLL_INTERVAL_MS)
    }

    pub fn queue_retention(&self) -> Duration {
        Duration::from_secs(self.queue_retention_secs)
    }
}

/// The `[server]` section.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    SERVER_PORT
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: SERVER_PORT,
        }
    }
}

/// The `[session]` section.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// Idle lifetime of remembered manual selections.
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,
}

fn default_session_ttl() -> u64 {
    SESSION_TTL_SECS
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: SESSION_TTL_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub naming: NamingPolicy,
    #[serde(default)]
    pub interface_mappings: Vec<InterfaceTypeRule>,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub session: SessionConfig,
    /// PostgreSQL job-record store. In-memory when unset.
    #[serde(default)]
    pub database_url: Option<String>,
    /// JSON snapshot seeding the in-memory asset database.
    #[serde(default)]
    pub assets_file: Option<PathBuf>,
}

impl AppConfig {
    /// Load from `$RECON_CONFIG` or `./recon.toml`, falling back to the
    /// environment when the file does not exist.
    pub fn load() -> Result<Self> {
        let path = env::var("RECON_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut config = if path.exists() {
            info!(path = %path.display(), "Loading config file");
            Self::from_file(&path)?
        } else {
            debug!(path = %path.display(), "Config file not found, using environment variables");
            Self::from_env()
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse TOML after `${VAR}` substitution.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let content = substitute_env_vars(content);
        toml::from_str(&content).map_err(|e| Error::Configuration(format!("invalid config: {}", e)))
    }

    pub fn from_env() -> Self {
        Self {
            source: SourceConfig::from_env(),
            assets_file: env::var("RECON_ASSETS_FILE").ok().map(PathBuf::from),
            ..Default::default()
        }
    }

    fn apply_env(&mut self) {
        self.jobs.apply_env();
        if let Ok(url) = env::var("DATABASE_URL") {
            self.database_url = Some(url);
        }
        if let Ok(host) = env::var("HOST") {
            self.server.host = host;
        }
        if let Some(port) = env::var("PORT").ok().and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
    }

    /// Check everything that is normalized later, so startup fails early.
    pub fn validate(&self) -> Result<()> {
        self.profiles()?;
        self.interface_types()?;
        if self.jobs.concurrency == 0 {
            return Err(Error::Configuration("jobs.concurrency must be at least 1".into()));
        }
        Ok(())
    }

    pub fn profiles(&self) -> Result<ProfileSet> {
        self.source.clone().into_profiles()
    }

    pub fn interface_types(&self) -> Result<InterfaceTypeMap> {
        InterfaceTypeMap::new(self.interface_mappings.clone())
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session.ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEYED: &str = r#"
        [source]
        default_server = "lab"

        [source.servers.lab]
        display_name = "Lab NMS"
        base_url = "https://lab.example.com"
        api_token = "lab-token"

        [source.servers.prod]
        base_url = "https://nms.example.com"
        api_token = "prod-token"
        cache_timeout = 60
        interface_name_field = "ifName"

        [naming]
        strip_domain = true

        [[interface_mappings]]
        librenms_type = "ethernetCsmacd"
        librenms_speed_kbps = 10000000
        target_type = "10gbase-x-sfpp"

        [[interface_mappings]]
        librenms_type = "ethernetCsmacd"
        target_type = "other"

        [jobs]
        concurrency = 4

        [server]
        port = 8080
    "#;

    #[test]
    fn test_keyed_config_parses() {
        let config = AppConfig::from_toml_str(KEYED).unwrap();
        config.validate().unwrap();

        let profiles = config.profiles().unwrap();
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles.active().key, "lab");
        assert_eq!(profiles.resolve(Some("prod")).unwrap().cache_timeout_secs, 60);

        assert!(config.naming.strip_domain);
        assert!(config.naming.prefer_sys_name);
        assert_eq!(config.interface_types().unwrap().len(), 2);
        assert_eq!(config.jobs.concurrency, 4);
        assert_eq!(config.jobs.queue_retention_secs, QUEUE_RETENTION_SECS);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.session.ttl_secs, SESSION_TTL_SECS);
    }

    #[test]
    fn test_legacy_flat_config_becomes_default_profile() {
        let config = AppConfig::from_toml_str(
            r#"
            [source]
            base_url = "http://nms.local"
            api_token = "abc"
            verify_ssl = false
            "#,
        )
        .unwrap();
        let profiles = config.profiles().unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles.active().key, "default");
        assert!(!profiles.active().verify_ssl);
    }

    #[test]
    fn test_duplicate_interface_mapping_is_configuration_error() {
        let config = AppConfig::from_toml_str(
            r#"
            [source]
            base_url = "http://nms.local"
            api_token = "abc"

            [[interface_mappings]]
            librenms_type = "ethernetCsmacd"
            librenms_speed_kbps = 1000000
            target_type = "1000base-t"

            [[interface_mappings]]
            librenms_type = "ethernetCsmacd"
            librenms_speed_kbps = 1000000
            target_type = "1000base-x-sfp"
            "#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_invalid_toml_is_configuration_error() {
        let err = AppConfig::from_toml_str("[source\nbase_url =").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_worker_config_follows_jobs_section() {
        let jobs = JobsConfig {
            enabled: false,
            concurrency: 3,
            job_timeout_secs: 90,
            queue_retention_secs: 10,
        };
        let worker = jobs.worker_config();
        assert!(!worker.enabled);
        assert_eq!(worker.concurrency, 3);
        assert_eq!(worker.job_timeout_secs, 90);
        assert_eq!(jobs.queue_retention(), Duration::from_secs(10));
    }
}
