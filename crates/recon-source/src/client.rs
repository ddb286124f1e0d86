//! LibreNMS API v0 client.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use recon_core::{
    ConnectionStatus, DeviceRegistration, Error, InventoryEntry, MonitoringSource, PortRecord,
    Result, SearchFilters, ServerProfile, SourceRecord,
};

use crate::filters::{matches, server_query, validate_filters};

/// Header carrying the API token.
pub const AUTH_HEADER: &str = "X-Auth-Token";

/// Columns requested from the ports endpoint.
pub const PORT_COLUMNS: &str =
    "port_id,ifName,ifDescr,ifAlias,ifType,ifSpeed,ifAdminStatus,ifOperStatus,ifPhysAddress,ifMtu";

#[derive(Debug, Deserialize)]
struct DevicesResponse {
    #[serde(default)]
    devices: Vec<SourceRecord>,
}

#[derive(Debug, Deserialize)]
struct InventoryResponse {
    #[serde(default)]
    inventory: Vec<InventoryEntry>,
}

#[derive(Debug, Deserialize)]
struct PortsResponse {
    #[serde(default)]
    ports: Vec<PortRecord>,
}

#[derive(Debug, Deserialize)]
struct SystemResponse {
    #[serde(default)]
    system: Vec<SystemInfo>,
}

#[derive(Debug, Deserialize)]
struct SystemInfo {
    #[serde(default)]
    local_ver: Option<String>,
}

/// HTTP client for one or more LibreNMS instances.
///
/// Each server profile gets its own `reqwest::Client`, built on first use
/// with the profile's timeout, TLS verification setting, and token header.
#[derive(Default)]
pub struct LibreNmsClient {
    clients: RwLock<HashMap<String, Client>>,
}

impl LibreNmsClient {
    pub fn new() -> Self {
        Self::default()
    }

    async fn http(&self, profile: &ServerProfile) -> Result<Client> {
        if let Some(client) = self.clients.read().await.get(&profile.key) {
            return Ok(client.clone());
        }

        let mut headers = HeaderMap::new();
        let token = HeaderValue::from_str(&profile.api_token).map_err(|_| {
            Error::Configuration(format!(
                "server '{}': api_token contains invalid header characters",
                profile.key
            ))
        })?;
        headers.insert(AUTH_HEADER, token);

        let client = Client::builder()
            .timeout(Duration::from_secs(profile.request_timeout_secs))
            .danger_accept_invalid_certs(!profile.verify_ssl)
            .default_headers(headers)
            .build()
            .map_err(|e| {
                Error::Configuration(format!(
                    "server '{}': failed to build HTTP client: {}",
                    profile.key, e
                ))
            })?;

        debug!(
            profile = %profile.key,
            verify_ssl = profile.verify_ssl,
            timeout_secs = profile.request_timeout_secs,
            "Built HTTP client for server profile"
        );

        self.clients
            .write()
            .await
            .insert(profile.key.clone(), client.clone());
        Ok(client)
    }

    fn url(profile: &ServerProfile, path: &str) -> String {
        format!("{}/api/v0/{}", profile.base_url, path.trim_start_matches('/'))
    }

    async fn get<T: DeserializeOwned>(
        &self,
        profile: &ServerProfile,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let client = self.http(profile).await?;
        let response = client
            .get(Self::url(profile, path))
            .query(query)
            .send()
            .await?;
        let body = read_body(response).await?;
        Ok(serde_json::from_value(body)?)
    }
}

/// Map a status code and the API's own error message to the error taxonomy.
fn status_error(status: StatusCode, message: String) -> Error {
    match status.as_u16() {
        401 | 403 => Error::Forbidden(message),
        404 => Error::NotFound(message),
        s if s >= 500 => Error::Transient(format!("HTTP {}: {}", s, message)),
        s => Error::Request(format!("HTTP {}: {}", s, message)),
    }
}

fn api_message(body: &JsonValue) -> Option<String> {
    body.get("message")
        .and_then(JsonValue::as_str)
        .map(str::to_string)
}

/// Read a response body, surfacing both non-2xx codes and `"status":"error"`.
async fn read_body(response: reqwest::Response) -> Result<JsonValue> {
    let status = response.status();
    let text = response.text().await?;
    let body: JsonValue = if text.trim().is_empty() {
        JsonValue::Null
    } else {
        serde_json::from_str(&text).unwrap_or(JsonValue::String(text))
    };

    if !status.is_success() {
        let message = api_message(&body).unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        });
        return Err(status_error(status, message));
    }

    if body.get("status").and_then(JsonValue::as_str) == Some("error") {
        let message = api_message(&body).unwrap_or_else(|| "unknown API error".into());
        return Err(Error::Request(message));
    }

    Ok(body)
}

#[async_trait]
impl MonitoringSource for LibreNmsClient {
    #[instrument(skip(self, profile, filters), fields(subsystem = "source", profile = %profile.key))]
    async fn search(
        &self,
        profile: &ServerProfile,
        filters: &SearchFilters,
    ) -> Result<Vec<SourceRecord>> {
        let filters = validate_filters(filters)?;
        let start = Instant::now();

        let query: Vec<(&str, String)> = server_query(&filters)
            .map(|(kind, value)| vec![("type", kind.to_string()), ("query", value)])
            .unwrap_or_default();

        let response: DevicesResponse = match self.get(profile, "devices", &query).await {
            Ok(r) => r,
            // LibreNMS answers 404 when a query has no hits.
            Err(Error::NotFound(_)) => DevicesResponse {
                devices: Vec::new(),
            },
            Err(e) => return Err(e),
        };

        let fetched = response.devices.len();
        let records: Vec<SourceRecord> = response
            .devices
            .into_iter()
            .filter(|r| matches(&filters, r))
            .collect();

        info!(
            op = "search",
            fetched,
            result_count = records.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Source search complete"
        );
        Ok(records)
    }

    #[instrument(skip(self, profile), fields(subsystem = "source", profile = %profile.key))]
    async fn fetch_device(
        &self,
        profile: &ServerProfile,
        device_id: i64,
    ) -> Result<Option<SourceRecord>> {
        match self
            .get::<DevicesResponse>(profile, &format!("devices/{}", device_id), &[])
            .await
        {
            Ok(r) => Ok(r.devices.into_iter().next()),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, profile), fields(subsystem = "source", profile = %profile.key))]
    async fn fetch_inventory(
        &self,
        profile: &ServerProfile,
        device_id: i64,
    ) -> Result<Vec<InventoryEntry>> {
        let response: InventoryResponse = self
            .get(profile, &format!("inventory/{}/all", device_id), &[])
            .await?;
        debug!(
            device_id,
            result_count = response.inventory.len(),
            "Fetched inventory"
        );
        Ok(response.inventory)
    }

    #[instrument(skip(self, profile), fields(subsystem = "source", profile = %profile.key))]
    async fn fetch_ports(
        &self,
        profile: &ServerProfile,
        device_id: i64,
    ) -> Result<Vec<PortRecord>> {
        let response: PortsResponse = self
            .get(
                profile,
                &format!("devices/{}/ports", device_id),
                &[("columns", PORT_COLUMNS.to_string())],
            )
            .await?;
        debug!(
            device_id,
            result_count = response.ports.len(),
            "Fetched ports"
        );
        Ok(response.ports)
    }

    #[instrument(skip(self, profile), fields(subsystem = "source", profile = %profile.key))]
    async fn test_connection(&self, profile: &ServerProfile) -> ConnectionStatus {
        match self.get::<SystemResponse>(profile, "system", &[]).await {
            Ok(response) => {
                let version = response.system.into_iter().find_map(|s| s.local_ver);
                info!(version = ?version, "Connection test passed");
                ConnectionStatus {
                    ok: true,
                    server: profile.key.clone(),
                    version,
                    error: None,
                }
            }
            Err(e) => {
                warn!(error = %e, "Connection test failed");
                ConnectionStatus {
                    ok: false,
                    server: profile.key.clone(),
                    version: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    #[instrument(
        skip(self, profile, registration),
        fields(subsystem = "source", profile = %profile.key, hostname = %registration.hostname)
    )]
    async fn register_device(
        &self,
        profile: &ServerProfile,
        registration: &DeviceRegistration,
    ) -> Result<JsonValue> {
        if registration.hostname.trim().is_empty() {
            return Err(Error::validation("hostname", "hostname is required"));
        }
        let client = self.http(profile).await?;
        let response = client
            .post(Self::url(profile, "devices"))
            .json(registration)
            .send()
            .await?;
        let body = read_body(response).await?;
        info!("Device registered with monitoring source");
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_mapping() {
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, "x".into()),
            Error::Forbidden(_)
        ));
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, "x".into()),
            Error::Forbidden(_)
        ));
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, "x".into()),
            Error::NotFound(_)
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, "x".into()),
            Error::Transient(_)
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_REQUEST, "x".into()),
            Error::Request(_)
        ));
    }

    #[test]
    fn test_url_joins_api_prefix() {
        let profile = ServerProfile {
            key: "default".into(),
            display_name: "default".into(),
            base_url: "https://nms.example.com".into(),
            api_token: "t".into(),
            cache_timeout_secs: 300,
            verify_ssl: true,
            interface_name_field: Default::default(),
            request_timeout_secs: 30,
        };
        assert_eq!(
            LibreNmsClient::url(&profile, "/inventory/3/all"),
            "https://nms.example.com/api/v0/inventory/3/all"
        );
    }
}
