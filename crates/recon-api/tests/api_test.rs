//! Router tests against a scripted monitoring source and in-memory stores.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value as JsonValue};
use tower::ServiceExt;

use recon_api::{router, App, AppConfig, CAN_VIEW_QUEUE_HEADER, CAN_WRITE_HEADER};
use recon_core::{
    AssetObject, ConnectionStatus, DeviceRegistration, DeviceType, InventoryEntry,
    MonitoringSource, Platform, PortRecord, ReferenceData, Result, Role, SearchFilters,
    ServerProfile, Site, SourceRecord, TargetKind,
};
use recon_db::{MemoryAssetStore, MemoryJobStore};
use recon_source::matches;

const CONFIG: &str = r#"
    [source]
    base_url = "http://nms.test"
    api_token = "secret-token"

    [jobs]
    enabled = false
"#;

struct FakeSource {
    devices: Vec<SourceRecord>,
}

#[async_trait]
impl MonitoringSource for FakeSource {
    async fn search(
        &self,
        _profile: &ServerProfile,
        filters: &SearchFilters,
    ) -> Result<Vec<SourceRecord>> {
        Ok(self
            .devices
            .iter()
            .filter(|d| matches(filters, d))
            .cloned()
            .collect())
    }

    async fn fetch_device(
        &self,
        _profile: &ServerProfile,
        device_id: i64,
    ) -> Result<Option<SourceRecord>> {
        Ok(self.devices.iter().find(|d| d.device_id == device_id).cloned())
    }

    async fn fetch_inventory(
        &self,
        _profile: &ServerProfile,
        _device_id: i64,
    ) -> Result<Vec<InventoryEntry>> {
        Ok(Vec::new())
    }

    async fn fetch_ports(
        &self,
        _profile: &ServerProfile,
        _device_id: i64,
    ) -> Result<Vec<PortRecord>> {
        Ok(Vec::new())
    }

    async fn test_connection(&self, profile: &ServerProfile) -> ConnectionStatus {
        ConnectionStatus {
            ok: true,
            server: profile.key.clone(),
            version: Some("24.1.0".into()),
            error: None,
        }
    }

    async fn register_device(
        &self,
        _profile: &ServerProfile,
        registration: &DeviceRegistration,
    ) -> Result<JsonValue> {
        Ok(json!({"status": "ok", "message": format!("Device {} added", registration.hostname)}))
    }
}

fn device(device_id: i64, name: &str) -> SourceRecord {
    SourceRecord {
        device_id,
        hostname: Some(format!("{}.example.com", name)),
        sys_name: Some(name.into()),
        location: Some("New York".into()),
        hardware: Some("C9300-48P".into()),
        os: Some("ios".into()),
        device_type: Some("network".into()),
        ip: Some(format!("10.0.0.{}", device_id)),
        serial: Some(format!("SN{}", device_id)),
        version: None,
        status: true,
        disabled: false,
    }
}

fn reference() -> ReferenceData {
    ReferenceData {
        sites: vec![Site {
            id: 1,
            name: "New York".into(),
            slug: "new-york".into(),
        }],
        device_types: vec![DeviceType {
            id: 10,
            model: "C9300-48P".into(),
            slug: "c9300-48p".into(),
            manufacturer: None,
        }],
        platforms: vec![Platform {
            id: 30,
            name: "IOS".into(),
            slug: "ios".into(),
        }],
        roles: vec![Role {
            id: 20,
            name: "access".into(),
        }],
        clusters: Vec::new(),
        racks: Vec::new(),
    }
}

async fn app() -> Router {
    app_with_assets(MemoryAssetStore::new(reference())).await
}

async fn app_with_assets(assets: MemoryAssetStore) -> Router {
    let config = AppConfig::from_toml_str(CONFIG).unwrap();
    let source = Arc::new(FakeSource {
        devices: vec![device(1, "sw-1"), device(2, "sw-2")],
    });
    let app = App::build(
        &config,
        source,
        Arc::new(assets),
        Arc::new(MemoryJobStore::new()),
    )
    .await
    .unwrap();
    // Worker deliberately not started: queued jobs stay queued.
    router(app.state)
}

#[derive(Default, Clone, Copy)]
struct Grants {
    write: bool,
    queue: bool,
}

const NONE: Grants = Grants {
    write: false,
    queue: false,
};
const ALL: Grants = Grants {
    write: true,
    queue: true,
};

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<JsonValue>,
    grants: Grants,
) -> (StatusCode, JsonValue) {
    let mut builder = Request::builder().method(method).uri(uri);
    if grants.write {
        builder = builder.header(CAN_WRITE_HEADER, "true");
    }
    if grants.queue {
        builder = builder.header(CAN_VIEW_QUEUE_HEADER, "1");
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        JsonValue::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null)
    };
    (status, json)
}

// ============================================================================
// HEALTH / SERVERS
// ============================================================================

#[tokio::test]
async fn test_health() {
    let app = app().await;
    let (status, body) = send(&app, Method::GET, "/health", None, NONE).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_list_servers_hides_token() {
    let app = app().await;
    let (status, body) = send(&app, Method::GET, "/api/v1/servers", None, NONE).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], "default");
    assert_eq!(body["servers"][0]["key"], "default");
    assert_eq!(body["servers"][0]["cache_timeout_secs"], 300);
    assert!(!body.to_string().contains("secret-token"));
}

#[tokio::test]
async fn test_server_connection_test() {
    let app = app().await;
    let (status, body) = send(&app, Method::GET, "/api/v1/servers/default/test", None, NONE).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["version"], "24.1.0");

    let (status, _) = send(&app, Method::GET, "/api/v1/servers/missing/test", None, NONE).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_register_device_requires_write() {
    let app = app().await;
    let body = json!({"hostname": "10.9.9.9", "version": "v2c", "community": "public"});

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/v1/servers/default/devices",
        Some(body.clone()),
        NONE,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, response) = send(
        &app,
        Method::POST,
        "/api/v1/servers/default/devices",
        Some(body),
        ALL,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["message"], "Device 10.9.9.9 added");
}

// ============================================================================
// SEARCH / VALIDATE
// ============================================================================

#[tokio::test]
async fn test_search_sync_returns_candidates() {
    let app = app().await;
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/search",
        Some(json!({"filters": {"location": "New York"}})),
        NONE,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["from_cache"], false);
    assert_eq!(body["candidates"].as_array().unwrap().len(), 2);
    // Role is never auto-matched.
    assert_eq!(body["candidates"][0]["validation"]["status"], "needs-review");

    let (_, again) = send(
        &app,
        Method::POST,
        "/api/v1/search",
        Some(json!({"filters": {"location": "New York"}})),
        NONE,
    )
    .await;
    assert_eq!(again["from_cache"], true);
    assert_eq!(again["fingerprint"], body["fingerprint"]);
}

#[tokio::test]
async fn test_search_without_filters_is_bad_request_with_field() {
    let app = app().await;
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/search",
        Some(json!({"filters": {"hostname": "   "}})),
        NONE,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "filters");
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_async_search_without_queue_capability_runs_inline() {
    let app = app().await;
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/search",
        Some(json!({"filters": {"location": "New York"}, "async": true})),
        NONE,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["candidates"].is_array());
}

#[tokio::test]
async fn test_validate_with_role_is_ready() {
    let app = app().await;
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/validate",
        Some(json!({"device_id": 1, "selections": {"role": 20}, "session": "op-1"})),
        NONE,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
    assert_eq!(body["suggested_name"], "sw-1");
}

#[tokio::test]
async fn test_validate_unknown_device_is_not_found() {
    let app = app().await;
    let (status, _) = send(
        &app,
        Method::POST,
        "/api/v1/validate",
        Some(json!({"device_id": 99})),
        NONE,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ============================================================================
// ASYNC JOBS
// ============================================================================

#[tokio::test]
async fn test_async_search_queues_then_cancel_is_idempotent() {
    let app = app().await;
    let (status, queued) = send(
        &app,
        Method::POST,
        "/api/v1/search",
        Some(json!({"filters": {"location": "New York"}, "async": true})),
        ALL,
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let queue_id = queued["queue_id"].as_str().unwrap().to_string();
    let job_id = queued["job_id"].as_str().unwrap().to_string();
    assert_eq!(
        queued["poll_url"],
        format!("/api/v1/jobs/{}/status", queue_id)
    );

    let status_url = format!("/api/v1/jobs/{}/status", queue_id);
    let (status, view) = send(&app, Method::GET, &status_url, None, ALL).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["status"], "queued");
    assert_eq!(view["source"], "queue");

    let cancel_url = format!("/api/v1/jobs/{}/cancel", queue_id);
    let (status, first) = send(&app, Method::POST, &cancel_url, None, ALL).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["status"], "ok");
    assert_eq!(first["outcome"], "stopped");
    assert_eq!(first["persisted_status"], "failed");

    let (status, second) = send(&app, Method::POST, &cancel_url, None, ALL).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["outcome"], "already_finished");

    let (_, view) = send(&app, Method::GET, &status_url, None, ALL).await;
    assert_eq!(view["status"], "stopped");

    let sync_url = format!("/api/v1/job-records/{}/sync", job_id);
    let (status, synced) = send(&app, Method::POST, &sync_url, None, ALL).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(synced["status"], "failed");
}

#[tokio::test]
async fn test_job_endpoints_require_queue_capability() {
    let app = app().await;
    let url = format!("/api/v1/jobs/{}/status", uuid::Uuid::new_v4());
    let (status, _) = send(&app, Method::GET, &url, None, NONE).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_unknown_job_status_is_not_found_but_cancel_succeeds() {
    let app = app().await;
    let queue_id = uuid::Uuid::new_v4();

    let (status, _) = send(
        &app,
        Method::GET,
        &format!("/api/v1/jobs/{}/status", queue_id),
        None,
        ALL,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/api/v1/jobs/{}/cancel", queue_id),
        None,
        ALL,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "not_found");
    assert!(body.get("persisted_status").is_none());
}

// ============================================================================
// IMPORT
// ============================================================================

#[tokio::test]
async fn test_import_requires_write() {
    let app = app().await;
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/import",
        Some(json!({"candidates": [{"device_id": 1, "selections": {"role": 20}}]})),
        Grants {
            write: false,
            queue: true,
        },
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_import_sync_reports_every_count() {
    let app = app().await;
    let body = json!({
        "candidates": [
            {"device_id": 1, "selections": {"role": 20}},
            {"device_id": 2}
        ]
    });
    let (status, summary) = send(
        &app,
        Method::POST,
        "/api/v1/import",
        Some(body),
        Grants {
            write: true,
            queue: false,
        },
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["counts"]["success"], 1);
    assert_eq!(summary["counts"]["failed"], 1);
    assert_eq!(summary["counts"]["skipped"], 0);
    assert_eq!(summary["counts"]["stacks_created"], 0);

    // A second import of the same record is skipped.
    let (_, again) = send(
        &app,
        Method::POST,
        "/api/v1/import",
        Some(json!({"candidates": [{"device_id": 1, "selections": {"role": 20}}]})),
        ALL,
    )
    .await;
    assert_eq!(again["counts"]["skipped"], 1);
}

#[tokio::test]
async fn test_async_import_is_queued() {
    let app = app().await;
    let (status, queued) = send(
        &app,
        Method::POST,
        "/api/v1/import",
        Some(json!({"candidates": [{"device_id": 1}], "async": true})),
        ALL,
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(queued["estimated_count"], 1);
}

#[tokio::test]
async fn test_import_accepts_name_conflict_only_when_asked() {
    let assets = MemoryAssetStore::new(reference());
    for (kind, id) in [(TargetKind::Device, 100), (TargetKind::VirtualMachine, 101)] {
        assets
            .insert(AssetObject {
                kind,
                id,
                name: "sw-1".into(),
                source_id: None,
                primary_ip: None,
                serial: None,
                site_id: None,
            })
            .await;
    }
    let app = app_with_assets(assets).await;
    let writer = Grants {
        write: true,
        queue: false,
    };

    let (_, refused) = send(
        &app,
        Method::POST,
        "/api/v1/import",
        Some(json!({"candidates": [{"device_id": 1, "selections": {"role": 20}}]})),
        writer,
    )
    .await;
    assert_eq!(refused["counts"]["failed"], 1);
    assert!(refused["failures"][0]["reason"]
        .as_str()
        .unwrap()
        .contains("ambiguous"));

    let (status, accepted) = send(
        &app,
        Method::POST,
        "/api/v1/import",
        Some(json!({"candidates": [{
            "device_id": 1,
            "selections": {"role": 20},
            "accept_conflict": true
        }]})),
        writer,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(accepted["counts"]["success"], 1);
}

#[tokio::test]
async fn test_single_import_creates_object() {
    let app = app().await;
    let (status, outcome) = send(
        &app,
        Method::POST,
        "/api/v1/import/single",
        Some(json!({"device_id": 2, "selections": {"role": 20}, "sync_interfaces": true})),
        Grants {
            write: true,
            queue: false,
        },
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["outcome"], "success");
    assert_eq!(outcome["device_id"], 2);
    assert_eq!(outcome["object"]["name"], "sw-2");

    let (status, again) = send(
        &app,
        Method::POST,
        "/api/v1/import/single",
        Some(json!({"device_id": 2, "selections": {"role": 20}})),
        ALL,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["outcome"], "skip");
}

#[tokio::test]
async fn test_single_import_rejects_bad_selection_with_field() {
    let app = app().await;
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/import/single",
        Some(json!({"device_id": 1, "selections": {"role": 20, "device_type": 404}})),
        ALL,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "device_type");

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/v1/import/single",
        Some(json!({"device_id": 99, "selections": {"role": 20}})),
        ALL,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_single_import_requires_write() {
    let app = app().await;
    let (status, _) = send(
        &app,
        Method::POST,
        "/api/v1/import/single",
        Some(json!({"device_id": 1, "selections": {"role": 20}})),
        Grants {
            write: false,
            queue: true,
        },
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_invalidate_reference_cache() {
    let app = app().await;
    let (status, body) = send(&app, Method::DELETE, "/api/v1/cache/reference", None, NONE).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["fingerprint"].is_string());
}
