//! Integration tests for the LibreNMS client against a mocked API.

use std::time::Duration;

use recon_core::{
    DeviceRegistration, Error, InterfaceNameField, MonitoringSource, SearchFilters, ServerProfile,
    SnmpCredentials,
};
use recon_source::LibreNmsClient;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn profile(server: &MockServer) -> ServerProfile {
    ServerProfile {
        key: "lab".to_string(),
        display_name: "Lab".to_string(),
        base_url: server.uri(),
        api_token: "test-token".to_string(),
        cache_timeout_secs: 300,
        verify_ssl: true,
        interface_name_field: InterfaceNameField::IfDescr,
        request_timeout_secs: 5,
    }
}

fn device(id: i64, hostname: &str, location: &str, disabled: u8) -> serde_json::Value {
    json!({
        "device_id": id,
        "hostname": hostname,
        "sysName": hostname.split('.').next().unwrap(),
        "location": location,
        "hardware": "Catalyst 9300",
        "os": "iosxe",
        "type": "network",
        "status": 1,
        "disabled": disabled
    })
}

#[tokio::test]
async fn test_search_sends_most_selective_filter_and_token() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v0/devices"))
        .and(query_param("type", "location"))
        .and(query_param("query", "New York"))
        .and(header("X-Auth-Token", "test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "ok",
            "count": 3,
            "devices": [
                device(1, "core-01.example.com", "New York", 0),
                device(2, "edge-01.example.com", "New York", 0),
                device(3, "core-02.example.com", "New York", 1),
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = LibreNmsClient::new();
    let filters = SearchFilters {
        location: Some("New York".into()),
        hostname: Some("core".into()),
        ..Default::default()
    };

    let records = client.search(&profile(&server), &filters).await.unwrap();

    // edge-01 fails the hostname filter, core-02 is disabled
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].device_id, 1);
}

#[tokio::test]
async fn test_search_combined_os_is_filtered_locally() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v0/devices"))
        .and(query_param("type", "hostname"))
        .and(query_param("query", "core"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "ok",
            "devices": [
                device(1, "core-01.example.com", "New York", 0),
                device(2, "core-02.example.com", "Boston", 0),
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = LibreNmsClient::new();
    let filters = SearchFilters {
        os: Some("ios".into()),
        hostname: Some("core".into()),
        ..Default::default()
    };

    // "ios" is a substring of the devices' "iosxe".
    let records = client.search(&profile(&server), &filters).await.unwrap();
    assert_eq!(records.len(), 2);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let query: Vec<(String, String)> = requests[0].url.query_pairs().into_owned().collect();
    assert!(!query.iter().any(|(_, v)| v == "os"));
    assert!(!query.iter().any(|(_, v)| v == "ios"));
}

#[tokio::test]
async fn test_search_os_and_sys_name_sends_no_server_query() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v0/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "ok",
            "devices": [
                device(1, "core-01.example.com", "New York", 0),
                device(2, "edge-01.example.com", "New York", 0),
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = LibreNmsClient::new();
    let filters = SearchFilters {
        os: Some("IOS".into()),
        sys_name: Some("core".into()),
        ..Default::default()
    };

    let records = client.search(&profile(&server), &filters).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].device_id, 1);

    let requests = server.received_requests().await.unwrap();
    assert!(requests[0]
        .url
        .query_pairs()
        .all(|(k, _)| k != "type" && k != "query"));
}

#[tokio::test]
async fn test_search_include_disabled() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v0/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "ok",
            "devices": [device(3, "core-02.example.com", "New York", 1)]
        })))
        .mount(&server)
        .await;

    let client = LibreNmsClient::new();
    let filters = SearchFilters {
        location: Some("New York".into()),
        include_disabled: true,
        ..Default::default()
    };

    let records = client.search(&profile(&server), &filters).await.unwrap();
    assert_eq!(records.len(), 1);
}

#[tokio::test]
async fn test_search_without_filters_is_validation_error() {
    let server = MockServer::start().await;
    let client = LibreNmsClient::new();

    let err = client
        .search(&profile(&server), &SearchFilters::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Validation { field, .. } if field == "filters"));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_search_not_found_is_empty_result() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v0/devices"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "status": "error",
            "message": "No devices found"
        })))
        .mount(&server)
        .await;

    let client = LibreNmsClient::new();
    let filters = SearchFilters {
        os: Some("junos".into()),
        ..Default::default()
    };

    let records = client.search(&profile(&server), &filters).await.unwrap();
    assert!(records.is_empty());
}

#[tokio::test]
async fn test_error_status_in_body_is_surfaced() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v0/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "error",
            "message": "Invalid query type"
        })))
        .mount(&server)
        .await;

    let client = LibreNmsClient::new();
    let filters = SearchFilters {
        hostname: Some("core".into()),
        ..Default::default()
    };

    let err = client.search(&profile(&server), &filters).await.unwrap_err();
    assert!(matches!(err, Error::Request(msg) if msg.contains("Invalid query type")));
}

#[tokio::test]
async fn test_inventory_server_error_is_transient() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v0/inventory/7/all"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = LibreNmsClient::new();
    let err = client
        .fetch_inventory(&profile(&server), 7)
        .await
        .unwrap_err();

    assert!(err.is_retryable(), "expected transient, got {:?}", err);
}

#[tokio::test]
async fn test_timeout_is_transient() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v0/devices/9"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"devices": []}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let mut profile = profile(&server);
    profile.request_timeout_secs = 1;

    let client = LibreNmsClient::new();
    let err = client.fetch_device(&profile, 9).await.unwrap_err();

    assert!(matches!(err, Error::Transient(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_fetch_device_missing_is_none() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v0/devices/404"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = LibreNmsClient::new();
    let device = client.fetch_device(&profile(&server), 404).await.unwrap();
    assert!(device.is_none());
}

#[tokio::test]
async fn test_fetch_ports_requests_columns() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v0/devices/5/ports"))
        .and(query_param("columns", recon_source::client::PORT_COLUMNS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "ok",
            "ports": [{
                "port_id": 11,
                "ifName": "Gi1/0/1",
                "ifDescr": "GigabitEthernet1/0/1",
                "ifType": "ethernetCsmacd",
                "ifSpeed": 1000000000u64,
                "ifAdminStatus": "up",
                "ifMtu": 1500
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = LibreNmsClient::new();
    let ports = client.fetch_ports(&profile(&server), 5).await.unwrap();

    assert_eq!(ports.len(), 1);
    assert_eq!(ports[0].speed_kbps(), Some(1_000_000));
}

#[tokio::test]
async fn test_connection_reports_version() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v0/system"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "ok",
            "system": [{"local_ver": "24.1.0", "db_schema": "300"}]
        })))
        .mount(&server)
        .await;

    let client = LibreNmsClient::new();
    let status = client.test_connection(&profile(&server)).await;

    assert!(status.ok);
    assert_eq!(status.server, "lab");
    assert_eq!(status.version.as_deref(), Some("24.1.0"));
    assert!(status.error.is_none());
}

#[tokio::test]
async fn test_connection_unauthorized_is_structured_failure() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v0/system"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "message": "Unauthenticated."
        })))
        .mount(&server)
        .await;

    let client = LibreNmsClient::new();
    let status = client.test_connection(&profile(&server)).await;

    assert!(!status.ok);
    assert!(status.error.unwrap().contains("Unauthenticated"));
}

#[tokio::test]
async fn test_connection_refused_is_structured_failure() {
    let profile = ServerProfile {
        key: "down".to_string(),
        display_name: "Down".to_string(),
        base_url: "http://127.0.0.1:9".to_string(),
        api_token: "t".to_string(),
        cache_timeout_secs: 300,
        verify_ssl: true,
        interface_name_field: InterfaceNameField::IfDescr,
        request_timeout_secs: 2,
    };

    let status = LibreNmsClient::new().test_connection(&profile).await;
    assert!(!status.ok);
    assert!(status.error.is_some());
}

#[tokio::test]
async fn test_register_device_posts_v2c_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v0/devices"))
        .and(body_json(json!({
            "hostname": "10.0.0.5",
            "version": "v2c",
            "community": "public",
            "force_add": false
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "ok",
            "message": "Device 10.0.0.5 (42) has been added successfully"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let registration = DeviceRegistration {
        hostname: "10.0.0.5".into(),
        snmp: SnmpCredentials::V2c {
            community: "public".into(),
        },
        port: None,
        transport: None,
        force_add: false,
    };

    let body = LibreNmsClient::new()
        .register_device(&profile(&server), &registration)
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
}
