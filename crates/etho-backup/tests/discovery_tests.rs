//! Device discovery against mocked node and device services

#![allow(clippy::unwrap_used, clippy::expect_used)]

use etho_backup::discovery::{DeviceDirectory, DeviceScanner, NodeDirectory, ProbeScanner};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_node_directory_reads_device_map() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "e1": {"name": "ETHOSCOPE_001", "ip": "10.0.0.1", "status": "running",
                   "backup_path": "e1/ETHOSCOPE_001/run/run_e1.db", "time": 1749830737.1},
            "e2": {"id": "e2", "name": "ETHOSCOPE_002", "ip": "10.0.0.2", "status": "offline",
                   "backup_path": null},
        })))
        .mount(&server)
        .await;

    let directory = NodeDirectory::new(&server.uri(), Duration::from_secs(5)).unwrap();
    let devices = directory.devices().await.unwrap();

    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].id, "e1");
    assert_eq!(devices[0].backup_path.as_deref(), Some("e1/ETHOSCOPE_001/run/run_e1.db"));
    assert_eq!(devices[1].status, "offline");
    assert_eq!(devices[1].backup_path, None);
}

#[tokio::test]
async fn test_node_directory_failure_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/devices"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let directory = NodeDirectory::new(&server.uri(), Duration::from_secs(5)).unwrap();
    assert!(directory.devices().await.is_err());
}

#[tokio::test]
async fn test_probe_scanner_collects_devices() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/id"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "abc"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data/abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "ETHOSCOPE_007",
            "status": "running",
            "backup_filename": "2025-06-13_16-05-37_abc.db",
        })))
        .mount(&server)
        .await;

    let scanner = ProbeScanner::new(
        vec!["127.0.0.1".to_string()],
        server.address().port(),
        Duration::from_secs(5),
    )
    .unwrap();
    assert!(scanner.start().await);
    assert!(!scanner.start().await);

    let mut found = Default::default();
    for _ in 0..50 {
        found = scanner.get_all_devices_info().await.unwrap();
        if !found.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    scanner.stop().await;

    let device = found.get("abc").expect("device not probed");
    assert_eq!(device.name, "ETHOSCOPE_007");
    assert_eq!(device.ip, "127.0.0.1");
    assert_eq!(
        device.backup_path.as_deref(),
        Some("abc/ETHOSCOPE_007/2025-06-13_16-05-37/2025-06-13_16-05-37_abc.db")
    );
}
