//! Video backup against a mocked device web service

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod helpers;

use etho_backup::config::VideoConfig;
use etho_backup::jobs::{run_job, JobReport, SyncSummary, VideoBackupJob};
use etho_backup::progress::{EventStatus, ProgressEvent, ProgressSink};
use etho_backup::video::VideoCache;
use etho_common::checksum::{compute_md5, read_sidecar, write_sidecar};
use helpers::*;
use serde_json::json;
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RUN_DIR: &str = "2025-06-13_16-05-37";

fn remote_path(filename: &str) -> String {
    format!("/ethoscope_data/videos/{DEVICE_ID}/{DEVICE_NAME}/{RUN_DIR}/{filename}")
}

fn static_path(filename: &str) -> String {
    format!("/static{}", remote_path(filename))
}

fn md5_of(bytes: &[u8]) -> String {
    compute_md5(&mut &bytes[..]).unwrap()
}

fn local_copy(video_root: &Path, filename: &str) -> std::path::PathBuf {
    video_root
        .join(DEVICE_ID)
        .join(DEVICE_NAME)
        .join(RUN_DIR)
        .join(filename)
}

async fn serve_file(server: &MockServer, filename: &str, body: &'static [u8]) {
    Mock::given(method("GET"))
        .and(path(static_path(filename)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}

async fn run(
    server: &MockServer,
    video_root: &Path,
    remote_cleanup: bool,
) -> (JobReport, Vec<ProgressEvent>) {
    let mut config = video_config(server.address().port());
    config.remote_cleanup = remote_cleanup;
    run_with(config, video_root).await
}

async fn run_with(config: VideoConfig, video_root: &Path) -> (JobReport, Vec<ProgressEvent>) {
    let job = VideoBackupJob::new(default_device(), video_root, config);
    let (sink, events) = ProgressSink::recording(DEVICE_ID);
    let report = run_job(&job, &sink).await;
    let events = events.lock().unwrap().clone();
    (report, events)
}

fn statuses(events: &[ProgressEvent]) -> Vec<EventStatus> {
    events.iter().map(|e| e.status).collect()
}

/// Device web service that sends file bodies one byte per `gap`
async fn start_trickling_device(
    listing: serde_json::Value,
    body: &'static [u8],
    gap: Duration,
) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let listing = listing.to_string();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let listing = listing.clone();
            tokio::spawn(async move {
                let _ = answer(socket, &listing, body, gap).await;
            });
        }
    });
    port
}

async fn answer(
    mut socket: TcpStream,
    listing: &str,
    body: &[u8],
    gap: Duration,
) -> std::io::Result<()> {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        head.extend_from_slice(&buf[..n]);
    }
    let request = String::from_utf8_lossy(&head);
    let target = request.split_whitespace().nth(1).unwrap_or("/").to_string();

    if target == "/list_video_files" {
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{listing}",
            listing.len()
        );
        socket.write_all(response.as_bytes()).await?;
    } else if target.starts_with("/static/") {
        let header = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        socket.write_all(header.as_bytes()).await?;
        socket.flush().await?;
        for byte in body {
            tokio::time::sleep(gap).await;
            socket.write_all(&[*byte]).await?;
            socket.flush().await?;
        }
    } else {
        socket
            .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
            .await?;
    }
    socket.shutdown().await
}

#[tokio::test]
async fn test_downloads_and_verifies_listed_videos() {
    let server = MockServer::start().await;
    let video_root = TempDir::new().unwrap();
    const BODY: &[u8] = b"h264 frames";

    Mock::given(method("GET"))
        .and(path("/list_video_files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "whole_01.h264": {"path": remote_path("whole_01.h264"), "hash": md5_of(BODY)},
        })))
        .mount(&server)
        .await;
    serve_file(&server, "whole_01.h264", BODY).await;

    let (report, events) = run(&server, video_root.path(), false).await;

    assert!(report.success);
    assert_eq!(
        statuses(&events),
        vec![EventStatus::Info, EventStatus::Info, EventStatus::Success]
    );
    assert!(events[1].message.contains("(1/1)"));

    let local = local_copy(video_root.path(), "whole_01.h264");
    assert_eq!(std::fs::read(&local).unwrap(), BODY);
    assert_eq!(read_sidecar(&local).unwrap(), Some(md5_of(BODY)));

    let cache = VideoCache::load(video_root.path(), DEVICE_ID);
    assert!(cache.get("whole_01.h264").is_some());
}

#[tokio::test]
async fn test_old_cached_file_is_trusted_without_fetching() {
    let server = MockServer::start().await;
    let video_root = TempDir::new().unwrap();
    const NEW_BODY: &[u8] = b"fresh recording";

    let cache_path = VideoCache::cache_path(video_root.path(), DEVICE_ID);
    std::fs::create_dir_all(cache_path.parent().unwrap()).unwrap();
    std::fs::write(
        &cache_path,
        serde_json::to_vec(&json!({
            "files": {
                "old.h264": {
                    "size_bytes": 3,
                    "size_human": "3 B",
                    "path": format!("{DEVICE_ID}/{DEVICE_NAME}/{RUN_DIR}/old.h264"),
                    "status": "verified",
                    "modified": "2024-01-01T00:00:00Z"
                }
            },
            "timestamp": 1704067200.0
        }))
        .unwrap(),
    )
    .unwrap();

    Mock::given(method("GET"))
        .and(path("/list_video_files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "old.h264": {"path": remote_path("old.h264"), "hash": md5_of(b"old")},
            "new.h264": {"path": remote_path("new.h264"), "hash": md5_of(NEW_BODY)},
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(static_path("old.h264")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"old".as_slice()))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(static_path("new.h264")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(NEW_BODY))
        .expect(1)
        .mount(&server)
        .await;

    let (report, events) = run(&server, video_root.path(), false).await;

    assert!(report.success);
    assert_eq!(report.sync, Some(SyncSummary::Video { matching: 2, total: 2 }));
    // Only the new file is reported: initiated, one download, done.
    assert_eq!(events.len(), 3);
    assert!(!local_copy(video_root.path(), "old.h264").exists());

    let cache = VideoCache::load(video_root.path(), DEVICE_ID);
    assert_eq!(cache.len(), 2);
}

#[tokio::test]
async fn test_one_failed_file_is_reported_and_skipped() {
    let server = MockServer::start().await;
    let video_root = TempDir::new().unwrap();
    const BODY: &[u8] = b"good file";

    Mock::given(method("GET"))
        .and(path("/list_video_files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "a.h264": {"path": remote_path("a.h264"), "hash": md5_of(BODY)},
            "b.h264": {"path": remote_path("b.h264"), "hash": md5_of(b"missing")},
        })))
        .mount(&server)
        .await;
    serve_file(&server, "a.h264", BODY).await;
    Mock::given(method("GET"))
        .and(path(static_path("b.h264")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (report, events) = run(&server, video_root.path(), false).await;

    assert!(report.success);
    assert_eq!(
        statuses(&events),
        vec![
            EventStatus::Info,
            EventStatus::Info,
            EventStatus::Error,
            EventStatus::Warning
        ]
    );
    assert!(events[2].message.contains("b.h264"));
    assert_eq!(report.sync, Some(SyncSummary::Video { matching: 1, total: 2 }));
    assert!(!local_copy(video_root.path(), "b.h264").exists());
}

#[tokio::test]
async fn test_checksum_mismatch_keeps_no_partial_file() {
    let server = MockServer::start().await;
    let video_root = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/list_video_files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "c.h264": {"path": remote_path("c.h264"), "hash": md5_of(b"expected")},
        })))
        .mount(&server)
        .await;
    serve_file(&server, "c.h264", b"corrupted").await;

    let (report, events) = run(&server, video_root.path(), false).await;

    assert!(!report.success);
    assert_eq!(
        statuses(&events),
        vec![EventStatus::Info, EventStatus::Error, EventStatus::Warning]
    );
    let local = local_copy(video_root.path(), "c.h264");
    assert!(!local.exists());
    assert!(!local.with_extension("h264.part").exists());
}

#[tokio::test]
async fn test_falls_back_to_plain_index() {
    let server = MockServer::start().await;
    let video_root = TempDir::new().unwrap();
    const BODY: &[u8] = b"indexed";

    Mock::given(method("GET"))
        .and(path("/list_video_files"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/make_index"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/static/ethoscope_data/results/index.html"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(format!("{}\n\n", remote_path("idx.h264"))),
        )
        .mount(&server)
        .await;
    serve_file(&server, "idx.h264", BODY).await;

    let (report, events) = run(&server, video_root.path(), false).await;

    assert!(report.success);
    assert_eq!(statuses(&events).last(), Some(&EventStatus::Success));
    assert_eq!(
        std::fs::read(local_copy(video_root.path(), "idx.h264")).unwrap(),
        BODY
    );
}

#[tokio::test]
async fn test_no_listing_is_a_warning() {
    let server = MockServer::start().await;
    let video_root = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let (report, events) = run(&server, video_root.path(), false).await;

    assert!(report.success);
    assert_eq!(statuses(&events), vec![EventStatus::Info, EventStatus::Warning]);
    assert!(events[1].message.contains("No videos"));
}

#[tokio::test]
async fn test_remote_cleanup_removes_verified_files() {
    let server = MockServer::start().await;
    let video_root = TempDir::new().unwrap();
    const BODY: &[u8] = b"to be removed";

    Mock::given(method("GET"))
        .and(path("/list_video_files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "d.h264": {"path": remote_path("d.h264"), "hash": md5_of(BODY)},
        })))
        .mount(&server)
        .await;
    serve_file(&server, "d.h264", BODY).await;
    Mock::given(method("POST"))
        .and(path(format!("/rm_static_file/{DEVICE_ID}")))
        .and(body_json(json!({"file": remote_path("d.h264")})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let (report, _) = run(&server, video_root.path(), true).await;
    assert!(report.success);
}

#[tokio::test]
async fn test_slow_download_outlasting_request_timeout_completes() {
    let video_root = TempDir::new().unwrap();
    const BODY: &[u8] = b"8 bytes!";

    let listing = json!({
        "slow.h264": {"path": remote_path("slow.h264"), "hash": md5_of(BODY)},
    });
    let port = start_trickling_device(listing, BODY, Duration::from_millis(400)).await;
    let mut config = video_config(port);
    config.request_timeout_secs = 1;

    let started = Instant::now();
    let (report, events) = run_with(config, video_root.path()).await;

    // The body takes about 3.2s while no gap between bytes reaches 1s
    assert!(started.elapsed() > Duration::from_secs(2));
    assert!(report.success);
    assert_eq!(
        statuses(&events),
        vec![EventStatus::Info, EventStatus::Info, EventStatus::Success]
    );
    let local = local_copy(video_root.path(), "slow.h264");
    assert_eq!(std::fs::read(&local).unwrap(), BODY);
    assert_eq!(read_sidecar(&local).unwrap(), Some(md5_of(BODY)));
}

#[tokio::test]
async fn test_stalled_download_fails_after_read_timeout() {
    let video_root = TempDir::new().unwrap();
    const BODY: &[u8] = b"ab";

    let listing = json!({
        "stalled.h264": {"path": remote_path("stalled.h264"), "hash": md5_of(BODY)},
    });
    let port = start_trickling_device(listing, BODY, Duration::from_secs(3)).await;
    let mut config = video_config(port);
    config.request_timeout_secs = 1;

    let (report, events) = run_with(config, video_root.path()).await;

    assert!(!report.success);
    assert_eq!(
        statuses(&events),
        vec![EventStatus::Info, EventStatus::Error, EventStatus::Warning]
    );
    let local = local_copy(video_root.path(), "stalled.h264");
    assert!(!local.exists());
    assert!(!local.with_extension("h264.part").exists());
}

#[tokio::test]
async fn test_existing_copy_with_sidecar_is_not_downloaded_again() {
    let server = MockServer::start().await;
    let video_root = TempDir::new().unwrap();
    const BODY: &[u8] = b"recorded earlier";

    let local = local_copy(video_root.path(), "kept.h264");
    std::fs::create_dir_all(local.parent().unwrap()).unwrap();
    std::fs::write(&local, BODY).unwrap();
    write_sidecar(&local, &md5_of(BODY)).unwrap();

    Mock::given(method("GET"))
        .and(path("/list_video_files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "kept.h264": {"path": remote_path("kept.h264"), "hash": md5_of(BODY)},
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(static_path("kept.h264")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(BODY))
        .expect(0)
        .mount(&server)
        .await;

    let (report, events) = run(&server, video_root.path(), false).await;

    assert!(report.success);
    assert_eq!(report.sync, Some(SyncSummary::Video { matching: 1, total: 1 }));
    assert_eq!(
        statuses(&events),
        vec![EventStatus::Info, EventStatus::Info, EventStatus::Success]
    );
    assert!(events[1].message.contains("already backed up"));
    assert_eq!(std::fs::read(&local).unwrap(), BODY);

    let cache = VideoCache::load(video_root.path(), DEVICE_ID);
    assert!(cache.get("kept.h264").is_some());
}
