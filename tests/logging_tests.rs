//! Tracing wiring for the local backend's log files
//!
//! A global subscriber can only be installed once per process, so this file
//! holds a single test.

use std::fs;

use tempfile::TempDir;
use tracing::{debug, info};

use flowstore::config::LoggingSettings;
use flowstore::logging::{init_tracing, REQUESTS_TARGET};
use flowstore::storage::LocalStorageProvider;

#[test]
fn test_local_sinks_receive_server_and_request_events() {
    let dir = TempDir::new().unwrap();
    let log_dir = dir.path().join("logs");
    let storage = LocalStorageProvider::new(dir.path().join("storage"), dir.path().join("uploads"));
    let settings = LoggingSettings {
        log_dir: log_dir.clone(),
        server_level: "info".to_string(),
        server_filename: "server".to_string(),
        requests_filename: "server-requests.log.jsonl".to_string(),
    };

    init_tracing(&storage, &settings).expect("subscriber should install");

    info!(org_id = "org-acme", "storage ready");
    debug!(target: REQUESTS_TARGET, method = "GET", url = "/api/v1/files", "request");
    debug!("below the server threshold");

    let mut server_logs: Vec<_> = fs::read_dir(&log_dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .filter(|name| name.starts_with("server-2") && name.ends_with(".log"))
        .collect();
    server_logs.sort();
    assert_eq!(server_logs.len(), 1, "expected one hourly server log, got {:?}", server_logs);

    let server = fs::read_to_string(log_dir.join(&server_logs[0])).unwrap();
    assert!(server.contains("storage ready"));
    assert!(!server.contains("below the server threshold"));

    let requests = fs::read_to_string(log_dir.join("server-requests.log.jsonl")).unwrap();
    let line = requests.lines().next().expect("one request line");
    let event: serde_json::Value = serde_json::from_str(line).unwrap();
    assert_eq!(event["fields"]["method"], "GET");
    assert_eq!(event["fields"]["url"], "/api/v1/files");
    assert!(!requests.contains("storage ready"));

    // second install attempt is refused rather than replacing the subscriber
    assert!(init_tracing(&storage, &settings).is_err());
}
