//! End-to-end behaviour of the local filesystem backend through the provider trait

use std::sync::Arc;

use flowstore::models::FileStorageToken;
use flowstore::storage::{create_storage_provider, LocalStorageProvider, StorageConfig, StorageProvider};
use flowstore::StorageError;
use tempfile::TempDir;

const ORG: &str = "org-acme";
const FLOW: &str = "0b6f4d1e-3c2a-4f8b-9e7d-5a1c2b3d4e5f";

async fn local_storage(dir: &TempDir) -> Arc<dyn StorageProvider> {
    create_storage_provider(StorageConfig::Local {
        storage_path: dir.path().join("storage"),
        upload_path: dir.path().join("storage").join("uploads"),
    })
    .await
    .expect("local storage should initialize")
}

fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / 1024.0 / 1024.0
}

#[tokio::test]
async fn test_report_lifecycle() {
    let dir = TempDir::new().unwrap();
    let storage = local_storage(&dir).await;

    let result = storage
        .add_single_file_to_storage("text/plain", b"ten bytes!", "report.txt", &[ORG, FLOW])
        .await
        .unwrap();
    assert_eq!(result.path.as_deref(), Some("FILE-STORAGE::report.txt"));
    assert!((result.total_size - megabytes(10)).abs() < 1e-12);
    assert_eq!(FileStorageToken::parse(result.path.as_deref().unwrap()).unwrap(), vec!["report.txt"]);

    let data = storage.get_file_from_storage("report.txt", &[ORG, FLOW]).await.unwrap();
    assert_eq!(data, b"ten bytes!");

    let removed = storage.remove_folder_from_storage(&[ORG, FLOW]).await.unwrap();
    assert_eq!(removed.total_size, 0.0);

    let err = storage.get_file_from_storage("report.txt", &[ORG, FLOW]).await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound(_)));
}

#[tokio::test]
async fn test_storage_size_is_sum_of_writes() {
    let dir = TempDir::new().unwrap();
    let storage = local_storage(&dir).await;
    let sizes = [3usize, 1024, 70_000];

    for (i, size) in sizes.iter().enumerate() {
        let data = vec![b'x'; *size];
        storage
            .add_single_file_to_storage("application/octet-stream", &data, &format!("blob-{}.bin", i), &[ORG, FLOW, "chat-1"])
            .await
            .unwrap();
    }

    let expected: u64 = sizes.iter().map(|s| *s as u64).sum();
    assert_eq!(storage.get_storage_size(ORG).await.unwrap(), expected);
    assert_eq!(storage.get_storage_size("someone-else").await.unwrap(), 0);
    assert_eq!(storage.get_storage_size("").await.unwrap(), 0);
}

#[tokio::test]
async fn test_base64_upload_then_stream() {
    let dir = TempDir::new().unwrap();
    let storage = local_storage(&dir).await;
    let mut names = vec!["earlier.txt".to_string()];

    let result = storage
        .add_base64_files_to_storage("data:text/plain;base64,aGVsbG8=,filename:greeting.txt", FLOW, &mut names, ORG)
        .await
        .unwrap();

    assert_eq!(names, vec!["earlier.txt".to_string(), "greeting.txt".to_string()]);
    assert_eq!(
        FileStorageToken::parse(result.path.as_deref().unwrap()).unwrap(),
        vec!["earlier.txt".to_string(), "greeting.txt".to_string()]
    );

    let data = storage.get_file_from_storage("greeting.txt", &[ORG, FLOW]).await.unwrap();
    assert_eq!(data, b"hello");
}

#[tokio::test]
async fn test_malformed_data_uri_is_rejected() {
    let dir = TempDir::new().unwrap();
    let storage = local_storage(&dir).await;
    let mut names = Vec::new();

    let err = storage
        .add_base64_files_to_storage("not a data uri", FLOW, &mut names, ORG)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidDataUri(_)));
    assert!(names.is_empty());
}

#[tokio::test]
async fn test_legacy_chat_file_migrates_once() {
    let dir = TempDir::new().unwrap();
    let storage = local_storage(&dir).await;
    let root = dir.path().join("storage");

    let legacy = root.join(FLOW).join("chat-9");
    std::fs::create_dir_all(&legacy).unwrap();
    std::fs::write(legacy.join("transcript.txt"), b"before tenants").unwrap();

    let first = storage.stream_storage_file(FLOW, "chat-9", "transcript.txt", ORG).await.unwrap();
    assert_eq!(first, b"before tenants");
    assert!(!root.join(FLOW).exists());

    let second = storage.stream_storage_file(FLOW, "chat-9", "transcript.txt", ORG).await.unwrap();
    assert_eq!(second, first);
    assert_eq!(storage.get_storage_size(ORG).await.unwrap(), first.len() as u64);
}

#[tokio::test]
async fn test_removing_missing_file_keeps_size() {
    let dir = TempDir::new().unwrap();
    let storage = local_storage(&dir).await;
    storage.add_single_file_to_storage("text/plain", b"12345", "keep.txt", &[ORG, FLOW]).await.unwrap();

    let before = storage.get_storage_size(ORG).await.unwrap();
    let result = storage.remove_specific_file_from_storage(&[ORG, FLOW, "ghost.txt"]).await.unwrap();
    assert!((result.total_size - megabytes(before)).abs() < 1e-12);
}

#[tokio::test]
async fn test_traversal_segments_never_touch_disk() {
    let dir = TempDir::new().unwrap();
    let storage = LocalStorageProvider::new(dir.path().join("storage"), dir.path().join("uploads"));

    let err = storage
        .add_single_file_to_storage("text/plain", b"x", "a.txt", &["..", FLOW])
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::PathTraversal(_)));

    let err = storage.get_files_list_from_storage(&[ORG, "%2e%2e"]).await.unwrap_err();
    assert!(matches!(err, StorageError::PathTraversal(_)));

    assert!(!dir.path().join("storage").exists());
}

#[tokio::test]
async fn test_list_is_flattened() {
    let dir = TempDir::new().unwrap();
    let storage = local_storage(&dir).await;
    storage.add_single_file_to_storage("", b"a", "a.txt", &[ORG, FLOW]).await.unwrap();
    storage.add_single_file_to_storage("", b"b", "b.txt", &[ORG, FLOW, "chat-1"]).await.unwrap();
    storage.add_single_file_to_storage("", b"c", "c.txt", &[ORG, FLOW, "chat-1", "nested"]).await.unwrap();

    let mut names: Vec<String> = storage
        .get_files_list_from_storage(&[ORG, FLOW])
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["a.txt", "b.txt", "c.txt"]);
}
