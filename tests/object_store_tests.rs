//! GCS and Azure adapters exercised against an in-memory object store

#![cfg(any(feature = "gcs", feature = "azure"))]

use std::sync::Arc;

use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};

use flowstore::storage::{ObjectStoreKind, ObjectStoreProvider, StorageProvider};
use flowstore::StorageError;

const ORG: &str = "org-acme";
const FLOW: &str = "0b6f4d1e-3c2a-4f8b-9e7d-5a1c2b3d4e5f";

fn storage(kind: ObjectStoreKind) -> (ObjectStoreProvider, Arc<InMemory>) {
    let store = Arc::new(InMemory::new());
    let provider = ObjectStoreProvider::new(kind, store.clone(), "memory://bucket".to_string(), serde_json::json!({}));
    (provider, store)
}

#[tokio::test]
async fn test_report_lifecycle_on_both_backends() {
    for kind in [ObjectStoreKind::Gcs, ObjectStoreKind::Azure] {
        let (storage, _) = storage(kind);

        let result = storage
            .add_single_file_to_storage("text/plain", b"ten bytes!", "report.txt", &[ORG, FLOW])
            .await
            .unwrap();
        assert_eq!(result.path.as_deref(), Some("FILE-STORAGE::report.txt"));
        assert!((result.total_size - 10.0 / 1024.0 / 1024.0).abs() < 1e-12);

        storage.remove_folder_from_storage(&[ORG, FLOW]).await.unwrap();
        let err = storage.get_file_from_storage("report.txt", &[ORG, FLOW]).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }
}

#[tokio::test]
async fn test_legacy_migration_is_idempotent() {
    let (storage, store) = storage(ObjectStoreKind::Azure);
    let legacy = Path::from(format!("{}/chat-1/notes.md", FLOW));
    store.put(&legacy, PutPayload::from_static(b"# notes")).await.unwrap();

    let first = storage.get_file_from_storage("notes.md", &[ORG, FLOW, "chat-1"]).await.unwrap();
    let second = storage.get_file_from_storage("notes.md", &[ORG, FLOW, "chat-1"]).await.unwrap();
    assert_eq!(first, b"# notes");
    assert_eq!(second, first);

    let remaining: Vec<_> = storage.get_files_list_from_storage(&[FLOW]).await.unwrap();
    assert!(remaining.is_empty());
    assert_eq!(storage.get_storage_size(ORG).await.unwrap(), 7);
}

#[tokio::test]
async fn test_migration_leaves_siblings_alone() {
    let (storage, store) = storage(ObjectStoreKind::Gcs);
    store
        .put(&Path::from(format!("{}/chat-1/old.txt", FLOW)), PutPayload::from_static(b"old"))
        .await
        .unwrap();
    store
        .put(&Path::from(format!("{}/chat-2/other.txt", FLOW)), PutPayload::from_static(b"other"))
        .await
        .unwrap();

    storage.stream_storage_file(FLOW, "chat-1", "old.txt", ORG).await.unwrap();

    let legacy: Vec<String> = storage
        .get_files_list_from_storage(&[FLOW])
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.path)
        .collect();
    assert_eq!(legacy, vec![format!("{}/chat-2/other.txt", FLOW)]);
}

#[tokio::test]
async fn test_remove_files_and_specific_file() {
    let (storage, _) = storage(ObjectStoreKind::Gcs);
    let mut names = Vec::new();
    storage.add_array_files_to_storage("text/plain", b"aaa", "a.txt", &mut names, &[ORG, FLOW]).await.unwrap();
    let result = storage
        .add_array_files_to_storage("text/plain", b"bbbb", "b.txt", &mut names, &[ORG, FLOW])
        .await
        .unwrap();
    assert_eq!(result.path.as_deref(), Some(r#"FILE-STORAGE::["a.txt","b.txt"]"#));

    let result = storage.remove_specific_file_from_storage(&[ORG, FLOW, "a.txt"]).await.unwrap();
    assert!((result.total_size - 4.0 / 1024.0 / 1024.0).abs() < 1e-12);

    let result = storage.remove_specific_file_from_storage(&[ORG, FLOW, "a.txt"]).await.unwrap();
    assert!((result.total_size - 4.0 / 1024.0 / 1024.0).abs() < 1e-12);

    let result = storage.remove_files_from_storage(&[ORG]).await.unwrap();
    assert_eq!(result.total_size, 0.0);
}

#[tokio::test]
async fn test_invalid_ids_are_rejected_before_writes() {
    let (storage, store) = storage(ObjectStoreKind::Azure);
    let mut names = Vec::new();
    let uri = "data:text/plain;base64,aGk=,filename:hi.txt";

    let err = storage.add_base64_files_to_storage(uri, "flow-1", &mut names, ORG).await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidTenantId(_)));

    let err = storage.stream_storage_file(FLOW, "..", "a.txt", ORG).await.unwrap_err();
    assert!(matches!(err, StorageError::PathTraversal(_)));

    let listed: Vec<_> = futures::TryStreamExt::try_collect::<Vec<_>>(store.list(None)).await.unwrap();
    assert!(listed.is_empty());
}
