//! Multipart uploads driven through an axum route into backend upload sinks

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Multipart, State},
    http::{Request, StatusCode},
    routing::post,
    Json, Router,
};
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

use flowstore::storage::{LocalStorageProvider, StorageProvider};
use flowstore::upload::{store_multipart, UploadSink, UploadedFile};

const BOUNDARY: &str = "flowstore-test-boundary";

async fn upload(
    State(sink): State<Arc<dyn UploadSink>>,
    multipart: Multipart,
) -> Result<Json<Vec<UploadedFile>>, (StatusCode, String)> {
    store_multipart(sink.as_ref(), multipart)
        .await
        .map(Json)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))
}

fn multipart_body() -> String {
    format!(
        "--{b}\r\n\
         Content-Disposition: form-data; name=\"files\"; filename=\"notes.txt\"\r\n\
         Content-Type: text/plain\r\n\r\n\
         first file\r\n\
         --{b}\r\n\
         Content-Disposition: form-data; name=\"chatId\"\r\n\r\n\
         chat-42\r\n\
         --{b}\r\n\
         Content-Disposition: form-data; name=\"files\"; filename=\"data.csv\"\r\n\
         Content-Type: text/csv\r\n\r\n\
         a,b\n1,2\r\n\
         --{b}--\r\n",
        b = BOUNDARY
    )
}

#[tokio::test]
async fn test_multipart_upload_to_local_sink() {
    let dir = TempDir::new().unwrap();
    let storage = LocalStorageProvider::new(dir.path().join("storage"), dir.path().join("uploads"));
    let app = Router::new()
        .route("/upload", post(upload))
        .with_state(storage.upload_sink().unwrap());

    let request = Request::builder()
        .method("POST")
        .uri("/upload")
        .header("content-type", format!("multipart/form-data; boundary={}", BOUNDARY))
        .body(Body::from(multipart_body()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let staged: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();
    assert_eq!(staged.len(), 2);
    assert_eq!(staged[0]["originalName"], "notes.txt");
    assert_eq!(staged[0]["fieldName"], "files");
    assert_eq!(staged[0]["size"], 10);
    assert_eq!(staged[1]["mimeType"], "text/csv");

    let first = staged[0]["path"].as_str().unwrap();
    assert_eq!(storage.get_file_from_upload(first).await.unwrap(), b"first file");

    let second = staged[1]["path"].as_str().unwrap();
    assert_eq!(storage.get_file_from_upload(second).await.unwrap(), b"a,b\n1,2");

    storage.remove_specific_file_from_upload(first).await.unwrap();
    assert!(storage.get_file_from_upload(first).await.unwrap_err().is_not_found());
}

#[cfg(feature = "gcs")]
#[tokio::test]
async fn test_multipart_upload_to_object_sink() {
    use flowstore::storage::{ObjectStoreKind, ObjectStoreProvider};
    use object_store::memory::InMemory;

    let storage = ObjectStoreProvider::new(
        ObjectStoreKind::Gcs,
        Arc::new(InMemory::new()),
        "memory://uploads-test".to_string(),
        serde_json::json!({}),
    );
    let app = Router::new()
        .route("/upload", post(upload))
        .with_state(storage.upload_sink().unwrap());

    let request = Request::builder()
        .method("POST")
        .uri("/upload")
        .header("content-type", format!("multipart/form-data; boundary={}", BOUNDARY))
        .body(Body::from(multipart_body()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let staged: Vec<UploadedFileView> = serde_json::from_slice(&body).unwrap();
    assert!(staged[0].path.starts_with("uploads/"));
    assert!(staged[0].path.ends_with("/notes.txt"));
    assert_eq!(storage.get_file_from_upload(&staged[0].path).await.unwrap(), b"first file");
}

#[cfg(feature = "gcs")]
#[derive(serde::Deserialize)]
struct UploadedFileView {
    path: String,
}
