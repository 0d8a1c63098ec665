//! Google Cloud Storage backend

use object_store::gcp::GoogleCloudStorageBuilder;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use super::objects::{ObjectStoreKind, ObjectStoreProvider};
use crate::config::GcsSettings;
use crate::errors::{Result, StorageError};

/// Build a provider for the configured bucket.
///
/// Without a credential file the builder falls back to ambient credentials
/// (`GOOGLE_APPLICATION_CREDENTIALS` or the metadata server).
pub fn create_gcs_provider(settings: &GcsSettings) -> Result<ObjectStoreProvider> {
    if settings.bucket_name.is_empty() {
        return Err(StorageError::Configuration(
            "GOOGLE_CLOUD_STORAGE_BUCKET_NAME env variable is required".to_string(),
        ));
    }

    let mut builder = GoogleCloudStorageBuilder::new().with_bucket_name(&settings.bucket_name);
    if let Some(path) = &settings.credential_path {
        builder = builder.with_service_account_path(path);
    }

    let store = builder
        .build()
        .map_err(|e| StorageError::Configuration(format!("Failed to configure GCS bucket {}: {}", settings.bucket_name, e)))?;

    info!("GCS storage configured for bucket {}", settings.bucket_name);
    Ok(ObjectStoreProvider::new(
        ObjectStoreKind::Gcs,
        Arc::new(store),
        format!("gs://{}", settings.bucket_name),
        json!({
            "storageType": "gcs",
            "bucket": settings.bucket_name,
            "projectId": settings.project_id,
            "credentialFile": settings.credential_path.is_some(),
        }),
    ))
}
