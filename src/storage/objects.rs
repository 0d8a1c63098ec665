//! Tenant storage on top of an `object_store` bucket or container
//!
//! The GCS and Azure adapters differ only in how the store is built and how
//! bytes are written; everything else lives here.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{StreamExt, TryStreamExt};
use object_store::path::Path;
use object_store::{
    Attribute, AttributeValue, Attributes, ObjectStore, PutMultipartOpts, PutOptions, PutPayload, WriteMultipart,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::migration::{read_with_legacy_fallback, LegacyMigration};
use super::{legacy_segments, split_file_segment, StorageProvider};
use crate::config::LoggingSettings;
use crate::errors::{Result, StorageError};
use crate::logging::{object_transports, LogChannel, LogTransport, LogUploader};
use crate::models::{DataUri, FileInfo, FileStorageToken, StorageResult, StorageSizeResult};
use crate::upload::{UploadPart, UploadSink, UploadedFile};
use crate::utils::security::{
    is_path_traversal, join_key, sanitize_filename, validate_chatflow_id, validate_org_id, validate_path_security,
};

/// Chunk handed to the multipart writer at a time
const WRITE_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// Parts the multipart writer may have in flight
const MAX_CONCURRENT_PARTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectStoreKind {
    /// Google Cloud Storage, written through a streaming multipart writer
    Gcs,
    /// Azure Blob Storage, written with one-shot puts
    Azure,
}

impl ObjectStoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectStoreKind::Gcs => "gcs",
            ObjectStoreKind::Azure => "azure",
        }
    }
}

pub(crate) fn object_path(key: &str) -> Result<Path> {
    Ok(Path::parse(key).map_err(object_store::Error::from)?)
}

pub(crate) fn parent_path(path: &Path) -> Option<Path> {
    let parts: Vec<_> = path.parts().collect();
    if parts.len() <= 1 {
        return None;
    }
    Some(Path::from_iter(parts[..parts.len() - 1].iter().cloned()))
}

fn content_attributes(content_type: &str) -> Attributes {
    let mut attributes = Attributes::new();
    if !content_type.is_empty() {
        attributes.insert(Attribute::ContentType, AttributeValue::from(content_type.to_string()));
    }
    attributes
}

/// Raw object operations against one store
#[derive(Clone)]
struct Objects {
    kind: ObjectStoreKind,
    store: Arc<dyn ObjectStore>,
    /// e.g. `gs://bucket` or `azure://container`
    url: String,
}

impl Objects {
    async fn put(&self, path: &Path, data: &[u8], content_type: &str) -> Result<()> {
        match self.kind {
            ObjectStoreKind::Gcs => {
                let opts = PutMultipartOpts {
                    attributes: content_attributes(content_type),
                    ..Default::default()
                };
                let upload = self.store.put_multipart_opts(path, opts).await?;
                let mut writer = WriteMultipart::new(upload);
                for chunk in data.chunks(WRITE_CHUNK_SIZE) {
                    writer.wait_for_capacity(MAX_CONCURRENT_PARTS).await?;
                    writer.write(chunk);
                }
                writer.finish().await?;
            }
            ObjectStoreKind::Azure => {
                let opts = PutOptions {
                    attributes: content_attributes(content_type),
                    ..Default::default()
                };
                self.store
                    .put_opts(path, PutPayload::from(Bytes::copy_from_slice(data)), opts)
                    .await?;
            }
        }
        info!("Stored object {}/{} ({} bytes)", self.url, path, data.len());
        Ok(())
    }

    async fn get(&self, path: &Path) -> Result<Vec<u8>> {
        let result = match self.store.get(path).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => return Err(StorageError::NotFound(path.to_string())),
            Err(e) => return Err(e.into()),
        };

        let mut buffer = Vec::with_capacity(result.meta.size as usize);
        let mut stream = result.into_stream();
        while let Some(chunk) = stream.try_next().await? {
            buffer.extend_from_slice(&chunk);
        }
        debug!("Retrieved object {} ({} bytes)", path, buffer.len());
        Ok(buffer)
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        match self.store.delete(path).await {
            Ok(()) => {
                info!("Deleted object {}/{}", self.url, path);
                Ok(())
            }
            Err(object_store::Error::NotFound { .. }) => {
                debug!("Object already deleted: {}", path);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: Option<&Path>) -> Result<Vec<FileInfo>> {
        let objects: Vec<_> = self.store.list(prefix).try_collect().await?;
        Ok(objects
            .into_iter()
            .map(|meta| FileInfo {
                name: meta.location.filename().unwrap_or_default().to_string(),
                path: meta.location.to_string(),
                size: meta.size as u64,
            })
            .collect())
    }

    /// Feed the listing under `prefix` into the store's bulk delete stream
    async fn delete_prefix(&self, prefix: &Path) -> Result<()> {
        let locations = self.store.list(Some(prefix)).map_ok(|meta| meta.location).boxed();
        let mut deleted = self.store.delete_stream(locations);

        let mut count = 0usize;
        while let Some(result) = deleted.next().await {
            match result {
                Ok(path) => {
                    debug!("Deleted object {}", path);
                    count += 1;
                }
                Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => error!("Failed to delete object under {}: {}", prefix, e),
            }
        }

        info!("Deleted {} objects under {}/{}", count, self.url, prefix);
        Ok(())
    }

    async fn is_folder_empty(&self, folder: &Path) -> Result<bool> {
        let listing = self.store.list_with_delimiter(Some(folder)).await?;
        Ok(listing.objects.is_empty() && listing.common_prefixes.is_empty())
    }
}

/// A tenant-aware provider over any `object_store` implementation
pub struct ObjectStoreProvider {
    objects: Objects,
    summary: serde_json::Value,
}

impl ObjectStoreProvider {
    /// `summary` is reported as-is by `config_summary`; keep secrets out of it
    pub fn new(kind: ObjectStoreKind, store: Arc<dyn ObjectStore>, url: String, summary: serde_json::Value) -> Self {
        Self {
            objects: Objects { kind, store, url },
            summary,
        }
    }

    pub fn kind(&self) -> ObjectStoreKind {
        self.objects.kind
    }

    pub fn url(&self) -> &str {
        &self.objects.url
    }

    async fn store_under(&self, mime: &str, data: &[u8], file_name: &str, paths: &[&str]) -> Result<String> {
        validate_path_security(paths)?;
        let file_name = sanitize_filename(file_name)?;
        let mut segments = paths.to_vec();
        segments.push(&file_name);
        let path = object_path(&join_key(&segments)?)?;
        self.objects.put(&path, data, mime).await?;
        Ok(file_name)
    }

    async fn usage_for(&self, paths: &[&str]) -> Result<u64> {
        match paths.first() {
            Some(org_id) => self.get_storage_size(org_id).await,
            None => Ok(0),
        }
    }

    async fn read_with_fallback(&self, file_name: &str, paths: &[&str]) -> Result<Vec<u8>> {
        validate_path_security(paths)?;
        let file_name = sanitize_filename(file_name)?;

        let mut canonical = paths.to_vec();
        canonical.push(&file_name);
        let canonical = object_path(&join_key(&canonical)?)?;

        let legacy = match legacy_segments(paths) {
            Some(mut segments) => {
                segments.push(&file_name);
                Some(object_path(&join_key(&segments)?)?)
            }
            None => None,
        };

        read_with_legacy_fallback(self, &canonical, legacy.as_ref(), &file_name).await
    }

    fn folder(paths: &[&str]) -> Result<Path> {
        validate_path_security(paths)?;
        object_path(&join_key(paths)?)
    }

    fn upload_path(file_path: &str) -> Result<Path> {
        if file_path.is_empty() || is_path_traversal(file_path) {
            return Err(StorageError::PathTraversal(file_path.to_string()));
        }
        object_path(file_path)
    }
}

#[async_trait]
impl LegacyMigration for ObjectStoreProvider {
    type Location = Path;

    async fn read_location(&self, location: &Path) -> Result<Vec<u8>> {
        self.objects.get(location).await
    }

    async fn write_location(&self, location: &Path, data: &[u8]) -> Result<()> {
        let content_type = mime_guess::from_path(location.to_string()).first_or_octet_stream().to_string();
        self.objects.put(location, data, &content_type).await
    }

    async fn delete_location(&self, location: &Path) -> Result<()> {
        self.objects.delete(location).await
    }

    /// Walks upward while each prefix has become empty and reports where it
    /// stopped. Nothing is deleted: `object_store::Path` strips the trailing
    /// delimiter, so a `prefix/` folder marker object cannot be addressed.
    /// A marker written by another tool (for example the GCS console) is
    /// left in place and shows up as a zero-byte listing entry.
    async fn prune_empty_ancestors(&self, location: &Path) {
        let mut current = parent_path(location);

        while let Some(folder) = current {
            match self.objects.is_folder_empty(&folder).await {
                Ok(true) => debug!("Legacy prefix {} is now empty", folder),
                Ok(false) => {
                    debug!("Legacy prefix {} still has objects", folder);
                    break;
                }
                Err(e) => {
                    warn!("Stopped pruning at {}: {}", folder, e);
                    break;
                }
            }
            current = parent_path(&folder);
        }
    }
}

#[async_trait]
impl StorageProvider for ObjectStoreProvider {
    fn storage_type(&self) -> &'static str {
        self.objects.kind.as_str()
    }

    fn config_summary(&self) -> serde_json::Value {
        self.summary.clone()
    }

    async fn add_base64_files_to_storage(
        &self,
        file_base64: &str,
        chatflow_id: &str,
        file_names: &mut Vec<String>,
        org_id: &str,
    ) -> Result<StorageResult> {
        validate_org_id(org_id)?;
        validate_chatflow_id(chatflow_id)?;
        validate_path_security(&[org_id, chatflow_id])?;

        let upload = DataUri::parse(file_base64)?;
        let file_name = self
            .store_under(&upload.mime, &upload.data, &upload.file_name, &[org_id, chatflow_id])
            .await?;
        file_names.push(file_name);

        let total = self.get_storage_size(org_id).await?;
        Ok(StorageResult::new(FileStorageToken::encode_many(file_names), total))
    }

    async fn add_array_files_to_storage(
        &self,
        mime: &str,
        data: &[u8],
        file_name: &str,
        file_names: &mut Vec<String>,
        paths: &[&str],
    ) -> Result<StorageResult> {
        let file_name = self.store_under(mime, data, file_name, paths).await?;
        file_names.push(file_name);

        let total = self.usage_for(paths).await?;
        Ok(StorageResult::new(FileStorageToken::encode_many(file_names), total))
    }

    async fn add_single_file_to_storage(
        &self,
        mime: &str,
        data: &[u8],
        file_name: &str,
        paths: &[&str],
    ) -> Result<StorageResult> {
        let file_name = self.store_under(mime, data, file_name, paths).await?;

        let total = self.usage_for(paths).await?;
        Ok(StorageResult::new(FileStorageToken::encode_single(&file_name), total))
    }

    async fn get_file_from_upload(&self, file_path: &str) -> Result<Vec<u8>> {
        self.objects.get(&Self::upload_path(file_path)?).await
    }

    async fn get_file_from_storage(&self, file: &str, paths: &[&str]) -> Result<Vec<u8>> {
        self.read_with_fallback(file, paths).await
    }

    async fn stream_storage_file(
        &self,
        chatflow_id: &str,
        chat_id: &str,
        file_name: &str,
        org_id: &str,
    ) -> Result<Vec<u8>> {
        validate_org_id(org_id)?;
        validate_chatflow_id(chatflow_id)?;
        self.read_with_fallback(file_name, &[org_id, chatflow_id, chat_id]).await
    }

    async fn get_files_list_from_storage(&self, paths: &[&str]) -> Result<Vec<FileInfo>> {
        let folder = Self::folder(paths)?;
        self.objects.list(Some(&folder)).await
    }

    async fn remove_files_from_storage(&self, paths: &[&str]) -> Result<StorageSizeResult> {
        let folder = Self::folder(paths)?;
        if folder.parts().next().is_none() {
            return Err(StorageError::PathTraversal("refusing to remove the whole bucket".to_string()));
        }
        self.objects.delete_prefix(&folder).await?;
        Ok(StorageSizeResult::from_bytes(self.usage_for(paths).await?))
    }

    async fn remove_specific_file_from_upload(&self, file_path: &str) -> Result<()> {
        self.objects.delete(&Self::upload_path(file_path)?).await
    }

    async fn remove_specific_file_from_storage(&self, paths: &[&str]) -> Result<StorageSizeResult> {
        let (file_name, dirs) = split_file_segment(paths)
            .ok_or_else(|| StorageError::InvalidFilename("no filename given".to_string()))?;
        validate_path_security(&dirs)?;

        let file_name = sanitize_filename(file_name)?;
        let mut segments = dirs.clone();
        segments.push(&file_name);
        self.objects.delete(&object_path(&join_key(&segments)?)?).await?;

        Ok(StorageSizeResult::from_bytes(self.usage_for(paths).await?))
    }

    async fn remove_folder_from_storage(&self, paths: &[&str]) -> Result<StorageSizeResult> {
        self.remove_files_from_storage(paths).await
    }

    async fn get_storage_size(&self, org_id: &str) -> Result<u64> {
        if org_id.is_empty() {
            return Ok(0);
        }
        validate_org_id(org_id)?;
        let folder = Self::folder(&[org_id])?;
        let files = self.objects.list(Some(&folder)).await?;
        Ok(files.iter().map(|f| f.size).sum())
    }

    fn upload_sink(&self) -> Result<Arc<dyn UploadSink>> {
        Ok(Arc::new(ObjectUploadSink { objects: self.objects.clone() }))
    }

    fn logger_transports(&self, channel: LogChannel, _settings: &LoggingSettings) -> Result<Vec<LogTransport>> {
        object_transports(channel, Arc::new(ObjectLogUploader { objects: self.objects.clone() }))
    }
}

/// Stages uploads at `uploads/<uuid>/<original name>` and reports the object name
struct ObjectUploadSink {
    objects: Objects,
}

#[async_trait]
impl UploadSink for ObjectUploadSink {
    fn destination(&self) -> String {
        format!("{}/uploads", self.objects.url)
    }

    async fn stage(&self, part: UploadPart<'_>) -> Result<UploadedFile> {
        let original_name = part.original_name.clone();
        let field_name = part.field_name.clone();
        let mime_type = part.mime_type.clone();

        let id = Uuid::new_v4().to_string();
        let safe_name = sanitize_filename(&original_name)?;
        let path = object_path(&join_key(&["uploads", &id, &safe_name])?)?;

        let data = part.collect().await?;
        let content_type = mime_type
            .clone()
            .unwrap_or_else(|| mime_guess::from_path(&safe_name).first_or_octet_stream().to_string());
        self.objects.put(&path, &data, &content_type).await?;

        Ok(UploadedFile {
            path: path.to_string(),
            original_name,
            mime_type,
            size: data.len() as u64,
            field_name,
        })
    }
}

struct ObjectLogUploader {
    objects: Objects,
}

#[async_trait]
impl LogUploader for ObjectLogUploader {
    async fn upload_log(&self, key: &str, body: &[u8]) -> Result<()> {
        let content_type = if key.ends_with(".jsonl") { "application/x-ndjson" } else { "text/plain" };
        self.objects.put(&object_path(key)?, body, content_type).await
    }

    fn log_destination(&self, folder: &str) -> String {
        format!("{}/{}", self.objects.url, folder)
    }
}
