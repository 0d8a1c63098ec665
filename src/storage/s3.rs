//! S3-compatible storage backend

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use aws_credential_types::Credentials;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, Delete, ObjectIdentifier};
use aws_sdk_s3::Client;
use aws_types::region::Region as AwsRegion;

use super::migration::{read_with_legacy_fallback, LegacyMigration};
use super::{legacy_segments, split_file_segment, StorageProvider};
use crate::config::{LoggingSettings, S3Settings};
use crate::errors::{Result, StorageError};
use crate::logging::{object_transports, LogChannel, LogTransport, LogUploader};
use crate::models::{DataUri, FileInfo, FileStorageToken, StorageResult, StorageSizeResult};
use crate::upload::{UploadPart, UploadSink, UploadedFile};
use crate::utils::security::{
    is_path_traversal, join_key, sanitize_filename, validate_chatflow_id, validate_org_id, validate_path_security,
};

/// Threshold for using multipart uploads (100MB)
const STREAMING_THRESHOLD: usize = 100 * 1024 * 1024;

/// Multipart upload chunk size (16MB, AWS minimum is 5MB)
const MULTIPART_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Largest batch a single DeleteObjects request accepts
const DELETE_BATCH_SIZE: usize = 1000;

/// Build an S3 client from settings; static credentials win over the default chain
pub async fn build_client(settings: &S3Settings) -> Result<Client> {
    if settings.bucket_name.is_empty() {
        return Err(StorageError::Configuration("S3 bucket name is required".to_string()));
    }
    if settings.region.is_empty() {
        return Err(StorageError::Configuration("S3 region is required".to_string()));
    }

    let region = AwsRegion::new(settings.region.clone());
    let mut builder = match (&settings.access_key_id, &settings.secret_access_key) {
        (Some(key_id), Some(secret)) => {
            let credentials = Credentials::new(key_id, secret, None, None, "flowstore-s3-storage");
            aws_sdk_s3::config::Builder::new()
                .region(region)
                .credentials_provider(credentials)
                .behavior_version_latest()
        }
        _ => {
            let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
                .region(region)
                .load()
                .await;
            aws_sdk_s3::config::Builder::from(&shared)
        }
    };

    if let Some(endpoint_url) = &settings.endpoint_url {
        builder = builder.endpoint_url(endpoint_url);
        info!("Using custom S3 endpoint: {}", endpoint_url);
    }
    if settings.force_path_style {
        builder = builder.force_path_style(true);
    }
    // Failed requests go straight back to the caller
    builder = builder.retry_config(RetryConfig::disabled());

    Ok(Client::from_conf(builder.build()))
}

fn is_missing_key<E: ProvideErrorMetadata>(err: &SdkError<E>) -> bool {
    if matches!(err.code(), Some("NoSuchKey") | Some("NotFound")) {
        return true;
    }
    err.raw_response().map(|r| r.status().as_u16() == 404).unwrap_or(false)
}

/// Parent prefix of a key (`a/b/c.txt` -> `a/b`), `None` at the top level
pub(crate) fn parent_prefix(key: &str) -> Option<&str> {
    key.trim_end_matches('/').rsplit_once('/').map(|(parent, _)| parent)
}

/// Listing prefix for a set of segments: the joined key plus a trailing `/`
pub(crate) fn folder_prefix(segments: &[&str]) -> Result<String> {
    let key = join_key(segments)?;
    Ok(if key.is_empty() { key } else { format!("{}/", key) })
}

fn content_type_for(key: &str, mime: &str) -> String {
    if mime.trim().is_empty() {
        mime_guess::from_path(key).first_or_octet_stream().to_string()
    } else {
        mime.to_string()
    }
}

/// Carry a client error to the caller unchanged
fn client_error<E>(err: E) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    StorageError::S3(Box::new(err))
}

/// Object operations shared by the provider, its upload sink and its log sinks
#[derive(Debug, Clone)]
struct Bucket {
    client: Client,
    name: String,
}

impl Bucket {
    async fn put(&self, key: &str, data: &[u8], content_type: &str, metadata: Option<HashMap<String, String>>) -> Result<()> {
        if data.len() > STREAMING_THRESHOLD {
            info!("Using multipart upload for large file: {} ({} bytes)", key, data.len());
            return self.put_multipart(key, data, content_type, metadata).await;
        }

        self.client
            .put_object()
            .bucket(&self.name)
            .key(key)
            .content_type(content_type)
            .set_metadata(metadata)
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(client_error)?;

        info!("Stored file to S3: {}/{} ({} bytes)", self.name, key, data.len());
        Ok(())
    }

    async fn put_multipart(
        &self,
        key: &str,
        data: &[u8],
        content_type: &str,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<()> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(&self.name)
            .key(key)
            .content_type(content_type)
            .set_metadata(metadata)
            .send()
            .await
            .map_err(client_error)?;
        let upload_id = create_response
            .upload_id()
            .ok_or_else(|| anyhow!("Missing upload ID in multipart upload response for {}", key))?;

        let total_chunks = data.len().div_ceil(MULTIPART_CHUNK_SIZE);
        let mut completed_parts = Vec::with_capacity(total_chunks);

        for (chunk_index, chunk) in data.chunks(MULTIPART_CHUNK_SIZE).enumerate() {
            let part_number = (chunk_index + 1) as i32;
            debug!("Uploading part {} of {} for {} ({} bytes)", part_number, total_chunks, key, chunk.len());

            let part = self
                .client
                .upload_part()
                .bucket(&self.name)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk.to_vec()))
                .send()
                .await;

            let part = match part {
                Ok(part) => part,
                Err(e) => {
                    self.abort_multipart(key, upload_id).await;
                    return Err(client_error(e));
                }
            };

            let Some(etag) = part.e_tag() else {
                self.abort_multipart(key, upload_id).await;
                return Err(anyhow!("Missing ETag in upload part {} response for {}", part_number, key).into());
            };
            completed_parts.push(CompletedPart::builder().part_number(part_number).e_tag(etag).build());
        }

        let completed = CompletedMultipartUpload::builder().set_parts(Some(completed_parts)).build();
        if let Err(e) = self
            .client
            .complete_multipart_upload()
            .bucket(&self.name)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
        {
            self.abort_multipart(key, upload_id).await;
            return Err(client_error(e));
        }

        info!("Successfully completed multipart upload for {}", key);
        Ok(())
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) {
        if let Err(e) = self
            .client
            .abort_multipart_upload()
            .bucket(&self.name)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
        {
            error!("Failed to abort multipart upload for {}: {}", key, e);
        }
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let response = match self.client.get_object().bucket(&self.name).key(key).send().await {
            Ok(response) => response,
            Err(e) if is_missing_key(&e) => return Err(StorageError::NotFound(key.to_string())),
            Err(e) => return Err(client_error(e)),
        };

        let body = response.body.collect().await.map_err(client_error)?;
        let bytes = body.into_bytes().to_vec();
        debug!("Retrieved file: {} ({} bytes)", key, bytes.len());
        Ok(bytes)
    }

    /// Deleting an absent key succeeds on S3
    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.name)
            .key(key)
            .send()
            .await
            .map_err(client_error)?;
        info!("Deleted file: {}", key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<FileInfo>> {
        let mut files = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.name)
                .prefix(prefix)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(client_error)?;

            for object in response.contents() {
                let Some(key) = object.key() else { continue };
                if key.ends_with('/') {
                    continue;
                }
                files.push(FileInfo {
                    name: key.rsplit('/').next().unwrap_or(key).to_string(),
                    path: key.to_string(),
                    size: object.size().unwrap_or(0).max(0) as u64,
                });
            }

            match response.next_continuation_token() {
                Some(token) if response.is_truncated() == Some(true) => continuation_token = Some(token.to_string()),
                _ => break,
            }
        }

        Ok(files)
    }

    /// Send one DeleteObjects request; returns how many keys were removed
    async fn delete_batch(&self, keys: Vec<String>, quiet: bool) -> Result<usize> {
        let requested = keys.len();
        let objects = keys
            .into_iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(client_error)?;
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(quiet)
            .build()
            .map_err(client_error)?;

        let response = self
            .client
            .delete_objects()
            .bucket(&self.name)
            .delete(delete)
            .send()
            .await
            .map_err(client_error)?;

        for failure in response.errors() {
            error!(
                "Failed to delete {}: {} {}",
                failure.key().unwrap_or("<unknown>"),
                failure.code().unwrap_or_default(),
                failure.message().unwrap_or_default()
            );
        }

        Ok(requested.saturating_sub(response.errors().len()))
    }

    /// Delete everything under `prefix`, re-listing until nothing is left
    async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        loop {
            let keys: Vec<String> = self.list(prefix).await?.into_iter().map(|f| f.path).collect();
            if keys.is_empty() {
                return Ok(());
            }

            let mut deleted = 0;
            for batch in keys.chunks(DELETE_BATCH_SIZE) {
                deleted += self.delete_batch(batch.to_vec(), false).await?;
            }
            info!("Deleted {} objects under {}", deleted, prefix);

            if deleted == 0 {
                warn!("No progress deleting objects under {}, giving up", prefix);
                return Ok(());
            }
        }
    }

    /// One-level delimiter listing: empty when there are no objects and no sub-prefixes
    async fn is_folder_empty(&self, folder: &str) -> Result<bool> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(&self.name)
            .prefix(format!("{}/", folder))
            .delimiter("/")
            .max_keys(1)
            .send()
            .await
            .map_err(client_error)?;
        Ok(response.contents().is_empty() && response.common_prefixes().is_empty())
    }
}

pub struct S3StorageProvider {
    bucket: Bucket,
    settings: S3Settings,
}

impl S3StorageProvider {
    pub async fn new(settings: S3Settings) -> Result<Self> {
        let client = build_client(&settings).await?;
        info!("S3 storage configured for bucket {} in {}", settings.bucket_name, settings.region);
        Ok(Self {
            bucket: Bucket {
                client,
                name: settings.bucket_name.clone(),
            },
            settings,
        })
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket.name
    }

    async fn store_under(&self, mime: &str, data: &[u8], file_name: &str, paths: &[&str]) -> Result<String> {
        validate_path_security(paths)?;
        let file_name = sanitize_filename(file_name)?;
        let mut segments = paths.to_vec();
        segments.push(&file_name);
        let key = join_key(&segments)?;
        self.bucket.put(&key, data, &content_type_for(&key, mime), None).await?;
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
        let canonical = join_key(&canonical)?;

        let legacy = match legacy_segments(paths) {
            Some(mut segments) => {
                segments.push(&file_name);
                Some(join_key(&segments)?)
            }
            None => None,
        };

        read_with_legacy_fallback(self, &canonical, legacy.as_ref(), &file_name).await
    }

    fn upload_key(file_path: &str) -> Result<&str> {
        if file_path.is_empty() || is_path_traversal(file_path) {
            return Err(StorageError::PathTraversal(file_path.to_string()));
        }
        Ok(file_path)
    }
}

#[async_trait]
impl LegacyMigration for S3StorageProvider {
    type Location = String;

    async fn read_location(&self, location: &String) -> Result<Vec<u8>> {
        self.bucket.get(location).await
    }

    async fn write_location(&self, location: &String, data: &[u8]) -> Result<()> {
        self.bucket.put(location, data, &content_type_for(location, ""), None).await
    }

    async fn delete_location(&self, location: &String) -> Result<()> {
        self.bucket.delete(location).await
    }

    async fn prune_empty_ancestors(&self, location: &String) {
        let mut current = parent_prefix(location).map(str::to_string);

        while let Some(folder) = current {
            match self.bucket.is_folder_empty(&folder).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    warn!("Stopped pruning at {}: {}", folder, e);
                    break;
                }
            }

            if let Err(e) = self.bucket.delete_batch(vec![format!("{}/", folder)], true).await {
                debug!("No folder marker removed for {}: {}", folder, e);
            }
            current = parent_prefix(&folder).map(str::to_string);
        }
    }
}

#[async_trait]
impl StorageProvider for S3StorageProvider {
    fn storage_type(&self) -> &'static str {
        "s3"
    }

    fn config_summary(&self) -> serde_json::Value {
        json!({
            "storageType": "s3",
            "bucket": self.settings.bucket_name,
            "region": self.settings.region,
            "endpoint": self.settings.endpoint_url,
            "forcePathStyle": self.settings.force_path_style,
            "staticCredentials": self.settings.access_key_id.is_some(),
        })
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
        self.bucket.get(Self::upload_key(file_path)?).await
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
        validate_path_security(paths)?;
        self.bucket.list(&folder_prefix(paths)?).await
    }

    async fn remove_files_from_storage(&self, paths: &[&str]) -> Result<StorageSizeResult> {
        validate_path_security(paths)?;
        let prefix = folder_prefix(paths)?;
        if prefix.is_empty() {
            return Err(StorageError::PathTraversal("refusing to remove the whole bucket".to_string()));
        }
        self.bucket.delete_prefix(&prefix).await?;
        Ok(StorageSizeResult::from_bytes(self.usage_for(paths).await?))
    }

    async fn remove_specific_file_from_upload(&self, file_path: &str) -> Result<()> {
        self.bucket.delete(Self::upload_key(file_path)?).await
    }

    async fn remove_specific_file_from_storage(&self, paths: &[&str]) -> Result<StorageSizeResult> {
        let (file_name, dirs) = split_file_segment(paths)
            .ok_or_else(|| StorageError::InvalidFilename("no filename given".to_string()))?;
        validate_path_security(&dirs)?;

        let file_name = sanitize_filename(file_name)?;
        let mut segments = dirs.clone();
        segments.push(&file_name);
        self.bucket.delete(&join_key(&segments)?).await?;

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
        let files = self.bucket.list(&folder_prefix(&[org_id])?).await?;
        Ok(files.iter().map(|f| f.size).sum())
    }

    fn upload_sink(&self) -> Result<Arc<dyn UploadSink>> {
        Ok(Arc::new(S3UploadSink { bucket: self.bucket.clone() }))
    }

    fn logger_transports(&self, channel: LogChannel, _settings: &LoggingSettings) -> Result<Vec<LogTransport>> {
        object_transports(channel, Arc::new(S3LogUploader { bucket: self.bucket.clone() }))
    }
}

/// Stages uploads at a random key, tagging the object with its original name
struct S3UploadSink {
    bucket: Bucket,
}

#[async_trait]
impl UploadSink for S3UploadSink {
    fn destination(&self) -> String {
        format!("s3://{}", self.bucket.name)
    }

    async fn stage(&self, part: UploadPart<'_>) -> Result<UploadedFile> {
        let key = Uuid::new_v4().to_string();
        let original_name = part.original_name.clone();
        let field_name = part.field_name.clone();
        let mime_type = part.mime_type.clone();
        let data = part.collect().await?;

        let mut metadata = HashMap::new();
        metadata.insert("originalName".to_string(), original_name.clone());
        if let Some(field) = &field_name {
            metadata.insert("fieldName".to_string(), field.clone());
        }

        let content_type = content_type_for(&original_name, mime_type.as_deref().unwrap_or_default());
        self.bucket.put(&key, &data, &content_type, Some(metadata)).await?;

        Ok(UploadedFile {
            path: key,
            original_name,
            mime_type,
            size: data.len() as u64,
            field_name,
        })
    }
}

struct S3LogUploader {
    bucket: Bucket,
}

#[async_trait]
impl LogUploader for S3LogUploader {
    async fn upload_log(&self, key: &str, body: &[u8]) -> Result<()> {
        let content_type = if key.ends_with(".jsonl") { "application/x-ndjson" } else { "text/plain" };
        self.bucket.put(key, body, content_type, None).await
    }

    fn log_destination(&self, folder: &str) -> String {
        format!("s3://{}/{}", self.bucket.name, folder)
    }
}
