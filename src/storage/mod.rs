//! Storage provider abstraction for tenant-scoped file storage
//!
//! This module provides a clean abstraction over different storage backends
//! (local filesystem, S3, GCS, Azure Blob) with a unified interface. Every
//! backend lays files out as `orgId/chatflowId[/chatId]/fileName` and must
//! behave identically for the same sequence of calls.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::LoggingSettings;
use crate::errors::{Result, StorageError};
use crate::logging::{LogChannel, LogTransport};
use crate::models::{FileInfo, StorageResult, StorageSizeResult};
use crate::upload::UploadSink;
use crate::utils::security::sanitize_filename;

pub mod factory;
pub mod local;
pub mod migration;

#[cfg(feature = "s3")]
pub mod s3;

#[cfg(any(feature = "gcs", feature = "azure"))]
mod objects;

#[cfg(feature = "gcs")]
pub mod gcs;

#[cfg(feature = "azure")]
pub mod azure;

pub use factory::{create_storage_provider, storage_config_from_settings, storage_provider, StorageConfig, StorageFactory};
pub use local::LocalStorageProvider;
#[cfg(any(feature = "gcs", feature = "azure"))]
pub use objects::{ObjectStoreKind, ObjectStoreProvider};
#[cfg(feature = "s3")]
pub use s3::S3StorageProvider;

/// Core storage trait that all backend implementations must implement.
///
/// `paths` arguments are logical path segments; the first segment is the
/// organization id whenever the call is tenant scoped, and usage figures in
/// the returned results are computed for that segment.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Short identifier of the backend (`local`, `s3`, `gcs`, `azure`)
    fn storage_type(&self) -> &'static str;

    /// Non-secret description of where this backend stores data
    fn config_summary(&self) -> serde_json::Value;

    /// Decode a data URI and store it under `org_id/chatflow_id/<filename>`.
    /// The sanitized filename is appended to `file_names` and the returned
    /// token lists all of them.
    async fn add_base64_files_to_storage(
        &self,
        file_base64: &str,
        chatflow_id: &str,
        file_names: &mut Vec<String>,
        org_id: &str,
    ) -> Result<StorageResult>;

    /// Store raw bytes at `paths/<file_name>` as one file of a multi-file slot
    async fn add_array_files_to_storage(
        &self,
        mime: &str,
        data: &[u8],
        file_name: &str,
        file_names: &mut Vec<String>,
        paths: &[&str],
    ) -> Result<StorageResult>;

    /// Store raw bytes at `paths/<file_name>`
    async fn add_single_file_to_storage(
        &self,
        mime: &str,
        data: &[u8],
        file_name: &str,
        paths: &[&str],
    ) -> Result<StorageResult>;

    /// Read a file previously staged by this backend's upload sink
    async fn get_file_from_upload(&self, file_path: &str) -> Result<Vec<u8>>;

    /// Read `paths/<file>`, migrating it from its legacy location on a miss
    async fn get_file_from_storage(&self, file: &str, paths: &[&str]) -> Result<Vec<u8>>;

    /// Read a chat attachment, migrating it from its legacy location on a miss
    async fn stream_storage_file(
        &self,
        chatflow_id: &str,
        chat_id: &str,
        file_name: &str,
        org_id: &str,
    ) -> Result<Vec<u8>>;

    /// Every file under the prefix, flattened
    async fn get_files_list_from_storage(&self, paths: &[&str]) -> Result<Vec<FileInfo>>;

    async fn remove_files_from_storage(&self, paths: &[&str]) -> Result<StorageSizeResult>;

    async fn remove_specific_file_from_upload(&self, file_path: &str) -> Result<()>;

    /// Delete exactly one file; the last segment is the filename
    async fn remove_specific_file_from_storage(&self, paths: &[&str]) -> Result<StorageSizeResult>;

    async fn remove_folder_from_storage(&self, paths: &[&str]) -> Result<StorageSizeResult>;

    /// Total bytes stored for an organization, computed fresh on every call
    async fn get_storage_size(&self, org_id: &str) -> Result<u64>;

    /// Upload sink wired to this backend, for the HTTP layer
    fn upload_sink(&self) -> Result<Arc<dyn UploadSink>>;

    /// Log sinks wired to this backend for the given channel
    fn logger_transports(&self, channel: LogChannel, settings: &LoggingSettings) -> Result<Vec<LogTransport>>;
}

/// Resolves logical paths under a local root directory
#[derive(Debug, Clone)]
pub struct StorageRoot {
    root: PathBuf,
}

impl StorageRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Sanitize each segment and join them under the root.
    ///
    /// The result is guaranteed to stay under the root.
    pub fn build_path(&self, segments: &[&str]) -> Result<PathBuf> {
        let mut path = self.root.clone();
        for segment in segments {
            path.push(sanitize_filename(segment)?);
        }
        if !path.starts_with(&self.root) {
            return Err(StorageError::PathTraversal(path.display().to_string()));
        }
        Ok(path)
    }

    pub fn is_root(&self, path: &Path) -> bool {
        path == self.root
    }

    /// True when `path` is strictly below the root
    pub fn contains(&self, path: &Path) -> bool {
        path != self.root && path.starts_with(&self.root)
    }
}

/// Path segments of a legacy (pre-tenant) location: the leading org id removed.
///
/// Returns `None` when there is no directory segment left to fall back to.
pub(crate) fn legacy_segments<'a>(paths: &[&'a str]) -> Option<Vec<&'a str>> {
    if paths.len() > 1 {
        Some(paths[1..].to_vec())
    } else {
        None
    }
}

/// Split `paths` into directory segments and a final filename
pub(crate) fn split_file_segment<'a>(paths: &[&'a str]) -> Option<(&'a str, Vec<&'a str>)> {
    paths.split_last().map(|(file, dirs)| (*file, dirs.to_vec()))
}
