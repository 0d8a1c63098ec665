//! Local filesystem storage backend implementation

use async_trait::async_trait;
use serde_json::json;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

use super::migration::{read_with_legacy_fallback, LegacyMigration};
use super::{legacy_segments, split_file_segment, StorageProvider, StorageRoot};
use crate::config::LoggingSettings;
use crate::errors::{Result, StorageError};
use crate::logging::{parse_level, LogChannel, LogTransport, RollingFileSink, Rotation};
use crate::models::{DataUri, FileInfo, FileStorageToken, StorageResult, StorageSizeResult};
use crate::upload::{LocalUploadSink, UploadSink};
use crate::utils::security::{sanitize_filename, validate_chatflow_id, validate_org_id, validate_path_security};

/// Local filesystem storage backend
pub struct LocalStorageProvider {
    root: StorageRoot,
    upload_path: PathBuf,
}

impl LocalStorageProvider {
    pub fn new(storage_path: impl Into<PathBuf>, upload_path: impl Into<PathBuf>) -> Self {
        Self {
            root: StorageRoot::new(storage_path),
            upload_path: upload_path.into(),
        }
    }

    /// Create the storage and upload directories
    pub async fn initialize(&self) -> Result<()> {
        fs::create_dir_all(self.root.path()).await?;
        fs::create_dir_all(&self.upload_path).await?;
        info!("Local storage initialized at {}", self.root.path().display());
        Ok(())
    }

    pub fn storage_path(&self) -> &Path {
        self.root.path()
    }

    pub fn upload_path(&self) -> &Path {
        &self.upload_path
    }

    async fn write_file(&self, path: &Path, data: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, data).await?;
        info!("Stored file locally: {} ({} bytes)", path.display(), data.len());
        Ok(())
    }

    async fn store_under(&self, data: &[u8], file_name: &str, paths: &[&str]) -> Result<String> {
        validate_path_security(paths)?;
        let file_name = sanitize_filename(file_name)?;
        let mut segments = paths.to_vec();
        segments.push(&file_name);
        let path = self.root.build_path(&segments)?;
        self.write_file(&path, data).await?;
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
        let canonical = self.root.build_path(&canonical)?;

        let legacy = match legacy_segments(paths) {
            Some(mut segments) => {
                segments.push(&file_name);
                Some(self.root.build_path(&segments)?)
            }
            None => None,
        };

        read_with_legacy_fallback(self, &canonical, legacy.as_ref(), &file_name).await
    }

    /// Resolve a staged-upload reference to a path inside the upload directory
    fn resolve_upload(&self, file_path: &str) -> Result<PathBuf> {
        let candidate = Path::new(file_path);
        if candidate.is_absolute() {
            if candidate.starts_with(&self.upload_path) && !file_path.contains("..") {
                return Ok(candidate.to_path_buf());
            }
            return Err(StorageError::PathTraversal(file_path.to_string()));
        }
        Ok(self.upload_path.join(sanitize_filename(file_path)?))
    }
}

/// Depth-first walk collecting every regular file below `dir`.
///
/// Entries that vanish or cannot be read mid-walk are skipped.
pub(crate) async fn walk_files(dir: &Path) -> Vec<FileInfo> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let mut entries = match fs::read_dir(&current).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => {
                warn!("Skipping unreadable directory {}: {}", current.display(), e);
                continue;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read entry in {}: {}", current.display(), e);
                    break;
                }
            };

            let path = entry.path();
            let metadata = match fs::metadata(&path).await {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };

            if metadata.is_dir() {
                pending.push(path);
            } else if metadata.is_file() {
                files.push(FileInfo {
                    name: entry.file_name().to_string_lossy().to_string(),
                    path: path.to_string_lossy().to_string(),
                    size: metadata.len(),
                });
            }
        }
    }

    files
}

async fn remove_if_present(path: &Path) -> Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => {
            info!("Deleted file: {}", path.display());
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("File already deleted: {}", path.display());
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl LegacyMigration for LocalStorageProvider {
    type Location = PathBuf;

    async fn read_location(&self, location: &PathBuf) -> Result<Vec<u8>> {
        Ok(fs::read(location).await?)
    }

    async fn write_location(&self, location: &PathBuf, data: &[u8]) -> Result<()> {
        self.write_file(location, data).await
    }

    async fn delete_location(&self, location: &PathBuf) -> Result<()> {
        remove_if_present(location).await.map(|_| ())
    }

    async fn prune_empty_ancestors(&self, location: &PathBuf) {
        let mut current = location.parent().map(Path::to_path_buf);

        while let Some(dir) = current {
            if !self.root.contains(&dir) {
                break;
            }

            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Stopped pruning at {}: {}", dir.display(), e);
                    break;
                }
            };
            match entries.next_entry().await {
                Ok(None) => {}
                Ok(Some(_)) => break,
                Err(e) => {
                    warn!("Stopped pruning at {}: {}", dir.display(), e);
                    break;
                }
            }

            if let Err(e) = fs::remove_dir(&dir).await {
                warn!("Failed to remove empty directory {}: {}", dir.display(), e);
                break;
            }
            debug!("Removed empty directory {}", dir.display());
            current = dir.parent().map(Path::to_path_buf);
        }
    }
}

#[async_trait]
impl StorageProvider for LocalStorageProvider {
    fn storage_type(&self) -> &'static str {
        "local"
    }

    fn config_summary(&self) -> serde_json::Value {
        json!({
            "storageType": "local",
            "storagePath": self.root.path().display().to_string(),
            "uploadPath": self.upload_path.display().to_string(),
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
        let file_name = self.store_under(&upload.data, &upload.file_name, &[org_id, chatflow_id]).await?;
        file_names.push(file_name);

        let total = self.get_storage_size(org_id).await?;
        Ok(StorageResult::new(FileStorageToken::encode_many(file_names), total))
    }

    async fn add_array_files_to_storage(
        &self,
        _mime: &str,
        data: &[u8],
        file_name: &str,
        file_names: &mut Vec<String>,
        paths: &[&str],
    ) -> Result<StorageResult> {
        let file_name = self.store_under(data, file_name, paths).await?;
        file_names.push(file_name);

        let total = self.usage_for(paths).await?;
        Ok(StorageResult::new(FileStorageToken::encode_many(file_names), total))
    }

    async fn add_single_file_to_storage(
        &self,
        _mime: &str,
        data: &[u8],
        file_name: &str,
        paths: &[&str],
    ) -> Result<StorageResult> {
        let file_name = self.store_under(data, file_name, paths).await?;

        let total = self.usage_for(paths).await?;
        Ok(StorageResult::new(FileStorageToken::encode_single(&file_name), total))
    }

    async fn get_file_from_upload(&self, file_path: &str) -> Result<Vec<u8>> {
        let path = self.resolve_upload(file_path)?;
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StorageError::NotFound(file_path.to_string())),
            Err(e) => Err(e.into()),
        }
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
        let dir = self.root.build_path(paths)?;
        Ok(walk_files(&dir).await)
    }

    async fn remove_files_from_storage(&self, paths: &[&str]) -> Result<StorageSizeResult> {
        validate_path_security(paths)?;
        let target = self.root.build_path(paths)?;
        if self.root.is_root(&target) {
            return Err(StorageError::PathTraversal("refusing to remove the storage root".to_string()));
        }

        match fs::metadata(&target).await {
            Ok(meta) if meta.is_dir() => {
                for file in walk_files(&target).await {
                    if let Err(e) = remove_if_present(Path::new(&file.path)).await {
                        warn!("Failed to delete {}: {}", file.path, e);
                    }
                }
                match fs::remove_dir_all(&target).await {
                    Ok(()) => info!("Removed folder {}", target.display()),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(_) => {
                remove_if_present(&target).await?;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => debug!("Nothing to remove at {}", target.display()),
            Err(e) => return Err(e.into()),
        }

        Ok(StorageSizeResult::from_bytes(self.usage_for(paths).await?))
    }

    async fn remove_specific_file_from_upload(&self, file_path: &str) -> Result<()> {
        let path = self.resolve_upload(file_path)?;
        remove_if_present(&path).await.map(|_| ())
    }

    async fn remove_specific_file_from_storage(&self, paths: &[&str]) -> Result<StorageSizeResult> {
        let (file_name, dirs) = split_file_segment(paths)
            .ok_or_else(|| StorageError::InvalidFilename("no filename given".to_string()))?;
        validate_path_security(&dirs)?;

        let file_name = sanitize_filename(file_name)?;
        let mut segments = dirs.clone();
        segments.push(&file_name);
        let path = self.root.build_path(&segments)?;
        remove_if_present(&path).await?;

        Ok(StorageSizeResult::from_bytes(self.usage_for(paths).await?))
    }

    async fn remove_folder_from_storage(&self, paths: &[&str]) -> Result<StorageSizeResult> {
        validate_path_security(paths)?;
        let dir = self.root.build_path(paths)?;
        if self.root.is_root(&dir) {
            return Err(StorageError::PathTraversal("refusing to remove the storage root".to_string()));
        }

        match fs::remove_dir_all(&dir).await {
            Ok(()) => info!("Removed folder {}", dir.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => debug!("Folder already gone: {}", dir.display()),
            Err(e) => return Err(e.into()),
        }

        Ok(StorageSizeResult::from_bytes(self.usage_for(paths).await?))
    }

    async fn get_storage_size(&self, org_id: &str) -> Result<u64> {
        if org_id.is_empty() {
            return Ok(0);
        }
        validate_org_id(org_id)?;
        let dir = self.root.build_path(&[org_id])?;
        Ok(walk_files(&dir).await.iter().map(|f| f.size).sum())
    }

    fn upload_sink(&self) -> Result<Arc<dyn UploadSink>> {
        Ok(Arc::new(LocalUploadSink::new(self.upload_path.clone())?))
    }

    fn logger_transports(&self, channel: LogChannel, settings: &LoggingSettings) -> Result<Vec<LogTransport>> {
        match channel {
            LogChannel::Server => {
                let sink = RollingFileSink::new(&settings.log_dir, &settings.server_filename, ".log", Rotation::Hourly)?;
                Ok(vec![LogTransport {
                    channel,
                    level: parse_level(&settings.server_level, channel.default_level()),
                    destination: sink.dir().display().to_string(),
                    writer: tracing_subscriber::fmt::writer::BoxMakeWriter::new(move || sink.clone()),
                }])
            }
            LogChannel::Requests => {
                let sink = RollingFileSink::new(&settings.log_dir, &settings.requests_filename, "", Rotation::Never)?;
                Ok(vec![LogTransport {
                    channel,
                    level: channel.default_level(),
                    destination: settings.log_dir.join(&settings.requests_filename).display().to_string(),
                    writer: tracing_subscriber::fmt::writer::BoxMakeWriter::new(move || sink.clone()),
                }])
            }
            LogChannel::Error => Ok(Vec::new()),
        }
    }
}
