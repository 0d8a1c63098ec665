//! Factory for creating storage providers based on configuration

use once_cell::sync::Lazy;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

use super::local::LocalStorageProvider;
use super::StorageProvider;
use crate::config::{StorageKind, StorageSettings};
use crate::errors::{Result, StorageError};

#[cfg(feature = "azure")]
use crate::config::AzureSettings;
#[cfg(feature = "gcs")]
use crate::config::GcsSettings;
#[cfg(feature = "s3")]
use crate::config::S3Settings;

/// Everything needed to construct exactly one backend
#[derive(Debug, Clone)]
pub enum StorageConfig {
    Local { storage_path: PathBuf, upload_path: PathBuf },
    #[cfg(feature = "s3")]
    S3(S3Settings),
    #[cfg(feature = "gcs")]
    Gcs(GcsSettings),
    #[cfg(feature = "azure")]
    Azure(AzureSettings),
}

#[allow(dead_code)]
fn not_compiled(kind: StorageKind) -> StorageError {
    StorageError::Configuration(format!(
        "STORAGE_TYPE={} requested but the '{}' feature is not compiled in",
        kind.as_str(),
        kind.as_str()
    ))
}

#[allow(dead_code)]
fn missing_section(kind: StorageKind) -> StorageError {
    StorageError::Configuration(format!("{} storage configuration is missing", kind.as_str()))
}

/// Pick the backend section of `settings` selected by `STORAGE_TYPE`
pub fn storage_config_from_settings(settings: &StorageSettings) -> Result<StorageConfig> {
    match settings.kind {
        StorageKind::Local => Ok(StorageConfig::Local {
            storage_path: settings.storage_path.clone(),
            upload_path: settings.upload_path.clone(),
        }),
        StorageKind::S3 => {
            #[cfg(feature = "s3")]
            {
                settings
                    .s3
                    .clone()
                    .map(StorageConfig::S3)
                    .ok_or_else(|| missing_section(StorageKind::S3))
            }
            #[cfg(not(feature = "s3"))]
            {
                Err(not_compiled(StorageKind::S3))
            }
        }
        StorageKind::Gcs => {
            #[cfg(feature = "gcs")]
            {
                settings
                    .gcs
                    .clone()
                    .map(StorageConfig::Gcs)
                    .ok_or_else(|| missing_section(StorageKind::Gcs))
            }
            #[cfg(not(feature = "gcs"))]
            {
                Err(not_compiled(StorageKind::Gcs))
            }
        }
        StorageKind::Azure => {
            #[cfg(feature = "azure")]
            {
                settings
                    .azure
                    .clone()
                    .map(StorageConfig::Azure)
                    .ok_or_else(|| missing_section(StorageKind::Azure))
            }
            #[cfg(not(feature = "azure"))]
            {
                Err(not_compiled(StorageKind::Azure))
            }
        }
    }
}

/// Create a storage provider based on the provided configuration
pub async fn create_storage_provider(config: StorageConfig) -> Result<Arc<dyn StorageProvider>> {
    let provider: Arc<dyn StorageProvider> = match config {
        StorageConfig::Local { storage_path, upload_path } => {
            let provider = LocalStorageProvider::new(storage_path, upload_path);
            provider.initialize().await?;
            Arc::new(provider)
        }
        #[cfg(feature = "s3")]
        StorageConfig::S3(settings) => Arc::new(super::s3::S3StorageProvider::new(settings).await?),
        #[cfg(feature = "gcs")]
        StorageConfig::Gcs(settings) => Arc::new(super::gcs::create_gcs_provider(&settings)?),
        #[cfg(feature = "azure")]
        StorageConfig::Azure(settings) => Arc::new(super::azure::create_azure_provider(&settings)?),
    };

    info!("Using {} storage: {}", provider.storage_type(), provider.config_summary());
    Ok(provider)
}

/// Holds at most one provider, built on first use.
///
/// Concurrent first callers wait on the same initialization; once set the
/// provider never changes.
pub struct StorageFactory {
    cell: OnceCell<Arc<dyn StorageProvider>>,
}

impl Default for StorageFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageFactory {
    pub const fn new() -> Self {
        Self { cell: OnceCell::const_new() }
    }

    /// A factory that already holds `provider`, for injection in tests and tools
    pub fn with_provider(provider: Arc<dyn StorageProvider>) -> Self {
        Self {
            cell: OnceCell::new_with(Some(provider)),
        }
    }

    pub async fn get_or_init_with(&self, config: StorageConfig) -> Result<Arc<dyn StorageProvider>> {
        self.cell
            .get_or_try_init(|| create_storage_provider(config))
            .await
            .cloned()
    }

    /// Provider configured from the environment
    pub async fn get_or_init(&self) -> Result<Arc<dyn StorageProvider>> {
        self.cell
            .get_or_try_init(|| async {
                let settings =
                    StorageSettings::from_env().map_err(|e| StorageError::Configuration(e.to_string()))?;
                create_storage_provider(storage_config_from_settings(&settings)?).await
            })
            .await
            .cloned()
    }

    pub fn get(&self) -> Option<Arc<dyn StorageProvider>> {
        self.cell.get().cloned()
    }
}

static STORAGE: Lazy<StorageFactory> = Lazy::new(StorageFactory::new);

/// The process-wide provider, selected from the environment on first call
pub async fn storage_provider() -> Result<Arc<dyn StorageProvider>> {
    STORAGE.get_or_init().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoggingSettings;
    use tempfile::TempDir;

    fn local_settings(dir: &TempDir) -> StorageSettings {
        StorageSettings {
            kind: StorageKind::Local,
            storage_path: dir.path().join("storage"),
            upload_path: dir.path().join("uploads"),
            s3: None,
            gcs: None,
            azure: None,
            logging: LoggingSettings {
                log_dir: dir.path().join("logs"),
                server_level: "info".to_string(),
                server_filename: "server".to_string(),
                requests_filename: "server-requests.log.jsonl".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_local_provider_creation() {
        let dir = TempDir::new().unwrap();
        let config = storage_config_from_settings(&local_settings(&dir)).unwrap();
        let provider = create_storage_provider(config).await.unwrap();

        assert_eq!(provider.storage_type(), "local");
        assert!(dir.path().join("storage").is_dir());
        assert!(dir.path().join("uploads").is_dir());
    }

    #[test]
    fn test_missing_backend_section_fails() {
        let dir = TempDir::new().unwrap();
        for kind in [StorageKind::S3, StorageKind::Gcs, StorageKind::Azure] {
            let mut settings = local_settings(&dir);
            settings.kind = kind;
            let err = storage_config_from_settings(&settings).unwrap_err();
            assert!(matches!(err, StorageError::Configuration(_)));
        }
    }

    #[tokio::test]
    async fn test_factory_initializes_once() {
        let dir = TempDir::new().unwrap();
        let factory = StorageFactory::new();
        assert!(factory.get().is_none());

        let config = storage_config_from_settings(&local_settings(&dir)).unwrap();
        let first = factory.get_or_init_with(config).await.unwrap();

        let other = TempDir::new().unwrap();
        let config = storage_config_from_settings(&local_settings(&other)).unwrap();
        let second = factory.get_or_init_with(config).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!other.path().join("storage").exists());
    }

    #[tokio::test]
    async fn test_concurrent_first_callers_share_instance() {
        let dir = TempDir::new().unwrap();
        let factory = Arc::new(StorageFactory::new());
        let config = storage_config_from_settings(&local_settings(&dir)).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let factory = factory.clone();
                let config = config.clone();
                tokio::spawn(async move { factory.get_or_init_with(config).await.unwrap() })
            })
            .collect();

        let mut providers = Vec::new();
        for handle in handles {
            providers.push(handle.await.unwrap());
        }
        assert!(providers.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    }
}
