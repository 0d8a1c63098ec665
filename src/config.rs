//! Environment-driven configuration for the storage layer

use anyhow::{anyhow, Result};
use std::env;
use std::path::PathBuf;
use tracing::warn;

/// Which backend the process should use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Local,
    S3,
    Gcs,
    Azure,
}

impl StorageKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "" | "local" => Ok(StorageKind::Local),
            "s3" => Ok(StorageKind::S3),
            "gcs" => Ok(StorageKind::Gcs),
            "azure" => Ok(StorageKind::Azure),
            other => Err(anyhow!("Unsupported STORAGE_TYPE '{}' (expected local, s3, gcs or azure)", other)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Local => "local",
            StorageKind::S3 => "s3",
            StorageKind::Gcs => "gcs",
            StorageKind::Azure => "azure",
        }
    }
}

#[derive(Debug, Clone)]
pub struct S3Settings {
    pub bucket_name: String,
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
}

#[derive(Debug, Clone)]
pub struct GcsSettings {
    pub bucket_name: String,
    pub project_id: Option<String>,
    /// Path to a service-account key file
    pub credential_path: Option<String>,
}

/// Azure authentication, resolved once when settings are loaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AzureAuth {
    ConnectionString(String),
    AccountKey { account_name: String, account_key: String },
}

#[derive(Debug, Clone)]
pub struct AzureSettings {
    pub container_name: String,
    pub auth: AzureAuth,
}

/// Where and how verbosely local log sinks write
#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub log_dir: PathBuf,
    pub server_level: String,
    pub server_filename: String,
    pub requests_filename: String,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub kind: StorageKind,
    /// Root for the local backend
    pub storage_path: PathBuf,
    /// Staging directory for local multipart uploads
    pub upload_path: PathBuf,
    pub s3: Option<S3Settings>,
    pub gcs: Option<GcsSettings>,
    pub azure: Option<AzureSettings>,
    pub logging: LoggingSettings,
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn user_home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Base directory for everything the local backend writes by default
pub fn default_data_dir() -> PathBuf {
    user_home().join(".flowstore")
}

impl StorageSettings {
    /// Load settings from the process environment (and `.env`, if present).
    ///
    /// Only the section for the selected backend is required to be complete;
    /// the others are parsed when present so tooling can inspect them.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let kind = StorageKind::parse(&env::var("STORAGE_TYPE").unwrap_or_default())?;

        let (storage_path, upload_path) = match non_empty_var("BLOB_STORAGE_PATH") {
            Some(root) => {
                let root = PathBuf::from(root);
                let uploads = root.join("uploads");
                (root, uploads)
            }
            None => (default_data_dir().join("storage"), default_data_dir().join("uploads")),
        };

        let s3 = match Self::s3_from_env() {
            Ok(s3) => Some(s3),
            Err(e) if kind == StorageKind::S3 => return Err(e),
            Err(_) => None,
        };
        let gcs = match Self::gcs_from_env() {
            Ok(gcs) => Some(gcs),
            Err(e) if kind == StorageKind::Gcs => return Err(e),
            Err(_) => None,
        };
        let azure = match Self::azure_from_env() {
            Ok(azure) => Some(azure),
            Err(e) if kind == StorageKind::Azure => return Err(e),
            Err(_) => None,
        };

        let logging = LoggingSettings {
            log_dir: non_empty_var("LOG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| default_data_dir().join("logs")),
            server_level: non_empty_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            server_filename: "server".to_string(),
            requests_filename: "server-requests.log.jsonl".to_string(),
        };

        Ok(Self {
            kind,
            storage_path,
            upload_path,
            s3,
            gcs,
            azure,
            logging,
        })
    }

    fn s3_from_env() -> Result<S3Settings> {
        let bucket_name = non_empty_var("S3_STORAGE_BUCKET_NAME");
        let region = non_empty_var("S3_STORAGE_REGION");
        let (bucket_name, region) = match (bucket_name, region) {
            (Some(b), Some(r)) => (b, r),
            _ => return Err(anyhow!("S3 storage configuration is missing (S3_STORAGE_BUCKET_NAME and S3_STORAGE_REGION are required)")),
        };

        let access_key_id = non_empty_var("S3_STORAGE_ACCESS_KEY_ID");
        let secret_access_key = non_empty_var("S3_STORAGE_SECRET_ACCESS_KEY");
        if access_key_id.is_some() != secret_access_key.is_some() {
            warn!("Only one of S3_STORAGE_ACCESS_KEY_ID / S3_STORAGE_SECRET_ACCESS_KEY is set; falling back to the default credential chain");
        }
        let (access_key_id, secret_access_key) = match (access_key_id, secret_access_key) {
            (Some(id), Some(secret)) => (Some(id), Some(secret)),
            _ => (None, None),
        };

        Ok(S3Settings {
            bucket_name,
            region,
            access_key_id,
            secret_access_key,
            endpoint_url: non_empty_var("S3_ENDPOINT_URL"),
            force_path_style: env::var("S3_FORCE_PATH_STYLE")
                .map(|v| v.trim().eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        })
    }

    fn gcs_from_env() -> Result<GcsSettings> {
        let bucket_name = non_empty_var("GOOGLE_CLOUD_STORAGE_BUCKET_NAME")
            .ok_or_else(|| anyhow!("GOOGLE_CLOUD_STORAGE_BUCKET_NAME env variable is required"))?;

        Ok(GcsSettings {
            bucket_name,
            project_id: non_empty_var("GOOGLE_CLOUD_STORAGE_PROJ_ID"),
            credential_path: non_empty_var("GOOGLE_CLOUD_STORAGE_CREDENTIAL"),
        })
    }

    fn azure_from_env() -> Result<AzureSettings> {
        let container_name = non_empty_var("AZURE_BLOB_STORAGE_CONTAINER_NAME")
            .ok_or_else(|| anyhow!("AZURE_BLOB_STORAGE_CONTAINER_NAME env variable is required"))?;

        let auth = resolve_azure_auth(
            non_empty_var("AZURE_BLOB_STORAGE_CONNECTION_STRING"),
            non_empty_var("AZURE_BLOB_STORAGE_ACCOUNT_NAME"),
            non_empty_var("AZURE_BLOB_STORAGE_ACCOUNT_KEY"),
        )?;

        Ok(AzureSettings { container_name, auth })
    }
}

/// Pick the Azure authentication mode; a connection string wins over account credentials
pub fn resolve_azure_auth(
    connection_string: Option<String>,
    account_name: Option<String>,
    account_key: Option<String>,
) -> Result<AzureAuth> {
    if let Some(cs) = connection_string {
        return Ok(AzureAuth::ConnectionString(cs));
    }
    match (account_name, account_key) {
        (Some(account_name), Some(account_key)) => Ok(AzureAuth::AccountKey { account_name, account_key }),
        _ => Err(anyhow!(
            "Azure Blob Storage configuration is missing. Provide AZURE_BLOB_STORAGE_CONNECTION_STRING or AZURE_BLOB_STORAGE_ACCOUNT_NAME + AZURE_BLOB_STORAGE_ACCOUNT_KEY"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_kind_parsing() {
        assert_eq!(StorageKind::parse("").unwrap(), StorageKind::Local);
        assert_eq!(StorageKind::parse("LOCAL").unwrap(), StorageKind::Local);
        assert_eq!(StorageKind::parse("s3").unwrap(), StorageKind::S3);
        assert_eq!(StorageKind::parse(" gcs ").unwrap(), StorageKind::Gcs);
        assert_eq!(StorageKind::parse("azure").unwrap(), StorageKind::Azure);
        assert!(StorageKind::parse("ftp").is_err());
    }

    #[test]
    fn test_azure_connection_string_takes_priority() {
        let auth = resolve_azure_auth(
            Some("AccountName=a;AccountKey=b".to_string()),
            Some("other".to_string()),
            Some("key".to_string()),
        )
        .unwrap();
        assert_eq!(auth, AzureAuth::ConnectionString("AccountName=a;AccountKey=b".to_string()));
    }

    #[test]
    fn test_azure_account_key_mode() {
        let auth = resolve_azure_auth(None, Some("acct".to_string()), Some("secret".to_string())).unwrap();
        assert_eq!(
            auth,
            AzureAuth::AccountKey { account_name: "acct".to_string(), account_key: "secret".to_string() }
        );
    }

    #[test]
    fn test_azure_incomplete_credentials_fail() {
        let err = resolve_azure_auth(None, Some("acct".to_string()), None).unwrap_err();
        assert!(err.to_string().contains("Azure Blob Storage configuration is missing"));
        assert!(resolve_azure_auth(None, None, None).is_err());
    }
}
