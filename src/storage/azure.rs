//! Azure Blob Storage backend

use object_store::azure::MicrosoftAzureBuilder;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use super::objects::{ObjectStoreKind, ObjectStoreProvider};
use crate::config::{AzureAuth, AzureSettings};
use crate::errors::{Result, StorageError};

/// The parts of an Azure storage connection string this backend understands
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionString {
    pub account_name: Option<String>,
    pub account_key: Option<String>,
    pub blob_endpoint: Option<String>,
    pub shared_access_signature: Option<String>,
    pub use_development_storage: bool,
}

impl ConnectionString {
    /// Parse `Key=Value;Key=Value` pairs. Keys are case-insensitive; values
    /// may contain `=` (account keys and SAS tokens do).
    pub fn parse(input: &str) -> Result<Self> {
        let pairs: HashMap<String, String> = input
            .split(';')
            .map(str::trim)
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((key, value)) => Ok((key.trim().to_ascii_lowercase(), value.trim().to_string())),
                None => Err(StorageError::Configuration(format!(
                    "Malformed Azure connection string segment '{}'",
                    pair
                ))),
            })
            .collect::<Result<_>>()?;

        let parsed = Self {
            account_name: pairs.get("accountname").cloned(),
            account_key: pairs.get("accountkey").cloned(),
            blob_endpoint: pairs.get("blobendpoint").cloned(),
            shared_access_signature: pairs.get("sharedaccesssignature").cloned(),
            use_development_storage: pairs
                .get("usedevelopmentstorage")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        };

        let has_credentials = parsed.account_key.is_some() || parsed.shared_access_signature.is_some();
        let has_target = parsed.account_name.is_some() || parsed.blob_endpoint.is_some();
        if !parsed.use_development_storage && !(has_target && has_credentials) {
            return Err(StorageError::Configuration(
                "Azure connection string must name an account or endpoint and carry an AccountKey or SharedAccessSignature"
                    .to_string(),
            ));
        }

        Ok(parsed)
    }
}

/// Account name from a `https://<account>.blob.core.windows.net` style endpoint
fn account_from_endpoint(endpoint: &str) -> Option<String> {
    let host = endpoint.split("://").nth(1).unwrap_or(endpoint);
    host.split('.').next().filter(|s| !s.is_empty()).map(str::to_string)
}

fn configure(builder: MicrosoftAzureBuilder, auth: &AzureAuth) -> Result<MicrosoftAzureBuilder> {
    match auth {
        AzureAuth::AccountKey { account_name, account_key } => {
            Ok(builder.with_account(account_name).with_access_key(account_key))
        }
        AzureAuth::ConnectionString(raw) => {
            let cs = ConnectionString::parse(raw)?;
            if cs.use_development_storage {
                return Ok(builder.with_use_emulator(true));
            }

            let mut builder = builder;
            let account = cs
                .account_name
                .clone()
                .or_else(|| cs.blob_endpoint.as_deref().and_then(account_from_endpoint));
            if let Some(account) = account {
                builder = builder.with_account(account);
            }
            if let Some(endpoint) = cs.blob_endpoint {
                builder = builder.with_endpoint(endpoint);
            }
            if let Some(key) = cs.account_key {
                builder = builder.with_access_key(key);
            } else if let Some(sas) = cs.shared_access_signature {
                let query_pairs: Vec<(String, String)> = sas
                    .trim_start_matches('?')
                    .split('&')
                    .filter_map(|kv| kv.split_once('='))
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect();
                builder = builder.with_sas_authorization(query_pairs);
            }
            Ok(builder)
        }
    }
}

/// Build a provider for the configured container.
///
/// Authentication was resolved when settings were loaded; a connection string
/// takes priority over account credentials.
pub fn create_azure_provider(settings: &AzureSettings) -> Result<ObjectStoreProvider> {
    if settings.container_name.is_empty() {
        return Err(StorageError::Configuration(
            "AZURE_BLOB_STORAGE_CONTAINER_NAME env variable is required".to_string(),
        ));
    }

    let builder = MicrosoftAzureBuilder::new().with_container_name(&settings.container_name);
    let store = configure(builder, &settings.auth)?.build().map_err(|e| {
        StorageError::Configuration(format!(
            "Failed to configure Azure container {}: {}",
            settings.container_name, e
        ))
    })?;

    let auth_mode = match settings.auth {
        AzureAuth::ConnectionString(_) => "connectionString",
        AzureAuth::AccountKey { .. } => "accountKey",
    };

    info!("Azure Blob storage configured for container {} ({})", settings.container_name, auth_mode);
    Ok(ObjectStoreProvider::new(
        ObjectStoreKind::Azure,
        Arc::new(store),
        format!("azure://{}", settings.container_name),
        json!({
            "storageType": "azure",
            "container": settings.container_name,
            "authMode": auth_mode,
        }),
    ))
}
