use serde::{Deserialize, Serialize};

/// A stored object as reported by listing operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Leaf filename
    pub name: String,
    /// Backend-native address (absolute path or object key)
    pub path: String,
    /// Size in bytes
    pub size: u64,
}

/// Returned by every add operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageResult {
    /// `FILE-STORAGE::` token referencing what was written
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Tenant usage in megabytes after the write
    pub total_size: f64,
}

/// Returned by every remove operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageSizeResult {
    /// Tenant usage in megabytes after the delete
    pub total_size: f64,
}

impl StorageResult {
    pub fn new(path: String, total_bytes: u64) -> Self {
        Self {
            path: Some(path),
            total_size: bytes_to_megabytes(total_bytes),
        }
    }
}

impl StorageSizeResult {
    pub fn from_bytes(total_bytes: u64) -> Self {
        Self {
            total_size: bytes_to_megabytes(total_bytes),
        }
    }
}

pub fn bytes_to_megabytes(bytes: u64) -> f64 {
    bytes as f64 / 1024.0 / 1024.0
}
