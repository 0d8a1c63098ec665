//! Codec for the caller-facing `FILE-STORAGE::` reference token

use crate::errors::{Result, StorageError};

pub const FILE_STORAGE_PREFIX: &str = "FILE-STORAGE::";

/// Encodes and decodes references to stored files.
///
/// A single file is `FILE-STORAGE::<name>`; several files written into one
/// logical slot are `FILE-STORAGE::<json array of names>`.
pub struct FileStorageToken;

impl FileStorageToken {
    pub fn encode_single(file_name: &str) -> String {
        format!("{}{}", FILE_STORAGE_PREFIX, file_name)
    }

    pub fn encode_many(file_names: &[String]) -> String {
        // Serializing a slice of strings cannot fail
        let list = serde_json::to_string(file_names).unwrap_or_else(|_| "[]".to_string());
        format!("{}{}", FILE_STORAGE_PREFIX, list)
    }

    pub fn is_token(value: &str) -> bool {
        value.starts_with(FILE_STORAGE_PREFIX)
    }

    /// Decode a token into the filenames it references
    pub fn parse(token: &str) -> Result<Vec<String>> {
        let body = token.strip_prefix(FILE_STORAGE_PREFIX).ok_or_else(|| {
            StorageError::InvalidFilename(format!("not a file storage reference: {}", token))
        })?;

        if body.starts_with('[') {
            return serde_json::from_str::<Vec<String>>(body).map_err(|e| {
                StorageError::InvalidFilename(format!("malformed file list in reference: {}", e))
            });
        }

        if body.is_empty() {
            return Err(StorageError::InvalidFilename(
                "file storage reference has no filename".to_string(),
            ));
        }

        Ok(vec![body.to_string()])
    }
}
