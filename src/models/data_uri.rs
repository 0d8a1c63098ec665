//! Parser for the base64 data URIs sent by chat clients
//!
//! Format: `data:<mime>;base64,<payload>,filename:<name>`

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::errors::{Result, StorageError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri {
    pub mime: String,
    pub data: Vec<u8>,
    pub file_name: String,
}

impl DataUri {
    pub fn parse(input: &str) -> Result<Self> {
        let mut parts: Vec<&str> = input.split(',').collect();
        if parts.len() < 3 {
            return Err(StorageError::InvalidDataUri(
                "expected header, payload and filename sections".to_string(),
            ));
        }

        let file_name = parts
            .pop()
            .and_then(|last| last.split_once(':'))
            .map(|(_, name)| name.to_string())
            .unwrap_or_default();

        let payload = parts.pop().unwrap_or_default();
        let data = STANDARD
            .decode(payload.trim())
            .map_err(|e| StorageError::InvalidDataUri(format!("payload is not valid base64: {}", e)))?;

        let header = parts.first().copied().unwrap_or_default();
        let mime = header
            .split_once(':')
            .map(|(_, rest)| rest.split(';').next().unwrap_or_default().to_string())
            .filter(|m| !m.is_empty())
            .ok_or_else(|| StorageError::InvalidDataUri(format!("missing mime type in header: {}", header)))?;

        Ok(Self { mime, data, file_name })
    }
}
