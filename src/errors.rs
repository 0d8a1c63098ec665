//! Error taxonomy shared by every storage backend

use thiserror::Error;

/// Errors surfaced by storage operations.
///
/// Validation variants (`InvalidTenantId`, `PathTraversal`, `InvalidFilename`,
/// `InvalidDataUri`) are raised before any I/O and are never retried. Backend
/// failures are carried through unchanged in `Io`, `ObjectStore`, `S3` and
/// `Backend`, and are never retried here.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid tenant id: {0}")]
    InvalidTenantId(String),

    #[error("Path traversal detected in path segment: {0}")]
    PathTraversal(String),

    #[error("Invalid filename: {0}")]
    InvalidFilename(String),

    #[error("Invalid data URI: {0}")]
    InvalidDataUri(String),

    #[error("File {0} not found")]
    NotFound(String),

    #[error("Storage configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[cfg(any(feature = "gcs", feature = "azure"))]
    #[error(transparent)]
    ObjectStore(#[from] object_store::Error),

    /// An S3 client failure, exactly as the SDK reported it
    #[cfg(feature = "s3")]
    #[error(transparent)]
    S3(Box<dyn std::error::Error + Send + Sync>),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl StorageError {
    /// True for read misses, whatever backend produced them
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::NotFound(_) => true,
            StorageError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            #[cfg(any(feature = "gcs", feature = "azure"))]
            StorageError::ObjectStore(object_store::Error::NotFound { .. }) => true,
            _ => false,
        }
    }

    /// True for failures raised by input validation rather than by a backend
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            StorageError::InvalidTenantId(_)
                | StorageError::PathTraversal(_)
                | StorageError::InvalidFilename(_)
                | StorageError::InvalidDataUri(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
