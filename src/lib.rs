//! Tenant-aware file storage with interchangeable local, S3, GCS and Azure backends

pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod storage;
pub mod upload;
pub mod utils;

pub use config::StorageSettings;
pub use errors::{Result, StorageError};
pub use storage::{storage_provider, StorageFactory, StorageProvider};
