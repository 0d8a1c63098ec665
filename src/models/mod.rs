// Re-export all model types for ease of use

pub mod data_uri;
pub mod file;
pub mod token;

pub use data_uri::DataUri;
pub use file::{bytes_to_megabytes, FileInfo, StorageResult, StorageSizeResult};
pub use token::{FileStorageToken, FILE_STORAGE_PREFIX};
