use std::env;
use std::path::PathBuf;
use std::sync::Mutex;

use once_cell::sync::Lazy;

use flowstore::config::{AzureAuth, StorageKind, StorageSettings};

// Tests in this file mutate process-wide environment variables
static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

const STORAGE_VARS: &[&str] = &[
    "STORAGE_TYPE",
    "BLOB_STORAGE_PATH",
    "S3_STORAGE_BUCKET_NAME",
    "S3_STORAGE_REGION",
    "S3_STORAGE_ACCESS_KEY_ID",
    "S3_STORAGE_SECRET_ACCESS_KEY",
    "S3_ENDPOINT_URL",
    "S3_FORCE_PATH_STYLE",
    "GOOGLE_CLOUD_STORAGE_BUCKET_NAME",
    "GOOGLE_CLOUD_STORAGE_PROJ_ID",
    "GOOGLE_CLOUD_STORAGE_CREDENTIAL",
    "AZURE_BLOB_STORAGE_CONTAINER_NAME",
    "AZURE_BLOB_STORAGE_CONNECTION_STRING",
    "AZURE_BLOB_STORAGE_ACCOUNT_NAME",
    "AZURE_BLOB_STORAGE_ACCOUNT_KEY",
    "LOG_PATH",
    "LOG_LEVEL",
];

// Helper function to clear environment variables
fn clear_storage_env_vars() {
    for key in STORAGE_VARS {
        env::remove_var(key);
    }
}

fn set_minimum_s3_vars() {
    env::set_var("STORAGE_TYPE", "s3");
    env::set_var("S3_STORAGE_BUCKET_NAME", "flow-bucket");
    env::set_var("S3_STORAGE_REGION", "eu-west-1");
}

#[test]
fn test_defaults_to_local_storage() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_storage_env_vars();

    let settings = StorageSettings::from_env().expect("Config should load successfully");

    assert_eq!(settings.kind, StorageKind::Local);
    assert!(settings.storage_path.ends_with(".flowstore/storage"));
    assert!(settings.upload_path.ends_with(".flowstore/uploads"));
    assert!(settings.s3.is_none());
    assert_eq!(settings.logging.server_level, "info");
    assert_eq!(settings.logging.requests_filename, "server-requests.log.jsonl");
}

#[test]
fn test_blob_storage_path_moves_both_roots() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_storage_env_vars();

    env::set_var("BLOB_STORAGE_PATH", "/srv/flowstore");

    let settings = StorageSettings::from_env().expect("Config should load successfully");
    assert_eq!(settings.storage_path, PathBuf::from("/srv/flowstore"));
    assert_eq!(settings.upload_path, PathBuf::from("/srv/flowstore/uploads"));
}

#[test]
fn test_unknown_storage_type_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_storage_env_vars();

    env::set_var("STORAGE_TYPE", "ftp");

    let err = StorageSettings::from_env().unwrap_err();
    assert!(err.to_string().contains("ftp"));
}

#[test]
fn test_s3_requires_bucket_and_region() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_storage_env_vars();

    env::set_var("STORAGE_TYPE", "s3");
    env::set_var("S3_STORAGE_BUCKET_NAME", "flow-bucket");

    let err = StorageSettings::from_env().unwrap_err();
    assert!(err.to_string().contains("S3_STORAGE_REGION"));
}

#[test]
fn test_s3_static_credentials_need_both_halves() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_storage_env_vars();
    set_minimum_s3_vars();

    env::set_var("S3_STORAGE_ACCESS_KEY_ID", "AKIDEXAMPLE");
    let s3 = StorageSettings::from_env().unwrap().s3.unwrap();
    assert!(s3.access_key_id.is_none());
    assert!(s3.secret_access_key.is_none());

    env::set_var("S3_STORAGE_SECRET_ACCESS_KEY", "wJalrXUtnFEMI");
    env::set_var("S3_ENDPOINT_URL", "http://localhost:9000");
    env::set_var("S3_FORCE_PATH_STYLE", "TRUE");
    let s3 = StorageSettings::from_env().unwrap().s3.unwrap();
    assert_eq!(s3.access_key_id.as_deref(), Some("AKIDEXAMPLE"));
    assert_eq!(s3.secret_access_key.as_deref(), Some("wJalrXUtnFEMI"));
    assert_eq!(s3.endpoint_url.as_deref(), Some("http://localhost:9000"));
    assert!(s3.force_path_style);
}

#[test]
fn test_incomplete_sections_are_ignored_for_other_backends() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_storage_env_vars();

    // Half an S3 section while running on local storage is not an error
    env::set_var("S3_STORAGE_BUCKET_NAME", "flow-bucket");
    env::set_var("AZURE_BLOB_STORAGE_CONTAINER_NAME", "flows");

    let settings = StorageSettings::from_env().expect("Config should load successfully");
    assert!(settings.s3.is_none());
    assert!(settings.azure.is_none());
}

#[test]
fn test_azure_connection_string_takes_priority() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_storage_env_vars();

    env::set_var("STORAGE_TYPE", "azure");
    env::set_var("AZURE_BLOB_STORAGE_CONTAINER_NAME", "flows");
    env::set_var("AZURE_BLOB_STORAGE_CONNECTION_STRING", "UseDevelopmentStorage=true");
    env::set_var("AZURE_BLOB_STORAGE_ACCOUNT_NAME", "ignored");
    env::set_var("AZURE_BLOB_STORAGE_ACCOUNT_KEY", "ignored-key");

    let azure = StorageSettings::from_env().unwrap().azure.unwrap();
    assert_eq!(azure.container_name, "flows");
    assert_eq!(azure.auth, AzureAuth::ConnectionString("UseDevelopmentStorage=true".to_string()));
}

#[test]
fn test_gcs_requires_bucket() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_storage_env_vars();

    env::set_var("STORAGE_TYPE", "gcs");
    assert!(StorageSettings::from_env().is_err());

    env::set_var("GOOGLE_CLOUD_STORAGE_BUCKET_NAME", "flow-files");
    env::set_var("GOOGLE_CLOUD_STORAGE_CREDENTIAL", "/etc/gcs/key.json");
    let gcs = StorageSettings::from_env().unwrap().gcs.unwrap();
    assert_eq!(gcs.bucket_name, "flow-files");
    assert_eq!(gcs.credential_path.as_deref(), Some("/etc/gcs/key.json"));
    assert!(gcs.project_id.is_none());
}

#[test]
fn test_log_path_and_level() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_storage_env_vars();

    env::set_var("LOG_PATH", "/var/log/flowstore");
    env::set_var("LOG_LEVEL", "debug");

    let settings = StorageSettings::from_env().unwrap();
    assert_eq!(settings.logging.log_dir, PathBuf::from("/var/log/flowstore"));
    assert_eq!(settings.logging.server_level, "debug");
}
