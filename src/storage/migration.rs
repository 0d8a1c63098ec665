//! Read-triggered migration of files stored before tenant isolation
//!
//! Older deployments wrote files without the leading organization segment.
//! When a canonical read misses, the backend looks at the legacy location,
//! copies what it finds to the canonical location, deletes the legacy copy
//! and prunes the now-empty ancestors. Only the read is load bearing: copy,
//! delete and prune failures are logged and never reach the caller.

use async_trait::async_trait;
use std::fmt::Debug;
use tracing::{debug, info, warn};

use crate::errors::{Result, StorageError};

/// Primitive operations a backend exposes to the migration state machine
#[async_trait]
pub trait LegacyMigration: Send + Sync {
    /// Backend-native address (a filesystem path or an object key)
    type Location: Debug + Send + Sync;

    async fn read_location(&self, location: &Self::Location) -> Result<Vec<u8>>;

    async fn write_location(&self, location: &Self::Location, data: &[u8]) -> Result<()>;

    async fn delete_location(&self, location: &Self::Location) -> Result<()>;

    /// Remove empty containers above `location`, bottom-up, stopping at the
    /// first non-empty one or the storage root. Must not fail.
    async fn prune_empty_ancestors(&self, location: &Self::Location);
}

/// Read `canonical`, falling back to (and migrating from) `legacy` on a miss.
///
/// Errors other than a miss on the canonical read are returned as-is; a miss
/// on both locations becomes `StorageError::NotFound(file_name)`.
pub async fn read_with_legacy_fallback<M>(
    backend: &M,
    canonical: &M::Location,
    legacy: Option<&M::Location>,
    file_name: &str,
) -> Result<Vec<u8>>
where
    M: LegacyMigration + ?Sized,
{
    match backend.read_location(canonical).await {
        Ok(data) => return Ok(data),
        Err(e) if !e.is_not_found() => return Err(e),
        Err(_) => debug!("Canonical read missed for {:?}", canonical),
    }

    let Some(legacy) = legacy else {
        return Err(StorageError::NotFound(file_name.to_string()));
    };

    let data = match backend.read_location(legacy).await {
        Ok(data) => data,
        Err(e) if e.is_not_found() => return Err(StorageError::NotFound(file_name.to_string())),
        Err(e) => return Err(e),
    };

    info!("Found {} at legacy location {:?}, migrating to {:?}", file_name, legacy, canonical);
    migrate(backend, canonical, legacy, &data).await;

    Ok(data)
}

async fn migrate<M>(backend: &M, canonical: &M::Location, legacy: &M::Location, data: &[u8])
where
    M: LegacyMigration + ?Sized,
{
    if let Err(e) = backend.write_location(canonical, data).await {
        warn!("Failed to copy legacy file {:?} to {:?}: {}", legacy, canonical, e);
        return;
    }

    if let Err(e) = backend.delete_location(legacy).await {
        warn!("Copied legacy file but failed to delete {:?}: {}", legacy, e);
        return;
    }

    backend.prune_empty_ancestors(legacy).await;
    info!("Migrated legacy file {:?} -> {:?}", legacy, canonical);
}
