//! Multipart upload sinks
//!
//! Each backend hands the HTTP layer an [`UploadSink`] that stages uploaded
//! parts at a backend-appropriate location. The returned [`UploadedFile::path`]
//! is what `get_file_from_upload` and `remove_specific_file_from_upload`
//! accept later on.

use async_trait::async_trait;
use axum::extract::Multipart;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::{Result, StorageError};

/// One file part of a multipart request, as a byte stream
pub struct UploadPart<'a> {
    pub field_name: Option<String>,
    pub original_name: String,
    pub mime_type: Option<String>,
    pub body: BoxStream<'a, io::Result<Bytes>>,
}

impl UploadPart<'static> {
    /// Build a part from an in-memory buffer
    pub fn from_bytes(original_name: &str, mime_type: Option<&str>, data: Vec<u8>) -> Self {
        UploadPart {
            field_name: None,
            original_name: original_name.to_string(),
            mime_type: mime_type.map(str::to_string),
            body: futures::stream::once(async move { Ok(Bytes::from(data)) }).boxed(),
        }
    }
}

impl<'a> UploadPart<'a> {
    /// Drain the body into a single buffer
    pub async fn collect(self) -> io::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        let mut body = self.body;
        while let Some(chunk) = body.try_next().await? {
            buffer.extend_from_slice(&chunk);
        }
        Ok(buffer)
    }
}

/// A staged upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    /// Backend-native identifier of the staged file
    pub path: String,
    pub original_name: String,
    pub mime_type: Option<String>,
    pub size: u64,
    pub field_name: Option<String>,
}

#[async_trait]
pub trait UploadSink: Send + Sync {
    /// Short description of where uploads land, for diagnostics
    fn destination(&self) -> String;

    async fn stage(&self, part: UploadPart<'_>) -> Result<UploadedFile>;
}

/// Stage every file part of a multipart request through `sink`.
///
/// Parts without a filename (plain form fields) are skipped.
pub async fn store_multipart(sink: &dyn UploadSink, mut multipart: Multipart) -> Result<Vec<UploadedFile>> {
    let mut staged = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| StorageError::Io(io::Error::new(io::ErrorKind::InvalidData, e.to_string())))?
    {
        let Some(original_name) = field.file_name().map(str::to_string) else {
            debug!("Skipping non-file multipart field {:?}", field.name());
            continue;
        };

        let part = UploadPart {
            field_name: field.name().map(str::to_string),
            original_name,
            mime_type: field.content_type().map(str::to_string),
            body: field
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
                .boxed(),
        };

        staged.push(sink.stage(part).await?);
    }

    Ok(staged)
}

/// Stages uploads as randomly named files in a local directory
pub struct LocalUploadSink {
    upload_dir: PathBuf,
}

impl LocalUploadSink {
    /// Creates the upload directory if it does not exist yet
    pub fn new(upload_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&upload_dir)?;
        Ok(Self { upload_dir })
    }
}

#[async_trait]
impl UploadSink for LocalUploadSink {
    fn destination(&self) -> String {
        self.upload_dir.display().to_string()
    }

    async fn stage(&self, part: UploadPart<'_>) -> Result<UploadedFile> {
        let target = self.upload_dir.join(Uuid::new_v4().simple().to_string());
        let mut file = fs::File::create(&target).await?;

        let mut size = 0u64;
        let mut body = part.body;
        while let Some(chunk) = body.try_next().await? {
            size += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        info!("Staged upload {} at {} ({} bytes)", part.original_name, target.display(), size);
        Ok(UploadedFile {
            path: target.to_string_lossy().to_string(),
            original_name: part.original_name,
            mime_type: part.mime_type,
            size,
            field_name: part.field_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_sink_stages_random_names() {
        let dir = TempDir::new().unwrap();
        let sink = LocalUploadSink::new(dir.path().join("uploads")).unwrap();

        let first = sink.stage(UploadPart::from_bytes("a.txt", Some("text/plain"), b"hello".to_vec())).await.unwrap();
        let second = sink.stage(UploadPart::from_bytes("a.txt", None, b"world!".to_vec())).await.unwrap();

        assert_ne!(first.path, second.path);
        assert_eq!(first.size, 5);
        assert_eq!(second.size, 6);
        assert_eq!(first.original_name, "a.txt");
        assert_eq!(first.mime_type.as_deref(), Some("text/plain"));

        let name = std::path::Path::new(&first.path).file_name().unwrap().to_string_lossy().to_string();
        assert_eq!(name.len(), 32);
        assert!(name.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(std::fs::read(&first.path).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_collect_concatenates_chunks() {
        let part = UploadPart {
            field_name: Some("files".to_string()),
            original_name: "x.bin".to_string(),
            mime_type: None,
            body: futures::stream::iter(vec![Ok(Bytes::from_static(b"ab")), Ok(Bytes::from_static(b"cd"))]).boxed(),
        };
        assert_eq!(part.collect().await.unwrap(), b"abcd");
    }
}
