//! Buffered log sink that periodically uploads batches as objects

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use super::{LogChannel, LogTransport};
use crate::errors::{Result, StorageError};

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);

/// Unsent log bytes kept per channel while uploads fail; the oldest go first
pub const MAX_BUFFERED_BYTES: usize = 16 * 1024 * 1024;

/// Every sink started with `spawn`, so shutdown can drain them
static SPAWNED_SINKS: Lazy<Mutex<Vec<ObjectLogSink>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// Writes a finished log batch through a backend's own client
#[async_trait]
pub trait LogUploader: Send + Sync + 'static {
    async fn upload_log(&self, key: &str, body: &[u8]) -> Result<()>;

    /// Where batches end up, for diagnostics
    fn log_destination(&self, folder: &str) -> String;
}

/// Object key for a batch flushed at `now`
pub fn batch_key(channel: LogChannel, now: DateTime<Utc>) -> String {
    format!(
        "{}/{}-{}{}",
        channel.object_folder(),
        channel.file_prefix(),
        now.format("%Y-%m-%d-%H-%M-%S-%3f"),
        channel.extension()
    )
}

#[derive(Clone)]
struct BufferWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log buffer lock poisoned"))?;
        buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct ObjectLogSink {
    channel: LogChannel,
    uploader: Arc<dyn LogUploader>,
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl ObjectLogSink {
    pub fn new(channel: LogChannel, uploader: Arc<dyn LogUploader>) -> Self {
        Self {
            channel,
            uploader,
            buffer: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Start the background flush task on the current tokio runtime
    pub fn spawn(channel: LogChannel, uploader: Arc<dyn LogUploader>, interval: Duration) -> Result<Self> {
        let handle = tokio::runtime::Handle::try_current().map_err(|e| {
            StorageError::Configuration(format!("object log sinks need a tokio runtime: {}", e))
        })?;

        let sink = Self::new(channel, uploader);
        if let Ok(mut sinks) = SPAWNED_SINKS.lock() {
            sinks.push(sink.clone());
        }
        let worker = sink.clone();
        handle.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = worker.flush().await {
                    eprintln!("Failed to upload {} log batch: {}", worker.channel.as_str(), e);
                }
            }
        });

        Ok(sink)
    }

    /// Upload everything buffered so far as one object.
    ///
    /// Returns the key written, or `None` when the buffer was empty. When the
    /// upload fails the batch goes back in front of anything logged since,
    /// and the next flush retries it.
    pub async fn flush(&self) -> Result<Option<String>> {
        let batch = std::mem::take(&mut *self.lock_buffer()?);
        if batch.is_empty() {
            return Ok(None);
        }

        let key = batch_key(self.channel, Utc::now());
        if let Err(e) = self.uploader.upload_log(&key, &batch).await {
            self.requeue(batch)?;
            return Err(e);
        }
        Ok(Some(key))
    }

    /// Bytes waiting for the next flush
    pub fn pending_bytes(&self) -> usize {
        self.buffer.lock().map(|b| b.len()).unwrap_or(0)
    }

    fn lock_buffer(&self) -> Result<std::sync::MutexGuard<'_, Vec<u8>>> {
        self.buffer
            .lock()
            .map_err(|_| StorageError::Io(io::Error::new(io::ErrorKind::Other, "log buffer lock poisoned")))
    }

    fn requeue(&self, mut batch: Vec<u8>) -> Result<()> {
        let mut buffer = self.lock_buffer()?;
        batch.extend_from_slice(&buffer);
        if batch.len() > MAX_BUFFERED_BYTES {
            let excess = batch.len() - MAX_BUFFERED_BYTES;
            batch.drain(..excess);
            eprintln!("Dropped {} bytes of unsent {} logs", excess, self.channel.as_str());
        }
        *buffer = batch;
        Ok(())
    }

    pub fn transport(&self, level: Level) -> LogTransport {
        let writer = BufferWriter { buffer: self.buffer.clone() };
        LogTransport {
            channel: self.channel,
            level,
            destination: self.uploader.log_destination(&self.channel.object_folder()),
            writer: BoxMakeWriter::new(move || writer.clone()),
        }
    }
}

/// Flush every spawned object log sink; call before the process exits.
///
/// Every sink is attempted; the first failure is returned.
pub async fn flush_object_logs() -> Result<()> {
    let sinks: Vec<ObjectLogSink> = match SPAWNED_SINKS.lock() {
        Ok(sinks) => sinks.clone(),
        Err(_) => return Ok(()),
    };

    let mut first_error = None;
    for sink in sinks {
        if let Err(e) = sink.flush().await {
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// Transports for a cloud backend: one buffered sink per channel at its fixed level
pub fn object_transports(channel: LogChannel, uploader: Arc<dyn LogUploader>) -> Result<Vec<LogTransport>> {
    let sink = ObjectLogSink::spawn(channel, uploader, DEFAULT_FLUSH_INTERVAL)?;
    Ok(vec![sink.transport(channel.default_level())])
}
