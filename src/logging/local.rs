//! Size- and time-rolled log files on the local filesystem

use chrono::{DateTime, Local};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Roll server logs once they reach this size, even within the hour
pub const DEFAULT_MAX_FILE_BYTES: u64 = 20 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    /// `<prefix>-YYYY-MM-DD-HH<ext>`, a new file every hour
    Hourly,
    /// `<prefix><ext>`, one file forever
    Never,
}

struct RollingState {
    file: Option<File>,
    period: String,
    generation: u32,
    written: u64,
}

/// A clonable writer that rotates its target file.
///
/// Clones share the open file, so every `tracing` event handed out by the
/// `MakeWriter` closure lands in the same file.
#[derive(Clone)]
pub struct RollingFileSink {
    dir: PathBuf,
    prefix: String,
    extension: String,
    rotation: Rotation,
    max_bytes: u64,
    state: Arc<Mutex<RollingState>>,
}

impl RollingFileSink {
    pub fn new(dir: impl Into<PathBuf>, prefix: &str, extension: &str, rotation: Rotation) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            prefix: prefix.to_string(),
            extension: extension.to_string(),
            rotation,
            max_bytes: DEFAULT_MAX_FILE_BYTES,
            state: Arc::new(Mutex::new(RollingState {
                file: None,
                period: String::new(),
                generation: 0,
                written: 0,
            })),
        })
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file a write at `now` would go to
    pub fn current_path(&self, now: DateTime<Local>) -> PathBuf {
        let generation = self.state.lock().map(|s| s.generation).unwrap_or(0);
        self.file_path(&self.period_for(now), generation)
    }

    fn period_for(&self, now: DateTime<Local>) -> String {
        match self.rotation {
            Rotation::Hourly => now.format("%Y-%m-%d-%H").to_string(),
            Rotation::Never => String::new(),
        }
    }

    fn file_path(&self, period: &str, generation: u32) -> PathBuf {
        let mut name = self.prefix.clone();
        if !period.is_empty() {
            name.push('-');
            name.push_str(period);
        }
        if generation > 0 {
            name.push_str(&format!(".{}", generation));
        }
        name.push_str(&self.extension);
        self.dir.join(name)
    }

    fn write_at(&self, buf: &[u8], now: DateTime<Local>) -> io::Result<usize> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log file lock poisoned"))?;

        let period = self.period_for(now);
        if state.period != period {
            state.period = period;
            state.generation = 0;
            state.file = None;
        } else if self.max_bytes > 0 && state.written >= self.max_bytes {
            state.generation += 1;
            state.file = None;
        }

        if state.file.is_none() {
            let path = self.file_path(&state.period, state.generation);
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            state.written = file.metadata().map(|m| m.len()).unwrap_or(0);
            state.file = Some(file);
        }

        let written = match state.file.as_mut() {
            Some(file) => file.write(buf)?,
            None => 0,
        };
        state.written += written as u64;
        Ok(written)
    }
}

impl Write for RollingFileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_at(buf, Local::now())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log file lock poisoned"))?;
        match state.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}
