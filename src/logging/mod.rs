//! Log sinks wired to the active storage backend
//!
//! A backend hands out [`LogTransport`]s per [`LogChannel`]; [`init_tracing`]
//! attaches them to a `tracing-subscriber` registry next to the console layer.

use anyhow::anyhow;
use std::fmt;
use tracing::Level;
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::LoggingSettings;
use crate::storage::StorageProvider;

pub mod local;
pub mod object;

pub use local::{RollingFileSink, Rotation};
pub use object::{flush_object_logs, object_transports, LogUploader, ObjectLogSink};

/// Events logged with this target are routed to the `requests` channel
pub const REQUESTS_TARGET: &str = "flowstore::requests";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogChannel {
    Server,
    Error,
    Requests,
}

impl LogChannel {
    pub const ALL: [LogChannel; 3] = [LogChannel::Server, LogChannel::Error, LogChannel::Requests];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogChannel::Server => "server",
            LogChannel::Error => "error",
            LogChannel::Requests => "requests",
        }
    }

    pub fn default_level(&self) -> Level {
        match self {
            LogChannel::Server => Level::INFO,
            LogChannel::Error => Level::ERROR,
            LogChannel::Requests => Level::DEBUG,
        }
    }

    /// Object name prefix used by cloud sinks
    pub fn file_prefix(&self) -> &'static str {
        match self {
            LogChannel::Server => "server",
            LogChannel::Error => "server-error",
            LogChannel::Requests => "server-requests",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            LogChannel::Requests => ".log.jsonl",
            _ => ".log",
        }
    }

    /// Folder (object key prefix) cloud sinks write this channel to
    pub fn object_folder(&self) -> String {
        format!("logs/{}", self.as_str())
    }
}

impl std::str::FromStr for LogChannel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "server" => Ok(LogChannel::Server),
            "error" => Ok(LogChannel::Error),
            "requests" => Ok(LogChannel::Requests),
            other => Err(anyhow!("Unknown log channel '{}'", other)),
        }
    }
}

/// A log sink for one channel
pub struct LogTransport {
    pub channel: LogChannel,
    pub level: Level,
    /// Human-readable destination (file path or object folder)
    pub destination: String,
    pub writer: BoxMakeWriter,
}

impl fmt::Debug for LogTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogTransport")
            .field("channel", &self.channel)
            .field("level", &self.level)
            .field("destination", &self.destination)
            .finish()
    }
}

/// Parse a level name, falling back to the channel default
pub fn parse_level(value: &str, fallback: Level) -> Level {
    value.parse::<Level>().unwrap_or(fallback)
}

/// Install the global subscriber: console output filtered by `RUST_LOG`
/// (default `info`), plus every transport the provider returns.
pub fn init_tracing(provider: &dyn StorageProvider, settings: &LoggingSettings) -> anyhow::Result<()> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    let console_default = match std::env::var("DEBUG") {
        Ok(v) if v.trim().eq_ignore_ascii_case("true") => "debug",
        _ => "info",
    };
    let console_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(console_default));
    layers.push(tracing_subscriber::fmt::layer().with_filter(console_filter).boxed());

    for channel in LogChannel::ALL {
        let transports = provider
            .logger_transports(channel, settings)
            .map_err(|e| anyhow!("Failed to create {} log transports: {}", channel.as_str(), e))?;

        for transport in transports {
            layers.push(transport_layer(transport));
        }
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))
}

fn transport_layer(transport: LogTransport) -> Box<dyn Layer<Registry> + Send + Sync> {
    match transport.channel {
        LogChannel::Requests => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(transport.writer)
            .with_filter(Targets::new().with_target(REQUESTS_TARGET, transport.level))
            .boxed(),
        _ => tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(transport.writer)
            .with_filter(LevelFilter::from_level(transport.level))
            .boxed(),
    }
}
