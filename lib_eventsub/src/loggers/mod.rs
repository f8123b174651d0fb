//! # Logging Setup
//!
//! Installs the global `tracing` subscriber for binaries: an `EnvFilter`
//! (from `RUST_LOG`, falling back to the configured level), a console layer
//! and a JSON layer written to a daily rolling file through a non-blocking
//! writer.

use std::io;
use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Directory for the rolling JSON files; created if missing.
    pub dir: PathBuf,
    /// File name prefix, usually the binary name.
    pub file_prefix: String,
    /// Filter used when `RUST_LOG` is unset or invalid.
    pub level: String,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            file_prefix: "eventsub".to_string(),
            level: "info".to_string(),
        }
    }
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the subscriber. Keep the returned guard alive for the life of the
/// process; dropping it flushes and stops the file writer.
pub fn setup_logging(options: &LogOptions) -> io::Result<WorkerGuard> {
    std::fs::create_dir_all(&options.dir)?;
    let file_appender = rolling::daily(&options.dir, &options.file_prefix);
    let (writer, guard) = non_blocking(file_appender);

    let console_layer = fmt::layer().with_target(true).with_ansi(true);
    let file_layer = fmt::layer().with_ansi(false).with_writer(writer).json();

    tracing_subscriber::registry()
        .with(env_filter(&options.level))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e.to_string()))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_into_requested_directory() {
        let dir = tempfile::tempdir().unwrap();
        let options = LogOptions {
            dir: dir.path().join("nested"),
            file_prefix: "test".into(),
            level: "debug".into(),
        };
        let guard = setup_logging(&options).unwrap();
        tracing::info!(pool_id = "p1", "hello");
        drop(guard);

        assert!(options.dir.is_dir());
        // A second global subscriber cannot be installed.
        assert!(setup_logging(&options).is_err());
    }
}
