//! Tracing subscriber setup

use std::fs;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use crate::error::{Error, Result};

/// Log file name prefix
const LOG_FILE_PREFIX: &str = "perfscope.log";

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter directive (trace, debug, info, warn, error or a full `EnvFilter` string)
    pub level: String,
    /// Write human-readable logs to stderr
    pub console_enabled: bool,
    /// Write logs to rolling files under `log_dir`
    pub file_enabled: bool,
    pub log_dir: PathBuf,
    pub rotation: LogRotation,
    /// Emit JSON lines instead of text
    pub json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRotation {
    Daily,
    Hourly,
    Never,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console_enabled: true,
            file_enabled: false,
            log_dir: PathBuf::from("logs"),
            rotation: LogRotation::Daily,
            json: false,
        }
    }
}

impl LogConfig {
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_log_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.log_dir = dir.into();
        self
    }

    pub fn with_rotation(mut self, rotation: LogRotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_console(mut self, enabled: bool) -> Self {
        self.console_enabled = enabled;
        self
    }

    pub fn with_file(mut self, enabled: bool) -> Self {
        self.file_enabled = enabled;
        self
    }

    pub fn with_json(mut self, enabled: bool) -> Self {
        self.json = enabled;
        self
    }
}

/// Installs the global subscriber
///
/// `RUST_LOG` takes precedence over `config.level`. The returned guard must be
/// kept alive while file logging is in use; dropping it flushes the writer.
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    let mut guard = None;

    if config.console_enabled {
        let layer = fmt::layer().with_writer(std::io::stderr).with_target(true);
        layers.push(if config.json {
            layer.json().boxed()
        } else {
            layer.boxed()
        });
    }

    if config.file_enabled {
        ensure_log_dir(&config.log_dir)?;
        let appender = match config.rotation {
            LogRotation::Daily => rolling::daily(&config.log_dir, LOG_FILE_PREFIX),
            LogRotation::Hourly => rolling::hourly(&config.log_dir, LOG_FILE_PREFIX),
            LogRotation::Never => rolling::never(&config.log_dir, LOG_FILE_PREFIX),
        };
        let (writer, file_guard) = non_blocking(appender);
        guard = Some(file_guard);

        let layer = fmt::layer().with_writer(writer).with_ansi(false);
        layers.push(if config.json {
            layer.json().boxed()
        } else {
            layer.boxed()
        });
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .map_err(|e| Error::Internal(format!("failed to install log subscriber: {}", e)))?;

    tracing::debug!(
        level = %config.level,
        console = config.console_enabled,
        file = config.file_enabled,
        log_dir = %config.log_dir.display(),
        "Logging initialized"
    );

    Ok(guard)
}

fn ensure_log_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = LogConfig::default()
            .with_level("debug")
            .with_file(true)
            .with_console(false)
            .with_rotation(LogRotation::Never)
            .with_json(true);

        assert_eq!(config.level, "debug");
        assert!(config.file_enabled);
        assert!(!config.console_enabled);
        assert_eq!(config.rotation, LogRotation::Never);
        assert!(config.json);
    }

    #[test]
    fn test_file_logging_creates_directory() {
        let temp = tempfile::tempdir().unwrap();
        let log_dir = temp.path().join("nested").join("logs");
        let config = LogConfig::default()
            .with_console(false)
            .with_file(true)
            .with_log_dir(&log_dir);

        let guard = init_logging(&config).unwrap();
        assert!(guard.is_some());
        assert!(log_dir.is_dir());

        // Only one global subscriber per process
        assert!(init_logging(&config).is_err());
    }
}
