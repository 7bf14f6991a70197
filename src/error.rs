//! Error types for the bottleneck detection engine.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::performance::metrics::Component;

/// Result type alias for detection operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for detection operations
#[derive(Debug, Error)]
pub enum Error {
    /// A metric source failed to produce a sample for one component
    #[error("Sampling failure for {component}: {reason}")]
    SamplingFailure {
        /// Component whose sample could not be retrieved
        component: Component,
        /// Collaborator-provided reason
        reason: String,
    },

    /// A sample was older than the newest sample already stored
    #[error("Out-of-order sample for {component}: {timestamp} precedes {last_timestamp}")]
    OutOfOrderSample {
        /// Component the sample belongs to
        component: Component,
        /// Timestamp of the rejected sample
        timestamp: DateTime<Utc>,
        /// Timestamp of the newest stored sample
        last_timestamp: DateTime<Utc>,
    },

    /// Invalid configuration error
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Configuration loading error
    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    /// TOML serialization error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::ser::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a sampling failure for a component
    pub fn sampling(component: Component, reason: impl Into<String>) -> Self {
        Error::SamplingFailure {
            component,
            reason: reason.into(),
        }
    }
}

#[cfg(feature = "prometheus")]
impl From<prometheus::Error> for Error {
    fn from(err: prometheus::Error) -> Self {
        Error::Metrics(err.to_string())
    }
}
