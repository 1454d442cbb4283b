//! Error types for Jobrace Core
//!
//! The arbiter's public operations never fail; these errors cover
//! construction, configuration and the change-feed seam.

use std::path::PathBuf;

/// Arbiter construction errors
#[derive(Debug, thiserror::Error)]
pub enum ArbiterError {
    /// Deadline timers need a Tokio runtime
    #[error("no tokio runtime available for deadline timers")]
    NoRuntime,
}

/// Change-feed subscription errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    /// Feed has been shut down
    #[error("change feed closed")]
    Closed,

    /// Feed needs a runtime to drive its subscription
    #[error("no tokio runtime available for subscription task")]
    NoRuntime,

    /// Feed refused or failed to open the subscription
    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// TOML did not match the config schema
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value was out of range
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}

impl ConfigError {
    /// Create an invalid-value error
    #[inline]
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
