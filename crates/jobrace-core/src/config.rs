//! Configuration for the arbiter and its HTTP channel
//!
//! Loaded from TOML, then overridden from the environment:
//!
//! ```toml
//! [arbiter]
//! default_deadline_ms = 300000
//!
//! [http]
//! endpoint = "https://example.functions.dev/generate-trade-setup"
//! request_timeout_ms = 120000
//! on_transport_error = "defer_to_channel"
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Deadline used when a registration does not carry its own (5 minutes)
pub const DEFAULT_DEADLINE_MS: u64 = 300_000;

/// Default HTTP request timeout (2 minutes)
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 120_000;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobraceConfig {
    /// Arbiter settings
    pub arbiter: ArbiterConfig,
    /// HTTP channel settings
    pub http: HttpChannelConfig,
}

impl JobraceConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration from a TOML document
    ///
    /// # Errors
    /// - `ConfigError::Parse` if the document does not match the schema
    /// - `ConfigError::Invalid` if a value is out of range
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file and apply environment overrides
    ///
    /// # Errors
    /// - `ConfigError::Io` if the file cannot be read
    /// - `ConfigError::Parse` / `ConfigError::Invalid` as for `from_toml_str`
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&source)?;
        config.apply_env()?;
        Ok(config)
    }

    /// Apply `JOBRACE_*` overrides from the process environment
    ///
    /// # Errors
    /// `ConfigError::Invalid` if an override does not parse
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `JOBRACE_*` overrides from an arbitrary lookup
    ///
    /// # Errors
    /// `ConfigError::Invalid` if an override does not parse
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("JOBRACE_DEADLINE_MS") {
            self.arbiter.default_deadline_ms = parse_ms("JOBRACE_DEADLINE_MS", &raw)?;
        }
        if let Some(endpoint) = lookup("JOBRACE_HTTP_ENDPOINT") {
            self.http.endpoint = endpoint;
        }
        if let Some(raw) = lookup("JOBRACE_HTTP_TIMEOUT_MS") {
            self.http.request_timeout_ms = parse_ms("JOBRACE_HTTP_TIMEOUT_MS", &raw)?;
        }
        if let Some(token) = lookup("JOBRACE_HTTP_TOKEN") {
            self.http.bearer_token = Some(token);
        }
        self.validate()
    }

    /// Check value ranges
    ///
    /// # Errors
    /// `ConfigError::Invalid` naming the first offending field
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.arbiter.validate()?;
        self.http.validate()
    }

    /// With arbiter settings
    #[inline]
    #[must_use]
    pub fn with_arbiter(mut self, arbiter: ArbiterConfig) -> Self {
        self.arbiter = arbiter;
        self
    }

    /// With HTTP channel settings
    #[inline]
    #[must_use]
    pub fn with_http(mut self, http: HttpChannelConfig) -> Self {
        self.http = http;
        self
    }
}

fn parse_ms(field: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|e| ConfigError::invalid(field, format!("{raw:?}: {e}")))
}

/// Arbiter settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbiterConfig {
    /// Deadline after which an unresolved entry silently expires
    pub default_deadline_ms: u64,
}

impl ArbiterConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With default deadline
    #[inline]
    #[must_use]
    pub fn with_default_deadline(mut self, deadline: Duration) -> Self {
        self.default_deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Default deadline as a duration
    #[inline]
    #[must_use]
    pub fn default_deadline(&self) -> Duration {
        Duration::from_millis(self.default_deadline_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_deadline_ms == 0 {
            return Err(ConfigError::invalid(
                "arbiter.default_deadline_ms",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            default_deadline_ms: DEFAULT_DEADLINE_MS,
        }
    }
}

/// What a transport-level HTTP failure means for the race
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HttpFailurePolicy {
    /// Resolve the race with an error-shaped payload
    #[default]
    Report,
    /// Stay silent and let the change feed (or the deadline) decide
    DeferToChannel,
}

/// HTTP channel settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpChannelConfig {
    /// Function endpoint jobs are POSTed to
    pub endpoint: String,
    /// Per-request timeout
    pub request_timeout_ms: u64,
    /// Optional bearer token sent as `Authorization`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
    /// Handling of transport failures
    pub on_transport_error: HttpFailurePolicy,
}

impl HttpChannelConfig {
    /// Create configuration for `endpoint`
    #[inline]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// With request timeout
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With bearer token
    #[inline]
    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// With transport failure policy
    #[inline]
    #[must_use]
    pub fn with_failure_policy(mut self, policy: HttpFailurePolicy) -> Self {
        self.on_transport_error = policy;
        self
    }

    /// Request timeout as a duration
    #[inline]
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::invalid("http.endpoint", "must not be empty"));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "http.request_timeout_ms",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

impl Default for HttpChannelConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:54321/functions/v1/jobs".to_string(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            bearer_token: None,
            on_transport_error: HttpFailurePolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn defaults_use_five_minute_deadline() {
        let config = JobraceConfig::new();
        assert_eq!(config.arbiter.default_deadline(), Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_partial_toml() {
        let config = JobraceConfig::from_toml_str(
            r#"
            [arbiter]
            default_deadline_ms = 50

            [http]
            endpoint = "https://fn.example/trade-setup"
            on_transport_error = "defer_to_channel"
            "#,
        )
        .unwrap();

        assert_eq!(config.arbiter.default_deadline_ms, 50);
        assert_eq!(config.http.endpoint, "https://fn.example/trade-setup");
        assert_eq!(config.http.request_timeout_ms, DEFAULT_REQUEST_TIMEOUT_MS);
        assert_eq!(config.http.on_transport_error, HttpFailurePolicy::DeferToChannel);
    }

    #[test]
    fn rejects_zero_deadline() {
        let err = JobraceConfig::from_toml_str("[arbiter]\ndefault_deadline_ms = 0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { field: "arbiter.default_deadline_ms", .. }
        ));
    }

    #[test]
    fn rejects_unknown_policy() {
        let err = JobraceConfig::from_toml_str("[http]\non_transport_error = \"retry\"\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn overrides_apply_on_top_of_file_values() {
        let vars: HashMap<&str, &str> = [
            ("JOBRACE_DEADLINE_MS", "1500"),
            ("JOBRACE_HTTP_TOKEN", "anon-key"),
        ]
        .into_iter()
        .collect();

        let mut config = JobraceConfig::new();
        config
            .apply_overrides(|key| vars.get(key).map(|v| (*v).to_string()))
            .unwrap();

        assert_eq!(config.arbiter.default_deadline_ms, 1500);
        assert_eq!(config.http.bearer_token.as_deref(), Some("anon-key"));
    }

    #[test]
    fn malformed_override_is_rejected() {
        let mut config = JobraceConfig::new();
        let err = config
            .apply_overrides(|key| (key == "JOBRACE_HTTP_TIMEOUT_MS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { field: "JOBRACE_HTTP_TIMEOUT_MS", .. }
        ));
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[arbiter]\ndefault_deadline_ms = 10000").unwrap();

        let config = JobraceConfig::load(file.path()).unwrap();
        assert!(config.arbiter.default_deadline_ms > 0);
    }

    #[test]
    fn load_reports_missing_file() {
        let err = JobraceConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
