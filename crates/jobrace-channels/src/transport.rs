//! Request side of the HTTP completion channel

use jobrace_core::JobId;
use serde_json::Value;

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Client could not be constructed
    #[error("failed to build http client: {0}")]
    Build(#[source] reqwest::Error),

    /// Request failed before a response arrived (connect, timeout, reset)
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),

    /// Endpoint answered with a non-success status
    #[error("endpoint returned {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, possibly truncated
        body: String,
    },

    /// Response body was not valid JSON
    #[error("invalid response body: {0}")]
    Decode(String),
}

impl TransportError {
    /// Whether the request never got an answer from the endpoint
    ///
    /// The backing job may still complete and be observed on the change feed.
    #[must_use]
    pub fn is_transport_level(&self) -> bool {
        matches!(self, Self::Request(_))
    }

    /// Error-shaped payload delivered to the caller when this error wins the race
    #[must_use]
    pub fn to_payload(&self) -> Value {
        match self {
            Self::Status { status, body } => serde_json::json!({
                "error": self.to_string(),
                "status": status,
                "body": body,
            }),
            _ => serde_json::json!({ "error": self.to_string() }),
        }
    }
}

/// Submits a job and returns the HTTP response payload
#[async_trait::async_trait]
pub trait JobTransport: Send + Sync {
    /// Submit `request` for `job_id`
    ///
    /// # Errors
    /// `TransportError` if no successful response was obtained
    async fn submit(&self, job_id: &JobId, request: Value) -> Result<Value, TransportError>;
}
