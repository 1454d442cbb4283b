//! Core types for job completion arbitration
//!
//! Provides the identifiers and payload shapes shared by the arbiter and the
//! channel adapters:
//! - Job identifiers (correlation key across both channels)
//! - Channel tags and outcomes delivered to the caller
//! - The change-feed record shape owned by the storage collaborator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Opaque identifier of one in-flight unit of asynchronous work
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Create a job identifier from any string token
    #[inline]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Issue a fresh random identifier
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the raw token
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Notification path that reported a job's completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Direct HTTP response
    Http,
    /// Asynchronous change-feed push
    Channel,
}

impl ChannelKind {
    /// Stable tag used in logs and metric labels
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Channel => "channel",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload delivered through the single resolution path
///
/// Success and failure share one delivery channel; callers tell them apart
/// by inspecting the variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "lowercase")]
pub enum JobOutcome {
    /// Job finished with a result payload
    Completed(Value),
    /// Job failed; payload is error-shaped
    Failed(Value),
}

impl JobOutcome {
    /// Build a success or error outcome from a flag
    #[inline]
    #[must_use]
    pub fn from_parts(payload: Value, is_error: bool) -> Self {
        if is_error {
            Self::Failed(payload)
        } else {
            Self::Completed(payload)
        }
    }

    /// Build an error outcome carrying `{"error": message}`
    #[must_use]
    pub fn error_message(message: impl Into<String>) -> Self {
        Self::Failed(serde_json::json!({ "error": message.into() }))
    }

    /// Whether the payload is error-shaped
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Borrow the payload regardless of variant
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &Value {
        match self {
            Self::Completed(v) | Self::Failed(v) => v,
        }
    }

    /// Take the payload regardless of variant
    #[inline]
    #[must_use]
    pub fn into_payload(self) -> Value {
        match self {
            Self::Completed(v) | Self::Failed(v) => v,
        }
    }
}

/// The winning report for one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// Job the report belongs to
    pub job_id: JobId,
    /// Delivered payload
    pub outcome: JobOutcome,
    /// Channel that won the race
    pub channel: ChannelKind,
}

/// Status of a backing job record, as stored by the external collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Still running
    Pending,
    /// Finished with a result payload
    Completed,
    /// Finished with an error indicator
    Error,
}

impl JobStatus {
    /// Terminal states end the notification stream for a job
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// One change-feed notification for a job record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Job the record tracks
    pub id: JobId,
    /// Current status
    pub status: JobStatus,
    /// Result payload (completed) or error detail (error)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Error message when `status == Error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Record for a job that is still running
    #[must_use]
    pub fn pending(id: impl Into<JobId>) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Pending,
            payload: None,
            error: None,
            updated_at: Utc::now(),
        }
    }

    /// Record for a job that completed with `payload`
    #[must_use]
    pub fn completed(id: impl Into<JobId>, payload: Value) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Completed,
            payload: Some(payload),
            error: None,
            updated_at: Utc::now(),
        }
    }

    /// Record for a job that failed with `message`
    #[must_use]
    pub fn failed(id: impl Into<JobId>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Error,
            payload: None,
            error: Some(message.into()),
            updated_at: Utc::now(),
        }
    }

    /// Convert a terminal record into the outcome it reports
    ///
    /// Returns `None` for non-terminal records.
    #[must_use]
    pub fn outcome(&self) -> Option<JobOutcome> {
        match self.status {
            JobStatus::Pending => None,
            JobStatus::Completed => Some(JobOutcome::Completed(
                self.payload.clone().unwrap_or(Value::Null),
            )),
            JobStatus::Error => Some(match (&self.error, &self.payload) {
                (Some(message), _) => JobOutcome::error_message(message.clone()),
                (None, Some(payload)) => JobOutcome::Failed(payload.clone()),
                (None, None) => JobOutcome::error_message("job failed"),
            }),
        }
    }
}

/// Per-registration parameters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RaceOptions {
    /// Overrides the configured default deadline
    pub deadline: Option<Duration>,
}

impl RaceOptions {
    /// Default options
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With a per-registration deadline
    #[inline]
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Identifies a registered job and when it self-cancels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    /// Registered job
    pub job_id: JobId,
    /// Absolute expiry time
    pub deadline: Instant,
}

/// Snapshot of arbiter counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaceStats {
    /// Total registrations accepted
    pub registered: u64,
    /// Races won by the HTTP channel
    pub resolved_http: u64,
    /// Races won by the change feed
    pub resolved_channel: u64,
    /// Entries reclaimed by their deadline
    pub expired: u64,
    /// Entries removed by explicit cancel or shutdown
    pub cancelled: u64,
    /// Entries replaced by a second registration of the same id
    pub replaced: u64,
    /// Reports that arrived after the race was decided
    pub late_arrivals: u64,
    /// Entries currently awaiting resolution
    pub pending: u64,
}

impl RaceStats {
    /// Total races resolved on either channel
    #[inline]
    #[must_use]
    pub fn resolved(&self) -> u64 {
        self.resolved_http + self.resolved_channel
    }
}
