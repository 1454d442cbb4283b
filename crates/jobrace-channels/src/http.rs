//! `reqwest` implementation of the HTTP completion channel

use crate::transport::{JobTransport, TransportError};
use jobrace_core::{HttpChannelConfig, JobId};
use serde::Serialize;
use serde_json::Value;

/// Longest response body kept in `TransportError::Status`
const MAX_ERROR_BODY: usize = 2048;

#[derive(Serialize)]
struct SubmitBody<'a> {
    job_id: &'a JobId,
    request: Value,
}

/// Posts jobs to a function endpoint
#[derive(Debug, Clone)]
pub struct HttpJobClient {
    client: reqwest::Client,
    config: HttpChannelConfig,
}

impl HttpJobClient {
    /// Build a client from channel settings
    ///
    /// # Errors
    /// `TransportError::Build` if the TLS backend cannot be initialised
    pub fn new(config: HttpChannelConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(TransportError::Build)?;
        Ok(Self { client, config })
    }

    /// Channel settings
    #[inline]
    #[must_use]
    pub fn config(&self) -> &HttpChannelConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl JobTransport for HttpJobClient {
    async fn submit(&self, job_id: &JobId, request: Value) -> Result<Value, TransportError> {
        let mut builder = self
            .client
            .post(&self.config.endpoint)
            .json(&SubmitBody { job_id, request });
        if let Some(token) = &self.config.bearer_token {
            builder = builder.bearer_auth(token);
        }

        tracing::debug!(job_id = %job_id, endpoint = %self.config.endpoint, "submitting job");
        let response = builder.send().await.map_err(TransportError::Request)?;
        let status = response.status();

        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await.map_err(TransportError::Request)?;
        serde_json::from_slice(&bytes).map_err(|e| TransportError::Decode(e.to_string()))
    }
}
