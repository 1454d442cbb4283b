//! Job submission: one call site for both channels
//!
//! Registers the race, fires the HTTP request, and routes its outcome into
//! the arbiter. The change feed side is wired by the arbiter's own
//! subscription.

use crate::transport::JobTransport;
use jobrace_core::{
    Completion, CompletionArbiter, HttpChannelConfig, HttpFailurePolicy, JobId, RaceOptions,
    Resolution,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::task::AbortHandle;

/// Submits jobs and races their HTTP response against the change feed
#[derive(Clone)]
pub struct JobSubmitter {
    arbiter: CompletionArbiter,
    transport: Arc<dyn JobTransport>,
    policy: HttpFailurePolicy,
}

impl JobSubmitter {
    /// Create a submitter reporting transport failures as job failures
    pub fn new(arbiter: CompletionArbiter, transport: Arc<dyn JobTransport>) -> Self {
        Self {
            arbiter,
            transport,
            policy: HttpFailurePolicy::default(),
        }
    }

    /// Create a submitter using the failure policy from channel settings
    pub fn from_config(
        arbiter: CompletionArbiter,
        transport: Arc<dyn JobTransport>,
        config: &HttpChannelConfig,
    ) -> Self {
        Self::new(arbiter, transport).with_failure_policy(config.on_transport_error)
    }

    /// Transport failure policy in effect
    #[inline]
    #[must_use]
    pub fn failure_policy(&self) -> HttpFailurePolicy {
        self.policy
    }

    /// With transport failure policy
    #[inline]
    #[must_use]
    pub fn with_failure_policy(mut self, policy: HttpFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Arbiter jobs are registered with
    #[inline]
    #[must_use]
    pub fn arbiter(&self) -> &CompletionArbiter {
        &self.arbiter
    }

    /// Submit `request` under a fresh job id with default options
    pub fn submit(&self, request: Value) -> PendingJob {
        self.submit_with(JobId::generate(), request, RaceOptions::default())
    }

    /// Submit `request` under `job_id`
    ///
    /// The race is registered before the request is sent, so a change-feed
    /// notification can never precede its registration.
    pub fn submit_with(&self, job_id: JobId, request: Value, options: RaceOptions) -> PendingJob {
        let completion = self.arbiter.register_awaitable(job_id.clone(), options);

        let arbiter = self.arbiter.clone();
        let transport = Arc::clone(&self.transport);
        let policy = self.policy;
        let id = job_id.clone();
        let task = self.arbiter.runtime().spawn(async move {
            match transport.submit(&id, request).await {
                Ok(payload) => {
                    arbiter.report_http_result(&id, payload);
                }
                Err(e) if e.is_transport_level() && policy == HttpFailurePolicy::DeferToChannel => {
                    tracing::debug!(job_id = %id, error = %e, "http failed; waiting on change feed");
                }
                Err(e) => {
                    tracing::debug!(job_id = %id, error = %e, "http failed");
                    arbiter.report_http_error(&id, e.to_payload());
                }
            }
        });

        PendingJob {
            job_id,
            completion,
            request: task.abort_handle(),
            arbiter: self.arbiter.clone(),
        }
    }
}

/// A submitted job awaiting its first report
#[derive(Debug)]
pub struct PendingJob {
    job_id: JobId,
    completion: Completion,
    request: AbortHandle,
    arbiter: CompletionArbiter,
}

impl PendingJob {
    /// Job identifier
    #[inline]
    #[must_use]
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Abort the request and cancel the race
    ///
    /// Returns `false` if the race had already ended.
    pub fn cancel(&self) -> bool {
        self.request.abort();
        self.arbiter.cancel(&self.job_id)
    }

    /// Wait for the winning report
    ///
    /// `None` if the job expired or was cancelled.
    pub async fn wait(self) -> Option<Resolution> {
        self.completion.await
    }
}
