//! Change-feed seam
//!
//! The arbiter opens one subscription per registered job through a
//! [`ChangeFeed`]. The feed owns transport concerns (reconnects, backoff,
//! filtering); the arbiter only ever sees a terminal record arrive through the
//! [`ChangeNotifier`] it handed over, or nothing at all.

use crate::arbiter::ArbiterInner;
use crate::error::FeedError;
use crate::types::{ChannelKind, JobId, JobRecord};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Source of per-job change notifications
#[cfg_attr(test, mockall::automock)]
pub trait ChangeFeed: Send + Sync {
    /// Open a subscription scoped to `job_id`
    ///
    /// Every record observed for the job should be passed to
    /// `notifier.notify`; the notifier discards everything after the first
    /// terminal record. Dropping or releasing the returned [`Subscription`]
    /// must stop delivery.
    ///
    /// # Errors
    /// `FeedError` if the subscription cannot be opened
    fn subscribe(&self, job_id: &JobId, notifier: ChangeNotifier)
        -> Result<Subscription, FeedError>;
}

/// Exclusively owned teardown of one change-feed subscription
///
/// The teardown runs at most once, either on [`Subscription::release`] or
/// on drop.
pub struct Subscription {
    teardown: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Wrap a teardown function
    pub fn new(teardown: impl FnOnce() + Send + 'static) -> Self {
        Self {
            teardown: Some(Box::new(teardown)),
        }
    }

    /// Subscription with nothing to tear down
    #[inline]
    #[must_use]
    pub fn noop() -> Self {
        Self { teardown: None }
    }

    /// Run the teardown if it has not run yet
    ///
    /// Returns `true` if this call ran it.
    pub fn release(&mut self) -> bool {
        match self.teardown.take() {
            Some(teardown) => {
                teardown();
                true
            }
            None => false,
        }
    }

    /// Whether the teardown is still pending
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.teardown.is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Sink a change feed forwards job records into
///
/// Bound to one registration: records for other jobs are ignored, and only
/// the first terminal record is forwarded to the arbiter.
#[derive(Clone)]
pub struct ChangeNotifier {
    job_id: JobId,
    generation: u64,
    arbiter: Weak<ArbiterInner>,
    forwarded: Arc<AtomicBool>,
}

impl ChangeNotifier {
    pub(crate) fn new(job_id: JobId, generation: u64, arbiter: Weak<ArbiterInner>) -> Self {
        Self {
            job_id,
            generation,
            arbiter,
            forwarded: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Job this notifier is bound to
    #[inline]
    #[must_use]
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Whether a terminal record was already forwarded or the arbiter is gone
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.forwarded.load(Ordering::Acquire) || self.arbiter.strong_count() == 0
    }

    /// Feed one record
    ///
    /// Returns `true` if the record resolved the race.
    pub fn notify(&self, record: &JobRecord) -> bool {
        if record.id != self.job_id {
            return false;
        }
        let Some(outcome) = record.outcome() else {
            tracing::trace!(job_id = %self.job_id, status = ?record.status, "non-terminal record");
            return false;
        };
        if self.forwarded.swap(true, Ordering::AcqRel) {
            tracing::trace!(job_id = %self.job_id, "terminal record already forwarded");
            return false;
        }
        match self.arbiter.upgrade() {
            Some(arbiter) => arbiter.resolve(
                &self.job_id,
                outcome,
                ChannelKind::Channel,
                Some(self.generation),
            ),
            None => false,
        }
    }
}

impl fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("job_id", &self.job_id)
            .field("generation", &self.generation)
            .field("closed", &self.is_closed())
            .finish()
    }
}
