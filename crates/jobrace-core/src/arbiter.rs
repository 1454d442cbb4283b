//! Completion race arbiter
//!
//! Delivers a submitted job's result to its caller exactly once, taken from
//! whichever of two channels reports first:
//! - the HTTP response of the submitting request
//! - a change-feed notification for the backing job record
//!
//! Each registration owns a change-feed subscription and a deadline timer.
//! Both are released on every terminal path (resolution, expiry, cancel,
//! replacement, shutdown). Removing the entry from the registry under its
//! lock is the single check-and-set that decides the race; every later
//! report finds no entry and is dropped silently.

use crate::config::ArbiterConfig;
use crate::error::ArbiterError;
use crate::feed::{ChangeFeed, ChangeNotifier, Subscription};
use crate::state::{validate_transition, RaceState};
use crate::types::{ChannelKind, JobHandle, JobId, JobOutcome, RaceOptions, RaceStats, Resolution};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;

/// Stand-in deadline when `now + ttl` overflows (about 30 years)
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Continuation invoked with the winning payload and its channel
pub type OnResolved = Box<dyn FnOnce(JobOutcome, ChannelKind) + Send + 'static>;

/// Per-job arbitration record
struct JobRaceEntry {
    generation: u64,
    on_resolved: OnResolved,
    subscription: Subscription,
    timer: Option<AbortHandle>,
    deadline: Instant,
}

impl JobRaceEntry {
    /// Release owned resources; the entry must already be out of the registry
    fn finish(mut self, to: RaceState) -> OnResolved {
        debug_assert!(validate_transition(RaceState::Registered, to).is_ok());
        self.subscription.release();
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.on_resolved
    }
}

#[derive(Debug, Default)]
struct Counters {
    registered: AtomicU64,
    resolved_http: AtomicU64,
    resolved_channel: AtomicU64,
    expired: AtomicU64,
    cancelled: AtomicU64,
    replaced: AtomicU64,
    late_arrivals: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

pub(crate) struct ArbiterInner {
    feed: Arc<dyn ChangeFeed>,
    config: ArbiterConfig,
    runtime: Handle,
    registry: Mutex<HashMap<JobId, JobRaceEntry>>,
    next_generation: AtomicU64,
    closed: AtomicBool,
    counters: Counters,
}

impl ArbiterInner {
    /// Decide the race for `job_id`
    ///
    /// With `generation` set, only the registration it names can be resolved.
    pub(crate) fn resolve(
        &self,
        job_id: &JobId,
        outcome: JobOutcome,
        channel: ChannelKind,
        generation: Option<u64>,
    ) -> bool {
        let entry = {
            let mut registry = self.registry.lock();
            match generation {
                Some(g) if registry.get(job_id).map(|e| e.generation) != Some(g) => None,
                _ => registry.remove(job_id),
            }
        };

        let Some(entry) = entry else {
            Counters::bump(&self.counters.late_arrivals, 1);
            metrics::counter!("jobrace_late_arrivals_total", "channel" => channel.as_str())
                .increment(1);
            tracing::trace!(job_id = %job_id, %channel, "late arrival ignored");
            return false;
        };

        let on_resolved = entry.finish(RaceState::Resolved);
        match channel {
            ChannelKind::Http => Counters::bump(&self.counters.resolved_http, 1),
            ChannelKind::Channel => Counters::bump(&self.counters.resolved_channel, 1),
        }
        metrics::counter!("jobrace_resolved_total", "channel" => channel.as_str()).increment(1);
        tracing::debug!(job_id = %job_id, %channel, error = outcome.is_error(), "race resolved");

        on_resolved(outcome, channel);
        true
    }

    fn expire(&self, job_id: &JobId, generation: u64) {
        let entry = {
            let mut registry = self.registry.lock();
            if registry.get(job_id).map(|e| e.generation) == Some(generation) {
                registry.remove(job_id)
            } else {
                None
            }
        };

        if let Some(entry) = entry {
            Counters::bump(&self.counters.expired, 1);
            drop(entry.finish(RaceState::Expired));
            metrics::counter!("jobrace_expired_total").increment(1);
            tracing::debug!(job_id = %job_id, "race expired without a report");
        }
    }

    fn spawn_deadline(self: &Arc<Self>, job_id: JobId, generation: u64, deadline: Instant) -> AbortHandle {
        let arbiter = Arc::downgrade(self);
        self.runtime
            .spawn(async move {
                tokio::time::sleep_until(deadline).await;
                if let Some(arbiter) = arbiter.upgrade() {
                    arbiter.expire(&job_id, generation);
                }
            })
            .abort_handle()
    }

    /// Apply `f` to the entry if it is still the registration `generation`
    fn with_entry<F>(&self, job_id: &JobId, generation: u64, f: F) -> bool
    where
        F: FnOnce(&mut JobRaceEntry),
    {
        let mut registry = self.registry.lock();
        match registry.get_mut(job_id) {
            Some(entry) if entry.generation == generation => {
                f(entry);
                true
            }
            _ => false,
        }
    }
}

impl Drop for ArbiterInner {
    fn drop(&mut self) {
        for (_, entry) in self.registry.get_mut().drain() {
            drop(entry.finish(RaceState::Cancelled));
        }
    }
}

/// First-response-wins arbiter between the HTTP and change-feed channels
///
/// Cheap to clone; clones share one registry. Constructed and owned by the
/// caller, released with [`CompletionArbiter::shutdown`] or by dropping the
/// last clone.
#[derive(Clone)]
pub struct CompletionArbiter {
    inner: Arc<ArbiterInner>,
}

impl CompletionArbiter {
    /// Create an arbiter bound to the current Tokio runtime
    ///
    /// # Errors
    /// `ArbiterError::NoRuntime` when called outside a runtime
    pub fn new(feed: Arc<dyn ChangeFeed>, config: ArbiterConfig) -> Result<Self, ArbiterError> {
        let runtime = Handle::try_current().map_err(|_| ArbiterError::NoRuntime)?;
        Ok(Self::with_runtime(feed, config, runtime))
    }

    /// Create an arbiter whose deadline timers run on `runtime`
    #[must_use]
    pub fn with_runtime(feed: Arc<dyn ChangeFeed>, config: ArbiterConfig, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(ArbiterInner {
                feed,
                config,
                runtime,
                registry: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                counters: Counters::default(),
            }),
        }
    }

    /// Arbiter configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ArbiterConfig {
        &self.inner.config
    }

    /// Runtime deadline timers are spawned on
    #[inline]
    #[must_use]
    pub fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }

    /// Register a job with the default deadline
    pub fn register<F>(&self, job_id: JobId, on_resolved: F) -> JobHandle
    where
        F: FnOnce(JobOutcome, ChannelKind) + Send + 'static,
    {
        self.register_with(job_id, RaceOptions::default(), on_resolved)
    }

    /// Register a job
    ///
    /// Opens a change-feed subscription scoped to `job_id` and starts the
    /// deadline timer. A prior registration of the same id is released first
    /// and never resolves. If the feed cannot subscribe, the job races on the
    /// HTTP channel and its deadline alone.
    pub fn register_with<F>(&self, job_id: JobId, options: RaceOptions, on_resolved: F) -> JobHandle
    where
        F: FnOnce(JobOutcome, ChannelKind) + Send + 'static,
    {
        let inner = &self.inner;
        let ttl = options
            .deadline
            .unwrap_or_else(|| inner.config.default_deadline());
        let now = Instant::now();
        let deadline = now
            .checked_add(ttl)
            .unwrap_or_else(|| now + FAR_FUTURE);
        let handle = JobHandle {
            job_id: job_id.clone(),
            deadline,
        };

        let generation = inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let entry = JobRaceEntry {
            generation,
            on_resolved: Box::new(on_resolved),
            subscription: Subscription::noop(),
            timer: None,
            deadline,
        };

        // `closed` is checked under the registry lock so an insert can never
        // land after `shutdown` has drained the registry.
        let replaced = {
            let mut registry = inner.registry.lock();
            if inner.closed.load(Ordering::Acquire) {
                Err(entry)
            } else {
                Ok(registry.insert(job_id.clone(), entry))
            }
        };
        let replaced = match replaced {
            Ok(replaced) => replaced,
            Err(refused) => {
                drop(refused);
                tracing::warn!(job_id = %job_id, "arbiter is shut down; registration dropped");
                return handle;
            }
        };
        if let Some(stale) = replaced {
            drop(stale.finish(RaceState::Cancelled));
            Counters::bump(&inner.counters.replaced, 1);
            tracing::debug!(job_id = %job_id, "replaced pending registration");
        }
        Counters::bump(&inner.counters.registered, 1);
        metrics::counter!("jobrace_registered_total").increment(1);

        let timer = inner.spawn_deadline(job_id.clone(), generation, deadline);
        let mut timer = Some(timer);
        if !inner.with_entry(&job_id, generation, |entry| entry.timer = timer.take()) {
            if let Some(timer) = timer {
                timer.abort();
            }
        }

        let notifier = ChangeNotifier::new(job_id.clone(), generation, Arc::downgrade(inner));
        match inner.feed.subscribe(&job_id, notifier) {
            Ok(subscription) => {
                let mut subscription = Some(subscription);
                if !inner.with_entry(&job_id, generation, |entry| {
                    if let Some(sub) = subscription.take() {
                        entry.subscription = sub;
                    }
                }) {
                    // Resolved while subscribing; nothing will own it.
                    if let Some(mut orphan) = subscription {
                        orphan.release();
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %job_id,
                    error = %e,
                    "change feed unavailable; racing on http and deadline only"
                );
            }
        }

        tracing::debug!(
            job_id = %job_id,
            ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
            "registered"
        );
        handle
    }

    /// Register a job and await its resolution
    ///
    /// The returned [`Completion`] yields `None` if the entry expires, is
    /// cancelled or replaced, or the arbiter shuts down.
    pub fn register_awaitable(&self, job_id: JobId, options: RaceOptions) -> Completion {
        let (tx, rx) = oneshot::channel();
        let id = job_id.clone();
        self.register_with(job_id, options, move |outcome, channel| {
            let _ = tx.send(Resolution {
                job_id: id,
                outcome,
                channel,
            });
        });
        Completion { rx }
    }

    /// Report the HTTP response for `job_id`
    ///
    /// Returns `true` if this report won the race.
    pub fn report_http_result(&self, job_id: &JobId, payload: Value) -> bool {
        self.inner
            .resolve(job_id, JobOutcome::Completed(payload), ChannelKind::Http, None)
    }

    /// Report a failed HTTP call for `job_id` with an error-shaped payload
    pub fn report_http_error(&self, job_id: &JobId, payload: Value) -> bool {
        self.inner
            .resolve(job_id, JobOutcome::Failed(payload), ChannelKind::Http, None)
    }

    /// Report a change-feed result for `job_id`
    pub fn report_channel_result(&self, job_id: &JobId, payload: Value, is_error: bool) -> bool {
        self.inner.resolve(
            job_id,
            JobOutcome::from_parts(payload, is_error),
            ChannelKind::Channel,
            None,
        )
    }

    /// Cancel a pending job without invoking its continuation
    ///
    /// Returns `false` if nothing was pending.
    pub fn cancel(&self, job_id: &JobId) -> bool {
        let Some(entry) = self.inner.registry.lock().remove(job_id) else {
            tracing::trace!(job_id = %job_id, "cancel: nothing pending");
            return false;
        };
        Counters::bump(&self.inner.counters.cancelled, 1);
        drop(entry.finish(RaceState::Cancelled));
        metrics::counter!("jobrace_cancelled_total").increment(1);
        tracing::debug!(job_id = %job_id, "race cancelled");
        true
    }

    /// Release every pending entry and refuse further registrations
    pub fn shutdown(&self) {
        let drained: Vec<(JobId, JobRaceEntry)> = {
            let mut registry = self.inner.registry.lock();
            self.inner.closed.store(true, Ordering::Release);
            registry.drain().collect()
        };
        let released = drained.len() as u64;
        for (_, entry) in drained {
            drop(entry.finish(RaceState::Cancelled));
        }
        Counters::bump(&self.inner.counters.cancelled, released);
        metrics::counter!("jobrace_cancelled_total").increment(released);
        tracing::info!(released, "completion arbiter shut down");
    }

    /// Whether `shutdown` has been called
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Whether `job_id` is awaiting resolution
    #[must_use]
    pub fn is_pending(&self, job_id: &JobId) -> bool {
        self.inner.registry.lock().contains_key(job_id)
    }

    /// Deadline of a pending job
    #[must_use]
    pub fn deadline_of(&self, job_id: &JobId) -> Option<Instant> {
        self.inner.registry.lock().get(job_id).map(|e| e.deadline)
    }

    /// Number of entries awaiting resolution
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.registry.lock().len()
    }

    /// Snapshot of arbiter counters
    #[must_use]
    pub fn stats(&self) -> RaceStats {
        let c = &self.inner.counters;
        RaceStats {
            registered: c.registered.load(Ordering::Relaxed),
            resolved_http: c.resolved_http.load(Ordering::Relaxed),
            resolved_channel: c.resolved_channel.load(Ordering::Relaxed),
            expired: c.expired.load(Ordering::Relaxed),
            cancelled: c.cancelled.load(Ordering::Relaxed),
            replaced: c.replaced.load(Ordering::Relaxed),
            late_arrivals: c.late_arrivals.load(Ordering::Relaxed),
            pending: self.pending_count() as u64,
        }
    }
}

impl fmt::Debug for CompletionArbiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionArbiter")
            .field("config", &self.inner.config)
            .field("pending", &self.pending_count())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

/// Future form of a registration
///
/// Resolves to the winning [`Resolution`], or `None` if the entry ended
/// without one.
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<Resolution>,
}

impl Future for Completion {
    type Output = Option<Resolution>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(Result::ok)
    }
}
