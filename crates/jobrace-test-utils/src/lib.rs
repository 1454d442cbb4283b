//! Testing utilities for Jobrace workspace
//!
//! Shared test doubles: a change feed that counts subscriptions and
//! teardowns, and a recorder for resolution callbacks.

#![allow(missing_docs)]

use jobrace_core::{
    ArbiterConfig, ChangeFeed, ChangeNotifier, ChannelKind, CompletionArbiter, FeedError, JobId,
    JobOutcome, JobRecord, Resolution, Subscription,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
struct FeedState {
    notifiers: HashMap<JobId, ChangeNotifier>,
    subscribed: HashMap<JobId, usize>,
    torn_down: HashMap<JobId, usize>,
    fail_next: Option<FeedError>,
}

/// Change feed that hands records straight to the last notifier of a job
/// and counts teardowns per job
#[derive(Debug, Clone, Default)]
pub struct CountingFeed {
    state: Arc<Mutex<FeedState>>,
}

impl CountingFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `subscribe` call fail with `error`
    pub fn fail_next_subscribe(&self, error: FeedError) {
        self.state.lock().fail_next = Some(error);
    }

    /// Deliver `record` to its job's notifier; `true` if it won the race
    pub fn push(&self, record: &JobRecord) -> bool {
        let notifier = self.state.lock().notifiers.get(&record.id).cloned();
        notifier.is_some_and(|n| n.notify(record))
    }

    pub fn subscriptions(&self, job_id: &JobId) -> usize {
        self.state.lock().subscribed.get(job_id).copied().unwrap_or(0)
    }

    pub fn teardowns(&self, job_id: &JobId) -> usize {
        self.state.lock().torn_down.get(job_id).copied().unwrap_or(0)
    }

    pub fn total_teardowns(&self) -> usize {
        self.state.lock().torn_down.values().sum()
    }

    /// Subscriptions opened but not yet torn down
    pub fn live(&self) -> usize {
        let state = self.state.lock();
        let opened: usize = state.subscribed.values().sum();
        let closed: usize = state.torn_down.values().sum();
        opened - closed
    }
}

impl ChangeFeed for CountingFeed {
    fn subscribe(&self, job_id: &JobId, notifier: ChangeNotifier) -> Result<Subscription, FeedError> {
        let mut state = self.state.lock();
        if let Some(error) = state.fail_next.take() {
            return Err(error);
        }
        state.notifiers.insert(job_id.clone(), notifier);
        *state.subscribed.entry(job_id.clone()).or_default() += 1;

        let shared = Arc::clone(&self.state);
        let job_id = job_id.clone();
        Ok(Subscription::new(move || {
            *shared.lock().torn_down.entry(job_id).or_default() += 1;
        }))
    }
}

/// Collects every resolution callback invocation
#[derive(Debug, Clone, Default)]
pub struct ResolutionRecorder {
    calls: Arc<Mutex<Vec<Resolution>>>,
}

impl ResolutionRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Callback to pass to `CompletionArbiter::register`
    pub fn callback(&self, job_id: &JobId) -> impl FnOnce(JobOutcome, ChannelKind) + Send + 'static {
        let calls = Arc::clone(&self.calls);
        let job_id = job_id.clone();
        move |outcome, channel| {
            calls.lock().push(Resolution {
                job_id,
                outcome,
                channel,
            });
        }
    }

    pub fn calls(&self) -> Vec<Resolution> {
        self.calls.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn count_for(&self, job_id: &JobId) -> usize {
        self.calls.lock().iter().filter(|r| &r.job_id == job_id).count()
    }
}

/// Arbiter over a fresh counting feed, using `deadline_ms` as default deadline
///
/// Must be called inside a Tokio runtime.
pub fn setup_arbiter(deadline_ms: u64) -> (CountingFeed, CompletionArbiter) {
    let feed = CountingFeed::new();
    let config = ArbiterConfig {
        default_deadline_ms: deadline_ms,
    };
    let arbiter = CompletionArbiter::new(Arc::new(feed.clone()), config)
        .expect("setup_arbiter requires a tokio runtime");
    (feed, arbiter)
}
