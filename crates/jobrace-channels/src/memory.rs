//! In-process change feed
//!
//! Records published here fan out to every subscription for the record's
//! job. Useful for single-process deployments, simulations and tests.

use dashmap::DashMap;
use jobrace_core::{ChangeFeed, ChangeNotifier, FeedError, JobId, JobRecord, Subscription};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

#[derive(Debug, Default)]
struct FeedInner {
    subscribers: DashMap<JobId, Vec<(u64, ChangeNotifier)>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl FeedInner {
    fn unsubscribe(&self, job_id: &JobId, subscription_id: u64) {
        let now_empty = match self.subscribers.get_mut(job_id) {
            Some(mut subs) => {
                subs.retain(|(id, _)| *id != subscription_id);
                subs.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.subscribers.remove_if(job_id, |_, subs| subs.is_empty());
        }
    }
}

/// Process-local change feed keyed by job id
#[derive(Debug, Clone, Default)]
pub struct InMemoryChangeFeed {
    inner: Arc<FeedInner>,
}

impl InMemoryChangeFeed {
    /// Create an empty feed
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `record` to every subscriber of its job
    ///
    /// Returns the number of subscribers the record was handed to.
    pub fn publish(&self, record: &JobRecord) -> usize {
        // Notify outside the shard lock: a notifier may tear down its own
        // subscription before returning.
        let notifiers: Vec<ChangeNotifier> = match self.inner.subscribers.get(&record.id) {
            Some(subs) => subs.iter().map(|(_, n)| n.clone()).collect(),
            None => Vec::new(),
        };
        for notifier in &notifiers {
            notifier.notify(record);
        }
        tracing::trace!(job_id = %record.id, status = ?record.status, delivered = notifiers.len(), "published");
        notifiers.len()
    }

    /// Number of live subscriptions for `job_id`
    #[must_use]
    pub fn subscriber_count(&self, job_id: &JobId) -> usize {
        self.inner
            .subscribers
            .get(job_id)
            .map_or(0, |subs| subs.len())
    }

    /// Number of jobs with at least one live subscription
    #[must_use]
    pub fn job_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Refuse new subscriptions and drop existing ones
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.subscribers.clear();
    }
}

impl ChangeFeed for InMemoryChangeFeed {
    fn subscribe(&self, job_id: &JobId, notifier: ChangeNotifier) -> Result<Subscription, FeedError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(FeedError::Closed);
        }
        let subscription_id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .entry(job_id.clone())
            .or_default()
            .push((subscription_id, notifier));

        let feed: Weak<FeedInner> = Arc::downgrade(&self.inner);
        let job_id = job_id.clone();
        Ok(Subscription::new(move || {
            if let Some(feed) = feed.upgrade() {
                feed.unsubscribe(&job_id, subscription_id);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobrace_core::{ArbiterConfig, ChannelKind, CompletionArbiter, JobOutcome, RaceOptions};
    use serde_json::json;

    fn setup() -> (InMemoryChangeFeed, CompletionArbiter) {
        let feed = InMemoryChangeFeed::new();
        let arbiter = CompletionArbiter::new(Arc::new(feed.clone()), ArbiterConfig::default()).unwrap();
        (feed, arbiter)
    }

    #[tokio::test]
    async fn publish_resolves_and_unsubscribes() {
        let (feed, arbiter) = setup();
        let id = JobId::from("M1");
        let completion = arbiter.register_awaitable(id.clone(), RaceOptions::default());
        assert_eq!(feed.subscriber_count(&id), 1);

        assert_eq!(feed.publish(&JobRecord::completed("M1", json!({ "setup": "breakout" }))), 1);

        let resolution = completion.await.unwrap();
        assert_eq!(resolution.channel, ChannelKind::Channel);
        assert_eq!(resolution.outcome, JobOutcome::Completed(json!({ "setup": "breakout" })));
        assert_eq!(feed.subscriber_count(&id), 0);
        assert_eq!(feed.job_count(), 0);
    }

    #[tokio::test]
    async fn records_for_other_jobs_are_not_delivered() {
        let (feed, arbiter) = setup();
        let id = JobId::from("M2");
        let _completion = arbiter.register_awaitable(id.clone(), RaceOptions::default());

        assert_eq!(feed.publish(&JobRecord::completed("other", json!(1))), 0);
        assert!(arbiter.is_pending(&id));
    }

    #[tokio::test]
    async fn http_win_removes_subscription() {
        let (feed, arbiter) = setup();
        let id = JobId::from("M3");
        let _completion = arbiter.register_awaitable(id.clone(), RaceOptions::default());

        arbiter.report_http_result(&id, json!("done"));
        assert_eq!(feed.subscriber_count(&id), 0);
        assert_eq!(feed.publish(&JobRecord::completed("M3", json!("late"))), 0);
    }

    #[tokio::test]
    async fn closed_feed_refuses_subscriptions() {
        let (feed, arbiter) = setup();
        feed.close();

        let id = JobId::from("M4");
        let completion = arbiter.register_awaitable(id.clone(), RaceOptions::default());
        assert!(arbiter.is_pending(&id));
        assert_eq!(feed.subscriber_count(&id), 0);

        arbiter.report_http_result(&id, json!("http only"));
        assert_eq!(completion.await.unwrap().channel, ChannelKind::Http);
    }
}
