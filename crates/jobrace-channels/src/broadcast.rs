//! Change feed over a broadcast stream of every job record change
//!
//! Mirrors a realtime table subscription: one upstream stream carries all
//! row changes, and each job subscription is a task filtering that stream
//! for its own id. Releasing the subscription aborts the task.

use jobrace_core::{ChangeFeed, ChangeNotifier, FeedError, JobId, JobRecord, Subscription};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Default capacity of the upstream broadcast channel
pub const DEFAULT_CAPACITY: usize = 1024;

/// Per-job subscriptions over a shared record stream
#[derive(Debug, Clone)]
pub struct BroadcastChangeFeed {
    sender: broadcast::Sender<JobRecord>,
    runtime: Handle,
}

impl BroadcastChangeFeed {
    /// Create a feed with a fresh upstream channel
    ///
    /// # Errors
    /// `FeedError::NoRuntime` when called outside a Tokio runtime
    pub fn new(capacity: usize) -> Result<Self, FeedError> {
        let (sender, _) = broadcast::channel(capacity);
        Self::from_sender(sender)
    }

    /// Create a feed over an existing upstream channel
    ///
    /// # Errors
    /// `FeedError::NoRuntime` when called outside a Tokio runtime
    pub fn from_sender(sender: broadcast::Sender<JobRecord>) -> Result<Self, FeedError> {
        let runtime = Handle::try_current().map_err(|_| FeedError::NoRuntime)?;
        Ok(Self { sender, runtime })
    }

    /// Create a feed whose subscription tasks run on `runtime`
    #[must_use]
    pub fn with_runtime(sender: broadcast::Sender<JobRecord>, runtime: Handle) -> Self {
        Self { sender, runtime }
    }

    /// Upstream sender, for the component that observes record changes
    #[must_use]
    pub fn sender(&self) -> broadcast::Sender<JobRecord> {
        self.sender.clone()
    }

    /// Push a record change upstream
    ///
    /// Returns the number of live subscriptions that will see it.
    pub fn publish(&self, record: JobRecord) -> usize {
        self.sender.send(record).unwrap_or(0)
    }

    /// Number of live subscription tasks
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl ChangeFeed for BroadcastChangeFeed {
    fn subscribe(&self, job_id: &JobId, notifier: ChangeNotifier) -> Result<Subscription, FeedError> {
        // Subscribe before spawning so no record sent after this call is missed.
        let mut rx = self.sender.subscribe();
        let job_id = job_id.clone();

        let task = self.runtime.spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(record) if record.id == job_id => {
                        notifier.notify(&record);
                        if record.status.is_terminal() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(job_id = %job_id, skipped, "change stream lagged");
                    }
                    Err(RecvError::Closed) => {
                        tracing::debug!(job_id = %job_id, "change stream closed");
                        break;
                    }
                }
            }
        });

        let abort = task.abort_handle();
        Ok(Subscription::new(move || abort.abort()))
    }
}
