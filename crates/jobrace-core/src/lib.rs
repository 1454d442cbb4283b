//! Jobrace Core - single-winner job completion arbitration
//!
//! A caller submits a long-running job, then races two notification channels:
//! - the HTTP response of the submitting request
//! - a change-feed push for the job's backing record
//!
//! The [`CompletionArbiter`] delivers whichever arrives first exactly once,
//! swallows the late one, and releases the job's subscription and deadline
//! timer on every terminal path.
//!
//! # Example
//!
//! ```rust,ignore
//! use jobrace_core::prelude::*;
//!
//! let arbiter = CompletionArbiter::new(feed, ArbiterConfig::default())?;
//! let job_id = JobId::generate();
//! let completion = arbiter.register_awaitable(job_id.clone(), RaceOptions::default());
//!
//! // ...submit the HTTP request; its handler calls:
//! arbiter.report_http_result(&job_id, response);
//!
//! if let Some(resolution) = completion.await {
//!     println!("{} won", resolution.channel);
//! }
//! ```

#![warn(unreachable_pub)]

pub mod arbiter;
pub mod config;
pub mod error;
pub mod feed;
pub mod state;
pub mod types;

pub use arbiter::{Completion, CompletionArbiter, OnResolved};
pub use config::{ArbiterConfig, HttpChannelConfig, HttpFailurePolicy, JobraceConfig};
pub use error::{ArbiterError, ConfigError, FeedError};
pub use feed::{ChangeFeed, ChangeNotifier, Subscription};
pub use state::{allowed_transitions, validate_transition, IllegalTransition, RaceState};
pub use types::{
    ChannelKind, JobHandle, JobId, JobOutcome, JobRecord, JobStatus, RaceOptions, RaceStats,
    Resolution,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Jobrace Core
    pub use crate::{
        ArbiterConfig, ChangeFeed, ChangeNotifier, ChannelKind, Completion, CompletionArbiter,
        JobId, JobOutcome, JobRecord, JobStatus, RaceOptions, Resolution, Subscription,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
