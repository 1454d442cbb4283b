//! Jobrace Channels - adapters that feed the completion arbiter
//!
//! - [`InMemoryChangeFeed`]: process-local change feed
//! - [`BroadcastChangeFeed`]: per-job filters over a shared record stream
//! - [`HttpJobClient`]: `reqwest` transport for the HTTP channel
//! - [`JobSubmitter`]: registers a race and fires the request in one call

#![warn(unreachable_pub)]

pub mod broadcast;
pub mod http;
pub mod memory;
pub mod submitter;
pub mod transport;

pub use broadcast::BroadcastChangeFeed;
pub use http::HttpJobClient;
pub use memory::InMemoryChangeFeed;
pub use submitter::{JobSubmitter, PendingJob};
pub use transport::{JobTransport, TransportError};
