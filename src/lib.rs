//! botlink: correlated request/response broker over a persistent worker connection.
//!
//! A caller submits a unit of work tagged by a caller-derived key. The work is
//! queued, offered to a single remote worker over a framed duplex connection,
//! and the caller's task suspends until the worker replies, a per-request
//! timeout elapses, or the connection drops. The HTTP layer that feeds
//! [`Broker::submit`] and [`Broker::resolve`] is a collaborator, not part of
//! this crate.

pub mod bridge;
mod broker;
mod reply;
mod submission;
mod table;

pub use bridge::channel::{ChannelConfig, ChannelState, WorkerChannel};
pub use broker::{Broker, BrokerConfig, ResolveError, SubmitError};
pub use reply::{ReplyEvent, Resolution, WaitTimeout, normalize_reply};
pub use submission::{CommandRun, SubmissionError};
pub use table::{PendingRequests, TableError};
