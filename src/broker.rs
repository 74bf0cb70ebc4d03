//! Broker: submission lifecycle orchestration.
//!
//! `submit` is the caller-facing entry point: validate, admit into the table,
//! suspend until resolution or timeout, and clean up the table entry on every
//! exit path. `resolve` is the reply-submission surface used when the worker
//! posts its answer back out-of-band.

use std::sync::Arc;
use std::time::Duration;

use crate::bridge::channel::{ChannelConfig, WorkerChannel};
use crate::reply::{ReplyEvent, Resolution, normalize_reply};
use crate::submission::{CommandRun, SubmissionError};
use crate::table::PendingRequests;

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub submit_timeout: Duration,
    pub channel: ChannelConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            submit_timeout: Duration::from_secs(8),
            channel: ChannelConfig::default(),
        }
    }
}

impl BrokerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = timeout;
        self
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.channel.ack_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.channel.poll_interval = interval;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    InvalidSubmission(#[from] SubmissionError),
    #[error("another change is already in progress for this caller")]
    Conflict,
    #[error("the worker did not reply within the submit timeout")]
    RequestTimeout,
    #[error("the worker connection is unavailable")]
    WorkerUnavailable,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no in-progress request for that key")]
    NotFound,
}

/// Orchestrates the full request lifecycle over a shared pending request
/// table.
pub struct Broker {
    table: Arc<PendingRequests>,
    config: BrokerConfig,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        if config.channel.ack_timeout >= config.submit_timeout {
            tracing::warn!(
                ack_timeout = ?config.channel.ack_timeout,
                submit_timeout = ?config.submit_timeout,
                "ack timeout should be strictly smaller than the submit timeout"
            );
        }
        if config.channel.poll_interval * 4 > config.channel.ack_timeout {
            tracing::warn!(
                poll_interval = ?config.channel.poll_interval,
                ack_timeout = ?config.channel.ack_timeout,
                "poll interval should stay well under the ack timeout"
            );
        }
        Self {
            table: Arc::new(PendingRequests::new()),
            config,
        }
    }

    pub fn table(&self) -> &Arc<PendingRequests> {
        &self.table
    }

    /// Build a worker channel wired to this broker's table.
    ///
    /// Exactly one channel instance should drive a connection at a time; a
    /// fresh instance is built per (re)connection.
    pub fn channel(&self) -> WorkerChannel {
        WorkerChannel::new(Arc::clone(&self.table), self.config.channel.clone())
    }

    /// Submit work for `key` and suspend until the worker replies, the
    /// submit timeout elapses, or the connection drops.
    ///
    /// The table entry is removed on every exit path, including cancellation
    /// of the returned future.
    pub async fn submit(
        &self,
        key: &str,
        submission: serde_json::Value,
    ) -> Result<String, SubmitError> {
        let mut run = CommandRun::from_value(submission)?;
        run.origin = Some(key.to_string());

        let event = Arc::new(ReplyEvent::new());
        self.table
            .enqueue(key, run, Arc::clone(&event))
            .map_err(|_| SubmitError::Conflict)?;
        tracing::debug!(%key, "submission enqueued");

        // Guarantees cleanup on timeout and on cancellation. The removal is
        // identity-aware: once this request resolves (and the reply path has
        // removed the entry), a successor submission may reuse the key, and
        // the guard must not delete that entry out from under it.
        let _cleanup = TableCleanup {
            table: &self.table,
            key,
            event: &event,
        };

        match event.wait(self.config.submit_timeout).await {
            Ok(Resolution::Replied(text)) => Ok(text),
            Ok(Resolution::WorkerUnavailable) => Err(SubmitError::WorkerUnavailable),
            Err(_) => {
                tracing::debug!(%key, timeout = ?self.config.submit_timeout, "submit timed out");
                Err(SubmitError::RequestTimeout)
            }
        }
    }

    /// Resolve an in-progress request with the worker's reply payload.
    ///
    /// `NotFound` marks a stale or duplicate reply; it is non-fatal and the
    /// caller is expected to log and move on.
    pub fn resolve(&self, key: &str, payload: &serde_json::Value) -> Result<(), ResolveError> {
        let text = normalize_reply(payload);
        self.table
            .resolve_and_remove(key, Resolution::Replied(text))
            .map_err(|_| ResolveError::NotFound)
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

struct TableCleanup<'a> {
    table: &'a PendingRequests,
    key: &'a str,
    event: &'a Arc<ReplyEvent>,
}

impl Drop for TableCleanup<'_> {
    fn drop(&mut self) {
        self.table.remove_entry(self.key, self.event);
    }
}
