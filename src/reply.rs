//! Single-resolution reply events.

use std::time::Duration;

use tokio::sync::watch;

/// What a pending request resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The worker answered; carries the normalized reply text.
    Replied(String),
    /// The worker connection dropped before a reply arrived.
    WorkerUnavailable,
}

#[derive(Debug, Clone)]
enum State {
    Pending,
    Resolved(Resolution),
}

impl State {
    fn is_resolved(&self) -> bool {
        matches!(self, State::Resolved(_))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("timed out waiting for a reply")]
pub struct WaitTimeout;

/// A correlated event that resolves exactly once.
///
/// Created unresolved, awaited by any number of waiters, resolved once with a
/// payload. Waiters arriving after resolution observe the payload immediately.
/// Built on `tokio::sync::watch` so there is no window between checking the
/// resolved state and suspending.
#[derive(Debug)]
pub struct ReplyEvent {
    tx: watch::Sender<State>,
}

impl ReplyEvent {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(State::Pending);
        Self { tx }
    }

    /// Resolve the event. Only the first resolution wins; later calls return
    /// `false` and leave the original payload untouched.
    pub fn resolve(&self, resolution: Resolution) -> bool {
        self.tx.send_if_modified(move |state| match state {
            State::Pending => {
                *state = State::Resolved(resolution);
                true
            }
            State::Resolved(_) => false,
        })
    }

    pub fn is_resolved(&self) -> bool {
        self.tx.borrow().is_resolved()
    }

    /// Suspend until the event resolves or `timeout` elapses.
    pub async fn wait(&self, timeout: Duration) -> Result<Resolution, WaitTimeout> {
        let mut rx = self.tx.subscribe();
        match tokio::time::timeout(timeout, rx.wait_for(State::is_resolved)).await {
            Ok(Ok(state)) => match &*state {
                State::Resolved(resolution) => Ok(resolution.clone()),
                // wait_for only returns on the resolved predicate.
                State::Pending => Err(WaitTimeout),
            },
            // The sender lives in `self`, so it cannot drop while we borrow it.
            Ok(Err(_)) => Err(WaitTimeout),
            Err(_) => Err(WaitTimeout),
        }
    }
}

impl Default for ReplyEvent {
    fn default() -> Self {
        Self::new()
    }
}

/// Collapse a worker reply payload into its canonical textual form.
///
/// Structured replies carrying `title` and `description` become a small
/// markdown block; plain strings pass through; anything else is rendered as
/// compact JSON.
pub fn normalize_reply(payload: &serde_json::Value) -> String {
    if let Some(obj) = payload.as_object()
        && let (Some(title), Some(description)) = (
            obj.get("title").and_then(serde_json::Value::as_str),
            obj.get("description").and_then(serde_json::Value::as_str),
        )
    {
        return format!("# {title}\n{description}");
    }
    if let Some(text) = payload.as_str() {
        return text.to_string();
    }
    payload.to_string()
}
