//! Submission validation at the caller boundary.
//!
//! Submissions are validated into [`CommandRun`] before they ever reach the
//! pending request table, so a malformed payload fails fast and leaves no
//! trace in the broker.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A validated work submission.
///
/// `origin` is stamped by the broker with the caller key before the
/// submission is shipped to the worker; it is never accepted from the caller
/// as a required field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRun {
    pub command: String,
    pub kwargs: HashMap<String, String>,
    pub guild_id: u64,
    pub user_id: u64,
    pub channel_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid submission: {0}")]
pub struct SubmissionError(String);

impl CommandRun {
    /// Validate a raw caller payload into a `CommandRun`.
    ///
    /// A missing or ill-typed required field is a [`SubmissionError`] carrying
    /// the serde message. Unknown extra fields are ignored; presence of the
    /// required fields is the only contract.
    pub fn from_value(value: serde_json::Value) -> Result<Self, SubmissionError> {
        serde_json::from_value(value).map_err(|e| SubmissionError(e.to_string()))
    }
}
