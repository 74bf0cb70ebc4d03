//! Wire protocol types for broker-worker communication.
//!
//! One message enum per direction. Framing is the codec's concern; these are
//! the logical shapes only.

use serde::{Deserialize, Serialize};

use crate::submission::CommandRun;

/// Messages from broker to worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OfferMessage {
    /// One queued submission, offered for the worker to claim.
    WorkOffer { key: String, submission: CommandRun },

    /// The drain snapshot is exhausted.
    EndOfBatch,
}

/// Messages from worker to broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// The worker claimed the offered submission and will reply for `key`
    /// eventually.
    Ack { key: String },

    /// Out-of-band reply for previously claimed work. The payload is opaque
    /// to the broker beyond normalization into reply text.
    Reply {
        key: String,
        payload: serde_json::Value,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn ping_submission() -> CommandRun {
        CommandRun {
            command: "ping".to_string(),
            kwargs: HashMap::new(),
            guild_id: 0,
            user_id: 1,
            channel_id: 0,
            origin: None,
        }
    }

    #[test]
    fn work_offer_serializes() {
        let msg = OfferMessage::WorkOffer {
            key: "1.2.3.4".to_string(),
            submission: ping_submission(),
        };
        insta::assert_json_snapshot!(msg, @r###"
        {
          "type": "work_offer",
          "key": "1.2.3.4",
          "submission": {
            "command": "ping",
            "kwargs": {},
            "guild_id": 0,
            "user_id": 1,
            "channel_id": 0
          }
        }
        "###);
    }

    #[test]
    fn end_of_batch_serializes() {
        insta::assert_json_snapshot!(OfferMessage::EndOfBatch, @r###"
        {
          "type": "end_of_batch"
        }
        "###);
    }

    #[test]
    fn ack_serializes() {
        let msg = WorkerMessage::Ack {
            key: "1.2.3.4".to_string(),
        };
        insta::assert_json_snapshot!(msg, @r###"
        {
          "type": "ack",
          "key": "1.2.3.4"
        }
        "###);
    }

    #[test]
    fn reply_serializes() {
        let msg = WorkerMessage::Reply {
            key: "1.2.3.4".to_string(),
            payload: json!("pong"),
        };
        insta::assert_json_snapshot!(msg, @r###"
        {
          "type": "reply",
          "key": "1.2.3.4",
          "payload": "pong"
        }
        "###);
    }

    #[test]
    fn work_offer_roundtrips_with_origin() {
        let mut submission = ping_submission();
        submission.origin = Some("1.2.3.4".to_string());
        let msg = OfferMessage::WorkOffer {
            key: "1.2.3.4".to_string(),
            submission,
        };

        let json = serde_json::to_string(&msg).unwrap();
        let parsed: OfferMessage = serde_json::from_str(&json).unwrap();

        match parsed {
            OfferMessage::WorkOffer { key, submission } => {
                assert_eq!(key, "1.2.3.4");
                assert_eq!(submission.origin.as_deref(), Some("1.2.3.4"));
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn structured_reply_roundtrips() {
        let msg = WorkerMessage::Reply {
            key: "1.2.3.4".to_string(),
            payload: json!({"title": "Done", "description": "ok"}),
        };

        let json = serde_json::to_string(&msg).unwrap();
        let parsed: WorkerMessage = serde_json::from_str(&json).unwrap();

        match parsed {
            WorkerMessage::Reply { payload, .. } => {
                assert_eq!(payload["title"], "Done");
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }
}
