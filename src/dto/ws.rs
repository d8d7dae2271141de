//! The WebSocket wire protocol: inbound requests and the ack envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::dto::interaction::{PollDraft, QnaDraft};

/// Messages accepted from interaction WebSocket clients.
///
/// Every frame is an object carrying an `event` discriminator next to its
/// payload fields.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientMessage {
    JoinRoom {
        room_id: String,
        participant_id: String,
    },
    CreatePoll {
        polls: Vec<PollDraft>,
    },
    GetPoll {
        poll_id: Uuid,
    },
    GetActivePoll,
    EmitPoll {
        poll_id: Uuid,
        /// Overrides the stored time limit when present.
        time_limit: Option<u64>,
    },
    Vote {
        poll_id: Uuid,
        /// Signed so that a negative index can be rejected explicitly
        /// instead of wrapping.
        option_id: i64,
    },
    BreakPoll {
        poll_id: Uuid,
    },
    CreateQna {
        qnas: Vec<QnaDraft>,
    },
    GetQna {
        qna_id: Uuid,
    },
    GetActiveQna,
    EmitQna {
        qna_id: Uuid,
        time_limit: Option<u64>,
    },
    Answer {
        qna_id: Uuid,
        text: String,
    },
    BreakQna {
        qna_id: Uuid,
    },
    ActionGesture {
        gesture: String,
    },
    GetActivityScoreRank {
        limit: Option<usize>,
    },
    #[serde(other)]
    Unknown,
}

/// Acknowledgement envelope echoed back for every request frame.
#[derive(Debug, Serialize)]
pub struct Ack {
    pub event: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl Ack {
    pub fn ok(event: &str, data: Value) -> Self {
        Self {
            event: event.into(),
            success: true,
            error: None,
            data,
        }
    }

    pub fn fail(event: &str, error: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            success: false,
            error: Some(error.into()),
            data: Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_vote_frame() {
        let raw = r#"{"event":"vote","poll_id":"2f1f9f1e-51a8-4e6f-9c6a-3d2e5b7a9c01","option_id":2}"#;
        match serde_json::from_str::<ClientMessage>(raw).unwrap() {
            ClientMessage::Vote { option_id, .. } => assert_eq!(option_id, 2),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn unrecognized_events_fall_through_to_unknown() {
        let raw = r#"{"event":"launch_confetti"}"#;
        assert!(matches!(
            serde_json::from_str::<ClientMessage>(raw).unwrap(),
            ClientMessage::Unknown
        ));
    }

    #[test]
    fn failure_ack_skips_the_data_field() {
        let ack = Ack::fail("vote", "nope");
        let frame = serde_json::to_string(&ack).unwrap();
        assert!(frame.contains(r#""success":false"#));
        assert!(!frame.contains("data"));
    }
}
