use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Lifecycle status shared by polls and Q&A sessions.
///
/// Only ever advances `Pending` → `Active` → `Ended`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created but not yet opened for submissions.
    Pending,
    /// Currently accepting submissions.
    Active,
    /// Closed; final snapshot written into the entity.
    Ended,
}

/// One selectable option of a poll.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollOptionEntity {
    /// Sequential identifier starting at 0; `options[i].id == i` always holds.
    pub id: u32,
    /// Display text for the option.
    pub value: String,
    /// Vote count; live tally is kept in the counts hash, this field is the
    /// snapshot written at close.
    pub count: u64,
    /// Participants who voted for this option; populated at close.
    pub voters: Vec<String>,
}

/// Poll aggregate persisted as one JSON value under `poll:{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollEntity {
    /// Globally unique, externally visible identifier.
    pub id: Uuid,
    /// Room the poll belongs to.
    pub room_id: String,
    /// Question shown to participants.
    pub title: String,
    /// Submission window in seconds; 0 means unlimited.
    pub time_limit: u64,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Set only on start (unix milliseconds).
    pub started_at: Option<i64>,
    /// Set only on start: `started_at + time_limit`.
    pub ended_at: Option<i64>,
    /// Last mutation timestamp (unix milliseconds).
    pub updated_at: i64,
    /// Ordered options; ids are the positions.
    pub options: Vec<PollOptionEntity>,
}

/// One submitted Q&A answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnswerEntity {
    /// Participant who answered.
    pub participant_id: String,
    /// Display name captured at submission time.
    pub participant_name: String,
    /// Answer text.
    pub text: String,
}

/// Q&A aggregate persisted as one JSON value under `qna:{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QnaEntity {
    /// Globally unique, externally visible identifier.
    pub id: Uuid,
    /// Room the session belongs to.
    pub room_id: String,
    /// Question shown to participants.
    pub title: String,
    /// Submission window in seconds; 0 means unlimited.
    pub time_limit: u64,
    /// Whether the audience sees respondent identity and text on close.
    pub is_public: bool,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Set only on start (unix milliseconds).
    pub started_at: Option<i64>,
    /// Set only on start: `started_at + time_limit`.
    pub ended_at: Option<i64>,
    /// Last mutation timestamp (unix milliseconds).
    pub updated_at: i64,
    /// Submitted answers; populated only at or after close.
    pub answers: Vec<AnswerEntity>,
}

/// Timestamps applied when a session moves to `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartWindow {
    /// Moment the session opened (unix milliseconds).
    pub started_at: i64,
    /// Scheduled end: `started_at + time_limit * 1000`.
    pub ended_at: i64,
}

/// Current wall clock in unix milliseconds.
pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
