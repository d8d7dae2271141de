//! Request payloads and public projections for polls and Q&As.
//!
//! Two projections exist for each entity: a summary that audiences may see
//! and a detail view reserved for the presenter channel. The summary never
//! carries per-participant data.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{AnswerEntity, PollEntity, QnaEntity, SessionStatus},
    dto::validation::validate_poll_options,
};

/// Payload used to create one poll inside a `create_poll` batch.
#[derive(Debug, Deserialize, Validate)]
pub struct PollDraft {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    /// Seconds until auto-close once started; 0 means no timer.
    #[validate(range(max = 86_400))]
    pub time_limit: u64,
    #[validate(custom(function = validate_poll_options))]
    pub options: Vec<String>,
}

/// Payload used to create one Q&A inside a `create_qna` batch.
#[derive(Debug, Deserialize, Validate)]
pub struct QnaDraft {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(range(max = 86_400))]
    pub time_limit: u64,
    /// Whether closing results (the answer list) are shown to the audience.
    #[serde(default)]
    pub is_public: bool,
}

/// Aggregate view of a poll option: tally without voter identities.
#[derive(Clone, Debug, Serialize)]
pub struct PollOptionSummary {
    pub id: u32,
    pub value: String,
    pub count: u64,
}

/// Presenter view of a poll option, voters included.
#[derive(Clone, Debug, Serialize)]
pub struct PollOptionDetail {
    pub id: u32,
    pub value: String,
    pub count: u64,
    pub voters: Vec<String>,
}

/// Audience-safe projection of a poll.
#[derive(Debug, Serialize)]
pub struct PollSummary {
    pub id: Uuid,
    pub room_id: String,
    pub title: String,
    pub time_limit: u64,
    pub status: SessionStatus,
    pub started_at: Option<i64>,
    pub ended_at: Option<i64>,
    pub options: Vec<PollOptionSummary>,
}

/// Presenter projection of a poll, per-option voters included.
#[derive(Debug, Serialize)]
pub struct PollDetail {
    pub id: Uuid,
    pub room_id: String,
    pub title: String,
    pub time_limit: u64,
    pub status: SessionStatus,
    pub started_at: Option<i64>,
    pub ended_at: Option<i64>,
    pub options: Vec<PollOptionDetail>,
}

impl From<&PollEntity> for PollSummary {
    fn from(poll: &PollEntity) -> Self {
        Self {
            id: poll.id,
            room_id: poll.room_id.clone(),
            title: poll.title.clone(),
            time_limit: poll.time_limit,
            status: poll.status,
            started_at: poll.started_at,
            ended_at: poll.ended_at,
            options: poll
                .options
                .iter()
                .map(|option| PollOptionSummary {
                    id: option.id,
                    value: option.value.clone(),
                    count: option.count,
                })
                .collect(),
        }
    }
}

impl From<&PollEntity> for PollDetail {
    fn from(poll: &PollEntity) -> Self {
        Self {
            id: poll.id,
            room_id: poll.room_id.clone(),
            title: poll.title.clone(),
            time_limit: poll.time_limit,
            status: poll.status,
            started_at: poll.started_at,
            ended_at: poll.ended_at,
            options: poll
                .options
                .iter()
                .map(|option| PollOptionDetail {
                    id: option.id,
                    value: option.value.clone(),
                    count: option.count,
                    voters: option.voters.clone(),
                })
                .collect(),
        }
    }
}

/// Audience-safe projection of a Q&A; answers are never included here.
#[derive(Debug, Serialize)]
pub struct QnaSummary {
    pub id: Uuid,
    pub room_id: String,
    pub title: String,
    pub time_limit: u64,
    pub is_public: bool,
    pub status: SessionStatus,
    pub started_at: Option<i64>,
    pub ended_at: Option<i64>,
    pub answer_count: usize,
}

/// Presenter projection of a Q&A with the full answer list.
#[derive(Debug, Serialize)]
pub struct QnaDetail {
    pub id: Uuid,
    pub room_id: String,
    pub title: String,
    pub time_limit: u64,
    pub is_public: bool,
    pub status: SessionStatus,
    pub started_at: Option<i64>,
    pub ended_at: Option<i64>,
    pub answers: Vec<AnswerEntity>,
}

impl From<&QnaEntity> for QnaSummary {
    fn from(qna: &QnaEntity) -> Self {
        Self {
            id: qna.id,
            room_id: qna.room_id.clone(),
            title: qna.title.clone(),
            time_limit: qna.time_limit,
            is_public: qna.is_public,
            status: qna.status,
            started_at: qna.started_at,
            ended_at: qna.ended_at,
            answer_count: qna.answers.len(),
        }
    }
}

impl From<&QnaEntity> for QnaDetail {
    fn from(qna: &QnaEntity) -> Self {
        Self {
            id: qna.id,
            room_id: qna.room_id.clone(),
            title: qna.title.clone(),
            time_limit: qna.time_limit,
            is_public: qna.is_public,
            status: qna.status,
            started_at: qna.started_at,
            ended_at: qna.ended_at,
            answers: qna.answers.clone(),
        }
    }
}
