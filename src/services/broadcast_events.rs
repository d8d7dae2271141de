//! Fan-out helpers for the room, role, and participant channels.
//!
//! Every broadcast goes through one of these functions so the channel
//! conventions live in a single place: the room channel carries start/end
//! notices, the presenter channel the per-participant detail variants, the
//! audience channel the aggregate variants, and each participant's private
//! channel its own score updates.

use serde::Serialize;
use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};
use tracing::warn;

use crate::{
    dao::{
        models::{AnswerEntity, PollEntity, QnaEntity},
        poll::VoteCount,
    },
    dto::interaction::{PollDetail, PollSummary, QnaDetail, QnaSummary},
    state::{
        SharedState,
        events::{DomainEvent, RankEntry},
        hub::{ChannelMessage, audience_channel, participant_channel, presenter_channel, room_channel},
    },
};

const EVENT_START_POLL: &str = "start_poll";
const EVENT_UPDATE_POLL: &str = "update_poll";
const EVENT_UPDATE_POLL_DETAIL: &str = "update_poll_detail";
const EVENT_POLL_END: &str = "poll_end";
const EVENT_POLL_END_DETAIL: &str = "poll_end_detail";
const EVENT_START_QNA: &str = "start_qna";
const EVENT_UPDATE_QNA: &str = "update_qna";
const EVENT_UPDATE_QNA_DETAIL: &str = "update_qna_detail";
const EVENT_QNA_END: &str = "qna_end";
const EVENT_QNA_END_DETAIL: &str = "qna_end_detail";
const EVENT_UPDATE_GESTURE_STATUS: &str = "update_gesture_status";
const EVENT_SCORE_UPDATE: &str = "score_update";
const EVENT_RANK_UPDATE: &str = "rank_update";
const EVENT_PRESENTER_RANK_UPDATE: &str = "presenter_rank_update";

#[derive(Serialize)]
struct PollProgressEvent<'a> {
    poll_id: String,
    options: &'a [VoteCount],
}

#[derive(Serialize)]
struct PollProgressDetailEvent<'a> {
    poll_id: String,
    options: &'a [VoteCount],
    participant_id: &'a str,
    option_id: u32,
}

#[derive(Serialize)]
struct QnaProgressEvent {
    qna_id: String,
    answer_count: u64,
}

#[derive(Serialize)]
struct QnaProgressDetailEvent<'a> {
    qna_id: String,
    answer_count: u64,
    answer: &'a AnswerEntity,
}

#[derive(Serialize)]
struct GestureEvent<'a> {
    participant_id: &'a str,
    gesture: &'a str,
}

#[derive(Serialize)]
struct ScoreUpdateEvent<'a> {
    room_id: &'a str,
    score: i64,
}

#[derive(Serialize)]
struct RankUpdateEvent<'a> {
    rankings: &'a [RankEntry],
}

/// Announce a freshly started poll to the whole room.
pub fn broadcast_poll_started(state: &SharedState, poll: &PollEntity) {
    let payload = PollSummary::from(poll);
    publish(state, &room_channel(&poll.room_id), EVENT_START_POLL, &payload);
}

/// Push the running tally after a vote: aggregates to the audience, the
/// voter's identity only to the presenter.
pub fn broadcast_vote_progress(
    state: &SharedState,
    room_id: &str,
    poll_id: &str,
    options: &[VoteCount],
    participant_id: &str,
    option_id: u32,
) {
    publish(
        state,
        &audience_channel(room_id),
        EVENT_UPDATE_POLL,
        &PollProgressEvent {
            poll_id: poll_id.to_string(),
            options,
        },
    );
    publish(
        state,
        &presenter_channel(room_id),
        EVENT_UPDATE_POLL_DETAIL,
        &PollProgressDetailEvent {
            poll_id: poll_id.to_string(),
            options,
            participant_id,
            option_id,
        },
    );
}

/// Announce a closed poll: aggregate results to the room and the audience,
/// per-voter results to the presenter.
pub fn broadcast_poll_ended(state: &SharedState, poll: &PollEntity) {
    let summary = PollSummary::from(poll);
    publish(state, &room_channel(&poll.room_id), EVENT_POLL_END, &summary);
    publish(
        state,
        &audience_channel(&poll.room_id),
        EVENT_POLL_END,
        &summary,
    );
    publish(
        state,
        &presenter_channel(&poll.room_id),
        EVENT_POLL_END_DETAIL,
        &PollDetail::from(poll),
    );
}

/// Announce a freshly started Q&A to the whole room.
pub fn broadcast_qna_started(state: &SharedState, qna: &QnaEntity) {
    let payload = QnaSummary::from(qna);
    publish(state, &room_channel(&qna.room_id), EVENT_START_QNA, &payload);
}

/// Push the running answer count after a submission: count only to the
/// audience, the answer itself to the presenter.
pub fn broadcast_answer_progress(
    state: &SharedState,
    room_id: &str,
    qna_id: &str,
    answer_count: u64,
    answer: &AnswerEntity,
) {
    publish(
        state,
        &audience_channel(room_id),
        EVENT_UPDATE_QNA,
        &QnaProgressEvent {
            qna_id: qna_id.to_string(),
            answer_count,
        },
    );
    publish(
        state,
        &presenter_channel(room_id),
        EVENT_UPDATE_QNA_DETAIL,
        &QnaProgressDetailEvent {
            qna_id: qna_id.to_string(),
            answer_count,
            answer,
        },
    );
}

/// Announce a closed Q&A. Non-public sessions keep their answers off the
/// room and audience channels; the presenter always receives them.
pub fn broadcast_qna_ended(state: &SharedState, qna: &QnaEntity) {
    if qna.is_public {
        let detail = QnaDetail::from(qna);
        publish(state, &room_channel(&qna.room_id), EVENT_QNA_END, &detail);
        publish(state, &audience_channel(&qna.room_id), EVENT_QNA_END, &detail);
    } else {
        let summary = QnaSummary::from(qna);
        publish(state, &room_channel(&qna.room_id), EVENT_QNA_END, &summary);
        publish(state, &audience_channel(&qna.room_id), EVENT_QNA_END, &summary);
    }
    publish(
        state,
        &presenter_channel(&qna.room_id),
        EVENT_QNA_END_DETAIL,
        &QnaDetail::from(qna),
    );
}

/// Relay a participant's gesture to the whole room.
pub fn broadcast_gesture(state: &SharedState, room_id: &str, participant_id: &str, gesture: &str) {
    publish(
        state,
        &room_channel(room_id),
        EVENT_UPDATE_GESTURE_STATUS,
        &GestureEvent {
            participant_id,
            gesture,
        },
    );
}

/// Run the bridge between the domain event bus and the room channels.
///
/// Auto-closed sessions replay the same broadcasts as a manual stop, so
/// clients cannot tell the two apart.
pub fn spawn_domain_event_fanout(state: SharedState) -> JoinHandle<()> {
    // Subscribe before spawning so events emitted right after this call are
    // already buffered for the task.
    let mut events = state.events().subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => dispatch_domain_event(&state, event).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "domain event fan-out lagged behind the bus");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

async fn dispatch_domain_event(state: &SharedState, event: DomainEvent) {
    match event {
        DomainEvent::PollAutoClosed { poll_id, .. } => {
            match state.interactions().poll(poll_id).await {
                Ok(poll) => broadcast_poll_ended(state, &poll),
                Err(err) => {
                    warn!(poll_id = %poll_id, error = %err, "skipping broadcast for auto-closed poll");
                }
            }
        }
        DomainEvent::QnaAutoClosed { qna_id, .. } => {
            match state.interactions().qna(qna_id).await {
                Ok(qna) => broadcast_qna_ended(state, &qna),
                Err(err) => {
                    warn!(qna_id = %qna_id, error = %err, "skipping broadcast for auto-closed qna");
                }
            }
        }
        DomainEvent::ScoreUpdated {
            room_id,
            participant_id,
            score,
        } => {
            publish(
                state,
                &participant_channel(&participant_id),
                EVENT_SCORE_UPDATE,
                &ScoreUpdateEvent {
                    room_id: &room_id,
                    score,
                },
            );
        }
        DomainEvent::RankChanged { room_id, rankings } => {
            let payload = RankUpdateEvent {
                rankings: &rankings,
            };
            publish(state, &audience_channel(&room_id), EVENT_RANK_UPDATE, &payload);
            publish(
                state,
                &presenter_channel(&room_id),
                EVENT_PRESENTER_RANK_UPDATE,
                &payload,
            );
        }
    }
}

fn publish<T: Serialize>(state: &SharedState, channel: &str, event: &'static str, payload: &T) {
    state.hub().publish(channel, ChannelMessage::json(event, payload));
}
