//! The interaction WebSocket gateway.
//!
//! One task pair per connection: a dedicated writer drains an unbounded
//! channel while the reader loop parses request frames, resolves the caller's
//! session, applies the role gate, and dispatches into the interaction
//! service. Every request is answered with an ack frame; errors never cross
//! the socket as raw storage detail.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::{
    sync::{broadcast, broadcast::error::RecvError, mpsc},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::{
        interaction::{PollDetail, PollSummary, QnaDetail, QnaSummary},
        ws::{Ack, ClientMessage},
    },
    error::InteractionError,
    services::broadcast_events,
    state::{
        SharedState,
        directory::{Participant, ParticipantRole, SessionInfo},
        hub::{ChannelMessage, audience_channel, participant_channel, presenter_channel, room_channel},
        score::ScoreReason,
    },
};

/// Guard shown when an interaction event arrives before `join_room`.
pub const ERR_JOIN_FIRST: &str = "먼저 join_room으로 입장해주세요.";
/// Guard shown when the role gate rejects the caller.
pub const ERR_FORBIDDEN: &str = "권한이 없습니다.";
/// `join_room` with an id the participant directory does not know.
pub const ERR_UNKNOWN_PARTICIPANT: &str = "Unknown participant";
/// `join_room` with an id the room directory does not know.
pub const ERR_UNKNOWN_ROOM: &str = "Unknown room";

/// Per-connection context threaded through the handlers.
struct Connection {
    socket_id: Uuid,
    outbound: mpsc::UnboundedSender<Message>,
    forwarders: Vec<JoinHandle<()>>,
}

/// Handle the full lifecycle of one interaction WebSocket connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we
    // await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let mut connection = Connection {
        socket_id: Uuid::new_v4(),
        outbound: outbound_tx,
        forwarders: Vec::new(),
    };
    info!(socket_id = %connection.socket_id, "client connected");

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(request) => dispatch(&state, &mut connection, request).await,
                Err(err) => {
                    debug!(socket_id = %connection.socket_id, error = %err, "unparseable frame");
                    send_ack(&connection.outbound, &Ack::fail("unknown", "Malformed request"));
                }
            },
            Ok(Message::Ping(payload)) => {
                let _ = connection.outbound.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                let _ = connection.outbound.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) | Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(socket_id = %connection.socket_id, error = %err, "websocket error");
                break;
            }
        }
    }

    for forwarder in connection.forwarders.drain(..) {
        forwarder.abort();
    }
    state.sessions().delete(connection.socket_id);
    info!(socket_id = %connection.socket_id, "client disconnected");

    drop(connection.outbound);
    let _ = writer_task.await;
}

/// Route one request, then ack it on the same socket.
async fn dispatch(state: &SharedState, connection: &mut Connection, message: ClientMessage) {
    let event = event_name(&message);
    let ack = match route(state, connection, message).await {
        Ok(data) => Ack::ok(event, data),
        Err(err) => {
            match &err {
                InteractionError::Infrastructure { .. } => {
                    error!(socket_id = %connection.socket_id, event, error = %err, "request failed on storage");
                }
                _ => {
                    debug!(socket_id = %connection.socket_id, event, error = %err, "request rejected");
                }
            }
            Ack::fail(event, err.user_message())
        }
    };
    send_ack(&connection.outbound, &ack);
}

async fn route(
    state: &SharedState,
    connection: &mut Connection,
    message: ClientMessage,
) -> Result<Value, InteractionError> {
    match message {
        ClientMessage::JoinRoom {
            room_id,
            participant_id,
        } => join_room(state, connection, room_id, participant_id),
        ClientMessage::CreatePoll { polls } => {
            let session = require_role(state, connection.socket_id, ParticipantRole::Presenter)?;
            for draft in &polls {
                validate_input(draft)?;
            }
            let created = state.interactions().create_polls(&session.room_id, polls).await?;
            let summaries: Vec<PollSummary> = created.iter().map(Into::into).collect();
            Ok(to_value(&summaries))
        }
        ClientMessage::GetPoll { poll_id } => {
            require_role(state, connection.socket_id, ParticipantRole::Presenter)?;
            let poll = state.interactions().poll(poll_id).await?;
            Ok(to_value(&PollDetail::from(&poll)))
        }
        ClientMessage::GetActivePoll => {
            let (session, _) = require_session(state, connection.socket_id)?;
            let active = state.interactions().active_poll(&session.room_id).await?;
            Ok(to_value(&active.as_ref().map(PollSummary::from)))
        }
        ClientMessage::EmitPoll {
            poll_id,
            time_limit,
        } => {
            require_role(state, connection.socket_id, ParticipantRole::Presenter)?;
            let started = state.interactions().start_poll(poll_id, time_limit).await?;
            broadcast_events::broadcast_poll_started(state, &started);
            Ok(to_value(&PollSummary::from(&started)))
        }
        ClientMessage::Vote { poll_id, option_id } => {
            let session = require_role(state, connection.socket_id, ParticipantRole::Audience)?;
            let outcome = state
                .interactions()
                .vote(poll_id, &session.participant_id, option_id)
                .await?;
            broadcast_events::broadcast_vote_progress(
                state,
                &session.room_id,
                &outcome.poll_id.to_string(),
                &outcome.options,
                &session.participant_id,
                option_id as u32,
            );
            state
                .scores()
                .update_score(&session.room_id, &session.participant_id, ScoreReason::PollVote);
            Ok(to_value(&outcome))
        }
        ClientMessage::BreakPoll { poll_id } => {
            require_role(state, connection.socket_id, ParticipantRole::Presenter)?;
            let ended = state.interactions().stop_poll(poll_id).await?;
            broadcast_events::broadcast_poll_ended(state, &ended);
            Ok(to_value(&PollDetail::from(&ended)))
        }
        ClientMessage::CreateQna { qnas } => {
            let session = require_role(state, connection.socket_id, ParticipantRole::Presenter)?;
            for draft in &qnas {
                validate_input(draft)?;
            }
            let created = state.interactions().create_qnas(&session.room_id, qnas).await?;
            let summaries: Vec<QnaSummary> = created.iter().map(Into::into).collect();
            Ok(to_value(&summaries))
        }
        ClientMessage::GetQna { qna_id } => {
            require_role(state, connection.socket_id, ParticipantRole::Presenter)?;
            let qna = state.interactions().qna(qna_id).await?;
            Ok(to_value(&QnaDetail::from(&qna)))
        }
        ClientMessage::GetActiveQna => {
            let (session, _) = require_session(state, connection.socket_id)?;
            let active = state.interactions().active_qna(&session.room_id).await?;
            Ok(to_value(&active.as_ref().map(QnaSummary::from)))
        }
        ClientMessage::EmitQna { qna_id, time_limit } => {
            require_role(state, connection.socket_id, ParticipantRole::Presenter)?;
            let started = state.interactions().start_qna(qna_id, time_limit).await?;
            broadcast_events::broadcast_qna_started(state, &started);
            Ok(to_value(&QnaSummary::from(&started)))
        }
        ClientMessage::Answer { qna_id, text } => {
            let session = require_role(state, connection.socket_id, ParticipantRole::Audience)?;
            let participant = require_participant(state, &session.participant_id)?;
            let answer_count = state
                .interactions()
                .answer(qna_id, &participant.id, &participant.name, &text)
                .await?;
            broadcast_events::broadcast_answer_progress(
                state,
                &session.room_id,
                &qna_id.to_string(),
                answer_count,
                &crate::dao::models::AnswerEntity {
                    participant_id: participant.id.clone(),
                    participant_name: participant.name.clone(),
                    text,
                },
            );
            state
                .scores()
                .update_score(&session.room_id, &participant.id, ScoreReason::QnaAnswer);
            Ok(json!({ "qna_id": qna_id, "answer_count": answer_count }))
        }
        ClientMessage::BreakQna { qna_id } => {
            require_role(state, connection.socket_id, ParticipantRole::Presenter)?;
            let ended = state.interactions().stop_qna(qna_id).await?;
            broadcast_events::broadcast_qna_ended(state, &ended);
            Ok(to_value(&QnaDetail::from(&ended)))
        }
        ClientMessage::ActionGesture { gesture } => {
            // Any recognized role may gesture; only audience gestures score.
            let (session, participant) = require_session(state, connection.socket_id)?;
            broadcast_events::broadcast_gesture(
                state,
                &session.room_id,
                &session.participant_id,
                &gesture,
            );
            if participant.role == ParticipantRole::Audience {
                state
                    .scores()
                    .update_score(&session.room_id, &session.participant_id, ScoreReason::Gesture);
            }
            Ok(json!({ "gesture": gesture }))
        }
        ClientMessage::GetActivityScoreRank { limit } => {
            let (session, _) = require_session(state, connection.socket_id)?;
            let limit = limit.unwrap_or(state.config().default_rank_limit);
            let rankings = state.scores().top_rankings(&session.room_id, limit);
            Ok(to_value(&rankings))
        }
        ClientMessage::Unknown => Err(InteractionError::InvalidInput("Unknown event".into())),
    }
}

/// Register the socket's session and wire its broadcast subscriptions.
fn join_room(
    state: &SharedState,
    connection: &mut Connection,
    room_id: String,
    participant_id: String,
) -> Result<Value, InteractionError> {
    let participant = require_participant(state, &participant_id)?;
    if state.rooms().find(&room_id).is_none() {
        return Err(InteractionError::NotFound(ERR_UNKNOWN_ROOM.into()));
    }

    // Rejoining replaces the previous subscriptions wholesale.
    for forwarder in connection.forwarders.drain(..) {
        forwarder.abort();
    }

    let role_channel = match participant.role {
        ParticipantRole::Presenter => presenter_channel(&room_id),
        ParticipantRole::Audience => audience_channel(&room_id),
    };
    for channel in [
        room_channel(&room_id),
        role_channel,
        participant_channel(&participant_id),
    ] {
        connection.forwarders.push(spawn_forwarder(
            state.hub().subscribe(&channel),
            connection.outbound.clone(),
        ));
    }

    state.sessions().set(
        connection.socket_id,
        SessionInfo {
            room_id: room_id.clone(),
            participant_id: participant_id.clone(),
        },
    );
    info!(socket_id = %connection.socket_id, room_id, participant_id, "joined room");
    Ok(json!({ "room_id": room_id, "participant_id": participant_id }))
}

/// Forward one broadcast channel onto the socket's writer until either side
/// closes.
fn spawn_forwarder(
    mut channel: broadcast::Receiver<ChannelMessage>,
    outbound: mpsc::UnboundedSender<Message>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match channel.recv().await {
                Ok(message) => {
                    if outbound.send(Message::Text(message.frame.into())).is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "socket fell behind its broadcast channel");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Resolve the socket's session and the participant behind it.
fn require_session(
    state: &SharedState,
    socket_id: Uuid,
) -> Result<(SessionInfo, Participant), InteractionError> {
    let Some(session) = state.sessions().get(socket_id) else {
        return Err(InteractionError::Unauthorized(ERR_JOIN_FIRST.into()));
    };
    let participant = require_participant(state, &session.participant_id)?;
    Ok((session, participant))
}

/// Resolve the session and enforce the role gate in one step.
///
/// Presenter actions additionally require the caller to be the room's
/// designated presenter when the room is known.
fn require_role(
    state: &SharedState,
    socket_id: Uuid,
    required: ParticipantRole,
) -> Result<SessionInfo, InteractionError> {
    let (session, participant) = require_session(state, socket_id)?;
    if participant.role != required {
        return Err(InteractionError::Unauthorized(ERR_FORBIDDEN.into()));
    }
    if required == ParticipantRole::Presenter
        && let Some(room) = state.rooms().find(&session.room_id)
        && room.presenter_id != participant.id
    {
        return Err(InteractionError::Unauthorized(ERR_FORBIDDEN.into()));
    }
    Ok(session)
}

fn require_participant(
    state: &SharedState,
    participant_id: &str,
) -> Result<Participant, InteractionError> {
    state
        .participants()
        .find(participant_id)
        .ok_or_else(|| InteractionError::NotFound(ERR_UNKNOWN_PARTICIPANT.into()))
}

fn validate_input<T: Validate>(input: &T) -> Result<(), InteractionError> {
    input
        .validate()
        .map_err(|err| InteractionError::InvalidInput(err.to_string()))
}

fn to_value<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn send_ack(outbound: &mpsc::UnboundedSender<Message>, ack: &Ack) {
    match serde_json::to_string(ack) {
        Ok(frame) => {
            let _ = outbound.send(Message::Text(frame.into()));
        }
        Err(err) => warn!(error = %err, "failed to serialize ack"),
    }
}

fn event_name(message: &ClientMessage) -> &'static str {
    match message {
        ClientMessage::JoinRoom { .. } => "join_room",
        ClientMessage::CreatePoll { .. } => "create_poll",
        ClientMessage::GetPoll { .. } => "get_poll",
        ClientMessage::GetActivePoll => "get_active_poll",
        ClientMessage::EmitPoll { .. } => "emit_poll",
        ClientMessage::Vote { .. } => "vote",
        ClientMessage::BreakPoll { .. } => "break_poll",
        ClientMessage::CreateQna { .. } => "create_qna",
        ClientMessage::GetQna { .. } => "get_qna",
        ClientMessage::GetActiveQna => "get_active_qna",
        ClientMessage::EmitQna { .. } => "emit_qna",
        ClientMessage::Answer { .. } => "answer",
        ClientMessage::BreakQna { .. } => "break_qna",
        ClientMessage::ActionGesture { .. } => "action_gesture",
        ClientMessage::GetActivityScoreRank { .. } => "get_activity_score_rank",
        ClientMessage::Unknown => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::kv::memory::MemoryKvStore,
        dto::interaction::PollDraft,
        state::{AppState, directory::Room},
    };

    fn state_with_room() -> SharedState {
        let state = AppState::new(AppConfig::default(), Arc::new(MemoryKvStore::new()));
        state.rooms().insert(Room {
            id: "r1".into(),
            presenter_id: "host".into(),
        });
        state.participants().insert(Participant {
            id: "host".into(),
            name: "Host".into(),
            role: ParticipantRole::Presenter,
        });
        state.participants().insert(Participant {
            id: "u1".into(),
            name: "Mina".into(),
            role: ParticipantRole::Audience,
        });
        state
    }

    fn joined(
        state: &SharedState,
        connection: &mut Connection,
        participant_id: &str,
    ) {
        join_room(state, connection, "r1".into(), participant_id.into()).unwrap();
    }

    fn connection() -> (Connection, mpsc::UnboundedReceiver<Message>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        (
            Connection {
                socket_id: Uuid::new_v4(),
                outbound,
                forwarders: Vec::new(),
            },
            rx,
        )
    }

    fn poll_draft() -> PollDraft {
        PollDraft {
            title: "lunch?".into(),
            time_limit: 60,
            options: vec!["A".into(), "B".into()],
        }
    }

    #[tokio::test]
    async fn events_before_join_fail_fast() {
        let state = state_with_room();
        let (mut conn, _rx) = connection();

        let err = route(&state, &mut conn, ClientMessage::GetActivePoll)
            .await
            .unwrap_err();
        assert!(matches!(err, InteractionError::Unauthorized(message) if message == ERR_JOIN_FIRST));
    }

    #[tokio::test]
    async fn audience_cannot_create_polls() {
        let state = state_with_room();
        let (mut conn, _rx) = connection();
        joined(&state, &mut conn, "u1");

        let err = route(
            &state,
            &mut conn,
            ClientMessage::CreatePoll {
                polls: vec![poll_draft()],
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, InteractionError::Unauthorized(message) if message == ERR_FORBIDDEN));
    }

    #[tokio::test]
    async fn presenter_cannot_vote() {
        let state = state_with_room();
        let (mut conn, _rx) = connection();
        joined(&state, &mut conn, "host");

        let err = route(
            &state,
            &mut conn,
            ClientMessage::Vote {
                poll_id: Uuid::new_v4(),
                option_id: 0,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, InteractionError::Unauthorized(message) if message == ERR_FORBIDDEN));
    }

    #[tokio::test]
    async fn only_the_designated_presenter_may_run_the_room() {
        let state = state_with_room();
        state.participants().insert(Participant {
            id: "imposter".into(),
            name: "Other".into(),
            role: ParticipantRole::Presenter,
        });
        let (mut conn, _rx) = connection();
        joined(&state, &mut conn, "imposter");

        let err = route(
            &state,
            &mut conn,
            ClientMessage::CreatePoll {
                polls: vec![poll_draft()],
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, InteractionError::Unauthorized(message) if message == ERR_FORBIDDEN));
    }

    #[tokio::test]
    async fn full_round_trip_create_start_vote() {
        let state = state_with_room();
        let (mut host, _host_rx) = connection();
        joined(&state, &mut host, "host");
        let (mut audience, _audience_rx) = connection();
        joined(&state, &mut audience, "u1");

        let created = route(
            &state,
            &mut host,
            ClientMessage::CreatePoll {
                polls: vec![poll_draft()],
            },
        )
        .await
        .unwrap();
        let poll_id: Uuid =
            serde_json::from_value(created[0]["id"].clone()).unwrap();

        route(
            &state,
            &mut host,
            ClientMessage::EmitPoll {
                poll_id,
                time_limit: None,
            },
        )
        .await
        .unwrap();

        let outcome = route(
            &state,
            &mut audience,
            ClientMessage::Vote {
                poll_id,
                option_id: 1,
            },
        )
        .await
        .unwrap();
        assert_eq!(outcome["options"][1]["count"], 1);

        // The vote awarded activity points.
        assert_eq!(state.scores().participant_score("r1", "u1"), 2);
    }

    #[tokio::test]
    async fn gestures_broadcast_but_only_audience_scores() {
        let state = state_with_room();
        let (mut host, _host_rx) = connection();
        joined(&state, &mut host, "host");
        let mut room = state.hub().subscribe(&room_channel("r1"));

        route(
            &state,
            &mut host,
            ClientMessage::ActionGesture {
                gesture: "clap".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(room.try_recv().unwrap().event, "update_gesture_status");
        assert_eq!(state.scores().participant_score("r1", "host"), 0);

        let (mut audience, _audience_rx) = connection();
        joined(&state, &mut audience, "u1");
        route(
            &state,
            &mut audience,
            ClientMessage::ActionGesture {
                gesture: "clap".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(state.scores().participant_score("r1", "u1"), 1);
    }

    #[tokio::test]
    async fn join_room_rejects_unknown_ids() {
        let state = state_with_room();
        let (mut conn, _rx) = connection();

        let err = join_room(&state, &mut conn, "r1".into(), "ghost".into()).unwrap_err();
        assert!(
            matches!(err, InteractionError::NotFound(message) if message == ERR_UNKNOWN_PARTICIPANT)
        );
        let err = join_room(&state, &mut conn, "nowhere".into(), "u1".into()).unwrap_err();
        assert!(matches!(err, InteractionError::NotFound(message) if message == ERR_UNKNOWN_ROOM));
    }

    #[tokio::test]
    async fn invalid_drafts_are_rejected_before_the_store() {
        let state = state_with_room();
        let (mut conn, _rx) = connection();
        joined(&state, &mut conn, "host");

        let err = route(
            &state,
            &mut conn,
            ClientMessage::CreatePoll {
                polls: vec![PollDraft {
                    title: "lunch?".into(),
                    time_limit: 60,
                    options: vec!["only one".into()],
                }],
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, InteractionError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn rank_request_uses_the_configured_default_limit() {
        let state = state_with_room();
        let (mut audience, _rx) = connection();
        joined(&state, &mut audience, "u1");
        state.scores().update_score("r1", "u1", ScoreReason::Gesture);

        let rankings = route(
            &state,
            &mut audience,
            ClientMessage::GetActivityScoreRank { limit: None },
        )
        .await
        .unwrap();
        assert_eq!(rankings[0]["participant_id"], "u1");
    }
}
