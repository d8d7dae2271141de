//! In-process domain event bus.
//!
//! Managers and the score engine emit; the gateway subscribes at startup and
//! replays events onto the room channels. The fixed payload set keeps the
//! fan-out typed instead of stringly dispatched.

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::dao::models::{AnswerEntity, PollOptionEntity};

/// One ranking row of the activity-score leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankEntry {
    /// Ranked participant.
    pub participant_id: String,
    /// Current activity score.
    pub score: i64,
}

/// Event published on the in-process bus.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    /// A poll's active marker expired and the timer closed it.
    PollAutoClosed {
        poll_id: Uuid,
        room_id: String,
        options: Vec<PollOptionEntity>,
    },
    /// A Q&A's active marker expired and the timer closed it.
    QnaAutoClosed {
        qna_id: Uuid,
        room_id: String,
        is_public: bool,
        answers: Vec<AnswerEntity>,
    },
    /// A participant's activity score changed.
    ScoreUpdated {
        room_id: String,
        participant_id: String,
        score: i64,
    },
    /// The room leaderboard changed order or content.
    RankChanged {
        room_id: String,
        rankings: Vec<RankEntry>,
    },
}

/// Broadcast-channel wrapper carrying [`DomainEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    /// Create a bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a subscriber that receives subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }

    /// Publish an event, ignoring the no-subscriber case.
    pub fn emit(&self, event: DomainEvent) {
        let _ = self.sender.send(event);
    }
}
