//! In-memory activity scoreboard.
//!
//! Stand-in for the real scoring engine: it keeps per-room tallies, awards a
//! fixed number of points per interaction kind, and reports changes on the
//! domain event bus.

use dashmap::DashMap;

use crate::state::events::{DomainEvent, EventBus, RankEntry};

/// Interaction kinds that award activity points.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScoreReason {
    Gesture,
    PollVote,
    QnaAnswer,
}

impl ScoreReason {
    fn points(self) -> i64 {
        match self {
            ScoreReason::Gesture => 1,
            ScoreReason::PollVote => 2,
            ScoreReason::QnaAnswer => 3,
        }
    }
}

/// Per-room activity tallies with ranking queries.
pub struct ActivityScoreEngine {
    rooms: DashMap<String, DashMap<String, i64>>,
    events: EventBus,
    rank_limit: usize,
}

impl ActivityScoreEngine {
    /// Build an engine that reports ranking changes truncated to `rank_limit`
    /// entries.
    pub fn new(events: EventBus, rank_limit: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            events,
            rank_limit,
        }
    }

    /// Award points for one interaction and publish the updated score plus
    /// the refreshed ranking.
    pub fn update_score(&self, room_id: &str, participant_id: &str, reason: ScoreReason) -> i64 {
        let score = {
            let room = self.rooms.entry(room_id.to_string()).or_default();
            let mut entry = room.entry(participant_id.to_string()).or_insert(0);
            *entry += reason.points();
            *entry
        };

        self.events.emit(DomainEvent::ScoreUpdated {
            room_id: room_id.to_string(),
            participant_id: participant_id.to_string(),
            score,
        });
        self.events.emit(DomainEvent::RankChanged {
            room_id: room_id.to_string(),
            rankings: self.top_rankings(room_id, self.rank_limit),
        });
        score
    }

    /// Highest scores of a room, best first; ties break on participant id so
    /// the ordering is stable.
    pub fn top_rankings(&self, room_id: &str, limit: usize) -> Vec<RankEntry> {
        let mut entries = self.room_entries(room_id);
        entries.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.participant_id.cmp(&b.participant_id))
        });
        entries.truncate(limit);
        entries
    }

    /// The least active participant of a room, if any scores exist.
    pub fn lowest(&self, room_id: &str) -> Option<RankEntry> {
        self.room_entries(room_id).into_iter().min_by(|a, b| {
            a.score
                .cmp(&b.score)
                .then_with(|| a.participant_id.cmp(&b.participant_id))
        })
    }

    /// Current score of one participant; zero when nothing was recorded.
    pub fn participant_score(&self, room_id: &str, participant_id: &str) -> i64 {
        self.rooms
            .get(room_id)
            .and_then(|room| room.get(participant_id).map(|entry| *entry))
            .unwrap_or(0)
    }

    fn room_entries(&self, room_id: &str) -> Vec<RankEntry> {
        let Some(room) = self.rooms.get(room_id) else {
            return Vec::new();
        };
        room.iter()
            .map(|entry| RankEntry {
                participant_id: entry.key().clone(),
                score: *entry.value(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> (ActivityScoreEngine, EventBus) {
        let events = EventBus::new(32);
        (ActivityScoreEngine::new(events.clone(), 10), events)
    }

    #[test]
    fn scores_accumulate_per_reason() {
        let (scores, _) = engine();
        scores.update_score("r1", "u1", ScoreReason::Gesture);
        scores.update_score("r1", "u1", ScoreReason::PollVote);
        scores.update_score("r1", "u1", ScoreReason::QnaAnswer);
        assert_eq!(scores.participant_score("r1", "u1"), 6);
        assert_eq!(scores.participant_score("r1", "u2"), 0);
    }

    #[test]
    fn rankings_are_sorted_and_truncated() {
        let (scores, _) = engine();
        scores.update_score("r1", "u1", ScoreReason::Gesture);
        scores.update_score("r1", "u2", ScoreReason::QnaAnswer);
        scores.update_score("r1", "u3", ScoreReason::PollVote);

        let top = scores.top_rankings("r1", 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].participant_id, "u2");
        assert_eq!(top[1].participant_id, "u3");

        let lowest = scores.lowest("r1").unwrap();
        assert_eq!(lowest.participant_id, "u1");
    }

    #[test]
    fn updates_are_published_on_the_bus() {
        let (scores, events) = engine();
        let mut bus = events.subscribe();
        scores.update_score("r1", "u1", ScoreReason::Gesture);

        match bus.try_recv().unwrap() {
            DomainEvent::ScoreUpdated {
                participant_id,
                score,
                ..
            } => {
                assert_eq!(participant_id, "u1");
                assert_eq!(score, 1);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(
            bus.try_recv().unwrap(),
            DomainEvent::RankChanged { .. }
        ));
    }

    #[test]
    fn rooms_are_isolated() {
        let (scores, _) = engine();
        scores.update_score("r1", "u1", ScoreReason::Gesture);
        assert!(scores.top_rankings("r2", 10).is_empty());
        assert!(scores.lowest("r2").is_none());
    }
}
