//! Thin in-memory registries for sockets, participants, and rooms.
//!
//! The participant and room directories stand in for an external identity
//! service; only the lookup contract the gateway needs is modeled here.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role a participant holds inside a room.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Presenter,
    Audience,
}

/// Identity record resolved before any interaction handler runs.
#[derive(Clone, Debug)]
pub struct Participant {
    pub id: String,
    pub name: String,
    pub role: ParticipantRole,
}

/// Room record carrying the designated presenter.
#[derive(Clone, Debug)]
pub struct Room {
    pub id: String,
    pub presenter_id: String,
}

/// Room/participant binding established by `join_room`.
#[derive(Clone, Debug)]
pub struct SessionInfo {
    pub room_id: String,
    pub participant_id: String,
}

/// Live socket sessions keyed by socket id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<Uuid, SessionInfo>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, socket_id: Uuid) -> Option<SessionInfo> {
        self.sessions.get(&socket_id).map(|entry| entry.clone())
    }

    pub fn set(&self, socket_id: Uuid, session: SessionInfo) {
        self.sessions.insert(socket_id, session);
    }

    pub fn delete(&self, socket_id: Uuid) {
        self.sessions.remove(&socket_id);
    }

    pub fn has(&self, socket_id: Uuid) -> bool {
        self.sessions.contains_key(&socket_id)
    }
}

/// Known participants keyed by their external id.
#[derive(Default)]
pub struct ParticipantDirectory {
    participants: DashMap<String, Participant>,
}

impl ParticipantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, participant_id: &str) -> Option<Participant> {
        self.participants
            .get(participant_id)
            .map(|entry| entry.clone())
    }

    pub fn insert(&self, participant: Participant) {
        self.participants.insert(participant.id.clone(), participant);
    }

    /// Patch the mutable fields of a known participant, leaving the rest
    /// untouched. Returns the updated record, or `None` for an unknown id.
    pub fn update_partial(
        &self,
        participant_id: &str,
        name: Option<String>,
        role: Option<ParticipantRole>,
    ) -> Option<Participant> {
        let mut entry = self.participants.get_mut(participant_id)?;
        if let Some(name) = name {
            entry.name = name;
        }
        if let Some(role) = role {
            entry.role = role;
        }
        Some(entry.clone())
    }
}

/// Known rooms keyed by their external id.
#[derive(Default)]
pub struct RoomDirectory {
    rooms: DashMap<String, Room>,
}

impl RoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, room_id: &str) -> Option<Room> {
        self.rooms.get(room_id).map(|entry| entry.clone())
    }

    pub fn insert(&self, room: Room) {
        self.rooms.insert(room.id.clone(), room);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_registry_round_trip() {
        let registry = SessionRegistry::new();
        let socket = Uuid::new_v4();
        assert!(!registry.has(socket));

        registry.set(
            socket,
            SessionInfo {
                room_id: "r1".into(),
                participant_id: "u1".into(),
            },
        );
        assert_eq!(registry.get(socket).unwrap().room_id, "r1");

        registry.delete(socket);
        assert!(registry.get(socket).is_none());
    }

    #[test]
    fn directories_resolve_by_id() {
        let participants = ParticipantDirectory::new();
        participants.insert(Participant {
            id: "u1".into(),
            name: "Mina".into(),
            role: ParticipantRole::Audience,
        });
        assert_eq!(participants.find("u1").unwrap().name, "Mina");
        assert!(participants.find("u2").is_none());

        let rooms = RoomDirectory::new();
        rooms.insert(Room {
            id: "r1".into(),
            presenter_id: "p1".into(),
        });
        assert_eq!(rooms.find("r1").unwrap().presenter_id, "p1");
    }

    #[test]
    fn partial_update_patches_only_given_fields() {
        let participants = ParticipantDirectory::new();
        participants.insert(Participant {
            id: "u1".into(),
            name: "Mina".into(),
            role: ParticipantRole::Audience,
        });

        let updated = participants
            .update_partial("u1", Some("Minji".into()), None)
            .unwrap();
        assert_eq!(updated.name, "Minji");
        assert_eq!(updated.role, ParticipantRole::Audience);

        assert!(participants.update_partial("ghost", None, None).is_none());
    }
}
