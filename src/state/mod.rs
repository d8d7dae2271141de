pub mod directory;
pub mod events;
pub mod hub;
pub mod score;

use std::sync::Arc;

use crate::{
    config::AppConfig,
    dao::kv::KvStore,
    services::interaction_service::InteractionService,
    state::{
        directory::{ParticipantDirectory, RoomDirectory, SessionRegistry},
        events::EventBus,
        hub::RoomHub,
        score::ActivityScoreEngine,
    },
};

pub type SharedState = Arc<AppState>;

/// Central application state: the shared store handle, the interaction
/// services built on it, and the fan-out plumbing.
pub struct AppState {
    config: AppConfig,
    kv: Arc<dyn KvStore>,
    interactions: InteractionService,
    hub: RoomHub,
    events: EventBus,
    sessions: SessionRegistry,
    participants: ParticipantDirectory,
    rooms: RoomDirectory,
    scores: ActivityScoreEngine,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned
    /// cheaply.
    pub fn new(config: AppConfig, kv: Arc<dyn KvStore>) -> SharedState {
        let events = EventBus::new(config.event_bus_capacity);
        let interactions = InteractionService::new(Arc::clone(&kv), events.clone());
        let hub = RoomHub::new(config.channel_capacity);
        let scores = ActivityScoreEngine::new(events.clone(), config.default_rank_limit);

        Arc::new(Self {
            config,
            kv,
            interactions,
            hub,
            events,
            sessions: SessionRegistry::new(),
            participants: ParticipantDirectory::new(),
            rooms: RoomDirectory::new(),
            scores,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Handle to the shared key-value store.
    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    /// Poll and Q&A services built on the shared store.
    pub fn interactions(&self) -> &InteractionService {
        &self.interactions
    }

    /// Broadcast hub carrying room, role, and participant channels.
    pub fn hub(&self) -> &RoomHub {
        &self.hub
    }

    /// Domain event bus fed by the managers and the score engine.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Live socket sessions keyed by socket id.
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Known participants.
    pub fn participants(&self) -> &ParticipantDirectory {
        &self.participants
    }

    /// Known rooms.
    pub fn rooms(&self) -> &RoomDirectory {
        &self.rooms
    }

    /// Activity scoreboard.
    pub fn scores(&self) -> &ActivityScoreEngine {
        &self.scores
    }
}
