//! Poll lifecycle manager.
//!
//! Owns every store mutation for polls. The store has no cross-key atomicity,
//! so every multi-key write here is an explicit forward batch paired with the
//! inverse batch issued on failure.

use std::{collections::HashMap, sync::Arc};

use serde::Serialize;
use tracing::{error, warn};
use uuid::Uuid;

use crate::{
    dao::{
        entity::EntityStore,
        first_error,
        kv::{KvCommand, KvStore, KvValue, collapse_pipeline},
        models::{PollEntity, PollOptionEntity, SessionStatus, StartWindow, now_millis},
        parse_active_marker, run_compensation,
        storage::StorageResult,
    },
    error::InteractionError,
    state::events::{DomainEvent, EventBus},
};

/// Submission attempted while the active marker is absent.
pub const ERR_POLL_NOT_ACTIVE: &str = "Poll is not active";
/// Second vote from the same participant.
pub const ERR_DUPLICATE_VOTE: &str = "Duplicate vote attempt";
/// The vote batch failed and was compensated.
pub const ERR_VOTE_PIPELINE: &str = "Pipeline failed during voting";
/// The vote batch succeeded but the counts read-back was malformed.
pub const ERR_COUNT_DATA: &str = "Failed to retrieve count data";
/// The close batch failed.
pub const ERR_POLL_CLOSE: &str = "Close failed";

/// Running tally for one option, as returned after a vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoteCount {
    /// Option id.
    pub id: u32,
    /// Current vote count.
    pub count: u64,
}

/// Result of a successful vote: the full tally sorted by option id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoteOutcome {
    /// Poll the vote landed on.
    pub poll_id: Uuid,
    /// Tally per option, ascending by id.
    pub options: Vec<VoteCount>,
}

fn room_polls_key(room_id: &str) -> String {
    format!("room:{room_id}:polls")
}

fn active_key(id: Uuid) -> String {
    format!("poll:{id}:active")
}

fn voters_key(id: Uuid) -> String {
    format!("poll:{id}:voters")
}

fn counts_key(id: Uuid) -> String {
    format!("poll:{id}:counts")
}

fn option_voters_key(id: Uuid, option_id: u32) -> String {
    format!("poll:{id}:options:{option_id}:voters")
}

/// Manager for the poll side of the interaction engine.
pub struct PollManager {
    kv: Arc<dyn KvStore>,
    entities: EntityStore<PollEntity>,
    events: EventBus,
}

impl PollManager {
    /// Build a manager on top of the shared store and event bus.
    pub fn new(kv: Arc<dyn KvStore>, events: EventBus) -> Self {
        let entities = EntityStore::new(Arc::clone(&kv), "poll");
        Self {
            kv,
            entities,
            events,
        }
    }

    /// Look up one poll by id.
    pub async fn find(&self, id: Uuid) -> StorageResult<Option<PollEntity>> {
        self.entities.find(&id.to_string()).await
    }

    /// Persist a batch of polls and append their ids to the room list.
    ///
    /// All saves and list appends go out as one batch. Any per-command error
    /// or a rejection of the round trip rolls back the **whole** batch: every
    /// entity key is deleted and every id is removed from the list again.
    pub async fn add_polls_to_room(
        &self,
        room_id: &str,
        polls: &[PollEntity],
    ) -> Result<(), InteractionError> {
        let list_key = room_polls_key(room_id);
        let mut forward = Vec::with_capacity(polls.len() * 2);
        for poll in polls {
            forward.push(self.entities.save_cmd(&poll.id.to_string(), poll)?);
            forward.push(KvCommand::RPush {
                key: list_key.clone(),
                value: poll.id.to_string(),
            });
        }

        let Some(err) = first_error(self.kv.pipeline(forward).await) else {
            return Ok(());
        };

        let inverse = polls
            .iter()
            .flat_map(|poll| {
                [
                    self.entities.delete_cmd(&poll.id.to_string()),
                    KvCommand::LRem {
                        key: list_key.clone(),
                        value: poll.id.to_string(),
                    },
                ]
            })
            .collect();
        run_compensation(&*self.kv, inverse, "poll batch create").await;
        Err(err.into())
    }

    /// Fetch every poll of a room, in creation order.
    ///
    /// An empty id list short-circuits without touching entity storage.
    pub async fn polls_in_room(&self, room_id: &str) -> StorageResult<Vec<PollEntity>> {
        let ids = match self
            .kv
            .run(KvCommand::LRange {
                key: room_polls_key(room_id),
            })
            .await?
        {
            KvValue::List(ids) => ids,
            _ => Vec::new(),
        };
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.entities.find_many(&ids).await
    }

    /// Open a pending poll for submissions.
    ///
    /// One batch: patch the entity to active, seed a zero tally per option,
    /// and create the active marker with TTL = `time_limit` (no TTL when 0,
    /// i.e. unlimited). On failure the entity is patched back to pending and
    /// the marker deleted; the seeded counts are left behind, harmless for a
    /// poll that never became active.
    pub async fn start_poll(
        &self,
        poll: &PollEntity,
        time_limit: u64,
    ) -> Result<StartWindow, InteractionError> {
        let started_at = now_millis();
        let window = StartWindow {
            started_at,
            ended_at: started_at + (time_limit as i64) * 1000,
        };

        let mut started = poll.clone();
        started.status = SessionStatus::Active;
        started.time_limit = time_limit;
        started.started_at = Some(window.started_at);
        started.ended_at = Some(window.ended_at);
        started.updated_at = started_at;

        let marker = active_key(poll.id);
        let mut forward = vec![self.entities.save_cmd(&poll.id.to_string(), &started)?];
        for option in &poll.options {
            forward.push(KvCommand::HSet {
                key: counts_key(poll.id),
                field: option.id.to_string(),
                value: "0".into(),
            });
        }
        forward.push(if time_limit > 0 {
            KvCommand::SetEx {
                key: marker.clone(),
                value: "1".into(),
                ttl_secs: time_limit,
            }
        } else {
            KvCommand::Set {
                key: marker.clone(),
                value: "1".into(),
            }
        });

        let Some(err) = first_error(self.kv.pipeline(forward).await) else {
            return Ok(window);
        };

        let inverse = vec![
            self.entities.save_cmd(&poll.id.to_string(), poll)?,
            KvCommand::Del { key: marker },
        ];
        run_compensation(&*self.kv, inverse, "poll start").await;
        Err(err.into())
    }

    /// Record one vote, at most once per participant.
    ///
    /// The active marker is checked fresh immediately before the dedup-set
    /// mutation; its absence is the authoritative "not accepting" signal
    /// regardless of the entity's status field.
    pub async fn submit_vote(
        &self,
        poll: &PollEntity,
        participant_id: &str,
        option_id: u32,
    ) -> Result<VoteOutcome, InteractionError> {
        let id = poll.id;
        let marker = active_key(id);

        let exists = self.kv.run(KvCommand::Exists { key: marker.clone() }).await?;
        if exists.as_int() != Some(1) {
            return Err(InteractionError::InvalidState(ERR_POLL_NOT_ACTIVE.into()));
        }

        let added = self
            .kv
            .run(KvCommand::SAdd {
                key: voters_key(id),
                member: participant_id.into(),
            })
            .await?;
        if added.as_int() != Some(1) {
            return Err(InteractionError::Conflict(ERR_DUPLICATE_VOTE.into()));
        }

        let field = option_id.to_string();
        let mut forward = vec![
            KvCommand::HIncrBy {
                key: counts_key(id),
                field: field.clone(),
                delta: 1,
            },
            KvCommand::SAdd {
                key: option_voters_key(id, option_id),
                member: participant_id.into(),
            },
        ];
        if poll.time_limit > 0 {
            forward.push(KvCommand::Expire {
                key: marker,
                ttl_secs: poll.time_limit,
            });
        }
        forward.push(KvCommand::HGetAll {
            key: counts_key(id),
        });

        match collapse_pipeline(self.kv.pipeline(forward).await) {
            Ok(replies) => {
                let counts = replies.into_iter().last();
                parse_counts(id, counts)
                    .ok_or_else(|| InteractionError::Infrastructure {
                        message: ERR_COUNT_DATA.into(),
                        source: None,
                    })
            }
            Err(err) => {
                let inverse = vec![
                    KvCommand::SRem {
                        key: voters_key(id),
                        member: participant_id.into(),
                    },
                    KvCommand::HIncrBy {
                        key: counts_key(id),
                        field,
                        delta: -1,
                    },
                    KvCommand::SRem {
                        key: option_voters_key(id, option_id),
                        member: participant_id.into(),
                    },
                ];
                run_compensation(&*self.kv, inverse, "vote").await;
                Err(InteractionError::infrastructure(ERR_VOTE_PIPELINE, err))
            }
        }
    }

    /// Close an active poll: snapshot the live tally and voters into the
    /// entity, set it to ended, and remove every ephemeral key.
    pub async fn close_poll(&self, poll: &PollEntity) -> Result<PollEntity, InteractionError> {
        let id = poll.id;

        let mut reads = vec![KvCommand::HGetAll {
            key: counts_key(id),
        }];
        for option in &poll.options {
            reads.push(KvCommand::SMembers {
                key: option_voters_key(id, option.id),
            });
        }
        let replies = collapse_pipeline(self.kv.pipeline(reads).await)
            .map_err(|err| InteractionError::infrastructure(ERR_POLL_CLOSE, err))?;

        let mut replies = replies.into_iter();
        let counts = match replies.next() {
            Some(KvValue::Map(pairs)) => pairs
                .into_iter()
                .filter_map(|(field, value)| {
                    Some((field.parse::<u32>().ok()?, value.parse::<u64>().ok()?))
                })
                .collect::<HashMap<u32, u64>>(),
            _ => HashMap::new(),
        };

        let now = now_millis();
        let mut closed = poll.clone();
        closed.status = SessionStatus::Ended;
        closed.updated_at = now;
        for option in &mut closed.options {
            option.count = counts.get(&option.id).copied().unwrap_or(option.count);
            if let Some(KvValue::List(voters)) = replies.next() {
                option.voters = voters;
            }
        }

        let mut writes = vec![self.entities.save_cmd(&id.to_string(), &closed)?];
        writes.push(KvCommand::Del {
            key: active_key(id),
        });
        writes.push(KvCommand::Del {
            key: voters_key(id),
        });
        writes.push(KvCommand::Del {
            key: counts_key(id),
        });
        for option in &closed.options {
            writes.push(KvCommand::Del {
                key: option_voters_key(id, option.id),
            });
        }
        if let Some(err) = first_error(self.kv.pipeline(writes).await) {
            return Err(InteractionError::infrastructure(ERR_POLL_CLOSE, err));
        }

        Ok(closed)
    }

    /// Read the final options of an already-closed poll. Never mutates.
    pub fn final_results(&self, poll: &PollEntity) -> Vec<PollOptionEntity> {
        poll.options.clone()
    }

    /// React to an expired active-marker key by closing the poll the timer
    /// ran out on.
    ///
    /// Runs on the expiry-notification path where no caller is waiting, so
    /// every failure is logged and swallowed. A poll already manually closed
    /// is left alone.
    pub async fn handle_auto_close(&self, expired_key: &str) {
        let Some(id) = parse_active_marker(expired_key, "poll") else {
            return;
        };

        let poll = match self.find(id).await {
            Ok(Some(poll)) => poll,
            Ok(None) => {
                warn!(poll_id = %id, "[AutoClose Error] expired marker without a poll entity");
                return;
            }
            Err(err) => {
                error!(poll_id = %id, error = %err, "[AutoClose Error] failed to load poll");
                return;
            }
        };
        if poll.status == SessionStatus::Ended {
            // A manual close raced the timer.
            return;
        }

        match self.close_poll(&poll).await {
            Ok(closed) => self.events.emit(DomainEvent::PollAutoClosed {
                poll_id: closed.id,
                room_id: closed.room_id.clone(),
                options: closed.options,
            }),
            Err(err) => {
                error!(poll_id = %id, error = %err, "[AutoClose Error] failed to close poll");
            }
        }
    }
}

fn parse_counts(poll_id: Uuid, reply: Option<KvValue>) -> Option<VoteOutcome> {
    let KvValue::Map(pairs) = reply? else {
        return None;
    };
    let mut options = Vec::with_capacity(pairs.len());
    for (field, value) in pairs {
        options.push(VoteCount {
            id: field.parse().ok()?,
            count: value.parse().ok()?,
        });
    }
    options.sort_by_key(|option| option.id);
    Some(VoteOutcome { poll_id, options })
}
