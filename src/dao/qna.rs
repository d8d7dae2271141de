//! Q&A lifecycle manager.
//!
//! Mirrors the poll manager's batch-create/rollback pattern and adds the
//! append-only answer log plus the auto-close reaction to marker expiry.

use std::sync::Arc;

use tracing::{error, warn};
use uuid::Uuid;

use crate::{
    dao::{
        entity::EntityStore,
        first_error,
        kv::{KvCommand, KvStore, KvValue, collapse_pipeline},
        models::{AnswerEntity, QnaEntity, SessionStatus, StartWindow, now_millis},
        parse_active_marker, run_compensation,
        storage::StorageResult,
    },
    error::InteractionError,
    state::events::{DomainEvent, EventBus},
};

/// Start requested for an id without a stored record.
pub const ERR_QNA_DOES_NOT_EXIST: &str = "Qna does not exist";
/// Submission attempted while the active marker is absent.
pub const ERR_QNA_NOT_ACTIVE: &str = "Qna is not active";
/// Second answer from the same participant.
pub const ERR_DUPLICATE_ANSWER: &str = "Duplicate answer attempt";
/// Close requested for an id without a stored record.
pub const ERR_QNA_NOT_FOUND: &str = "Qna not found";
/// The close batch failed.
pub const ERR_QNA_CLOSE: &str = "Close failed";

fn room_qnas_key(room_id: &str) -> String {
    format!("room:{room_id}:qnas")
}

fn active_key(id: Uuid) -> String {
    format!("qna:{id}:active")
}

fn answerers_key(id: Uuid) -> String {
    format!("qna:{id}:answerers")
}

fn answers_key(id: Uuid) -> String {
    format!("qna:{id}:answers")
}

/// Manager for the Q&A side of the interaction engine.
pub struct QnaManager {
    kv: Arc<dyn KvStore>,
    entities: EntityStore<QnaEntity>,
    events: EventBus,
}

impl QnaManager {
    /// Build a manager on top of the shared store and event bus.
    pub fn new(kv: Arc<dyn KvStore>, events: EventBus) -> Self {
        let entities = EntityStore::new(Arc::clone(&kv), "qna");
        Self {
            kv,
            entities,
            events,
        }
    }

    /// Look up one Q&A by id.
    pub async fn find(&self, id: Uuid) -> StorageResult<Option<QnaEntity>> {
        self.entities.find(&id.to_string()).await
    }

    /// Persist a batch of Q&As and append their ids to the room list.
    ///
    /// Same all-or-nothing contract as the poll batch create: any failure
    /// rolls back every save and every list append of the batch.
    pub async fn add_qnas_to_room(
        &self,
        room_id: &str,
        qnas: &[QnaEntity],
    ) -> Result<(), InteractionError> {
        let list_key = room_qnas_key(room_id);
        let mut forward = Vec::with_capacity(qnas.len() * 2);
        for qna in qnas {
            forward.push(self.entities.save_cmd(&qna.id.to_string(), qna)?);
            forward.push(KvCommand::RPush {
                key: list_key.clone(),
                value: qna.id.to_string(),
            });
        }

        let Some(err) = first_error(self.kv.pipeline(forward).await) else {
            return Ok(());
        };

        let inverse = qnas
            .iter()
            .flat_map(|qna| {
                [
                    self.entities.delete_cmd(&qna.id.to_string()),
                    KvCommand::LRem {
                        key: list_key.clone(),
                        value: qna.id.to_string(),
                    },
                ]
            })
            .collect();
        run_compensation(&*self.kv, inverse, "qna batch create").await;
        Err(err.into())
    }

    /// Fetch every Q&A of a room, in creation order.
    pub async fn qnas_in_room(&self, room_id: &str) -> StorageResult<Vec<QnaEntity>> {
        let ids = match self
            .kv
            .run(KvCommand::LRange {
                key: room_qnas_key(room_id),
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

    /// Open a pending Q&A for submissions; same transition and rollback shape
    /// as the poll start, minus the tally seeding.
    pub async fn start_qna(
        &self,
        id: Uuid,
        time_limit: u64,
    ) -> Result<StartWindow, InteractionError> {
        let Some(qna) = self.find(id).await? else {
            return Err(InteractionError::NotFound(ERR_QNA_DOES_NOT_EXIST.into()));
        };

        let started_at = now_millis();
        let window = StartWindow {
            started_at,
            ended_at: started_at + (time_limit as i64) * 1000,
        };

        let mut started = qna.clone();
        started.status = SessionStatus::Active;
        started.time_limit = time_limit;
        started.started_at = Some(window.started_at);
        started.ended_at = Some(window.ended_at);
        started.updated_at = started_at;

        let marker = active_key(id);
        let forward = vec![
            self.entities.save_cmd(&id.to_string(), &started)?,
            if time_limit > 0 {
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
            },
        ];

        let Some(err) = first_error(self.kv.pipeline(forward).await) else {
            return Ok(window);
        };

        let inverse = vec![
            self.entities.save_cmd(&id.to_string(), &qna)?,
            KvCommand::Del { key: marker },
        ];
        run_compensation(&*self.kv, inverse, "qna start").await;
        Err(err.into())
    }

    /// Record one answer, at most once per participant, returning the number
    /// of answers received so far.
    ///
    /// The append is the single point of truth for "answered": only a failed
    /// write rolls the dedup flag back.
    pub async fn submit_answer(
        &self,
        id: Uuid,
        participant_id: &str,
        participant_name: &str,
        text: &str,
    ) -> Result<u64, InteractionError> {
        let exists = self
            .kv
            .run(KvCommand::Exists {
                key: active_key(id),
            })
            .await?;
        if exists.as_int() != Some(1) {
            return Err(InteractionError::InvalidState(ERR_QNA_NOT_ACTIVE.into()));
        }

        let added = self
            .kv
            .run(KvCommand::SAdd {
                key: answerers_key(id),
                member: participant_id.into(),
            })
            .await?;
        if added.as_int() != Some(1) {
            return Err(InteractionError::Conflict(ERR_DUPLICATE_ANSWER.into()));
        }

        let record = AnswerEntity {
            participant_id: participant_id.into(),
            participant_name: participant_name.into(),
            text: text.into(),
        };
        let value = serde_json::to_string(&record).map_err(|source| {
            crate::dao::storage::StorageError::Encode {
                key: answers_key(id),
                source,
            }
        })?;

        match self
            .kv
            .run(KvCommand::RPush {
                key: answers_key(id),
                value,
            })
            .await
        {
            Ok(reply) => Ok(reply.as_int().unwrap_or_default().max(0) as u64),
            Err(err) => {
                let inverse = vec![KvCommand::SRem {
                    key: answerers_key(id),
                    member: participant_id.into(),
                }];
                run_compensation(&*self.kv, inverse, "answer").await;
                Err(err.into())
            }
        }
    }

    /// Close a Q&A: consume the answer log into the entity and remove every
    /// ephemeral key.
    pub async fn close_qna(&self, id: Uuid) -> Result<QnaEntity, InteractionError> {
        let Some(qna) = self.find(id).await? else {
            return Err(InteractionError::NotFound(ERR_QNA_NOT_FOUND.into()));
        };

        let replies = collapse_pipeline(
            self.kv
                .pipeline(vec![
                    KvCommand::Del {
                        key: active_key(id),
                    },
                    KvCommand::LRange {
                        key: answers_key(id),
                    },
                ])
                .await,
        )
        .map_err(|err| InteractionError::infrastructure(ERR_QNA_CLOSE, err))?;

        let raw_answers = match replies.into_iter().next_back() {
            Some(KvValue::List(entries)) => entries,
            _ => Vec::new(),
        };
        let mut answers = Vec::with_capacity(raw_answers.len());
        for raw in raw_answers {
            match serde_json::from_str::<AnswerEntity>(&raw) {
                Ok(answer) => answers.push(answer),
                Err(err) => {
                    warn!(qna_id = %id, error = %err, "skipping unreadable answer record");
                }
            }
        }

        let mut closed = qna;
        closed.status = SessionStatus::Ended;
        closed.answers = answers;
        closed.updated_at = now_millis();

        let writes = vec![
            self.entities.save_cmd(&id.to_string(), &closed)?,
            KvCommand::Del {
                key: answerers_key(id),
            },
            KvCommand::Del {
                key: answers_key(id),
            },
        ];
        if let Some(err) = first_error(self.kv.pipeline(writes).await) {
            return Err(InteractionError::infrastructure(ERR_QNA_CLOSE, err));
        }

        Ok(closed)
    }

    /// Stored answers of an already-closed Q&A; empty for any other status.
    /// Never triggers a close as a side effect.
    pub fn final_results(&self, qna: &QnaEntity) -> Vec<AnswerEntity> {
        if qna.status == SessionStatus::Ended {
            qna.answers.clone()
        } else {
            Vec::new()
        }
    }

    /// React to an expired active-marker key by closing the Q&A the timer
    /// ran out on.
    ///
    /// There is no request caller on this path; every failure is logged and
    /// swallowed.
    pub async fn handle_auto_close(&self, expired_key: &str) {
        let Some(id) = parse_active_marker(expired_key, "qna") else {
            return;
        };

        let qna = match self.find(id).await {
            Ok(Some(qna)) => qna,
            Ok(None) => {
                warn!(qna_id = %id, "[AutoClose Error] expired marker without a qna entity");
                return;
            }
            Err(err) => {
                error!(qna_id = %id, error = %err, "[AutoClose Error] failed to load qna");
                return;
            }
        };
        if qna.status == SessionStatus::Ended {
            // A manual close raced the timer.
            return;
        }

        match self.close_qna(id).await {
            Ok(closed) => self.events.emit(DomainEvent::QnaAutoClosed {
                qna_id: closed.id,
                room_id: closed.room_id.clone(),
                is_public: closed.is_public,
                answers: closed.answers,
            }),
            Err(err) => {
                error!(qna_id = %id, error = %err, "[AutoClose Error] failed to close qna");
            }
        }
    }
}
