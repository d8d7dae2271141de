//! Poll and Q&A application service.
//!
//! Sits between the gateway and the managers: it owns entity synthesis for
//! batch creation, the localized guard messages, option-bounds checking, and
//! the idempotent-stop branch. Everything underneath delegates to the
//! managers unchanged.

use std::sync::Arc;

use uuid::Uuid;

use crate::{
    dao::{
        kv::KvStore,
        models::{PollEntity, PollOptionEntity, QnaEntity, SessionStatus, now_millis},
        poll::{PollManager, VoteOutcome},
        qna::QnaManager,
    },
    dto::interaction::{PollDraft, QnaDraft},
    error::InteractionError,
    state::events::EventBus,
};

/// Lookup by an id the store has never seen, reported in English on the
/// read-only surface.
pub const ERR_COULD_NOT_FIND_POLL: &str = "Could not find poll";
pub const ERR_COULD_NOT_FIND_QNA: &str = "Could not find qna";

/// Localized guards shown to end users on the mutating surface.
pub const ERR_POLL_MISSING: &str = "존재하지 않는 투표입니다.";
pub const ERR_QNA_MISSING: &str = "존재하지 않는 질문입니다.";
pub const ERR_POLL_ALREADY_STARTED: &str = "이미 시작되거나 종료된 투표입니다.";
pub const ERR_QNA_ALREADY_STARTED: &str = "이미 시작되거나 종료된 질문입니다.";
pub const ERR_INVALID_OPTION: &str = "유효하지 않은 선택지입니다.";

/// Facade over the poll and Q&A managers.
pub struct InteractionService {
    polls: PollManager,
    qnas: QnaManager,
}

impl InteractionService {
    /// Build both managers on the shared store and event bus.
    pub fn new(kv: Arc<dyn KvStore>, events: EventBus) -> Self {
        Self {
            polls: PollManager::new(Arc::clone(&kv), events.clone()),
            qnas: QnaManager::new(kv, events),
        }
    }

    /// Synthesize poll entities from drafts and persist them as one batch.
    ///
    /// Option ids are assigned sequentially from zero; an empty batch
    /// returns without touching the store.
    pub async fn create_polls(
        &self,
        room_id: &str,
        drafts: Vec<PollDraft>,
    ) -> Result<Vec<PollEntity>, InteractionError> {
        if drafts.is_empty() {
            return Ok(Vec::new());
        }

        let created_at = now_millis();
        let polls: Vec<PollEntity> = drafts
            .into_iter()
            .map(|draft| PollEntity {
                id: Uuid::new_v4(),
                room_id: room_id.to_string(),
                title: draft.title,
                time_limit: draft.time_limit,
                status: SessionStatus::Pending,
                started_at: None,
                ended_at: None,
                updated_at: created_at,
                options: draft
                    .options
                    .into_iter()
                    .enumerate()
                    .map(|(index, value)| PollOptionEntity {
                        id: index as u32,
                        value,
                        count: 0,
                        voters: Vec::new(),
                    })
                    .collect(),
            })
            .collect();

        self.polls.add_polls_to_room(room_id, &polls).await?;
        Ok(polls)
    }

    /// Synthesize Q&A entities from drafts and persist them as one batch.
    pub async fn create_qnas(
        &self,
        room_id: &str,
        drafts: Vec<QnaDraft>,
    ) -> Result<Vec<QnaEntity>, InteractionError> {
        if drafts.is_empty() {
            return Ok(Vec::new());
        }

        let created_at = now_millis();
        let qnas: Vec<QnaEntity> = drafts
            .into_iter()
            .map(|draft| QnaEntity {
                id: Uuid::new_v4(),
                room_id: room_id.to_string(),
                title: draft.title,
                time_limit: draft.time_limit,
                is_public: draft.is_public,
                status: SessionStatus::Pending,
                started_at: None,
                ended_at: None,
                updated_at: created_at,
                answers: Vec::new(),
            })
            .collect();

        self.qnas.add_qnas_to_room(room_id, &qnas).await?;
        Ok(qnas)
    }

    /// Fetch one poll for display.
    pub async fn poll(&self, id: Uuid) -> Result<PollEntity, InteractionError> {
        self.polls
            .find(id)
            .await?
            .ok_or_else(|| InteractionError::NotFound(ERR_COULD_NOT_FIND_POLL.into()))
    }

    /// Fetch one Q&A for display.
    pub async fn qna(&self, id: Uuid) -> Result<QnaEntity, InteractionError> {
        self.qnas
            .find(id)
            .await?
            .ok_or_else(|| InteractionError::NotFound(ERR_COULD_NOT_FIND_QNA.into()))
    }

    /// Every poll of a room, creation order.
    pub async fn polls_in_room(&self, room_id: &str) -> Result<Vec<PollEntity>, InteractionError> {
        Ok(self.polls.polls_in_room(room_id).await?)
    }

    /// Every Q&A of a room, creation order.
    pub async fn qnas_in_room(&self, room_id: &str) -> Result<Vec<QnaEntity>, InteractionError> {
        Ok(self.qnas.qnas_in_room(room_id).await?)
    }

    /// The room's currently running poll, if any.
    pub async fn active_poll(&self, room_id: &str) -> Result<Option<PollEntity>, InteractionError> {
        let polls = self.polls.polls_in_room(room_id).await?;
        Ok(polls
            .into_iter()
            .find(|poll| poll.status == SessionStatus::Active))
    }

    /// The room's currently running Q&A, if any.
    pub async fn active_qna(&self, room_id: &str) -> Result<Option<QnaEntity>, InteractionError> {
        let qnas = self.qnas.qnas_in_room(room_id).await?;
        Ok(qnas
            .into_iter()
            .find(|qna| qna.status == SessionStatus::Active))
    }

    /// Start a pending poll, optionally overriding its stored time limit,
    /// and return the started entity.
    pub async fn start_poll(
        &self,
        id: Uuid,
        time_limit: Option<u64>,
    ) -> Result<PollEntity, InteractionError> {
        let Some(poll) = self.polls.find(id).await? else {
            return Err(InteractionError::NotFound(ERR_POLL_MISSING.into()));
        };
        if poll.status != SessionStatus::Pending {
            return Err(InteractionError::InvalidState(
                ERR_POLL_ALREADY_STARTED.into(),
            ));
        }

        let limit = time_limit.unwrap_or(poll.time_limit);
        let window = self.polls.start_poll(&poll, limit).await?;

        let mut started = poll;
        started.status = SessionStatus::Active;
        started.time_limit = limit;
        started.started_at = Some(window.started_at);
        started.ended_at = Some(window.ended_at);
        Ok(started)
    }

    /// Start a pending Q&A, optionally overriding its stored time limit.
    pub async fn start_qna(
        &self,
        id: Uuid,
        time_limit: Option<u64>,
    ) -> Result<QnaEntity, InteractionError> {
        let Some(qna) = self.qnas.find(id).await? else {
            return Err(InteractionError::NotFound(ERR_QNA_MISSING.into()));
        };
        if qna.status != SessionStatus::Pending {
            return Err(InteractionError::InvalidState(
                ERR_QNA_ALREADY_STARTED.into(),
            ));
        }

        let limit = time_limit.unwrap_or(qna.time_limit);
        let window = self.qnas.start_qna(id, limit).await?;

        let mut started = qna;
        started.status = SessionStatus::Active;
        started.time_limit = limit;
        started.started_at = Some(window.started_at);
        started.ended_at = Some(window.ended_at);
        Ok(started)
    }

    /// Record one vote after bounds-checking the option index.
    ///
    /// The index arrives signed from the wire; anything outside
    /// `0..options.len()` is rejected here so the manager only ever sees a
    /// valid option id.
    pub async fn vote(
        &self,
        poll_id: Uuid,
        participant_id: &str,
        option_id: i64,
    ) -> Result<VoteOutcome, InteractionError> {
        let Some(poll) = self.polls.find(poll_id).await? else {
            return Err(InteractionError::NotFound(ERR_POLL_MISSING.into()));
        };
        if option_id < 0 || option_id >= poll.options.len() as i64 {
            return Err(InteractionError::InvalidInput(ERR_INVALID_OPTION.into()));
        }

        self.polls
            .submit_vote(&poll, participant_id, option_id as u32)
            .await
    }

    /// Record one answer, returning the number received so far.
    pub async fn answer(
        &self,
        qna_id: Uuid,
        participant_id: &str,
        participant_name: &str,
        text: &str,
    ) -> Result<u64, InteractionError> {
        if self.qnas.find(qna_id).await?.is_none() {
            return Err(InteractionError::NotFound(ERR_QNA_MISSING.into()));
        }
        self.qnas
            .submit_answer(qna_id, participant_id, participant_name, text)
            .await
    }

    /// Stop a poll, or return the stored results when it already ended.
    ///
    /// The two branches are mutually exclusive: an ended poll is never
    /// re-closed and never re-written.
    pub async fn stop_poll(&self, id: Uuid) -> Result<PollEntity, InteractionError> {
        let Some(poll) = self.polls.find(id).await? else {
            return Err(InteractionError::NotFound(ERR_POLL_MISSING.into()));
        };
        if poll.status == SessionStatus::Ended {
            let options = self.polls.final_results(&poll);
            let mut ended = poll;
            ended.options = options;
            return Ok(ended);
        }
        self.polls.close_poll(&poll).await
    }

    /// Stop a Q&A, or return the stored results when it already ended.
    pub async fn stop_qna(&self, id: Uuid) -> Result<QnaEntity, InteractionError> {
        let Some(qna) = self.qnas.find(id).await? else {
            return Err(InteractionError::NotFound(ERR_QNA_MISSING.into()));
        };
        if qna.status == SessionStatus::Ended {
            let answers = self.qnas.final_results(&qna);
            let mut ended = qna;
            ended.answers = answers;
            return Ok(ended);
        }
        self.qnas.close_qna(id).await
    }

    /// Dispatch one expired-key notification to the manager owning the key's
    /// namespace. Unrelated keys are ignored.
    pub async fn handle_expired_key(&self, key: &str) {
        if key.starts_with("poll:") {
            self.polls.handle_auto_close(key).await;
        } else if key.starts_with("qna:") {
            self.qnas.handle_auto_close(key).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::kv::memory::MemoryKvStore;
    use crate::dao::poll::ERR_DUPLICATE_VOTE;

    fn service(kv: &MemoryKvStore) -> InteractionService {
        InteractionService::new(Arc::new(kv.clone()), EventBus::new(16))
    }

    fn poll_draft(title: &str, options: &[&str]) -> PollDraft {
        PollDraft {
            title: title.into(),
            time_limit: 60,
            options: options.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn qna_draft(title: &str, is_public: bool) -> QnaDraft {
        QnaDraft {
            title: title.into(),
            time_limit: 60,
            is_public,
        }
    }

    #[tokio::test]
    async fn create_assigns_sequential_option_ids() {
        let kv = MemoryKvStore::new();
        let svc = service(&kv);
        let created = svc
            .create_polls("r1", vec![poll_draft("lunch?", &["A", "B", "C"])])
            .await
            .unwrap();
        let ids: Vec<u32> = created[0].options.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(created[0].status, SessionStatus::Pending);
    }

    #[tokio::test]
    async fn empty_batches_do_not_touch_the_store() {
        let kv = MemoryKvStore::new();
        let svc = service(&kv);
        // A rejected round trip would surface if anything were sent.
        kv.reject_pipelines(1);
        assert!(svc.create_polls("r1", vec![]).await.unwrap().is_empty());
        assert!(svc.create_qnas("r1", vec![]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn vote_bounds_reject_negative_and_len() {
        let kv = MemoryKvStore::new();
        let svc = service(&kv);
        let created = svc
            .create_polls("r1", vec![poll_draft("lunch?", &["A", "B"])])
            .await
            .unwrap();
        let id = created[0].id;
        svc.start_poll(id, None).await.unwrap();

        for bad in [-1i64, 2] {
            let err = svc.vote(id, "u1", bad).await.unwrap_err();
            assert!(
                matches!(err, InteractionError::InvalidInput(message) if message == ERR_INVALID_OPTION)
            );
        }
        // The boundary values never reached the dedup set.
        assert!(svc.vote(id, "u1", 1).await.is_ok());
    }

    #[tokio::test]
    async fn full_poll_scenario_votes_then_stop_snapshots_voters() {
        let kv = MemoryKvStore::new();
        let svc = service(&kv);
        let created = svc
            .create_polls("r1", vec![poll_draft("lunch?", &["A", "B"])])
            .await
            .unwrap();
        let id = created[0].id;
        svc.start_poll(id, None).await.unwrap();

        let outcome = svc.vote(id, "u1", 0).await.unwrap();
        let counts: Vec<u64> = outcome.options.iter().map(|o| o.count).collect();
        assert_eq!(counts, vec![1, 0]);

        let err = svc.vote(id, "u1", 0).await.unwrap_err();
        assert!(matches!(err, InteractionError::Conflict(message) if message == ERR_DUPLICATE_VOTE));

        let ended = svc.stop_poll(id).await.unwrap();
        assert_eq!(ended.status, SessionStatus::Ended);
        assert_eq!(ended.options[0].voters, vec!["u1".to_string()]);
        assert!(ended.options[1].voters.is_empty());
    }

    #[tokio::test]
    async fn stop_is_idempotent_without_rewriting() {
        let kv = MemoryKvStore::new();
        let svc = service(&kv);
        let created = svc
            .create_polls("r1", vec![poll_draft("lunch?", &["A", "B"])])
            .await
            .unwrap();
        let id = created[0].id;
        svc.start_poll(id, None).await.unwrap();
        svc.vote(id, "u1", 0).await.unwrap();

        let first = svc.stop_poll(id).await.unwrap();

        // Any write on the second stop would hit this fault and fail.
        kv.fail_next("SET", &id.to_string());
        let second = svc.stop_poll(id).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn starting_twice_is_rejected_with_the_localized_guard() {
        let kv = MemoryKvStore::new();
        let svc = service(&kv);
        let created = svc
            .create_qnas("r1", vec![qna_draft("ask", true)])
            .await
            .unwrap();
        let id = created[0].id;
        svc.start_qna(id, None).await.unwrap();

        let err = svc.start_qna(id, None).await.unwrap_err();
        assert!(
            matches!(err, InteractionError::InvalidState(message) if message == ERR_QNA_ALREADY_STARTED)
        );
    }

    #[tokio::test]
    async fn missing_ids_use_the_localized_not_found_messages() {
        let kv = MemoryKvStore::new();
        let svc = service(&kv);
        let id = Uuid::new_v4();

        let err = svc.start_poll(id, None).await.unwrap_err();
        assert!(matches!(err, InteractionError::NotFound(message) if message == ERR_POLL_MISSING));
        let err = svc.vote(id, "u1", 0).await.unwrap_err();
        assert!(matches!(err, InteractionError::NotFound(message) if message == ERR_POLL_MISSING));
        let err = svc.answer(id, "u1", "Mina", "hi").await.unwrap_err();
        assert!(matches!(err, InteractionError::NotFound(message) if message == ERR_QNA_MISSING));
        let err = svc.poll(id).await.unwrap_err();
        assert!(
            matches!(err, InteractionError::NotFound(message) if message == ERR_COULD_NOT_FIND_POLL)
        );
    }

    #[tokio::test]
    async fn active_lookup_returns_only_the_running_session() {
        let kv = MemoryKvStore::new();
        let svc = service(&kv);
        let created = svc
            .create_polls(
                "r1",
                vec![poll_draft("first", &["A", "B"]), poll_draft("second", &["A", "B"])],
            )
            .await
            .unwrap();

        assert!(svc.active_poll("r1").await.unwrap().is_none());
        svc.start_poll(created[1].id, None).await.unwrap();
        let active = svc.active_poll("r1").await.unwrap().unwrap();
        assert_eq!(active.id, created[1].id);
    }

    #[tokio::test]
    async fn expired_keys_are_routed_by_namespace() {
        let kv = MemoryKvStore::new();
        let svc = service(&kv);
        let created = svc
            .create_polls("r1", vec![poll_draft("lunch?", &["A", "B"])])
            .await
            .unwrap();
        let id = created[0].id;
        svc.start_poll(id, None).await.unwrap();

        svc.handle_expired_key(&format!("poll:{id}:active")).await;
        assert_eq!(svc.poll(id).await.unwrap().status, SessionStatus::Ended);

        // Foreign namespaces fall through untouched.
        svc.handle_expired_key("session:xyz").await;
    }
}
