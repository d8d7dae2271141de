//! In-memory key-value backend.
//!
//! Implements the same execution model as the Redis backend, including TTL
//! expiry notifications, and adds deterministic fault injection so tests can
//! force a per-command error or a whole-pipeline rejection.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::sync::broadcast;

use crate::dao::{
    kv::{KvCommand, KvStore, KvValue},
    storage::{StorageError, StorageResult},
};

/// One-shot fault matched against a command kind and a key fragment.
#[derive(Debug, Clone)]
struct Fault {
    kind: &'static str,
    key_fragment: String,
}

#[derive(Default)]
struct Values {
    strings: HashMap<String, String>,
    lists: HashMap<String, Vec<String>>,
    sets: HashMap<String, HashSet<String>>,
    hashes: HashMap<String, HashMap<String, String>>,
}

struct MemoryInner {
    values: Mutex<Values>,
    /// Generation counter per key; a pending expiry timer only fires when the
    /// key's generation still matches the one captured at arm time.
    ttl_epochs: DashMap<String, u64>,
    expired_tx: broadcast::Sender<String>,
    faults: Mutex<Vec<Fault>>,
    pipeline_rejections: AtomicUsize,
}

/// Key-value store held entirely in process memory.
#[derive(Clone)]
pub struct MemoryKvStore {
    inner: Arc<MemoryInner>,
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryKvStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (expired_tx, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(MemoryInner {
                values: Mutex::new(Values::default()),
                ttl_epochs: DashMap::new(),
                expired_tx,
                faults: Mutex::new(Vec::new()),
                pipeline_rejections: AtomicUsize::new(0),
            }),
        }
    }

    /// Queue a one-shot failure for the next command whose kind matches and
    /// whose key contains `key_fragment`.
    pub fn fail_next(&self, kind: &'static str, key_fragment: impl Into<String>) {
        self.inner
            .faults
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Fault {
                kind,
                key_fragment: key_fragment.into(),
            });
    }

    /// Reject the next `count` pipeline round trips outright, before any of
    /// their commands run.
    pub fn reject_pipelines(&self, count: usize) {
        self.inner
            .pipeline_rejections
            .fetch_add(count, Ordering::SeqCst);
    }

    /// Snapshot a stored string value (test inspection).
    pub fn string(&self, key: &str) -> Option<String> {
        self.inner.lock_values().strings.get(key).cloned()
    }

    /// Snapshot a stored list (test inspection).
    pub fn list(&self, key: &str) -> Vec<String> {
        self.inner
            .lock_values()
            .lists
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot a stored set (test inspection).
    pub fn set_members(&self, key: &str) -> HashSet<String> {
        self.inner
            .lock_values()
            .sets
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot a stored hash (test inspection).
    pub fn hash(&self, key: &str) -> HashMap<String, String> {
        self.inner
            .lock_values()
            .hashes
            .get(key)
            .cloned()
            .unwrap_or_default()
    }
}

impl MemoryInner {
    fn lock_values(&self) -> std::sync::MutexGuard<'_, Values> {
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_fault(&self, command: &KvCommand) -> Option<Fault> {
        let mut faults = self
            .faults
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let position = faults
            .iter()
            .position(|fault| fault.kind == command.kind() && command.key().contains(&fault.key_fragment))?;
        Some(faults.remove(position))
    }

    fn bump_epoch(&self, key: &str) -> u64 {
        let mut entry = self.ttl_epochs.entry(key.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    fn arm_expiry(self: &Arc<Self>, key: String, ttl_secs: u64) {
        let epoch = self.bump_epoch(&key);
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(ttl_secs)).await;
            let still_current = inner
                .ttl_epochs
                .get(&key)
                .is_some_and(|current| *current == epoch);
            if !still_current {
                return;
            }
            inner.remove_key(&key);
            let _ = inner.expired_tx.send(key);
        });
    }

    fn remove_key(&self, key: &str) -> bool {
        let mut values = self.lock_values();
        let mut removed = values.strings.remove(key).is_some();
        removed |= values.lists.remove(key).is_some();
        removed |= values.sets.remove(key).is_some();
        removed |= values.hashes.remove(key).is_some();
        removed
    }

    fn key_exists(&self, key: &str) -> bool {
        let values = self.lock_values();
        values.strings.contains_key(key)
            || values.lists.contains_key(key)
            || values.sets.contains_key(key)
            || values.hashes.contains_key(key)
    }

    fn apply(self: &Arc<Self>, command: KvCommand) -> StorageResult<KvValue> {
        if let Some(fault) = self.take_fault(&command) {
            return Err(StorageError::command_failed(
                fault.kind,
                command.key(),
                "injected fault",
            ));
        }

        match command {
            KvCommand::Get { key } => Ok(self
                .lock_values()
                .strings
                .get(&key)
                .map_or(KvValue::Nil, |value| KvValue::Text(value.clone()))),
            KvCommand::Set { key, value } => {
                self.bump_epoch(&key);
                self.lock_values().strings.insert(key, value);
                Ok(KvValue::Ok)
            }
            KvCommand::SetEx {
                key,
                value,
                ttl_secs,
            } => {
                self.lock_values().strings.insert(key.clone(), value);
                self.arm_expiry(key, ttl_secs);
                Ok(KvValue::Ok)
            }
            KvCommand::Del { key } => {
                self.bump_epoch(&key);
                let removed = self.remove_key(&key);
                Ok(KvValue::Int(i64::from(removed)))
            }
            KvCommand::Exists { key } => Ok(KvValue::Int(i64::from(self.key_exists(&key)))),
            KvCommand::Expire { key, ttl_secs } => {
                if !self.key_exists(&key) {
                    return Ok(KvValue::Int(0));
                }
                self.arm_expiry(key, ttl_secs);
                Ok(KvValue::Int(1))
            }
            KvCommand::RPush { key, value } => {
                let mut values = self.lock_values();
                let list = values.lists.entry(key).or_default();
                list.push(value);
                Ok(KvValue::Int(list.len() as i64))
            }
            KvCommand::LRange { key } => Ok(KvValue::List(
                self.lock_values()
                    .lists
                    .get(&key)
                    .cloned()
                    .unwrap_or_default(),
            )),
            KvCommand::LRem { key, value } => {
                let mut values = self.lock_values();
                let Some(list) = values.lists.get_mut(&key) else {
                    return Ok(KvValue::Int(0));
                };
                let before = list.len();
                list.retain(|entry| entry != &value);
                let removed = before - list.len();
                if list.is_empty() {
                    values.lists.remove(&key);
                }
                Ok(KvValue::Int(removed as i64))
            }
            KvCommand::SAdd { key, member } => {
                let added = self
                    .lock_values()
                    .sets
                    .entry(key)
                    .or_default()
                    .insert(member);
                Ok(KvValue::Int(i64::from(added)))
            }
            KvCommand::SRem { key, member } => {
                let mut values = self.lock_values();
                let removed = values
                    .sets
                    .get_mut(&key)
                    .is_some_and(|set| set.remove(&member));
                Ok(KvValue::Int(i64::from(removed)))
            }
            KvCommand::SMembers { key } => {
                let mut members: Vec<String> = self
                    .lock_values()
                    .sets
                    .get(&key)
                    .map(|set| set.iter().cloned().collect())
                    .unwrap_or_default();
                members.sort();
                Ok(KvValue::List(members))
            }
            KvCommand::HSet { key, field, value } => {
                self.lock_values()
                    .hashes
                    .entry(key)
                    .or_default()
                    .insert(field, value);
                Ok(KvValue::Int(1))
            }
            KvCommand::HIncrBy { key, field, delta } => {
                let mut values = self.lock_values();
                let hash = values.hashes.entry(key.clone()).or_default();
                let current = hash
                    .get(&field)
                    .map(|raw| {
                        raw.parse::<i64>().map_err(|_| {
                            StorageError::command_failed(
                                "HINCRBY",
                                key.clone(),
                                "hash value is not an integer",
                            )
                        })
                    })
                    .transpose()?
                    .unwrap_or(0);
                let next = current + delta;
                hash.insert(field, next.to_string());
                Ok(KvValue::Int(next))
            }
            KvCommand::HGetAll { key } => {
                let mut pairs: Vec<(String, String)> = self
                    .lock_values()
                    .hashes
                    .get(&key)
                    .map(|hash| hash.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                    .unwrap_or_default();
                pairs.sort();
                Ok(KvValue::Map(pairs))
            }
        }
    }
}

impl KvStore for MemoryKvStore {
    fn run(&self, command: KvCommand) -> BoxFuture<'static, StorageResult<KvValue>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move { inner.apply(command) })
    }

    fn pipeline(
        &self,
        commands: Vec<KvCommand>,
    ) -> BoxFuture<'static, StorageResult<Vec<StorageResult<KvValue>>>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            let pending = inner.pipeline_rejections.load(Ordering::SeqCst);
            if pending > 0 {
                inner.pipeline_rejections.store(pending - 1, Ordering::SeqCst);
                return Err(StorageError::PipelineRejected(
                    "injected round-trip rejection".into(),
                ));
            }
            // Every command runs; failures stay local to their slot.
            Ok(commands
                .into_iter()
                .map(|command| inner.apply(command))
                .collect())
        })
    }

    fn expired_keys(&self) -> broadcast::Receiver<String> {
        self.inner.expired_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryKvStore {
        MemoryKvStore::new()
    }

    #[tokio::test]
    async fn sadd_reports_prior_membership() {
        let kv = store();
        let first = kv
            .run(KvCommand::SAdd {
                key: "poll:p1:voters".into(),
                member: "u1".into(),
            })
            .await
            .unwrap();
        let second = kv
            .run(KvCommand::SAdd {
                key: "poll:p1:voters".into(),
                member: "u1".into(),
            })
            .await
            .unwrap();
        assert_eq!(first, KvValue::Int(1));
        assert_eq!(second, KvValue::Int(0));
    }

    #[tokio::test]
    async fn pipeline_keeps_running_after_a_command_error() {
        let kv = store();
        kv.fail_next("SET", "b");
        let results = kv
            .pipeline(vec![
                KvCommand::Set {
                    key: "a".into(),
                    value: "1".into(),
                },
                KvCommand::Set {
                    key: "b".into(),
                    value: "2".into(),
                },
                KvCommand::Set {
                    key: "c".into(),
                    value: "3".into(),
                },
            ])
            .await
            .unwrap();
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
        // The command after the failed one still wrote its value.
        assert_eq!(kv.string("c").as_deref(), Some("3"));
        assert_eq!(kv.string("b"), None);
    }

    #[tokio::test]
    async fn rejected_pipeline_runs_nothing() {
        let kv = store();
        kv.reject_pipelines(1);
        let outcome = kv
            .pipeline(vec![KvCommand::Set {
                key: "a".into(),
                value: "1".into(),
            }])
            .await;
        assert!(matches!(outcome, Err(StorageError::PipelineRejected(_))));
        assert_eq!(kv.string("a"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn setex_expiry_notifies_and_removes_the_key() {
        let kv = store();
        let mut expired = kv.expired_keys();
        kv.run(KvCommand::SetEx {
            key: "poll:p1:active".into(),
            value: "1".into(),
            ttl_secs: 30,
        })
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_secs(31)).await;
        let key = expired.recv().await.unwrap();
        assert_eq!(key, "poll:p1:active");
        let exists = kv
            .run(KvCommand::Exists {
                key: "poll:p1:active".into(),
            })
            .await
            .unwrap();
        assert_eq!(exists, KvValue::Int(0));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_disarms_a_pending_expiry() {
        let kv = store();
        let mut expired = kv.expired_keys();
        kv.run(KvCommand::SetEx {
            key: "qna:q1:active".into(),
            value: "1".into(),
            ttl_secs: 10,
        })
        .await
        .unwrap();
        kv.run(KvCommand::Del {
            key: "qna:q1:active".into(),
        })
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(matches!(
            expired.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn hincrby_accumulates_and_reads_back() {
        let kv = store();
        for _ in 0..3 {
            kv.run(KvCommand::HIncrBy {
                key: "poll:p1:counts".into(),
                field: "0".into(),
                delta: 1,
            })
            .await
            .unwrap();
        }
        let all = kv
            .run(KvCommand::HGetAll {
                key: "poll:p1:counts".into(),
            })
            .await
            .unwrap();
        assert_eq!(all, KvValue::Map(vec![("0".into(), "3".into())]));
    }
}
