//! Generic entity access over the key-value store.
//!
//! One record type per store instance, persisted as a JSON string under
//! `{prefix}:{id}`. Besides plain async accessors this exposes command
//! builders so the managers can splice entity writes into multi-key pipelines
//! and pair them with compensating deletes.

use std::{marker::PhantomData, sync::Arc};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::dao::{
    kv::{KvCommand, KvStore, KvValue},
    storage::{StorageError, StorageResult},
};

/// Typed save/find/update-partial/delete facade for one record type.
pub struct EntityStore<T> {
    kv: Arc<dyn KvStore>,
    prefix: &'static str,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for EntityStore<T> {
    fn clone(&self) -> Self {
        Self {
            kv: Arc::clone(&self.kv),
            prefix: self.prefix,
            _entity: PhantomData,
        }
    }
}

impl<T> EntityStore<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Create a store for entities living under `{prefix}:{id}`.
    pub fn new(kv: Arc<dyn KvStore>, prefix: &'static str) -> Self {
        Self {
            kv,
            prefix,
            _entity: PhantomData,
        }
    }

    /// Storage key for an entity id.
    pub fn key(&self, id: &str) -> String {
        format!("{}:{}", self.prefix, id)
    }

    /// Build the SET command persisting `entity`, for use inside pipelines.
    pub fn save_cmd(&self, id: &str, entity: &T) -> StorageResult<KvCommand> {
        let key = self.key(id);
        let value = serde_json::to_string(entity).map_err(|source| StorageError::Encode {
            key: key.clone(),
            source,
        })?;
        Ok(KvCommand::Set { key, value })
    }

    /// Build the DEL command removing the entity, the inverse of `save_cmd`.
    pub fn delete_cmd(&self, id: &str) -> KvCommand {
        KvCommand::Del { key: self.key(id) }
    }

    /// Persist an entity.
    pub async fn save(&self, id: &str, entity: &T) -> StorageResult<()> {
        let command = self.save_cmd(id, entity)?;
        self.kv.run(command).await?;
        Ok(())
    }

    /// Fetch an entity by id.
    pub async fn find(&self, id: &str) -> StorageResult<Option<T>> {
        let key = self.key(id);
        match self.kv.run(KvCommand::Get { key: key.clone() }).await? {
            KvValue::Text(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|source| StorageError::Decode { key, source }),
            KvValue::Nil => Ok(None),
            _ => Err(StorageError::UnexpectedReply { kind: "GET", key }),
        }
    }

    /// Bulk-fetch entities in the given id order, as one pipeline of reads.
    ///
    /// Ids without a stored record are skipped rather than erroring, so a
    /// half-deleted room list still yields its surviving entries.
    pub async fn find_many(&self, ids: &[String]) -> StorageResult<Vec<T>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let commands = ids
            .iter()
            .map(|id| KvCommand::Get { key: self.key(id) })
            .collect();
        let results = self.kv.pipeline(commands).await?;

        let mut entities = Vec::with_capacity(ids.len());
        for (id, result) in ids.iter().zip(results) {
            match result? {
                KvValue::Text(raw) => {
                    let entity = serde_json::from_str(&raw).map_err(|source| {
                        StorageError::Decode {
                            key: self.key(id),
                            source,
                        }
                    })?;
                    entities.push(entity);
                }
                KvValue::Nil => {}
                _ => {
                    return Err(StorageError::UnexpectedReply {
                        kind: "GET",
                        key: self.key(id),
                    });
                }
            }
        }
        Ok(entities)
    }

    /// Merge a JSON object patch into the stored entity and write it back.
    ///
    /// Returns the patched entity, or `None` when no record exists. The
    /// read-merge-write is not atomic; callers relying on it sit behind
    /// status guards that make lost updates benign.
    pub async fn update_partial(&self, id: &str, patch: &Value) -> StorageResult<Option<T>> {
        let key = self.key(id);
        let raw = match self.kv.run(KvCommand::Get { key: key.clone() }).await? {
            KvValue::Text(raw) => raw,
            KvValue::Nil => return Ok(None),
            _ => return Err(StorageError::UnexpectedReply { kind: "GET", key }),
        };
        let mut stored: Value = serde_json::from_str(&raw).map_err(|source| {
            StorageError::Decode {
                key: key.clone(),
                source,
            }
        })?;
        merge_object(&mut stored, patch);
        let entity: T = serde_json::from_value(stored.clone()).map_err(|source| {
            StorageError::Decode {
                key: key.clone(),
                source,
            }
        })?;
        let value = serde_json::to_string(&stored).map_err(|source| StorageError::Encode {
            key: key.clone(),
            source,
        })?;
        self.kv.run(KvCommand::Set { key, value }).await?;
        Ok(Some(entity))
    }

    /// Remove an entity.
    pub async fn delete(&self, id: &str) -> StorageResult<()> {
        self.kv.run(self.delete_cmd(id)).await?;
        Ok(())
    }
}

/// Shallow-merge `patch`'s top-level fields into `target`.
fn merge_object(target: &mut Value, patch: &Value) {
    let (Value::Object(target), Value::Object(patch)) = (target, patch) else {
        return;
    };
    for (field, value) in patch {
        target.insert(field.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde::Deserialize;

    use super::*;
    use crate::dao::kv::memory::MemoryKvStore;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
    struct Record {
        id: String,
        title: String,
        status: String,
        counters: HashMap<String, u64>,
    }

    fn record(id: &str) -> Record {
        Record {
            id: id.into(),
            title: "sample".into(),
            status: "pending".into(),
            counters: HashMap::new(),
        }
    }

    fn store(kv: &MemoryKvStore) -> EntityStore<Record> {
        EntityStore::new(Arc::new(kv.clone()), "record")
    }

    #[tokio::test]
    async fn save_and_find_round_trip() {
        let kv = MemoryKvStore::new();
        let records = store(&kv);
        records.save("r1", &record("r1")).await.unwrap();
        let found = records.find("r1").await.unwrap();
        assert_eq!(found, Some(record("r1")));
        assert_eq!(records.find("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn find_many_preserves_order_and_skips_missing() {
        let kv = MemoryKvStore::new();
        let records = store(&kv);
        records.save("a", &record("a")).await.unwrap();
        records.save("c", &record("c")).await.unwrap();

        let found = records
            .find_many(&["a".into(), "b".into(), "c".into()])
            .await
            .unwrap();
        let ids: Vec<&str> = found.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["a", "c"]);
    }

    #[tokio::test]
    async fn update_partial_touches_only_patched_fields() {
        let kv = MemoryKvStore::new();
        let records = store(&kv);
        records.save("r1", &record("r1")).await.unwrap();

        let patched = records
            .update_partial("r1", &serde_json::json!({"status": "active"}))
            .await
            .unwrap()
            .expect("record exists");
        assert_eq!(patched.status, "active");
        assert_eq!(patched.title, "sample");

        let absent = records
            .update_partial("nope", &serde_json::json!({"status": "active"}))
            .await
            .unwrap();
        assert!(absent.is_none());
    }
}
