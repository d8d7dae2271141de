//! Key-value substrate shared by the interaction managers.
//!
//! The store offers per-command atomicity only. A [`KvStore::pipeline`] call
//! bundles several commands into one round trip but provides **no**
//! cross-command atomicity: every queued command executes even when an earlier
//! one errors. Callers that need multi-key consistency pair each forward batch
//! with an explicit compensating batch.

pub mod memory;
pub mod redis;

use futures::future::BoxFuture;
use tokio::sync::broadcast;

use crate::dao::storage::{StorageError, StorageResult};

/// One single-key command executed atomically by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvCommand {
    /// Read a string value.
    Get { key: String },
    /// Write a string value.
    Set { key: String, value: String },
    /// Write a string value with a time-to-live in seconds.
    SetEx {
        key: String,
        value: String,
        ttl_secs: u64,
    },
    /// Remove a key of any type.
    Del { key: String },
    /// Check whether a key exists.
    Exists { key: String },
    /// Attach a time-to-live to an existing key.
    Expire { key: String, ttl_secs: u64 },
    /// Append to a list, returning the new length.
    RPush { key: String, value: String },
    /// Read a whole list in insertion order.
    LRange { key: String },
    /// Remove every occurrence of a value from a list.
    LRem { key: String, value: String },
    /// Add a member to a set, returning 1 if it was newly added, 0 if it was
    /// already present.
    SAdd { key: String, member: String },
    /// Remove a member from a set.
    SRem { key: String, member: String },
    /// Read every member of a set.
    SMembers { key: String },
    /// Write one hash field.
    HSet {
        key: String,
        field: String,
        value: String,
    },
    /// Increment a numeric hash field, returning the new value.
    HIncrBy {
        key: String,
        field: String,
        delta: i64,
    },
    /// Read a whole hash.
    HGetAll { key: String },
}

impl KvCommand {
    /// Short command name used in error reports and fault matching.
    pub fn kind(&self) -> &'static str {
        match self {
            KvCommand::Get { .. } => "GET",
            KvCommand::Set { .. } => "SET",
            KvCommand::SetEx { .. } => "SETEX",
            KvCommand::Del { .. } => "DEL",
            KvCommand::Exists { .. } => "EXISTS",
            KvCommand::Expire { .. } => "EXPIRE",
            KvCommand::RPush { .. } => "RPUSH",
            KvCommand::LRange { .. } => "LRANGE",
            KvCommand::LRem { .. } => "LREM",
            KvCommand::SAdd { .. } => "SADD",
            KvCommand::SRem { .. } => "SREM",
            KvCommand::SMembers { .. } => "SMEMBERS",
            KvCommand::HSet { .. } => "HSET",
            KvCommand::HIncrBy { .. } => "HINCRBY",
            KvCommand::HGetAll { .. } => "HGETALL",
        }
    }

    /// Key the command operates on.
    pub fn key(&self) -> &str {
        match self {
            KvCommand::Get { key }
            | KvCommand::Set { key, .. }
            | KvCommand::SetEx { key, .. }
            | KvCommand::Del { key }
            | KvCommand::Exists { key }
            | KvCommand::Expire { key, .. }
            | KvCommand::RPush { key, .. }
            | KvCommand::LRange { key }
            | KvCommand::LRem { key, .. }
            | KvCommand::SAdd { key, .. }
            | KvCommand::SRem { key, .. }
            | KvCommand::SMembers { key }
            | KvCommand::HSet { key, .. }
            | KvCommand::HIncrBy { key, .. }
            | KvCommand::HGetAll { key } => key,
        }
    }
}

/// Reply produced by a [`KvCommand`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvValue {
    /// Plain acknowledgement without a payload.
    Ok,
    /// Missing key or field.
    Nil,
    /// Numeric reply (lengths, membership flags, counters).
    Int(i64),
    /// String value.
    Text(String),
    /// List or set members.
    List(Vec<String>),
    /// Hash contents as field/value pairs.
    Map(Vec<(String, String)>),
}

impl KvValue {
    /// Interpret the reply as an integer, if it is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            KvValue::Int(value) => Some(*value),
            _ => None,
        }
    }
}

/// Abstraction over the key-value backend.
///
/// Mirrors the store's execution model: `run` is atomic per command,
/// `pipeline` is one round trip whose commands succeed or fail independently.
/// The outer `Err` of a pipeline means the round trip itself was rejected.
pub trait KvStore: Send + Sync {
    /// Execute a single command atomically.
    fn run(&self, command: KvCommand) -> BoxFuture<'static, StorageResult<KvValue>>;

    /// Execute a batch of commands as one round trip without cross-command
    /// atomicity.
    fn pipeline(
        &self,
        commands: Vec<KvCommand>,
    ) -> BoxFuture<'static, StorageResult<Vec<StorageResult<KvValue>>>>;

    /// Subscribe to the names of keys whose time-to-live just elapsed.
    fn expired_keys(&self) -> broadcast::Receiver<String>;
}

/// Collapse a pipeline outcome into its replies, surfacing the first error.
///
/// Commands after a failed one still executed, so the caller must treat any
/// error from here as "partial effects are in place" and compensate.
pub fn collapse_pipeline(
    outcome: StorageResult<Vec<StorageResult<KvValue>>>,
) -> Result<Vec<KvValue>, StorageError> {
    let results = outcome?;
    let mut values = Vec::with_capacity(results.len());
    for result in results {
        values.push(result?);
    }
    Ok(values)
}
