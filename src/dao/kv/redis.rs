//! Redis backend for the key-value substrate.
//!
//! Pipelines are issued as a single round trip via `redis::pipe()`. Keyspace
//! expiry notifications (`notify-keyspace-events Ex` must be enabled on the
//! server) are forwarded into a broadcast channel so the expiry listener can
//! react to auto-close triggers.

use futures::{StreamExt, future::BoxFuture};
use redis::{Client, Value, aio::MultiplexedConnection};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::dao::{
    kv::{KvCommand, KvStore, KvValue},
    storage::{StorageError, StorageResult},
};

/// Pattern matching the keyspace event channel for expired keys on any database.
const EXPIRED_EVENT_PATTERN: &str = "__keyevent@*__:expired";

/// Key-value store backed by a Redis server.
#[derive(Clone)]
pub struct RedisKvStore {
    connection: MultiplexedConnection,
    expired_tx: broadcast::Sender<String>,
}

/// Open a multiplexed connection and start the expiry-notification listener.
pub async fn connect(url: &str) -> StorageResult<RedisKvStore> {
    let client = Client::open(url)
        .map_err(|err| StorageError::unavailable(format!("invalid redis url `{url}`"), err))?;
    let connection = client
        .get_multiplexed_tokio_connection()
        .await
        .map_err(|err| StorageError::unavailable("redis connection failed".into(), err))?;

    let (expired_tx, _) = broadcast::channel(256);
    spawn_expiry_listener(client, expired_tx.clone()).await?;

    info!("connected to redis key-value store");
    Ok(RedisKvStore {
        connection,
        expired_tx,
    })
}

/// Subscribe to expired-key notifications and forward key names to the hub.
async fn spawn_expiry_listener(
    client: Client,
    expired_tx: broadcast::Sender<String>,
) -> StorageResult<()> {
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .map_err(|err| StorageError::unavailable("redis pubsub connection failed".into(), err))?;
    pubsub
        .psubscribe(EXPIRED_EVENT_PATTERN)
        .await
        .map_err(|err| StorageError::unavailable("expired-key subscription failed".into(), err))?;

    tokio::spawn(async move {
        let mut messages = pubsub.on_message();
        while let Some(message) = messages.next().await {
            match message.get_payload::<String>() {
                Ok(key) => {
                    let _ = expired_tx.send(key);
                }
                Err(err) => warn!(error = %err, "unreadable expired-key notification"),
            }
        }
        warn!("expired-key notification stream ended");
    });

    Ok(())
}

fn to_cmd(command: &KvCommand) -> redis::Cmd {
    match command {
        KvCommand::Get { key } => {
            let mut cmd = redis::cmd("GET");
            cmd.arg(key);
            cmd
        }
        KvCommand::Set { key, value } => {
            let mut cmd = redis::cmd("SET");
            cmd.arg(key).arg(value);
            cmd
        }
        KvCommand::SetEx {
            key,
            value,
            ttl_secs,
        } => {
            let mut cmd = redis::cmd("SETEX");
            cmd.arg(key).arg(*ttl_secs).arg(value);
            cmd
        }
        KvCommand::Del { key } => {
            let mut cmd = redis::cmd("DEL");
            cmd.arg(key);
            cmd
        }
        KvCommand::Exists { key } => {
            let mut cmd = redis::cmd("EXISTS");
            cmd.arg(key);
            cmd
        }
        KvCommand::Expire { key, ttl_secs } => {
            let mut cmd = redis::cmd("EXPIRE");
            cmd.arg(key).arg(*ttl_secs);
            cmd
        }
        KvCommand::RPush { key, value } => {
            let mut cmd = redis::cmd("RPUSH");
            cmd.arg(key).arg(value);
            cmd
        }
        KvCommand::LRange { key } => {
            let mut cmd = redis::cmd("LRANGE");
            cmd.arg(key).arg(0).arg(-1);
            cmd
        }
        KvCommand::LRem { key, value } => {
            let mut cmd = redis::cmd("LREM");
            cmd.arg(key).arg(0).arg(value);
            cmd
        }
        KvCommand::SAdd { key, member } => {
            let mut cmd = redis::cmd("SADD");
            cmd.arg(key).arg(member);
            cmd
        }
        KvCommand::SRem { key, member } => {
            let mut cmd = redis::cmd("SREM");
            cmd.arg(key).arg(member);
            cmd
        }
        KvCommand::SMembers { key } => {
            let mut cmd = redis::cmd("SMEMBERS");
            cmd.arg(key);
            cmd
        }
        KvCommand::HSet { key, field, value } => {
            let mut cmd = redis::cmd("HSET");
            cmd.arg(key).arg(field).arg(value);
            cmd
        }
        KvCommand::HIncrBy { key, field, delta } => {
            let mut cmd = redis::cmd("HINCRBY");
            cmd.arg(key).arg(field).arg(*delta);
            cmd
        }
        KvCommand::HGetAll { key } => {
            let mut cmd = redis::cmd("HGETALL");
            cmd.arg(key);
            cmd
        }
    }
}

fn text_of(value: Value) -> Option<String> {
    match value {
        Value::BulkString(bytes) => String::from_utf8(bytes).ok(),
        Value::SimpleString(text) => Some(text),
        Value::Int(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Convert a raw Redis reply into the backend-neutral value type.
fn convert_reply(command: &KvCommand, value: Value) -> StorageResult<KvValue> {
    let unexpected = || StorageError::UnexpectedReply {
        kind: command.kind(),
        key: command.key().to_string(),
    };
    match value {
        Value::Okay => Ok(KvValue::Ok),
        Value::Nil => Ok(KvValue::Nil),
        Value::Int(number) => Ok(KvValue::Int(number)),
        Value::SimpleString(text) => Ok(KvValue::Text(text)),
        Value::BulkString(bytes) => String::from_utf8(bytes)
            .map(KvValue::Text)
            .map_err(|_| unexpected()),
        Value::Array(entries) => match command {
            // RESP2 returns hashes as a flat field/value array.
            KvCommand::HGetAll { .. } => {
                let mut pairs = Vec::with_capacity(entries.len() / 2);
                let mut iter = entries.into_iter();
                while let Some(field) = iter.next() {
                    let value = iter.next().ok_or_else(unexpected)?;
                    pairs.push((
                        text_of(field).ok_or_else(unexpected)?,
                        text_of(value).ok_or_else(unexpected)?,
                    ));
                }
                Ok(KvValue::Map(pairs))
            }
            _ => entries
                .into_iter()
                .map(|entry| text_of(entry).ok_or_else(unexpected))
                .collect::<StorageResult<Vec<String>>>()
                .map(KvValue::List),
        },
        Value::Map(entries) => {
            let mut pairs = Vec::with_capacity(entries.len());
            for (field, value) in entries {
                pairs.push((
                    text_of(field).ok_or_else(unexpected)?,
                    text_of(value).ok_or_else(unexpected)?,
                ));
            }
            Ok(KvValue::Map(pairs))
        }
        _ => Err(unexpected()),
    }
}

impl KvStore for RedisKvStore {
    fn run(&self, command: KvCommand) -> BoxFuture<'static, StorageResult<KvValue>> {
        let mut connection = self.connection.clone();
        Box::pin(async move {
            let reply: Value = to_cmd(&command)
                .query_async(&mut connection)
                .await
                .map_err(|err| {
                    StorageError::command_failed(command.kind(), command.key(), err.to_string())
                })?;
            convert_reply(&command, reply)
        })
    }

    fn pipeline(
        &self,
        commands: Vec<KvCommand>,
    ) -> BoxFuture<'static, StorageResult<Vec<StorageResult<KvValue>>>> {
        let mut connection = self.connection.clone();
        Box::pin(async move {
            let mut pipe = redis::pipe();
            for command in &commands {
                pipe.add_command(to_cmd(command));
            }
            // The client surfaces the first command error as the call error;
            // later commands still executed server-side, which is why callers
            // compensate for the whole batch rather than a prefix of it.
            let replies: Vec<Value> = pipe
                .query_async(&mut connection)
                .await
                .map_err(|err| StorageError::PipelineRejected(err.to_string()))?;
            Ok(commands
                .iter()
                .zip(replies)
                .map(|(command, reply)| convert_reply(command, reply))
                .collect())
        })
    }

    fn expired_keys(&self) -> broadcast::Receiver<String> {
        self.expired_tx.subscribe()
    }
}
