//! Data access layer: key-value substrate, entity stores, and the poll/Q&A
//! managers that emulate transactional behavior with compensating rollbacks.

pub mod entity;
pub mod kv;
pub mod models;
pub mod poll;
pub mod qna;
pub mod storage;

use tracing::error;

use crate::dao::{
    kv::{KvCommand, KvStore},
    storage::StorageError,
};

/// Issue the inverse operations of a partially applied batch.
///
/// A failed rollback leaves the store inconsistent; that condition is fatal
/// and logged with a fixed greppable tag, while the original batch error is
/// what callers surface.
pub(crate) async fn run_compensation(kv: &dyn KvStore, commands: Vec<KvCommand>, context: &str) {
    let failure = match kv.pipeline(commands).await {
        Ok(results) => results.into_iter().find_map(Result::err),
        Err(err) => Some(err),
    };
    if let Some(err) = failure {
        error!(context, error = %err, "[CRITICAL] Rollback failed");
    }
}

/// Extract the entity id from an expired active-marker key such as
/// `poll:{id}:active`.
pub(crate) fn parse_active_marker(expired_key: &str, prefix: &str) -> Option<uuid::Uuid> {
    let rest = expired_key.strip_prefix(prefix)?.strip_prefix(':')?;
    let id = rest.strip_suffix(":active")?;
    id.parse().ok()
}

/// Surface the first error of an already-run pipeline without compensating.
pub(crate) fn first_error(
    results: Result<Vec<Result<kv::KvValue, StorageError>>, StorageError>,
) -> Option<StorageError> {
    match results {
        Ok(results) => results.into_iter().find_map(Result::err),
        Err(err) => Some(err),
    }
}
