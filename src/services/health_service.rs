use tracing::warn;

use crate::{dao::kv::KvCommand, dto::health::HealthResponse, state::SharedState};

/// Probe the store with a cheap read and report health accordingly.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state
        .kv()
        .run(KvCommand::Exists {
            key: "health:probe".into(),
        })
        .await
    {
        Ok(_) => HealthResponse::ok(),
        Err(err) => {
            warn!(error = %err, "storage health check failed");
            HealthResponse::degraded()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{config::AppConfig, dao::kv::memory::MemoryKvStore, state::AppState};

    #[tokio::test]
    async fn reports_ok_when_the_store_responds() {
        let state = AppState::new(AppConfig::default(), Arc::new(MemoryKvStore::new()));
        assert_eq!(health_status(&state).await.status, "ok");
    }

    #[tokio::test]
    async fn reports_degraded_on_storage_failure() {
        let kv = MemoryKvStore::new();
        kv.fail_next("EXISTS", "health:probe");
        let state = AppState::new(AppConfig::default(), Arc::new(kv));
        assert_eq!(health_status(&state).await.status, "degraded");
    }
}
