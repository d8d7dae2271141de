//! Background task reacting to expired active markers.
//!
//! The store publishes expired key names on a broadcast channel; this task
//! consumes them and forwards each to the interaction service, which closes
//! the session the timer ran out on. No client-facing call ever awaits this
//! path.

use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};
use tracing::{info, warn};

use crate::state::SharedState;

/// Run the expired-key consumer until the store's channel closes.
pub fn spawn_expiry_listener(state: SharedState) -> JoinHandle<()> {
    // Subscribe before spawning so markers that expire right after this call
    // are already buffered for the task.
    let mut expired = state.kv().expired_keys();
    tokio::spawn(async move {
        loop {
            match expired.recv().await {
                Ok(key) => state.interactions().handle_expired_key(&key).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "expiry listener lagged behind the store");
                }
                Err(RecvError::Closed) => {
                    info!("expired-key channel closed; stopping expiry listener");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{kv::memory::MemoryKvStore, models::SessionStatus},
        dto::interaction::PollDraft,
        state::AppState,
    };

    #[tokio::test(start_paused = true)]
    async fn expired_marker_ends_the_poll() {
        let kv = MemoryKvStore::new();
        let state = AppState::new(AppConfig::default(), Arc::new(kv));
        let listener = spawn_expiry_listener(Arc::clone(&state));

        let created = state
            .interactions()
            .create_polls(
                "r1",
                vec![PollDraft {
                    title: "lunch?".into(),
                    time_limit: 5,
                    options: vec!["A".into(), "B".into()],
                }],
            )
            .await
            .unwrap();
        let id = created[0].id;
        state.interactions().start_poll(id, None).await.unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;
        // Paused time only advances while every task is idle, so one more
        // sleep guarantees the listener has drained the notification.
        tokio::time::sleep(Duration::from_millis(10)).await;

        let poll = state.interactions().poll(id).await.unwrap();
        assert_eq!(poll.status, SessionStatus::Ended);
        listener.abort();
    }
}
