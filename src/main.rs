//! Lectern Back binary entrypoint wiring the WebSocket gateway, the store,
//! and the background tasks together.

use std::{env, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tokio::time::sleep;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lectern_back::{
    config::AppConfig,
    dao::kv::{KvStore, redis},
    routes,
    services::{broadcast_events, expiry_listener},
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let redis_url = env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into());

    let kv = connect_store(&redis_url).await;
    let app_state = AppState::new(config, kv);

    expiry_listener::spawn_expiry_listener(app_state.clone());
    broadcast_events::spawn_domain_event_fanout(app_state.clone());

    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Connect to the key-value store, retrying with exponential backoff until it
/// answers. The gateway is useless without the store, so startup blocks here.
async fn connect_store(url: &str) -> Arc<dyn KvStore> {
    let mut delay = Duration::from_millis(1000);
    let max_delay = Duration::from_secs(10);

    loop {
        match redis::connect(url).await {
            Ok(store) => {
                info!("connected to the key-value store");
                return Arc::new(store);
            }
            Err(err) => {
                warn!(error = %err, "store connection attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(max_delay);
            }
        }
    }
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
