//! Chat Relay Server Library
//!
//! Live sessions, presence broadcast, and message relay over WebSocket,
//! with SQLite-backed history.

pub mod chat;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod protocol;
pub mod store;

use axum::{
    http::{HeaderValue, Method},
    routing::get,
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::{AppState, RelayConfig};
use handlers::{
    create_message, delete_message, get_conversation, get_message_stats, get_presence,
    get_recent_messages, health_check, list_online_users, ws_upgrade,
};

/// Build the router over an already constructed state.
pub fn router(state: AppState) -> Router {
    let cors = match state.config.client_origin.parse::<HeaderValue>() {
        Ok(origin) => CorsLayer::new().allow_origin(origin),
        Err(_) => {
            warn!(
                "Invalid CLIENT_URL {:?}, allowing any origin",
                state.config.client_origin
            );
            CorsLayer::new().allow_origin(Any)
        }
    }
    .allow_methods([Method::GET, Method::POST, Method::DELETE])
    .allow_headers(Any);

    Router::new()
        // Live channel
        .route("/ws", get(ws_upgrade))
        // Message history
        .route("/api/messages", axum::routing::post(create_message))
        .route("/api/messages/recent/{user_id}", get(get_recent_messages))
        .route("/api/messages/stats/{user_id}", get(get_message_stats))
        .route(
            "/api/messages/{sender_id}/{receiver_id}",
            get(get_conversation).delete(delete_message),
        )
        // Presence
        .route("/api/users/online", get(list_online_users))
        .route("/api/users/{user_id}/presence", get(get_presence))
        .route("/api/health", get(health_check))
        .with_state(state)
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_err()
    {
        // Already set, ignore
    }
}

pub async fn run() -> anyhow::Result<()> {
    init_tracing();

    let config = RelayConfig::from_env();
    info!("=== Chat Relay Server ===");
    info!("Store: {:?} ({})", config.store, config.database_url);

    let store = config.open_store().await?;
    match store::clear_stale_presence(&*store).await {
        Ok(0) => {}
        Ok(n) => info!("Reset {} users left online by a previous run", n),
        Err(e) => warn!("Could not reset stale presence: {}", e),
    }
    let bind_addr = config.bind_addr;
    let state = AppState::new(config, store);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("Listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
