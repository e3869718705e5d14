//! HTTP control plane: lobby directory, short codes, punch and relay
//! envelopes, health.

pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{delete, get, post};
use chrono::{DateTime, Utc};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::directory::{LobbyDirectory, ShortCodeRegistry};
use crate::punch::PunchCoordinator;
use crate::relay::RelayServer;

/// Shared state behind every HTTP handler. The punch and relay slots are
/// `None` when the subsystem is disabled; their endpoints answer 503.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub directory: Arc<LobbyDirectory>,
    pub codes: Arc<ShortCodeRegistry>,
    pub punch: Option<Arc<PunchCoordinator>>,
    pub relay: Option<Arc<RelayServer>>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        directory: Arc<LobbyDirectory>,
        codes: Arc<ShortCodeRegistry>,
        punch: Option<Arc<PunchCoordinator>>,
        relay: Option<Arc<RelayServer>>,
    ) -> Self {
        Self {
            config,
            directory,
            codes,
            punch,
            relay,
            started_at: Utc::now(),
        }
    }
}

/// Build the full API router.
pub fn create_router(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/api/lobbies",
            get(handlers::list_lobbies).post(handlers::advertise_lobby),
        )
        .route("/api/lobbies/{id}", delete(handlers::remove_lobby))
        .route("/api/lobbies/code", post(handlers::allocate_code))
        .route(
            "/api/lobbies/code/{code}",
            get(handlers::lookup_code).delete(handlers::release_code),
        )
        .route("/api/punch/info", get(handlers::punch_info))
        .route("/api/punch/register", post(handlers::punch_register))
        .route("/api/punch/request", post(handlers::punch_request))
        .route(
            "/api/punch/register/{lobby_id}",
            delete(handlers::punch_unregister),
        )
        .route("/api/relay/info", get(handlers::relay_info))
        .route("/api/relay/allocate", post(handlers::relay_allocate))
        .route("/api/relay/stats", get(handlers::relay_stats))
        .route("/api/relay/{session_id}", delete(handlers::relay_release))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the router until the cancellation token fires.
pub async fn serve(
    state: AppState,
    addr: SocketAddr,
    cancel: tokio_util::sync::CancellationToken,
) -> anyhow::Result<()> {
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "HTTP directory listening");
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { cancel.cancelled().await })
    .await?;
    Ok(())
}
