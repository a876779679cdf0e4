//! Router assembly for the gamification engine's HTTP edge, split out of
//! `main.rs` so integration tests can drive the full stack in-process with
//! `tower::ServiceExt::oneshot` instead of a live listener.

pub mod entities;
pub mod error;
pub mod events;
pub mod leaderboards;
pub mod rules;
pub mod state;
pub mod users;
pub mod wallet;
pub mod webhook_routes;
pub mod webhooks;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

async fn health_check() -> &'static str {
    "OK"
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "not found")
}

/// Assembles the full router over `state`, with tracing/CORS layers applied.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .merge(events::router())
        .merge(rules::router())
        .merge(entities::router())
        .merge(users::router())
        .merge(leaderboards::router())
        .merge(wallet::router())
        .merge(webhook_routes::router())
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
