//! Gamification engine HTTP edge.
//!
//! Thin Axum handlers over `gamification_engine`'s domain services: this
//! binary owns process lifecycle (boot the queue processor, serve, drain on
//! shutdown); routing itself lives in `lib.rs`. Authentication, TLS
//! termination, and durable persistence are external collaborators per the
//! engine crate's own docs.

use std::net::SocketAddr;
use std::sync::Arc;

use gamification_api::state::AppState;
use gamification_engine::EngineConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = EngineConfig::from_env();
    tracing::info!(engine_id = %config.engine_id, "starting gamification engine");

    let state = Arc::new(AppState::new(config));
    state.processor.start().await;

    let app = gamification_api::build_router(state.clone());

    let addr = SocketAddr::from((
        [0, 0, 0, 0],
        std::env::var("PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(8080),
    ));
    tracing::info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let shutdown_state = state.clone();
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received, draining queue processor");
            shutdown_state.processor.stop().await;
        })
        .await?;

    Ok(())
}
