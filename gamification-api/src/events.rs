//! Event ingestion and event-store read endpoints (spec §6): `POST
//! /api/events`, `GET /api/events/{id}`, `GET /api/events/user/{userId}`,
//! `GET /api/events/type/{eventType}`, `GET /api/events/catalog`, and the
//! dry-run sandbox at `POST /api/events/sandbox/dry-run`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use gamification_engine::dryrun::{DryRunService, DryRunTrace};
use gamification_engine::event::{Event, EventDefinition};
use gamification_engine::store::EventRepository;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/events", post(ingest_event))
        .route("/api/events/catalog", get(list_event_definitions))
        .route("/api/events/sandbox/dry-run", post(dry_run))
        .route("/api/events/user/:user_id", get(events_by_user))
        .route("/api/events/type/:event_type", get(events_by_type))
        .route("/api/events/:id", get(get_event))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestEventRequest {
    pub event_id: Option<String>,
    pub event_type: String,
    pub user_id: String,
    pub occurred_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}

async fn ingest_event(
    State(state): State<Arc<AppState>>,
    Json(request): Json<IngestEventRequest>,
) -> ApiResult<(StatusCode, Json<Event>)> {
    state.catalog.validate_event_type(&request.event_type)?;

    let event = Event::new(
        request.event_id,
        request.event_type,
        request.user_id,
        request.occurred_at.unwrap_or_else(Utc::now),
        request.attributes,
    )?;

    state.events.store(&event).await?;
    state.queue.enqueue(event.clone()).await?;

    Ok((StatusCode::CREATED, Json(event)))
}

async fn get_event(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<Event>> {
    let event = state
        .events
        .get_by_id(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("event {id} not found")))?;
    Ok(Json(event))
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

async fn events_by_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(page): Query<PageParams>,
) -> ApiResult<Json<Vec<Event>>> {
    let events = state.events.get_by_user(&user_id, page.limit, page.offset).await?;
    Ok(Json(events))
}

async fn events_by_type(
    State(state): State<Arc<AppState>>,
    Path(event_type): Path<String>,
    Query(page): Query<PageParams>,
) -> ApiResult<Json<Vec<Event>>> {
    let events = state.events.get_by_type(&event_type, page.limit, page.offset).await?;
    Ok(Json(events))
}

async fn list_event_definitions(State(state): State<Arc<AppState>>) -> Json<Vec<EventDefinition>> {
    Json(state.catalog.list_event_definitions())
}

async fn dry_run(
    State(state): State<Arc<AppState>>,
    Json(request): Json<IngestEventRequest>,
) -> ApiResult<Json<DryRunTrace>> {
    if !state.config.simulation_enabled {
        return Err(ApiError::NotFound("dry-run sandbox is disabled".into()));
    }

    let trigger_event = Event::new(
        request.event_id,
        request.event_type,
        request.user_id,
        request.occurred_at.unwrap_or_else(Utc::now),
        request.attributes,
    )?;

    let service = DryRunService {
        rules: state.rules.as_ref(),
        events: state.events.as_ref(),
        condition_registry: state.condition_registry.as_ref(),
        catalog: state.catalog.as_ref(),
        user_states: state.user_states.as_ref(),
        wallet: state.wallet.as_ref(),
        history_window: state.config.evaluator_history_window,
        allow_negative_balance: state.config.wallet_allow_negative,
    };

    let trace = service.evaluate(&trigger_event).await?;
    Ok(Json(trace))
}
