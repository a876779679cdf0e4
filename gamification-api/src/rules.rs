//! Rule CRUD endpoints (spec §6): `GET/POST/PUT/DELETE /api/rules[/...]`
//! plus `?active`/`?trigger={eventType}` filtering and activate/deactivate.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use gamification_engine::rule::{Rule, RuleRepository};
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/rules", get(list_rules).post(create_rule))
        .route(
            "/api/rules/:id",
            get(get_rule).put(update_rule).delete(delete_rule),
        )
        .route("/api/rules/:id/activate", post(activate_rule))
        .route("/api/rules/:id/deactivate", post(deactivate_rule))
}

#[derive(Debug, Deserialize)]
pub struct ListRulesParams {
    pub active: Option<bool>,
    pub trigger: Option<String>,
}

async fn list_rules(State(state): State<Arc<AppState>>, Query(params): Query<ListRulesParams>) -> ApiResult<Json<Vec<Rule>>> {
    let active_only = params.active.unwrap_or(false);
    let rules = match params.trigger {
        Some(event_type) => state.rules.find_by_trigger(&event_type, active_only).await?,
        None => state.rules.list(active_only).await?,
    };
    Ok(Json(rules))
}

async fn create_rule(State(state): State<Arc<AppState>>, Json(rule): Json<Rule>) -> ApiResult<(StatusCode, Json<Rule>)> {
    let created = state.rules.create(rule).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_rule(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<Rule>> {
    let rule = state.rules.get(&id).await?.ok_or_else(|| ApiError::NotFound(format!("rule {id} not found")))?;
    Ok(Json(rule))
}

async fn update_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(mut rule): Json<Rule>,
) -> ApiResult<Json<Rule>> {
    rule.id = id;
    let updated = state.rules.update(rule).await?;
    Ok(Json(updated))
}

async fn delete_rule(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.rules.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn activate_rule(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<Rule>> {
    let mut rule = state.rules.get(&id).await?.ok_or_else(|| ApiError::NotFound(format!("rule {id} not found")))?;
    rule.is_active = true;
    let updated = state.rules.update(rule).await?;
    Ok(Json(updated))
}

async fn deactivate_rule(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<Rule>> {
    let mut rule = state.rules.get(&id).await?.ok_or_else(|| ApiError::NotFound(format!("rule {id} not found")))?;
    rule.is_active = false;
    let updated = state.rules.update(rule).await?;
    Ok(Json(updated))
}
