//! Catalog entity CRUD endpoints (spec §6): `/api/badges`, `/api/trophies`,
//! `/api/levels`, `/api/point-categories`, each with `/visible` and
//! `/category/{c}` sub-routes where applicable.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use gamification_engine::catalog::{Badge, Level, PointCategory, Trophy};
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/point-categories", get(list_point_categories).post(create_point_category))
        .route(
            "/api/point-categories/:id",
            get(get_point_category).put(update_point_category).delete(delete_point_category),
        )
        .route("/api/badges", get(list_badges).post(create_badge))
        .route("/api/badges/visible", get(list_visible_badges))
        .route("/api/badges/:id", get(get_badge).put(update_badge).delete(delete_badge))
        .route("/api/trophies", get(list_trophies).post(create_trophy))
        .route("/api/trophies/visible", get(list_visible_trophies))
        .route("/api/trophies/:id", get(get_trophy).put(update_trophy).delete(delete_trophy))
        .route("/api/levels", get(list_levels).post(create_level))
        .route("/api/levels/category/:category", get(levels_for_category))
        .route("/api/levels/:id", get(get_level).put(update_level).delete(delete_level))
}

#[derive(Debug, Deserialize)]
pub struct VisibleParams {
    #[serde(default)]
    pub visible: Option<bool>,
}

// -- point categories --------------------------------------------------------

async fn list_point_categories(State(state): State<Arc<AppState>>) -> Json<Vec<PointCategory>> {
    Json(state.catalog.list_point_categories())
}

async fn create_point_category(
    State(state): State<Arc<AppState>>,
    Json(category): Json<PointCategory>,
) -> (StatusCode, Json<PointCategory>) {
    state.catalog.put_point_category(category.clone());
    (StatusCode::CREATED, Json(category))
}

async fn get_point_category(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<PointCategory>> {
    let category = state
        .catalog
        .get_point_category(&id)
        .ok_or_else(|| ApiError::NotFound(format!("point category {id} not found")))?;
    Ok(Json(category))
}

async fn update_point_category(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(mut category): Json<PointCategory>,
) -> Json<PointCategory> {
    category.id = id;
    state.catalog.put_point_category(category.clone());
    Json(category)
}

async fn delete_point_category(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.catalog.delete_point_category(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

// -- badges -------------------------------------------------------------------

async fn list_badges(State(state): State<Arc<AppState>>, Query(params): Query<VisibleParams>) -> Json<Vec<Badge>> {
    Json(state.catalog.list_badges(params.visible.unwrap_or(false)))
}

async fn list_visible_badges(State(state): State<Arc<AppState>>) -> Json<Vec<Badge>> {
    Json(state.catalog.list_badges(true))
}

async fn create_badge(State(state): State<Arc<AppState>>, Json(badge): Json<Badge>) -> (StatusCode, Json<Badge>) {
    state.catalog.put_badge(badge.clone());
    (StatusCode::CREATED, Json(badge))
}

async fn get_badge(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<Badge>> {
    let badge = state.catalog.get_badge(&id).ok_or_else(|| ApiError::NotFound(format!("badge {id} not found")))?;
    Ok(Json(badge))
}

async fn update_badge(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(mut badge): Json<Badge>,
) -> Json<Badge> {
    badge.id = id;
    state.catalog.put_badge(badge.clone());
    Json(badge)
}

async fn delete_badge(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.catalog.delete_badge(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

// -- trophies -------------------------------------------------------------------

async fn list_trophies(State(state): State<Arc<AppState>>, Query(params): Query<VisibleParams>) -> Json<Vec<Trophy>> {
    Json(state.catalog.list_trophies(params.visible.unwrap_or(false)))
}

async fn list_visible_trophies(State(state): State<Arc<AppState>>) -> Json<Vec<Trophy>> {
    Json(state.catalog.list_trophies(true))
}

async fn create_trophy(State(state): State<Arc<AppState>>, Json(trophy): Json<Trophy>) -> (StatusCode, Json<Trophy>) {
    state.catalog.put_trophy(trophy.clone());
    (StatusCode::CREATED, Json(trophy))
}

async fn get_trophy(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<Trophy>> {
    let trophy = state.catalog.get_trophy(&id).ok_or_else(|| ApiError::NotFound(format!("trophy {id} not found")))?;
    Ok(Json(trophy))
}

async fn update_trophy(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(mut trophy): Json<Trophy>,
) -> Json<Trophy> {
    trophy.id = id;
    state.catalog.put_trophy(trophy.clone());
    Json(trophy)
}

async fn delete_trophy(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.catalog.delete_trophy(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

// -- levels -------------------------------------------------------------------

async fn list_levels(State(state): State<Arc<AppState>>) -> Json<Vec<Level>> {
    let mut all = Vec::new();
    for category in state.catalog.list_point_categories() {
        all.extend(state.catalog.levels_for_category(&category.id));
    }
    Json(all)
}

async fn levels_for_category(State(state): State<Arc<AppState>>, Path(category): Path<String>) -> Json<Vec<Level>> {
    Json(state.catalog.levels_for_category(&category))
}

async fn create_level(State(state): State<Arc<AppState>>, Json(level): Json<Level>) -> ApiResult<(StatusCode, Json<Level>)> {
    state.catalog.put_level(level.clone())?;
    Ok((StatusCode::CREATED, Json(level)))
}

async fn get_level(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<Level>> {
    let level = state.catalog.get_level(&id).ok_or_else(|| ApiError::NotFound(format!("level {id} not found")))?;
    Ok(Json(level))
}

async fn update_level(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(mut level): Json<Level>,
) -> ApiResult<Json<Level>> {
    level.id = id;
    state.catalog.put_level(level.clone())?;
    Ok(Json(level))
}

async fn delete_level(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.catalog.delete_level(&id)?;
    Ok(StatusCode::NO_CONTENT)
}
