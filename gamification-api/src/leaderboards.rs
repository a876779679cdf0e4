//! Leaderboard query/rank/refresh endpoints (spec §6, §4.K).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use gamification_engine::leaderboard::{LeaderboardEntry, LeaderboardKind, LeaderboardPage, TimeRange};
use serde::Deserialize;

use crate::error::ApiResult;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/leaderboards", get(query_leaderboard))
        .route("/api/leaderboards/refresh", post(refresh_leaderboard))
        .route("/api/leaderboards/user/:user_id/rank", get(user_rank))
        .route("/api/leaderboards/:kind", get(query_kind))
        .route("/api/leaderboards/:kind/:category", get(query_kind_category))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardQueryParams {
    #[serde(rename = "type")]
    pub kind: LeaderboardKind,
    pub category: Option<String>,
    #[serde(default = "default_time_range")]
    pub time_range: TimeRange,
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_time_range() -> TimeRange {
    TimeRange::AllTime
}

fn default_page() -> usize {
    1
}

fn default_page_size() -> usize {
    50
}

async fn query_leaderboard(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LeaderboardQueryParams>,
) -> ApiResult<Json<LeaderboardPage>> {
    let page = state
        .leaderboard
        .query(
            params.kind,
            params.category.as_deref(),
            params.time_range,
            params.page,
            params.page_size,
            Utc::now(),
        )
        .await?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KindQueryParams {
    #[serde(default = "default_time_range")]
    pub time_range: TimeRange,
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

async fn query_kind(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<LeaderboardKind>,
    Query(params): Query<KindQueryParams>,
) -> ApiResult<Json<LeaderboardPage>> {
    let page = state
        .leaderboard
        .query(kind, None, params.time_range, params.page, params.page_size, Utc::now())
        .await?;
    Ok(Json(page))
}

async fn query_kind_category(
    State(state): State<Arc<AppState>>,
    Path((kind, category)): Path<(LeaderboardKind, String)>,
    Query(params): Query<KindQueryParams>,
) -> ApiResult<Json<LeaderboardPage>> {
    let page = state
        .leaderboard
        .query(kind, Some(&category), params.time_range, params.page, params.page_size, Utc::now())
        .await?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankQueryParams {
    #[serde(rename = "type")]
    pub kind: LeaderboardKind,
    pub category: Option<String>,
    #[serde(default = "default_time_range")]
    pub time_range: TimeRange,
}

async fn user_rank(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(params): Query<RankQueryParams>,
) -> ApiResult<Json<Option<LeaderboardEntry>>> {
    let entry = state
        .leaderboard
        .rank_of(&user_id, params.kind, params.category.as_deref(), params.time_range, Utc::now())
        .await?;
    Ok(Json(entry))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshParams {
    #[serde(rename = "type")]
    pub kind: LeaderboardKind,
    pub category: Option<String>,
    #[serde(default = "default_time_range")]
    pub time_range: TimeRange,
}

async fn refresh_leaderboard(State(state): State<Arc<AppState>>, Query(params): Query<RefreshParams>) -> StatusCode {
    state
        .leaderboard
        .refresh(params.kind, params.category.as_deref(), params.time_range, Utc::now())
        .await;
    StatusCode::NO_CONTENT
}
