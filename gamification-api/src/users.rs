//! Per-user read endpoints (spec §6): composite state, point balances,
//! achievements (badges/trophies/levels), and reward history.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use gamification_engine::reward::{RewardHistory, RewardHistoryRepository};
use gamification_engine::user_state::{UserState, UserStateRepository};
use serde::{Deserialize, Serialize};

use crate::error::ApiResult;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/users/:user_id/state", get(get_state))
        .route("/api/users/:user_id/points", get(all_points))
        .route("/api/users/:user_id/points/:category", get(points_for_category))
        .route("/api/users/:user_id/badges", get(badges))
        .route("/api/users/:user_id/trophies", get(trophies))
        .route("/api/users/:user_id/levels", get(all_levels))
        .route("/api/users/:user_id/levels/:category", get(level_for_category))
        .route("/api/users/:user_id/rewards/history", get(rewards_history))
}

async fn get_state(State(state): State<Arc<AppState>>, Path(user_id): Path<String>) -> ApiResult<Json<UserState>> {
    Ok(Json(state.user_states.get_by_user(&user_id).await?))
}

async fn all_points(State(state): State<Arc<AppState>>, Path(user_id): Path<String>) -> ApiResult<Json<std::collections::HashMap<String, i64>>> {
    let user_state = state.user_states.get_by_user(&user_id).await?;
    Ok(Json(user_state.points_by_category))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CategoryBalance {
    category: String,
    balance: i64,
}

async fn points_for_category(
    State(state): State<Arc<AppState>>,
    Path((user_id, category)): Path<(String, String)>,
) -> ApiResult<Json<CategoryBalance>> {
    let user_state = state.user_states.get_by_user(&user_id).await?;
    Ok(Json(CategoryBalance {
        balance: user_state.balance(&category),
        category,
    }))
}

async fn badges(State(state): State<Arc<AppState>>, Path(user_id): Path<String>) -> ApiResult<Json<Vec<String>>> {
    let user_state = state.user_states.get_by_user(&user_id).await?;
    Ok(Json(user_state.badges.into_iter().collect()))
}

async fn trophies(State(state): State<Arc<AppState>>, Path(user_id): Path<String>) -> ApiResult<Json<Vec<String>>> {
    let user_state = state.user_states.get_by_user(&user_id).await?;
    Ok(Json(user_state.trophies.into_iter().collect()))
}

async fn all_levels(State(state): State<Arc<AppState>>, Path(user_id): Path<String>) -> ApiResult<Json<std::collections::HashMap<String, String>>> {
    let user_state = state.user_states.get_by_user(&user_id).await?;
    Ok(Json(user_state.levels))
}

async fn level_for_category(
    State(state): State<Arc<AppState>>,
    Path((user_id, category)): Path<(String, String)>,
) -> ApiResult<Json<Option<String>>> {
    let user_state = state.user_states.get_by_user(&user_id).await?;
    Ok(Json(user_state.levels.get(&category).cloned()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPageParams {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_page() -> usize {
    1
}

fn default_page_size() -> usize {
    50
}

async fn rewards_history(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(page): Query<HistoryPageParams>,
) -> ApiResult<Json<Vec<RewardHistory>>> {
    let offset = page.page.saturating_sub(1) * page.page_size;
    let entries = state.reward_history.get_by_user(&user_id, page.page_size, offset).await?;
    Ok(Json(entries))
}
