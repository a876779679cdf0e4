//! Webhook registration/test endpoints (spec §6): a thin HTTP surface over
//! [`crate::webhooks::WebhookRegistry`].

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::webhooks::{Webhook, WebhookTestResult};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/webhooks", get(list_webhooks).post(register_webhook))
        .route("/api/webhooks/:id", get(get_webhook).delete(delete_webhook))
        .route("/api/webhooks/:id/test", post(test_webhook))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterWebhookRequest {
    pub url: String,
    #[serde(default)]
    pub event_types: Vec<String>,
}

async fn register_webhook(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterWebhookRequest>,
) -> (StatusCode, Json<Webhook>) {
    let webhook = state.webhooks.register(request.url, request.event_types);
    (StatusCode::CREATED, Json(webhook))
}

async fn list_webhooks(State(state): State<Arc<AppState>>) -> Json<Vec<Webhook>> {
    Json(state.webhooks.list())
}

async fn get_webhook(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<Webhook>> {
    let webhook = state.webhooks.get(&id).ok_or_else(|| ApiError::NotFound(format!("webhook {id} not found")))?;
    Ok(Json(webhook))
}

async fn delete_webhook(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    if state.webhooks.delete(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("webhook {id} not found")))
    }
}

async fn test_webhook(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<WebhookTestResult>> {
    let result = state.webhooks.test(&id).ok_or_else(|| ApiError::NotFound(format!("webhook {id} not found")))?;
    Ok(Json(result))
}
