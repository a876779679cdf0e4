//! Wallet endpoints (spec §6): balance lookup, transaction history, and
//! direct spend/transfer/credit operations under `/api/wallet/users/{userId}/...`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use gamification_engine::wallet::{WalletBalance, WalletLedger, WalletTransaction, WalletTransactionType};
use serde::Deserialize;

use crate::error::ApiResult;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/wallet/users/:user_id/:category_id/balance", get(get_balance))
        .route("/api/wallet/users/:user_id/:category_id/transactions", get(get_transactions))
        .route("/api/wallet/users/:user_id/:category_id/credit", post(credit))
        .route("/api/wallet/users/:user_id/:category_id/spend", post(spend))
        .route("/api/wallet/users/:user_id/:category_id/transfer", post(transfer))
}

async fn get_balance(
    State(state): State<Arc<AppState>>,
    Path((user_id, category_id)): Path<(String, String)>,
) -> ApiResult<Json<WalletBalance>> {
    let _guard = state.user_locks.acquire(&user_id).await;
    Ok(Json(state.wallet.get_balance(&user_id, &category_id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRangeParams {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

async fn get_transactions(
    State(state): State<Arc<AppState>>,
    Path((user_id, category_id)): Path<(String, String)>,
    Query(range): Query<TransactionRangeParams>,
) -> ApiResult<Json<Vec<WalletTransaction>>> {
    let transactions = state
        .wallet
        .get_transactions(&user_id, &category_id, range.from, range.to)
        .await?;
    Ok(Json(transactions))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditRequest {
    pub amount: i64,
    #[serde(default)]
    pub description: String,
    pub reference_id: Option<String>,
    pub metadata: Option<HashMap<String, String>>,
}

async fn credit(
    State(state): State<Arc<AppState>>,
    Path((user_id, category_id)): Path<(String, String)>,
    Json(request): Json<CreditRequest>,
) -> ApiResult<(StatusCode, Json<WalletTransaction>)> {
    let _guard = state.user_locks.acquire(&user_id).await;
    let transaction = state
        .wallet
        .credit(
            &user_id,
            &category_id,
            request.amount,
            WalletTransactionType::Adjustment,
            &request.description,
            request.reference_id.as_deref(),
            request.metadata,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(transaction)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendRequest {
    pub amount: i64,
    #[serde(default)]
    pub description: String,
    pub reference_id: Option<String>,
    pub metadata: Option<HashMap<String, String>>,
}

async fn spend(
    State(state): State<Arc<AppState>>,
    Path((user_id, category_id)): Path<(String, String)>,
    Json(request): Json<SpendRequest>,
) -> ApiResult<(StatusCode, Json<WalletTransaction>)> {
    let _guard = state.user_locks.acquire(&user_id).await;
    let transaction = state
        .wallet
        .debit(
            &user_id,
            &category_id,
            request.amount,
            &request.description,
            request.reference_id.as_deref(),
            request.metadata,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(transaction)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub to_user_id: String,
    pub amount: i64,
    #[serde(default)]
    pub description: String,
    pub reference_id: Option<String>,
    pub metadata: Option<HashMap<String, String>>,
}

async fn transfer(
    State(state): State<Arc<AppState>>,
    Path((user_id, category_id)): Path<(String, String)>,
    Json(request): Json<TransferRequest>,
) -> ApiResult<(StatusCode, Json<(WalletTransaction, WalletTransaction)>)> {
    let _guard = state.user_locks.acquire_pair(&user_id, &request.to_user_id).await;
    let pair = state
        .wallet
        .transfer(
            &user_id,
            &request.to_user_id,
            &category_id,
            request.amount,
            &request.description,
            request.reference_id.as_deref(),
            request.metadata,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(pair)))
}
