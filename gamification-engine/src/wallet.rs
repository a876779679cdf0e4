//! Component E: the wallet ledger (spec §3 "Wallet"/"Wallet Transaction",
//! §4.E). The ledger is the authority; `balance` is a cached materialization
//! kept in lock-step with it.
//!
//! Grounded in `fo3-wallet-api`'s `LedgerRepository`/`InMemoryLedgerRepository`
//! pair (`#[async_trait]` interface plus an in-memory dev/test backing), and
//! its double-entry balance bookkeeping in `models/ledger.rs`.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DomainError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WalletTransactionType {
    Earn,
    Spend,
    TransferIn,
    TransferOut,
    Refund,
    Penalty,
    Adjustment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletTransaction {
    pub id: Uuid,
    pub user_id: String,
    pub category_id: String,
    pub transaction_type: WalletTransactionType,
    /// Signed; positive for earn/transfer-in/refund, negative for
    /// spend/transfer-out/penalty (adjustment can go either way.)
    pub amount: i64,
    pub description: String,
    pub reference_id: Option<String>,
    pub metadata: Option<HashMap<String, String>>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletBalance {
    pub user_id: String,
    pub category_id: String,
    pub balance: i64,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait WalletLedger: Send + Sync {
    /// Records a positive transaction and bumps the balance.
    async fn credit(
        &self,
        user_id: &str,
        category_id: &str,
        amount: i64,
        transaction_type: WalletTransactionType,
        description: &str,
        reference_id: Option<&str>,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<WalletTransaction>;

    /// Records a `Spend` with negative amount. Fails with
    /// `InsufficientBalance` if `balance < amount` (unless the category
    /// allows negative balances). `amount` MUST be strictly positive.
    async fn debit(
        &self,
        user_id: &str,
        category_id: &str,
        amount: i64,
        description: &str,
        reference_id: Option<&str>,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<WalletTransaction>;

    /// Atomic pair of `TransferOut`/`TransferIn` sharing `reference_id` and
    /// timestamp. Fails if the source balance is insufficient or
    /// `from_user_id == to_user_id`.
    async fn transfer(
        &self,
        from_user_id: &str,
        to_user_id: &str,
        category_id: &str,
        amount: i64,
        description: &str,
        reference_id: Option<&str>,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<(WalletTransaction, WalletTransaction)>;

    async fn get_balance(&self, user_id: &str, category_id: &str) -> Result<WalletBalance>;

    async fn get_transactions(
        &self,
        user_id: &str,
        category_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<WalletTransaction>>;
}

#[derive(Default)]
struct LedgerState {
    balances: HashMap<(String, String), i64>,
    transactions: Vec<WalletTransaction>,
    /// (user_id, category_id, reference_id, transaction_type) -> already written
    reference_index: std::collections::HashSet<(String, String, String, &'static str)>,
}

fn type_tag(t: WalletTransactionType) -> &'static str {
    match t {
        WalletTransactionType::Earn => "earn",
        WalletTransactionType::Spend => "spend",
        WalletTransactionType::TransferIn => "transfer-in",
        WalletTransactionType::TransferOut => "transfer-out",
        WalletTransactionType::Refund => "refund",
        WalletTransactionType::Penalty => "penalty",
        WalletTransactionType::Adjustment => "adjustment",
    }
}

/// In-memory development/test backing for [`WalletLedger`]. Serializes all
/// operations through a single mutex; a durable backing would instead use
/// serializable database transactions scoped per `(user_id, category_id)`
/// (spec §5).
pub struct InMemoryWalletLedger {
    state: Mutex<LedgerState>,
    allow_negative: bool,
}

impl InMemoryWalletLedger {
    pub fn new(allow_negative: bool) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            allow_negative,
        }
    }

    fn check_and_record_reference(
        state: &mut LedgerState,
        user_id: &str,
        category_id: &str,
        reference_id: Option<&str>,
        transaction_type: WalletTransactionType,
    ) -> Result<()> {
        if let Some(reference_id) = reference_id {
            let key = (
                user_id.to_string(),
                category_id.to_string(),
                reference_id.to_string(),
                type_tag(transaction_type),
            );
            if !state.reference_index.insert(key) {
                return Err(DomainError::Conflict(format!(
                    "duplicate ledger write for user {user_id} category {category_id} reference {reference_id} type {}",
                    type_tag(transaction_type)
                )));
            }
        }
        Ok(())
    }

    fn record(
        state: &mut LedgerState,
        user_id: &str,
        category_id: &str,
        transaction_type: WalletTransactionType,
        amount: i64,
        description: &str,
        reference_id: Option<&str>,
        metadata: Option<HashMap<String, String>>,
        timestamp: DateTime<Utc>,
    ) -> WalletTransaction {
        let balance = state
            .balances
            .entry((user_id.to_string(), category_id.to_string()))
            .or_insert(0);
        *balance += amount;

        let transaction = WalletTransaction {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            category_id: category_id.to_string(),
            transaction_type,
            amount,
            description: description.to_string(),
            reference_id: reference_id.map(|s| s.to_string()),
            metadata,
            timestamp,
        };
        state.transactions.push(transaction.clone());
        transaction
    }
}

#[async_trait]
impl WalletLedger for InMemoryWalletLedger {
    async fn credit(
        &self,
        user_id: &str,
        category_id: &str,
        amount: i64,
        transaction_type: WalletTransactionType,
        description: &str,
        reference_id: Option<&str>,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<WalletTransaction> {
        if amount == 0 {
            return Err(DomainError::Validation("credit amount must not be zero".into()));
        }
        let mut state = self.state.lock().expect("wallet ledger lock poisoned");
        Self::check_and_record_reference(&mut state, user_id, category_id, reference_id, transaction_type)?;
        Ok(Self::record(
            &mut state,
            user_id,
            category_id,
            transaction_type,
            amount,
            description,
            reference_id,
            metadata,
            Utc::now(),
        ))
    }

    async fn debit(
        &self,
        user_id: &str,
        category_id: &str,
        amount: i64,
        description: &str,
        reference_id: Option<&str>,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<WalletTransaction> {
        if amount <= 0 {
            return Err(DomainError::Validation("debit amount must be strictly positive".into()));
        }
        let mut state = self.state.lock().expect("wallet ledger lock poisoned");
        let current = *state
            .balances
            .get(&(user_id.to_string(), category_id.to_string()))
            .unwrap_or(&0);
        if !self.allow_negative && current < amount {
            return Err(DomainError::InsufficientBalance {
                user_id: user_id.to_string(),
                category: category_id.to_string(),
                needed: amount,
                available: current,
            });
        }
        Self::check_and_record_reference(
            &mut state,
            user_id,
            category_id,
            reference_id,
            WalletTransactionType::Spend,
        )?;
        Ok(Self::record(
            &mut state,
            user_id,
            category_id,
            WalletTransactionType::Spend,
            -amount,
            description,
            reference_id,
            metadata,
            Utc::now(),
        ))
    }

    async fn transfer(
        &self,
        from_user_id: &str,
        to_user_id: &str,
        category_id: &str,
        amount: i64,
        description: &str,
        reference_id: Option<&str>,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<(WalletTransaction, WalletTransaction)> {
        if from_user_id == to_user_id {
            return Err(DomainError::Validation(
                "cannot transfer to the same user".into(),
            ));
        }
        if amount <= 0 {
            return Err(DomainError::Validation("transfer amount must be strictly positive".into()));
        }

        let mut state = self.state.lock().expect("wallet ledger lock poisoned");
        let current = *state
            .balances
            .get(&(from_user_id.to_string(), category_id.to_string()))
            .unwrap_or(&0);
        if !self.allow_negative && current < amount {
            return Err(DomainError::InsufficientBalance {
                user_id: from_user_id.to_string(),
                category: category_id.to_string(),
                needed: amount,
                available: current,
            });
        }

        Self::check_and_record_reference(
            &mut state,
            from_user_id,
            category_id,
            reference_id,
            WalletTransactionType::TransferOut,
        )?;
        Self::check_and_record_reference(
            &mut state,
            to_user_id,
            category_id,
            reference_id,
            WalletTransactionType::TransferIn,
        )?;

        let timestamp = Utc::now();
        let out_tx = Self::record(
            &mut state,
            from_user_id,
            category_id,
            WalletTransactionType::TransferOut,
            -amount,
            description,
            reference_id,
            metadata.clone(),
            timestamp,
        );
        let in_tx = Self::record(
            &mut state,
            to_user_id,
            category_id,
            WalletTransactionType::TransferIn,
            amount,
            description,
            reference_id,
            metadata,
            timestamp,
        );
        Ok((out_tx, in_tx))
    }

    async fn get_balance(&self, user_id: &str, category_id: &str) -> Result<WalletBalance> {
        let state = self.state.lock().expect("wallet ledger lock poisoned");
        let balance = *state
            .balances
            .get(&(user_id.to_string(), category_id.to_string()))
            .unwrap_or(&0);
        let updated_at = state
            .transactions
            .iter()
            .rev()
            .find(|t| t.user_id == user_id && t.category_id == category_id)
            .map(|t| t.timestamp)
            .unwrap_or_else(Utc::now);
        Ok(WalletBalance {
            user_id: user_id.to_string(),
            category_id: category_id.to_string(),
            balance,
            updated_at,
        })
    }

    async fn get_transactions(
        &self,
        user_id: &str,
        category_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<WalletTransaction>> {
        let state = self.state.lock().expect("wallet ledger lock poisoned");
        Ok(state
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id && t.category_id == category_id)
            .filter(|t| from.map_or(true, |f| t.timestamp >= f))
            .filter(|t| to.map_or(true, |to| t.timestamp <= to))
            .cloned()
            .collect())
    }
}
