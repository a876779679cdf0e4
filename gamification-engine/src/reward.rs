//! Component G: the reward engine. Dispatches a declared reward or spending
//! against user state and the wallet ledger, and returns a history record for
//! every attempt it actually runs -- successful or failed. A reward/spending
//! slot already claimed by a prior evaluation of the same trigger event is
//! skipped outright: no mutation, no history record, so re-processing an
//! event is a true no-op rather than a fresh "already applied" entry.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::EntityCatalog;
use crate::error::{DomainError, Result};
use crate::user_state::UserStateRepository;
use crate::wallet::{WalletLedger, WalletTransactionType};

/// Penalties can target either a points category or a previously-granted
/// badge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PenaltyType {
    Points,
    Badge,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Reward {
    Points { category: String, amount: i64 },
    Badge { badge_id: String },
    Trophy { trophy_id: String },
    Level { level_id: String, category: String },
    Penalty { penalty_type: PenaltyType, target_id: String, amount: Option<i64> },
    Plugin {
        type_tag: String,
        #[serde(default)]
        parameters: HashMap<String, serde_json::Value>,
    },
}

/// Registered, schema-validated reward plugin (spec §9 "Polymorphism via
/// variants"). Unlike built-in rewards, a plugin is responsible for its own
/// user-state/wallet mutation and for building its own history message.
#[async_trait::async_trait]
pub trait RewardPlugin: Send + Sync {
    fn type_tag(&self) -> &str;

    fn validate_parameters(&self, parameters: &HashMap<String, serde_json::Value>) -> Result<()>;

    async fn execute(
        &self,
        user_id: &str,
        parameters: &HashMap<String, serde_json::Value>,
        user_states: &dyn UserStateRepository,
        wallet: &dyn WalletLedger,
    ) -> Result<(bool, String, HashMap<String, serde_json::Value>)>;
}

#[derive(Default)]
pub struct RewardPluginRegistry {
    plugins: HashMap<String, Box<dyn RewardPlugin>>,
}

impl RewardPluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Box<dyn RewardPlugin>) {
        self.plugins.insert(plugin.type_tag().to_string(), plugin);
    }

    pub fn get(&self, type_tag: &str) -> Option<&dyn RewardPlugin> {
        self.plugins.get(type_tag).map(|b| b.as_ref())
    }

    pub fn validate(&self, type_tag: &str, parameters: &HashMap<String, serde_json::Value>) -> Result<()> {
        match self.get(type_tag) {
            Some(plugin) => plugin.validate_parameters(parameters),
            None => Err(DomainError::Validation(format!(
                "no reward plugin registered for type tag {type_tag}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SpendingType {
    Spend,
    Transfer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spending {
    pub category: String,
    pub amount: i64,
    pub destination_user_id: Option<String>,
    #[serde(rename = "type")]
    pub spending_type: SpendingType,
}

/// Append-only execution record: one per reward/spending attempt, whether
/// it succeeded, idempotently no-op'd, or failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardHistory {
    pub id: Uuid,
    pub user_id: String,
    pub reward_id: String,
    pub reward_type: String,
    pub trigger_event_id: String,
    pub awarded_at: DateTime<Utc>,
    pub success: bool,
    pub message: String,
    pub details: HashMap<String, serde_json::Value>,
}

/// Identifies one reward's execution slot within one rule's evaluation of
/// one trigger event, so re-evaluating the same event is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RewardExecutionKey {
    pub trigger_event_id: String,
    pub rule_id: String,
    pub reward_position: usize,
}

/// Claims execution slots so reprocessing the same trigger event is a
/// whole-transaction no-op (spec §8: "events processed twice leave identical
/// state"), not just idempotent at the wallet-ledger level. A slot is any
/// string key identifying one reward or spending within one rule's
/// evaluation of one trigger event.
#[async_trait]
pub trait RewardIdempotencyStore: Send + Sync {
    /// Attempts to claim `key`. Returns `true` the first time a key is
    /// claimed (the caller must execute and may keep the claim), `false` if
    /// it was already claimed by a prior, successful execution (the caller
    /// must skip execution and the history append entirely).
    async fn try_begin(&self, key: &str) -> Result<bool>;

    /// Releases a claim after its execution failed, so a later retry (e.g.
    /// the processor's retry-on-fatal-error loop, or a legitimate re-attempt
    /// after a transient error) isn't permanently treated as already done.
    async fn rollback(&self, key: &str) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryRewardIdempotencyStore {
    claimed: RwLock<std::collections::HashSet<String>>,
}

impl InMemoryRewardIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RewardIdempotencyStore for InMemoryRewardIdempotencyStore {
    async fn try_begin(&self, key: &str) -> Result<bool> {
        let mut claimed = self.claimed.write().expect("reward idempotency lock poisoned");
        Ok(claimed.insert(key.to_string()))
    }

    async fn rollback(&self, key: &str) -> Result<()> {
        self.claimed.write().expect("reward idempotency lock poisoned").remove(key);
        Ok(())
    }
}

/// Append-only store of [`RewardHistory`] entries, queried by the user
/// endpoints (spec §6 `GET /api/users/{userId}/rewards/history`). The reward
/// engine itself does not persist here -- it returns history entries to its
/// caller (the rule evaluator, then the queue processor), which is the one
/// that appends them, so the engine's core evaluation path stays free of a
/// storage dependency it doesn't otherwise need.
#[async_trait]
pub trait RewardHistoryRepository: Send + Sync {
    async fn append(&self, entry: RewardHistory) -> Result<()>;

    /// Entries for `user_id`, newest first, paginated.
    async fn get_by_user(&self, user_id: &str, limit: usize, offset: usize) -> Result<Vec<RewardHistory>>;
}

#[derive(Default)]
pub struct InMemoryRewardHistoryRepository {
    entries: RwLock<Vec<RewardHistory>>,
}

impl InMemoryRewardHistoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RewardHistoryRepository for InMemoryRewardHistoryRepository {
    async fn append(&self, entry: RewardHistory) -> Result<()> {
        self.entries.write().expect("reward history lock poisoned").push(entry);
        Ok(())
    }

    async fn get_by_user(&self, user_id: &str, limit: usize, offset: usize) -> Result<Vec<RewardHistory>> {
        if limit == 0 || limit > 1000 {
            return Err(DomainError::Validation(format!("limit must be in [1, 1000], got {limit}")));
        }
        let entries = self.entries.read().expect("reward history lock poisoned");
        let mut matching: Vec<RewardHistory> = entries.iter().filter(|e| e.user_id == user_id).cloned().collect();
        matching.sort_by_key(|e| std::cmp::Reverse(e.awarded_at));
        Ok(matching.into_iter().skip(offset).take(limit).collect())
    }
}

/// Synthetic level rewards chain at most this many times per points reward,
/// so a pathological catalog can't recurse forever.
const MAX_LEVEL_CHAIN_DEPTH: u8 = 1;

pub struct RewardEngine<'a> {
    pub catalog: &'a EntityCatalog,
    pub user_states: &'a dyn UserStateRepository,
    pub wallet: &'a dyn WalletLedger,
    pub allow_negative_balance: bool,
    pub plugins: &'a RewardPluginRegistry,
    pub idempotency: &'a dyn RewardIdempotencyStore,
}

/// Outcome of executing one reward: history entry plus, for `points`, the
/// synthetic level reward it may have chained into.
pub struct RewardOutcome {
    pub history: RewardHistory,
    pub chained: Vec<RewardHistory>,
}

impl<'a> RewardEngine<'a> {
    pub fn new(
        catalog: &'a EntityCatalog,
        user_states: &'a dyn UserStateRepository,
        wallet: &'a dyn WalletLedger,
        allow_negative_balance: bool,
        plugins: &'a RewardPluginRegistry,
        idempotency: &'a dyn RewardIdempotencyStore,
    ) -> Self {
        Self {
            catalog,
            user_states,
            wallet,
            allow_negative_balance,
            plugins,
            idempotency,
        }
    }

    fn history_entry(
        &self,
        user_id: &str,
        reward_id: &str,
        reward_type: &str,
        trigger_event_id: &str,
        success: bool,
        message: impl Into<String>,
        details: HashMap<String, serde_json::Value>,
    ) -> RewardHistory {
        RewardHistory {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            reward_id: reward_id.to_string(),
            reward_type: reward_type.to_string(),
            trigger_event_id: trigger_event_id.to_string(),
            awarded_at: Utc::now(),
            success,
            message: message.into(),
            details,
        }
    }

    /// Executes one reward against `user_id`, returning its history record
    /// plus any synthetic level reward it chained into, or `None` if this
    /// exact slot already ran to completion on a prior evaluation of the same
    /// trigger event (spec §8: re-processing an event must leave state, and
    /// reward history, unchanged).
    ///
    /// `rule_id` and `reward_position` together with `trigger_event_id` form
    /// the reward's execution slot (spec §9 "Idempotency over inheritance":
    /// keyed on `(triggerEventId, ruleId, rewardIndex)`, not object identity),
    /// so two different rules awarding the same category on the same trigger
    /// event don't collide into a single wallet reference id, and the same
    /// rule/reward re-evaluated later is a true no-op rather than a fresh
    /// "already applied" history row.
    pub async fn execute_reward(
        &self,
        user_id: &str,
        trigger_event_id: &str,
        rule_id: &str,
        reward_position: usize,
        reward: &Reward,
    ) -> Result<Option<RewardOutcome>> {
        let slot = format!("reward:{trigger_event_id}:{rule_id}:{reward_position}");
        if !self.idempotency.try_begin(&slot).await? {
            return Ok(None);
        }

        let key = RewardExecutionKey {
            trigger_event_id: trigger_event_id.to_string(),
            rule_id: rule_id.to_string(),
            reward_position,
        };
        match self.execute_reward_at_depth(user_id, &key, reward, 0).await {
            Ok(outcome) => Ok(Some(outcome)),
            Err(err) => {
                self.idempotency.rollback(&slot).await?;
                Err(err)
            }
        }
    }

    async fn execute_reward_at_depth(
        &self,
        user_id: &str,
        key: &RewardExecutionKey,
        reward: &Reward,
        depth: u8,
    ) -> Result<RewardOutcome> {
        match reward {
            Reward::Points { category, amount } => self.execute_points(user_id, key, category, *amount, depth).await,
            Reward::Badge { badge_id } => self.execute_badge(user_id, &key.trigger_event_id, badge_id).await,
            Reward::Trophy { trophy_id } => self.execute_trophy(user_id, &key.trigger_event_id, trophy_id).await,
            Reward::Level { level_id, category } => {
                self.execute_level(user_id, &key.trigger_event_id, level_id, category).await
            }
            Reward::Penalty {
                penalty_type,
                target_id,
                amount,
            } => {
                self.execute_penalty(user_id, key, *penalty_type, target_id, *amount, depth)
                    .await
            }
            Reward::Plugin { type_tag, parameters } => self.execute_plugin(user_id, &key.trigger_event_id, type_tag, parameters).await,
        }
    }

    async fn execute_plugin(
        &self,
        user_id: &str,
        trigger_event_id: &str,
        type_tag: &str,
        parameters: &HashMap<String, serde_json::Value>,
    ) -> Result<RewardOutcome> {
        let Some(plugin) = self.plugins.get(type_tag) else {
            let history = self.history_entry(
                user_id,
                type_tag,
                "plugin",
                trigger_event_id,
                false,
                format!("no reward plugin registered for type tag {type_tag}"),
                HashMap::new(),
            );
            return Ok(RewardOutcome { history, chained: vec![] });
        };
        let (success, message, details) = plugin
            .execute(user_id, parameters, self.user_states, self.wallet)
            .await?;
        let history = self.history_entry(user_id, type_tag, "plugin", trigger_event_id, success, message, details);
        Ok(RewardOutcome { history, chained: vec![] })
    }

    async fn execute_points(
        &self,
        user_id: &str,
        key: &RewardExecutionKey,
        category: &str,
        amount: i64,
        depth: u8,
    ) -> Result<RewardOutcome> {
        let trigger_event_id = key.trigger_event_id.as_str();
        let transaction_type = if amount < 0 {
            WalletTransactionType::Penalty
        } else {
            WalletTransactionType::Earn
        };
        let reference_id = format!("{}:{}:{}", key.trigger_event_id, key.rule_id, key.reward_position);
        self.wallet
            .credit(user_id, category, amount, transaction_type, "rule reward", Some(&reference_id), None)
            .await?;

        let mut state = self.user_states.get_by_user(user_id).await?;
        let aggregation = self
            .catalog
            .get_point_category(category)
            .map(|c| c.aggregation)
            .unwrap_or(crate::catalog::Aggregation::Sum);
        let previous_level = self.catalog.current_level_for_balance(category, state.balance(category));
        state.apply_points(category, amount, aggregation);
        let new_balance = state.balance(category);

        let mut chained = Vec::new();
        if let Some(new_level) = self.catalog.current_level_for_balance(category, new_balance) {
            let crossed = previous_level.as_ref().map(|l| l.id != new_level.id).unwrap_or(true);
            if crossed {
                state.set_level(category, &new_level.id);
                if depth < MAX_LEVEL_CHAIN_DEPTH {
                    let synthetic = Reward::Level {
                        level_id: new_level.id.clone(),
                        category: category.to_string(),
                    };
                    self.user_states.save(&state).await?;
                    let outcome = Box::pin(self.execute_reward_at_depth(user_id, key, &synthetic, depth + 1)).await?;
                    chained.push(outcome.history);
                    chained.extend(outcome.chained);
                } else {
                    self.user_states.save(&state).await?;
                }
            } else {
                self.user_states.save(&state).await?;
            }
        } else {
            self.user_states.save(&state).await?;
        }

        let mut details = HashMap::new();
        details.insert("amount".to_string(), serde_json::Value::from(amount));
        details.insert("resultingBalance".to_string(), serde_json::Value::from(new_balance));
        let history = self.history_entry(user_id, category, "points", trigger_event_id, true, "applied", details);
        Ok(RewardOutcome { history, chained })
    }

    async fn execute_badge(&self, user_id: &str, trigger_event_id: &str, badge_id: &str) -> Result<RewardOutcome> {
        if self.catalog.get_badge(badge_id).is_none() {
            let history = self.history_entry(
                user_id,
                badge_id,
                "badge",
                trigger_event_id,
                false,
                format!("unknown badge {badge_id}"),
                HashMap::new(),
            );
            return Ok(RewardOutcome { history, chained: vec![] });
        }
        let mut state = self.user_states.get_by_user(user_id).await?;
        let newly_granted = state.grant_badge(badge_id);
        self.user_states.save(&state).await?;
        let message = if newly_granted { "granted" } else { "already held" };
        let history = self.history_entry(user_id, badge_id, "badge", trigger_event_id, true, message, HashMap::new());
        Ok(RewardOutcome { history, chained: vec![] })
    }

    async fn execute_trophy(&self, user_id: &str, trigger_event_id: &str, trophy_id: &str) -> Result<RewardOutcome> {
        if self.catalog.get_trophy(trophy_id).is_none() {
            let history = self.history_entry(
                user_id,
                trophy_id,
                "trophy",
                trigger_event_id,
                false,
                format!("unknown trophy {trophy_id}"),
                HashMap::new(),
            );
            return Ok(RewardOutcome { history, chained: vec![] });
        }
        let mut state = self.user_states.get_by_user(user_id).await?;
        let newly_granted = state.grant_trophy(trophy_id);
        self.user_states.save(&state).await?;
        let message = if newly_granted { "granted" } else { "already held" };
        let history = self.history_entry(user_id, trophy_id, "trophy", trigger_event_id, true, message, HashMap::new());
        Ok(RewardOutcome { history, chained: vec![] })
    }

    async fn execute_level(
        &self,
        user_id: &str,
        trigger_event_id: &str,
        level_id: &str,
        category: &str,
    ) -> Result<RewardOutcome> {
        let Some(level) = self.catalog.get_level(level_id) else {
            let history = self.history_entry(
                user_id,
                level_id,
                "level",
                trigger_event_id,
                false,
                format!("unknown level {level_id}"),
                HashMap::new(),
            );
            return Ok(RewardOutcome { history, chained: vec![] });
        };
        let mut state = self.user_states.get_by_user(user_id).await?;
        let balance = state.balance(category);
        if level.min_points > balance {
            let history = self.history_entry(
                user_id,
                level_id,
                "level",
                trigger_event_id,
                false,
                "threshold not met",
                HashMap::new(),
            );
            return Ok(RewardOutcome { history, chained: vec![] });
        }
        state.set_level(category, level_id);
        self.user_states.save(&state).await?;
        let history = self.history_entry(user_id, level_id, "level", trigger_event_id, true, "applied", HashMap::new());
        Ok(RewardOutcome { history, chained: vec![] })
    }

    async fn execute_penalty(
        &self,
        user_id: &str,
        key: &RewardExecutionKey,
        penalty_type: PenaltyType,
        target_id: &str,
        amount: Option<i64>,
        depth: u8,
    ) -> Result<RewardOutcome> {
        match penalty_type {
            PenaltyType::Points => {
                let amount = amount.unwrap_or(0).abs().saturating_neg();
                let category = target_id;
                let current = self.user_states.get_by_user(user_id).await?.balance(category);
                let floor_amount = if !self.allow_negative_balance && current + amount < 0 {
                    -current
                } else {
                    amount
                };
                self.execute_points(user_id, key, category, floor_amount, depth).await
            }
            PenaltyType::Badge => {
                let mut state = self.user_states.get_by_user(user_id).await?;
                let revoked = state.badges.remove(target_id);
                self.user_states.save(&state).await?;
                let message = if revoked { "revoked" } else { "not held" };
                let trigger_event_id = key.trigger_event_id.as_str();
                let history = self.history_entry(user_id, target_id, "penalty", trigger_event_id, true, message, HashMap::new());
                Ok(RewardOutcome { history, chained: vec![] })
            }
        }
    }

    /// Debits or transfers per a rule's spending. Unlike rewards, a failed
    /// spending aborts the remaining spendings in the same rule (see the
    /// evaluator). Returns `None` if this slot already ran to completion on a
    /// prior evaluation of the same trigger event, the same as
    /// [`Self::execute_reward`].
    pub async fn execute_spending(
        &self,
        user_id: &str,
        trigger_event_id: &str,
        rule_id: &str,
        spending_index: usize,
        spending: &Spending,
    ) -> Result<Option<RewardHistory>> {
        let slot = format!("spending:{trigger_event_id}:{rule_id}:{spending_index}");
        if !self.idempotency.try_begin(&slot).await? {
            return Ok(None);
        }
        match self.execute_spending_inner(user_id, trigger_event_id, rule_id, spending_index, spending).await {
            Ok(history) => Ok(Some(history)),
            Err(err) => {
                self.idempotency.rollback(&slot).await?;
                Err(err)
            }
        }
    }

    async fn execute_spending_inner(
        &self,
        user_id: &str,
        trigger_event_id: &str,
        rule_id: &str,
        spending_index: usize,
        spending: &Spending,
    ) -> Result<RewardHistory> {
        let reference_id = format!("{trigger_event_id}:{rule_id}:spending:{spending_index}");
        let reward_type = match spending.spending_type {
            SpendingType::Spend => "spend",
            SpendingType::Transfer => "transfer",
        };
        let outcome = match spending.spending_type {
            SpendingType::Spend => {
                self.wallet
                    .debit(user_id, &spending.category, spending.amount, "rule spending", Some(&reference_id), None)
                    .await
                    .map(|_| ())
            }
            SpendingType::Transfer => {
                let Some(destination) = &spending.destination_user_id else {
                    return Ok(self.history_entry(
                        user_id,
                        &spending.category,
                        reward_type,
                        trigger_event_id,
                        false,
                        "transfer spending missing destinationUserId",
                        HashMap::new(),
                    ));
                };
                self.wallet
                    .transfer(
                        user_id,
                        destination,
                        &spending.category,
                        spending.amount,
                        "rule spending",
                        Some(&reference_id),
                        None,
                    )
                    .await
                    .map(|_| ())
            }
        };

        match outcome {
            Ok(()) => Ok(self.history_entry(
                user_id,
                &spending.category,
                reward_type,
                trigger_event_id,
                true,
                "applied",
                HashMap::new(),
            )),
            Err(DomainError::InsufficientBalance { .. }) => Ok(self.history_entry(
                user_id,
                &spending.category,
                reward_type,
                trigger_event_id,
                false,
                "insufficient balance",
                HashMap::new(),
            )),
            Err(err) => Err(err),
        }
    }
}
