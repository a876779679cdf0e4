//! Shared application state (spec §1 ambient wiring), grounded in
//! `fo3-wallet-api/src/state.rs`'s `AppState` — a plain struct of `Arc`-held
//! repositories, constructed once in `main` and shared across handlers via
//! `axum::extract::State`.

use std::sync::Arc;

use gamification_engine::catalog::EntityCatalog;
use gamification_engine::condition::ConditionPluginRegistry;
use gamification_engine::leaderboard::LeaderboardProjector;
use gamification_engine::locks::UserLockTable;
use gamification_engine::processor::{InMemoryDeadLetterSink, QueueProcessor};
use gamification_engine::queue::EventQueue;
use gamification_engine::reward::{
    InMemoryRewardHistoryRepository, InMemoryRewardIdempotencyStore, RewardHistoryRepository, RewardIdempotencyStore,
    RewardPluginRegistry,
};
use gamification_engine::rule::{InMemoryRuleRepository, RuleRepository};
use gamification_engine::store::{EventRepository, InMemoryEventStore};
use gamification_engine::user_state::{InMemoryUserStateRepository, UserStateRepository};
use gamification_engine::wallet::{InMemoryWalletLedger, WalletLedger};
use gamification_engine::EngineConfig;

use crate::webhooks::WebhookRegistry;

pub struct AppState {
    pub config: EngineConfig,
    pub events: Arc<dyn EventRepository>,
    pub rules: Arc<dyn RuleRepository>,
    pub user_states: Arc<dyn UserStateRepository>,
    pub wallet: Arc<dyn WalletLedger>,
    pub catalog: Arc<EntityCatalog>,
    pub condition_registry: Arc<ConditionPluginRegistry>,
    pub reward_registry: Arc<RewardPluginRegistry>,
    pub user_locks: Arc<UserLockTable>,
    pub queue: Arc<EventQueue>,
    pub processor: Arc<QueueProcessor>,
    pub leaderboard: Arc<LeaderboardProjector>,
    pub reward_history: Arc<dyn RewardHistoryRepository>,
    pub reward_idempotency: Arc<dyn RewardIdempotencyStore>,
    pub webhooks: Arc<WebhookRegistry>,
}

impl AppState {
    pub fn new(config: EngineConfig) -> Self {
        let events: Arc<dyn EventRepository> = Arc::new(InMemoryEventStore::new());
        let rules: Arc<dyn RuleRepository> = Arc::new(InMemoryRuleRepository::new());
        let user_states: Arc<dyn UserStateRepository> = Arc::new(InMemoryUserStateRepository::new());
        let wallet: Arc<dyn WalletLedger> = Arc::new(InMemoryWalletLedger::new(config.wallet_allow_negative));
        let catalog = Arc::new(EntityCatalog::new(true));
        let condition_registry = Arc::new(ConditionPluginRegistry::new());
        let reward_registry = Arc::new(RewardPluginRegistry::new());
        let user_locks = Arc::new(UserLockTable::new());
        let queue = Arc::new(EventQueue::new(1024));
        let dead_letters = Arc::new(InMemoryDeadLetterSink::new());
        let reward_history: Arc<dyn RewardHistoryRepository> = Arc::new(InMemoryRewardHistoryRepository::new());
        let reward_idempotency: Arc<dyn RewardIdempotencyStore> = Arc::new(InMemoryRewardIdempotencyStore::new());

        let processor = Arc::new(QueueProcessor::new(
            queue.clone(),
            events.clone(),
            rules.clone(),
            user_states.clone(),
            wallet.clone(),
            catalog.clone(),
            condition_registry.clone(),
            reward_registry.clone(),
            user_locks.clone(),
            dead_letters,
            reward_history.clone(),
            reward_idempotency.clone(),
            config.evaluator_history_window,
            config.wallet_allow_negative,
        ));

        let leaderboard = Arc::new(LeaderboardProjector::new(
            catalog.clone(),
            user_states.clone(),
            wallet.clone(),
            config.leaderboard_cache_ttl_seconds,
        ));

        Self {
            config,
            events,
            rules,
            user_states,
            wallet,
            catalog,
            condition_registry,
            reward_registry,
            user_locks,
            queue,
            processor,
            leaderboard,
            reward_history,
            reward_idempotency,
            webhooks: Arc::new(WebhookRegistry::new()),
        }
    }
}
