//! Component I: the queue processor. The background worker that dequeues
//! accepted events, persists them to the event store, and invokes the rule
//! evaluator — the only piece of the pipeline that runs unattended once
//! `start()` is called.
//!
//! State machine and cancellation are grounded in `crate::queue`'s use of
//! `tokio_util::sync::CancellationToken`; the retry/backoff + dead-letter
//! path has no direct teacher analogue (the teacher treats its services as
//! always backed by a reachable database) and is modeled on the generic
//! exponential-backoff retry loops used around the pack's external-service
//! calls (e.g. `fo3-wallet-api/src/services/notifications.rs`).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::catalog::EntityCatalog;
use crate::condition::ConditionPluginRegistry;
use crate::error::{DomainError, Result};
use crate::event::Event;
use crate::evaluator::RuleEvaluator;
use crate::locks::UserLockTable;
use crate::queue::EventQueue;
use crate::reward::{RewardEngine, RewardHistoryRepository, RewardIdempotencyStore, RewardPluginRegistry};
use crate::rule::RuleRepository;
use crate::store::EventRepository;
use crate::user_state::UserStateRepository;
use crate::wallet::WalletLedger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// Sink for events that exhausted the retry budget against a fatal
/// repository error. Implementation-defined per spec §7; the in-memory
/// default just buffers them for inspection.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn record(&self, event: Event, reason: String);
}

#[derive(Default)]
pub struct InMemoryDeadLetterSink {
    entries: Mutex<Vec<(Event, String)>>,
}

impl InMemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<(Event, String)> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterSink {
    async fn record(&self, event: Event, reason: String) {
        self.entries.lock().await.push((event, reason));
    }
}

/// Retry budget for a single event against fatal (storage/retrieval)
/// repository errors. Backoff doubles each attempt starting at `base_delay`,
/// capped at `max_delay`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.base_delay.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
        scaled.min(self.max_delay)
    }
}

/// Background worker started at process launch (spec §4.I). Dequeues,
/// persists to the event store, then runs the rule evaluator — one event at
/// a time per user, many users in parallel, serialized by `UserLockTable`.
pub struct QueueProcessor {
    queue: Arc<EventQueue>,
    events: Arc<dyn EventRepository>,
    rules: Arc<dyn RuleRepository>,
    user_states: Arc<dyn UserStateRepository>,
    wallet: Arc<dyn WalletLedger>,
    catalog: Arc<EntityCatalog>,
    condition_registry: Arc<ConditionPluginRegistry>,
    reward_registry: Arc<RewardPluginRegistry>,
    user_locks: Arc<UserLockTable>,
    dead_letters: Arc<dyn DeadLetterSink>,
    reward_history: Arc<dyn RewardHistoryRepository>,
    reward_idempotency: Arc<dyn RewardIdempotencyStore>,
    retry_policy: RetryPolicy,
    history_window: usize,
    allow_negative_balance: bool,

    state: Arc<Mutex<ProcessorState>>,
    cancellation: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
    processed_event_count: Arc<AtomicU64>,
    error_count: Arc<AtomicU64>,
}

#[allow(clippy::too_many_arguments)]
impl QueueProcessor {
    pub fn new(
        queue: Arc<EventQueue>,
        events: Arc<dyn EventRepository>,
        rules: Arc<dyn RuleRepository>,
        user_states: Arc<dyn UserStateRepository>,
        wallet: Arc<dyn WalletLedger>,
        catalog: Arc<EntityCatalog>,
        condition_registry: Arc<ConditionPluginRegistry>,
        reward_registry: Arc<RewardPluginRegistry>,
        user_locks: Arc<UserLockTable>,
        dead_letters: Arc<dyn DeadLetterSink>,
        reward_history: Arc<dyn RewardHistoryRepository>,
        reward_idempotency: Arc<dyn RewardIdempotencyStore>,
        history_window: usize,
        allow_negative_balance: bool,
    ) -> Self {
        Self {
            queue,
            events,
            rules,
            user_states,
            wallet,
            catalog,
            condition_registry,
            reward_registry,
            user_locks,
            dead_letters,
            reward_history,
            reward_idempotency,
            retry_policy: RetryPolicy::default(),
            history_window,
            allow_negative_balance,
            state: Arc::new(Mutex::new(ProcessorState::Idle)),
            cancellation: CancellationToken::new(),
            handle: Mutex::new(None),
            processed_event_count: Arc::new(AtomicU64::new(0)),
            error_count: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn state(&self) -> ProcessorState {
        *self.state.lock().await
    }

    pub fn processed_event_count(&self) -> u64 {
        self.processed_event_count.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// `Idle` → `Running`. Spawns the dequeue loop. A no-op if already
    /// running or stopping.
    pub async fn start(&self) {
        let mut state = self.state.lock().await;
        if *state != ProcessorState::Idle && *state != ProcessorState::Stopped {
            return;
        }
        *state = ProcessorState::Running;
        drop(state);

        let queue = self.queue.clone();
        let events = self.events.clone();
        let rules = self.rules.clone();
        let user_states = self.user_states.clone();
        let wallet = self.wallet.clone();
        let catalog = self.catalog.clone();
        let condition_registry = self.condition_registry.clone();
        let reward_registry = self.reward_registry.clone();
        let user_locks = self.user_locks.clone();
        let dead_letters = self.dead_letters.clone();
        let reward_history = self.reward_history.clone();
        let reward_idempotency = self.reward_idempotency.clone();
        let retry_policy = self.retry_policy;
        let history_window = self.history_window;
        let allow_negative_balance = self.allow_negative_balance;
        let cancellation = self.cancellation.clone();
        let state_handle = self.state.clone();
        let processed_event_count = self.processed_event_count.clone();
        let error_count = self.error_count.clone();

        let join = tokio::spawn(async move {
            info!("queue processor started");
            loop {
                let Some(event) = queue.dequeue(&cancellation).await else {
                    break;
                };

                let _permit = user_locks.acquire(&event.user_id).await;
                match process_one(
                    &event,
                    events.as_ref(),
                    rules.as_ref(),
                    user_states.as_ref(),
                    wallet.as_ref(),
                    catalog.as_ref(),
                    condition_registry.as_ref(),
                    reward_registry.as_ref(),
                    reward_history.as_ref(),
                    reward_idempotency.as_ref(),
                    allow_negative_balance,
                    history_window,
                    &retry_policy,
                )
                .await
                {
                    Ok(()) => {
                        processed_event_count.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(reason) => {
                        error_count.fetch_add(1, Ordering::Relaxed);
                        error!(event_id = %event.event_id, %reason, "event moved to dead-letter sink after exhausting retry budget");
                        dead_letters.record(event.clone(), reason).await;
                    }
                }
            }

            *state_handle.lock().await = ProcessorState::Stopped;
            info!("queue processor stopped");
        });

        *self.handle.lock().await = Some(join);
    }

    /// `Running` → `Stopping` → `Stopped`. Signals cancellation and waits
    /// for the current event (if any) to finish before returning.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock().await;
            if *state != ProcessorState::Running {
                return;
            }
            *state = ProcessorState::Stopping;
        }
        self.cancellation.cancel();

        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_one(
    event: &Event,
    events: &dyn EventRepository,
    rules: &dyn RuleRepository,
    user_states: &dyn UserStateRepository,
    wallet: &dyn WalletLedger,
    catalog: &EntityCatalog,
    condition_registry: &ConditionPluginRegistry,
    reward_registry: &RewardPluginRegistry,
    reward_history: &dyn RewardHistoryRepository,
    reward_idempotency: &dyn RewardIdempotencyStore,
    allow_negative_balance: bool,
    history_window: usize,
    retry_policy: &RetryPolicy,
) -> std::result::Result<(), String> {
    with_retry(retry_policy, || events.store(event)).await.map_err(|e| e.to_string())?;

    let reward_engine = RewardEngine::new(catalog, user_states, wallet, allow_negative_balance, reward_registry, reward_idempotency);
    let evaluator = RuleEvaluator::new(rules, events, condition_registry, &reward_engine, history_window);

    let result = with_retry(retry_policy, || evaluator.evaluate(event)).await.map_err(|e| e.to_string())?;

    for outcome in result.outcomes {
        for entry in outcome.executed_rewards.into_iter().chain(outcome.executed_spendings) {
            if let Err(err) = reward_history.append(entry).await {
                warn!(%err, "failed to append reward history entry");
            }
        }
    }
    Ok(())
}

/// Retries `operation` while it fails with a fatal `DomainError` (storage or
/// retrieval failure), sleeping with exponential backoff between attempts.
/// Non-fatal errors are returned immediately without retrying — they are not
/// transient, so retrying them would just waste the budget.
async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_fatal() && attempt + 1 < policy.max_attempts => {
                warn!(attempt, %err, "retrying after fatal repository error");
                tokio::time::sleep(policy.delay_for(attempt)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
