//! Component H: the rule evaluator. Joins the event store, entity catalog,
//! user state, condition engine, and reward engine: resolves which rules
//! match a trigger event, evaluates their conditions, and issues rewards and
//! spendings for every rule whose conditions all pass.
//!
//! The dry-run sandbox (component J, spec §4.J) is a separate service in
//! `crate::dryrun` that shares the history-fetch and condition-evaluation
//! helpers here but never calls into the reward engine's mutating path.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::condition::{Condition, ConditionEngine, ConditionPluginRegistry, HistoryNeed};
use crate::error::Result;
use crate::event::Event;
use crate::reward::{RewardEngine, RewardHistory};
use crate::rule::{Rule, RuleRepository};
use crate::store::EventRepository;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionTrace {
    pub condition_id: String,
    pub result: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleEvaluationOutcome {
    pub rule_id: String,
    pub rule_name: String,
    pub matched: bool,
    pub condition_traces: Vec<ConditionTrace>,
    pub executed_rewards: Vec<RewardHistory>,
    pub executed_spendings: Vec<RewardHistory>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleEvaluationResult {
    pub trigger_event_id: String,
    pub user_id: String,
    pub outcomes: Vec<RuleEvaluationOutcome>,
}

/// Lazily loads only the per-type history slices at least one of `rules`'
/// conditions needs, bounded by `history_window` events per type (spec §4.H
/// step 2, §9 "History-dependent conditions"). Shared by the evaluator and
/// the dry-run service so both fetch history the same way.
pub(crate) async fn fetch_needed_history(
    events: &dyn EventRepository,
    history_window: usize,
    trigger_event: &Event,
    rules: &[Rule],
) -> Result<HashMap<String, Vec<Event>>> {
    let mut needed_types: HashSet<String> = HashSet::new();
    let mut needs_full_history = false;

    for rule in rules {
        for condition in &rule.conditions {
            match condition.history_need() {
                HistoryNeed::None => {}
                HistoryNeed::ByType { event_type, .. } => {
                    needed_types.insert(event_type);
                }
                HistoryNeed::FullHistory => needs_full_history = true,
            }
        }
    }

    let mut cache: HashMap<String, Vec<Event>> = HashMap::new();
    if needs_full_history {
        let all = events.get_by_user(&trigger_event.user_id, history_window, 0).await?;
        for event in &all {
            cache.entry(event.event_type.clone()).or_default().push(event.clone());
        }
    } else {
        for event_type in needed_types {
            let fetched = events.get_by_user(&trigger_event.user_id, history_window, 0).await?;
            let filtered: Vec<Event> = fetched.into_iter().filter(|e| e.event_type == event_type).collect();
            cache.insert(event_type, filtered);
        }
    }
    Ok(cache)
}

/// The history slice one condition needs, drawn from the per-type `cache`
/// built by [`fetch_needed_history`].
pub(crate) fn history_for(condition: &Condition, cache: &HashMap<String, Vec<Event>>) -> Vec<Event> {
    match condition.history_need() {
        HistoryNeed::None => vec![],
        HistoryNeed::ByType { event_type, .. } => cache.get(&event_type).cloned().unwrap_or_default(),
        HistoryNeed::FullHistory => {
            let mut all: Vec<Event> = cache.values().flatten().cloned().collect();
            all.sort_by_key(|e| e.occurred_at);
            all
        }
    }
}

pub struct RuleEvaluator<'a> {
    pub rules: &'a dyn RuleRepository,
    pub events: &'a dyn EventRepository,
    pub condition_registry: &'a ConditionPluginRegistry,
    pub reward_engine: &'a RewardEngine<'a>,
    pub history_window: usize,
}

impl<'a> RuleEvaluator<'a> {
    pub fn new(
        rules: &'a dyn RuleRepository,
        events: &'a dyn EventRepository,
        condition_registry: &'a ConditionPluginRegistry,
        reward_engine: &'a RewardEngine<'a>,
        history_window: usize,
    ) -> Self {
        Self {
            rules,
            events,
            condition_registry,
            reward_engine,
            history_window,
        }
    }

    /// Evaluates `trigger_event`, running matched rules' rewards and
    /// spendings. Rules are considered in `id` ascending order so repeated
    /// runs produce identical results (spec §4.H step 1).
    pub async fn evaluate(&self, trigger_event: &Event) -> Result<RuleEvaluationResult> {
        let matching_rules = self.rules.find_by_trigger(&trigger_event.event_type, true).await?;
        let history_cache = fetch_needed_history(self.events, self.history_window, trigger_event, &matching_rules).await?;

        let mut outcomes = Vec::with_capacity(matching_rules.len());
        for rule in &matching_rules {
            let outcome = self.evaluate_rule(rule, trigger_event, &history_cache).await?;
            outcomes.push(outcome);
        }

        Ok(RuleEvaluationResult {
            trigger_event_id: trigger_event.event_id.clone(),
            user_id: trigger_event.user_id.clone(),
            outcomes,
        })
    }

    async fn evaluate_rule(
        &self,
        rule: &Rule,
        trigger_event: &Event,
        history_cache: &HashMap<String, Vec<Event>>,
    ) -> Result<RuleEvaluationOutcome> {
        let condition_engine = ConditionEngine::new(self.condition_registry);
        let mut traces = Vec::with_capacity(rule.conditions.len());
        let mut matched = true;

        for condition in &rule.conditions {
            let history = history_for(condition, history_cache);
            let result = condition_engine.evaluate(condition, &history, trigger_event);
            traces.push(ConditionTrace {
                condition_id: condition.condition_id().to_string(),
                result,
            });
            if !result {
                matched = false;
                debug!(rule_id = %rule.id, condition_id = %condition.condition_id(), "condition false, rule short-circuited");
                break;
            }
        }

        if !matched {
            return Ok(RuleEvaluationOutcome {
                rule_id: rule.id.clone(),
                rule_name: rule.name.clone(),
                matched,
                condition_traces: traces,
                executed_rewards: vec![],
                executed_spendings: vec![],
            });
        }

        let mut executed_rewards = Vec::new();
        for (reward_position, reward) in rule.rewards.iter().enumerate() {
            match self
                .reward_engine
                .execute_reward(&trigger_event.user_id, &trigger_event.event_id, &rule.id, reward_position, reward)
                .await
            {
                // already ran for this trigger event: a true no-op, no history appended
                Ok(None) => {}
                Ok(Some(outcome)) => {
                    executed_rewards.push(outcome.history);
                    executed_rewards.extend(outcome.chained);
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(rule_id = %rule.id, error = %err, "reward execution failed, continuing to next reward");
                }
            }
        }

        let mut executed_spendings = Vec::new();
        for (index, spending) in rule.spendings.iter().enumerate() {
            match self
                .reward_engine
                .execute_spending(&trigger_event.user_id, &trigger_event.event_id, &rule.id, index, spending)
                .await
            {
                Ok(None) => {}
                Ok(Some(history)) => {
                    let failed = !history.success;
                    executed_spendings.push(history);
                    if failed {
                        // spending failure aborts remaining spendings in this rule only
                        break;
                    }
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(rule_id = %rule.id, error = %err, "spending execution failed, aborting remaining spendings");
                    break;
                }
            }
        }

        Ok(RuleEvaluationOutcome {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            matched,
            condition_traces: traces,
            executed_rewards,
            executed_spendings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{EntityCatalog, PointCategory};
    use crate::condition::Condition;
    use crate::reward::{InMemoryRewardIdempotencyStore, Reward, RewardPluginRegistry};
    use crate::rule::InMemoryRuleRepository;
    use crate::store::InMemoryEventStore;
    use crate::user_state::InMemoryUserStateRepository;
    use crate::wallet::InMemoryWalletLedger;
    use chrono::Utc;
    use std::collections::{HashMap as Map, HashSet as Set};

    async fn seed_first_comment_rule(rules: &InMemoryRuleRepository) {
        rules
            .create(Rule {
                id: "r1".into(),
                name: "first comment badge".into(),
                description: String::new(),
                is_active: true,
                triggers: Set::from(["USER_COMMENTED".to_string()]),
                conditions: vec![Condition::FirstOccurrence { condition_id: "c1".into() }],
                rewards: vec![Reward::Badge { badge_id: "first-comment".into() }],
                spendings: vec![],
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn first_comment_badge_scenario_grants_once() {
        let rules = InMemoryRuleRepository::new();
        seed_first_comment_rule(&rules).await;
        let events = InMemoryEventStore::new();
        let catalog = EntityCatalog::default();
        catalog.put_badge(crate::catalog::Badge {
            id: "first-comment".into(),
            name: "First Comment".into(),
            description: String::new(),
            image: String::new(),
            visible: true,
        });
        let states = InMemoryUserStateRepository::new();
        let wallet = InMemoryWalletLedger::new(false);
        let condition_registry = ConditionPluginRegistry::new();
        let reward_plugins = RewardPluginRegistry::new();
        let reward_idempotency = InMemoryRewardIdempotencyStore::new();
        let reward_engine = RewardEngine::new(&catalog, &states, &wallet, false, &reward_plugins, &reward_idempotency);
        let evaluator = RuleEvaluator::new(&rules, &events, &condition_registry, &reward_engine, 1000);

        let trigger = Event::new(Some("evt-1".into()), "USER_COMMENTED", "u1", Utc::now(), Map::new()).unwrap();
        events.store(&trigger).await.unwrap();
        let result = evaluator.evaluate(&trigger).await.unwrap();

        assert_eq!(result.outcomes.len(), 1);
        assert!(result.outcomes[0].matched);
        assert_eq!(result.outcomes[0].executed_rewards.len(), 1);
        assert!(result.outcomes[0].executed_rewards[0].success);

        let state = states.get_by_user("u1").await.unwrap();
        assert!(state.badges.contains("first-comment"));

        // re-ingesting the same event after it has been recorded in history
        // makes `firstOccurrence` false, so the rule no longer matches.
        let result_again = evaluator.evaluate(&trigger).await.unwrap();
        assert!(!result_again.outcomes[0].matched);
        let state_again = states.get_by_user("u1").await.unwrap();
        assert_eq!(state_again.badges.len(), 1);
    }

    #[tokio::test]
    async fn purchase_threshold_scenario_only_rewards_above_threshold() {
        let rules = InMemoryRuleRepository::new();
        rules
            .create(Rule {
                id: "r3".into(),
                name: "purchase threshold".into(),
                description: String::new(),
                is_active: true,
                triggers: Set::from(["USER_PURCHASED_PRODUCT".to_string()]),
                conditions: vec![Condition::Threshold {
                    condition_id: "c1".into(),
                    attribute_name: "amount".into(),
                    threshold: 100.0,
                    operation: crate::condition::ThresholdOp::Ge,
                }],
                rewards: vec![Reward::Points { category: "xp".into(), amount: 50 }],
                spendings: vec![],
            })
            .await
            .unwrap();

        let events = InMemoryEventStore::new();
        let catalog = EntityCatalog::default();
        catalog.put_point_category(PointCategory {
            id: "xp".into(),
            name: "XP".into(),
            description: String::new(),
            aggregation: crate::catalog::Aggregation::Sum,
        });
        let states = InMemoryUserStateRepository::new();
        let wallet = InMemoryWalletLedger::new(false);
        let condition_registry = ConditionPluginRegistry::new();
        let reward_plugins = RewardPluginRegistry::new();
        let reward_idempotency = InMemoryRewardIdempotencyStore::new();
        let reward_engine = RewardEngine::new(&catalog, &states, &wallet, false, &reward_plugins, &reward_idempotency);
        let evaluator = RuleEvaluator::new(&rules, &events, &condition_registry, &reward_engine, 1000);

        let mut low_attrs = Map::new();
        low_attrs.insert("amount".to_string(), serde_json::Value::from(99));
        let low = Event::new(Some("evt-low".into()), "USER_PURCHASED_PRODUCT", "u3", Utc::now(), low_attrs).unwrap();
        evaluator.evaluate(&low).await.unwrap();
        assert_eq!(states.get_by_user("u3").await.unwrap().balance("xp"), 0);

        let mut high_attrs = Map::new();
        high_attrs.insert("amount".to_string(), serde_json::Value::from(150));
        let high = Event::new(Some("evt-high".into()), "USER_PURCHASED_PRODUCT", "u3", Utc::now(), high_attrs).unwrap();
        evaluator.evaluate(&high).await.unwrap();
        assert_eq!(states.get_by_user("u3").await.unwrap().balance("xp"), 50);
    }

    #[tokio::test]
    async fn rule_with_false_condition_does_not_execute_rewards() {
        let rules = InMemoryRuleRepository::new();
        rules
            .create(Rule {
                id: "r2".into(),
                name: "unreachable".into(),
                description: String::new(),
                is_active: true,
                triggers: Set::from(["USER_LOGIN".to_string()]),
                conditions: vec![Condition::AttributeEquals {
                    condition_id: "c1".into(),
                    attribute_name: "flag".into(),
                    expected_value: serde_json::Value::Bool(true),
                }],
                rewards: vec![Reward::Points { category: "xp".into(), amount: 10 }],
                spendings: vec![],
            })
            .await
            .unwrap();

        let events = InMemoryEventStore::new();
        let catalog = EntityCatalog::default();
        let states = InMemoryUserStateRepository::new();
        let wallet = InMemoryWalletLedger::new(false);
        let condition_registry = ConditionPluginRegistry::new();
        let reward_plugins = RewardPluginRegistry::new();
        let reward_idempotency = InMemoryRewardIdempotencyStore::new();
        let reward_engine = RewardEngine::new(&catalog, &states, &wallet, false, &reward_plugins, &reward_idempotency);
        let evaluator = RuleEvaluator::new(&rules, &events, &condition_registry, &reward_engine, 1000);

        let trigger = Event::new(Some("evt-1".into()), "USER_LOGIN", "u1", Utc::now(), Map::new()).unwrap();
        let result = evaluator.evaluate(&trigger).await.unwrap();
        assert!(!result.outcomes[0].matched);
        assert!(result.outcomes[0].executed_rewards.is_empty());
    }
}
