//! Component J: the dry-run sandbox. Runs the same rule-matching and
//! condition-evaluation path as the rule evaluator (component H) but never
//! calls into the reward engine's mutating path: rewards and spendings are
//! *predicted* by reading current user state and wallet balances, never
//! written back. The trigger event itself is never stored either (spec
//! §4.J: "MUST NOT mutate any repository, including event history").

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::catalog::EntityCatalog;
use crate::condition::{Condition, ConditionEngine, ConditionPluginRegistry};
use crate::error::Result;
use crate::evaluator::{fetch_needed_history, history_for};
use crate::event::Event;
use crate::reward::{PenaltyType, Reward, Spending, SpendingType};
use crate::rule::{Rule, RuleRepository};
use crate::store::EventRepository;
use crate::user_state::{UserState, UserStateRepository};
use crate::wallet::WalletLedger;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionResult {
    pub condition_type: String,
    pub parameters: serde_json::Value,
    pub result: bool,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictedEffect {
    #[serde(rename = "type")]
    pub effect_type: String,
    pub target: String,
    pub amount: Option<i64>,
    pub resulting_balance: Option<i64>,
    pub would_succeed: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleTrace {
    pub rule_id: String,
    pub rule_name: String,
    pub matched: bool,
    pub condition_results: Vec<ConditionResult>,
    pub predicted_rewards: Vec<PredictedEffect>,
    pub predicted_spendings: Vec<PredictedEffect>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DryRunSummary {
    pub total_matched: usize,
    pub total_predicted_points: HashMap<String, i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DryRunTrace {
    pub event_id: String,
    pub event_type: String,
    pub user_id: String,
    pub occurred_at: chrono::DateTime<chrono::Utc>,
    pub evaluated_rules: Vec<RuleTrace>,
    pub summary: DryRunSummary,
}

pub struct DryRunService<'a> {
    pub rules: &'a dyn RuleRepository,
    pub events: &'a dyn EventRepository,
    pub condition_registry: &'a ConditionPluginRegistry,
    pub catalog: &'a EntityCatalog,
    pub user_states: &'a dyn UserStateRepository,
    pub wallet: &'a dyn WalletLedger,
    pub history_window: usize,
    pub allow_negative_balance: bool,
}

impl<'a> DryRunService<'a> {
    /// Evaluates `trigger_event` exactly as the rule evaluator would, but
    /// never persists the trigger event, a user-state change, or a wallet
    /// transaction. Calling this twice with identical input yields identical
    /// output (spec §8 "Dry-run executed twice... yields identical output").
    pub async fn evaluate(&self, trigger_event: &Event) -> Result<DryRunTrace> {
        let matching_rules = self.rules.find_by_trigger(&trigger_event.event_type, true).await?;
        let history_cache = fetch_needed_history(self.events, self.history_window, trigger_event, &matching_rules).await?;

        let mut evaluated_rules = Vec::with_capacity(matching_rules.len());
        let mut summary = DryRunSummary::default();

        for rule in &matching_rules {
            let trace = self.trace_rule(rule, trigger_event, &history_cache).await?;
            if trace.matched {
                summary.total_matched += 1;
                for predicted in &trace.predicted_rewards {
                    if predicted.effect_type == "points" {
                        if let Some(amount) = predicted.amount {
                            *summary.total_predicted_points.entry(predicted.target.clone()).or_insert(0) += amount;
                        }
                    }
                }
            }
            evaluated_rules.push(trace);
        }

        Ok(DryRunTrace {
            event_id: trigger_event.event_id.clone(),
            event_type: trigger_event.event_type.clone(),
            user_id: trigger_event.user_id.clone(),
            occurred_at: trigger_event.occurred_at,
            evaluated_rules,
            summary,
        })
    }

    async fn trace_rule(
        &self,
        rule: &Rule,
        trigger_event: &Event,
        history_cache: &HashMap<String, Vec<Event>>,
    ) -> Result<RuleTrace> {
        let condition_engine = ConditionEngine::new(self.condition_registry);
        let mut condition_results = Vec::with_capacity(rule.conditions.len());
        let mut matched = true;

        for condition in &rule.conditions {
            let history = history_for(condition, history_cache);
            let result = condition_engine.evaluate(condition, &history, trigger_event);
            condition_results.push(ConditionResult {
                condition_type: condition.type_tag().to_string(),
                parameters: condition.parameters_json(),
                result,
                reason: reason_for(condition, result),
            });
            if !result {
                matched = false;
                break;
            }
        }

        let (predicted_rewards, predicted_spendings) = if matched {
            let mut working_state = self.user_states.get_by_user(&trigger_event.user_id).await?;
            let rewards = self.predict_rewards(&trigger_event.user_id, &rule.rewards, &mut working_state).await?;
            let spendings = self.predict_spendings(&trigger_event.user_id, &rule.spendings).await?;
            (rewards, spendings)
        } else {
            (vec![], vec![])
        };

        Ok(RuleTrace {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            matched,
            condition_results,
            predicted_rewards,
            predicted_spendings,
        })
    }

    /// Applies each reward to a local, never-saved copy of the user's state
    /// so a rule with several rewards previews them cumulatively, the way
    /// they would actually be applied in sequence.
    async fn predict_rewards(&self, user_id: &str, rewards: &[Reward], working_state: &mut UserState) -> Result<Vec<PredictedEffect>> {
        let mut predicted = Vec::with_capacity(rewards.len());
        for reward in rewards {
            predicted.push(self.predict_reward(user_id, reward, working_state));
        }
        Ok(predicted)
    }

    fn predict_reward(&self, _user_id: &str, reward: &Reward, working_state: &mut UserState) -> PredictedEffect {
        match reward {
            Reward::Points { category, amount } => {
                if *amount == 0 {
                    return PredictedEffect {
                        effect_type: "points".into(),
                        target: category.clone(),
                        amount: Some(0),
                        resulting_balance: Some(working_state.balance(category)),
                        would_succeed: false,
                        message: "amount must not be zero".into(),
                    };
                }
                let aggregation = self
                    .catalog
                    .get_point_category(category)
                    .map(|c| c.aggregation)
                    .unwrap_or(crate::catalog::Aggregation::Sum);
                working_state.apply_points(category, *amount, aggregation);
                PredictedEffect {
                    effect_type: "points".into(),
                    target: category.clone(),
                    amount: Some(*amount),
                    resulting_balance: Some(working_state.balance(category)),
                    would_succeed: true,
                    message: "would apply".into(),
                }
            }
            Reward::Badge { badge_id } => {
                let already_held = working_state.badges.contains(badge_id);
                PredictedEffect {
                    effect_type: "badge".into(),
                    target: badge_id.clone(),
                    amount: None,
                    resulting_balance: None,
                    would_succeed: true,
                    message: if already_held { "already held".into() } else { "would grant".into() },
                }
            }
            Reward::Trophy { trophy_id } => {
                let already_held = working_state.trophies.contains(trophy_id);
                PredictedEffect {
                    effect_type: "trophy".into(),
                    target: trophy_id.clone(),
                    amount: None,
                    resulting_balance: None,
                    would_succeed: true,
                    message: if already_held { "already held".into() } else { "would grant".into() },
                }
            }
            Reward::Level { level_id, category } => match self.catalog.get_level(level_id) {
                Some(level) if level.min_points <= working_state.balance(category) => PredictedEffect {
                    effect_type: "level".into(),
                    target: level_id.clone(),
                    amount: None,
                    resulting_balance: Some(working_state.balance(category)),
                    would_succeed: true,
                    message: "would apply".into(),
                },
                Some(_) => PredictedEffect {
                    effect_type: "level".into(),
                    target: level_id.clone(),
                    amount: None,
                    resulting_balance: Some(working_state.balance(category)),
                    would_succeed: false,
                    message: "threshold not met".into(),
                },
                None => PredictedEffect {
                    effect_type: "level".into(),
                    target: level_id.clone(),
                    amount: None,
                    resulting_balance: None,
                    would_succeed: false,
                    message: format!("unknown level {level_id}"),
                },
            },
            Reward::Penalty { penalty_type, target_id, amount } => match penalty_type {
                PenaltyType::Points => {
                    let category = target_id;
                    let delta = amount.unwrap_or(0).abs().saturating_neg();
                    let current = working_state.balance(category);
                    let floored = if !self.allow_negative_balance && current + delta < 0 { -current } else { delta };
                    working_state.points_by_category.insert(category.clone(), current + floored);
                    PredictedEffect {
                        effect_type: "penalty".into(),
                        target: category.clone(),
                        amount: Some(floored),
                        resulting_balance: Some(working_state.balance(category)),
                        would_succeed: true,
                        message: "would apply".into(),
                    }
                }
                PenaltyType::Badge => {
                    let held = working_state.badges.contains(target_id);
                    PredictedEffect {
                        effect_type: "penalty".into(),
                        target: target_id.clone(),
                        amount: None,
                        resulting_balance: None,
                        would_succeed: true,
                        message: if held { "would revoke".into() } else { "not held".into() },
                    }
                }
            },
            Reward::Plugin { type_tag, .. } => PredictedEffect {
                effect_type: "plugin".into(),
                target: type_tag.clone(),
                amount: None,
                resulting_balance: None,
                would_succeed: false,
                message: "plugin rewards are not previewed in dry-run".into(),
            },
        }
    }

    async fn predict_spendings(&self, user_id: &str, spendings: &[Spending]) -> Result<Vec<PredictedEffect>> {
        let mut predicted = Vec::with_capacity(spendings.len());
        for spending in spendings {
            let balance = self.wallet.get_balance(user_id, &spending.category).await?.balance;
            let would_succeed = self.allow_negative_balance || balance >= spending.amount;
            let resulting_balance = if would_succeed { Some(balance - spending.amount) } else { Some(balance) };
            let effect_type = match spending.spending_type {
                SpendingType::Spend => "spend",
                SpendingType::Transfer => "transfer",
            };
            predicted.push(PredictedEffect {
                effect_type: effect_type.into(),
                target: spending.category.clone(),
                amount: Some(spending.amount),
                resulting_balance,
                would_succeed,
                message: if would_succeed { "would apply".into() } else { "insufficient balance".into() },
            });
        }
        Ok(predicted)
    }
}

fn reason_for(condition: &Condition, result: bool) -> String {
    let verb = if result { "satisfied" } else { "not satisfied" };
    format!("{} condition {verb}", condition.type_tag())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{EntityCatalog, PointCategory};
    use crate::condition::ThresholdOp;
    use crate::rule::InMemoryRuleRepository;
    use crate::store::InMemoryEventStore;
    use crate::user_state::InMemoryUserStateRepository;
    use crate::wallet::InMemoryWalletLedger;
    use chrono::Utc;
    use std::collections::{HashMap as Map, HashSet as Set};

    fn service<'a>(
        rules: &'a InMemoryRuleRepository,
        events: &'a InMemoryEventStore,
        registry: &'a ConditionPluginRegistry,
        catalog: &'a EntityCatalog,
        states: &'a InMemoryUserStateRepository,
        wallet: &'a InMemoryWalletLedger,
    ) -> DryRunService<'a> {
        DryRunService {
            rules,
            events,
            condition_registry: registry,
            catalog,
            user_states: states,
            wallet,
            history_window: 1000,
            allow_negative_balance: false,
        }
    }

    #[tokio::test]
    async fn dry_run_predicts_points_without_persisting() {
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
                    operation: ThresholdOp::Ge,
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
        let registry = ConditionPluginRegistry::new();
        let service = service(&rules, &events, &registry, &catalog, &states, &wallet);

        let mut attrs = Map::new();
        attrs.insert("amount".to_string(), serde_json::Value::from(150));
        let trigger = Event::new(Some("evt-1".into()), "USER_PURCHASED_PRODUCT", "u3", Utc::now(), attrs).unwrap();

        let trace = service.evaluate(&trigger).await.unwrap();
        assert_eq!(trace.summary.total_matched, 1);
        assert_eq!(*trace.summary.total_predicted_points.get("xp").unwrap(), 50);
        assert_eq!(trace.evaluated_rules[0].predicted_rewards[0].resulting_balance, Some(50));

        // nothing was persisted: state still at zero, no event stored.
        assert_eq!(states.get_by_user("u3").await.unwrap().balance("xp"), 0);
        assert!(events.get_by_id("evt-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dry_run_is_deterministic_across_repeated_calls() {
        let rules = InMemoryRuleRepository::new();
        rules
            .create(Rule {
                id: "r1".into(),
                name: "always points".into(),
                description: String::new(),
                is_active: true,
                triggers: Set::from(["USER_LOGIN".to_string()]),
                conditions: vec![Condition::AlwaysTrue { condition_id: "c1".into() }],
                rewards: vec![Reward::Points { category: "xp".into(), amount: 10 }],
                spendings: vec![],
            })
            .await
            .unwrap();

        let events = InMemoryEventStore::new();
        let catalog = EntityCatalog::default();
        let states = InMemoryUserStateRepository::new();
        let wallet = InMemoryWalletLedger::new(false);
        let registry = ConditionPluginRegistry::new();
        let service = service(&rules, &events, &registry, &catalog, &states, &wallet);

        let trigger = Event::new(Some("evt-1".into()), "USER_LOGIN", "u1", Utc::now(), Map::new()).unwrap();
        let first = service.evaluate(&trigger).await.unwrap();
        let second = service.evaluate(&trigger).await.unwrap();
        assert_eq!(first.summary.total_predicted_points, second.summary.total_predicted_points);
    }
}
