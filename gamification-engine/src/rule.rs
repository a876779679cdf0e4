//! Rule entity and its repository. A rule fires when its trigger set
//! contains the incoming event's type and every condition evaluates true;
//! rewards then spendings execute in listed order.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::error::{DomainError, Result};
use crate::reward::{Reward, Spending};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub description: String,
    pub is_active: bool,
    pub triggers: HashSet<String>,
    pub conditions: Vec<Condition>,
    pub rewards: Vec<Reward>,
    pub spendings: Vec<Spending>,
}

impl Rule {
    pub fn matches_trigger(&self, event_type: &str) -> bool {
        self.is_active && self.triggers.contains(event_type)
    }
}

#[async_trait]
pub trait RuleRepository: Send + Sync {
    async fn create(&self, rule: Rule) -> Result<Rule>;
    async fn update(&self, rule: Rule) -> Result<Rule>;
    async fn delete(&self, id: &str) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<Rule>>;

    /// All rules, or only the active ones, for the given trigger event type.
    /// Returned ordered by `id` ascending so evaluation order is
    /// deterministic across runs.
    async fn find_by_trigger(&self, event_type: &str, active_only: bool) -> Result<Vec<Rule>>;

    async fn list(&self, active_only: bool) -> Result<Vec<Rule>>;
}

#[derive(Default)]
pub struct InMemoryRuleRepository {
    rules: RwLock<HashMap<String, Rule>>,
}

impl InMemoryRuleRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuleRepository for InMemoryRuleRepository {
    async fn create(&self, rule: Rule) -> Result<Rule> {
        let mut rules = self.rules.write().expect("rule repository lock poisoned");
        if rules.contains_key(&rule.id) {
            return Err(DomainError::Conflict(format!("rule {} already exists", rule.id)));
        }
        rules.insert(rule.id.clone(), rule.clone());
        Ok(rule)
    }

    async fn update(&self, rule: Rule) -> Result<Rule> {
        let mut rules = self.rules.write().expect("rule repository lock poisoned");
        if !rules.contains_key(&rule.id) {
            return Err(DomainError::NotFound(format!("rule {} not found", rule.id)));
        }
        rules.insert(rule.id.clone(), rule.clone());
        Ok(rule)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut rules = self.rules.write().expect("rule repository lock poisoned");
        rules
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| DomainError::NotFound(format!("rule {id} not found")))
    }

    async fn get(&self, id: &str) -> Result<Option<Rule>> {
        let rules = self.rules.read().expect("rule repository lock poisoned");
        Ok(rules.get(id).cloned())
    }

    async fn find_by_trigger(&self, event_type: &str, active_only: bool) -> Result<Vec<Rule>> {
        let rules = self.rules.read().expect("rule repository lock poisoned");
        let mut matching: Vec<Rule> = rules
            .values()
            .filter(|r| r.triggers.contains(event_type))
            .filter(|r| !active_only || r.is_active)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matching)
    }

    async fn list(&self, active_only: bool) -> Result<Vec<Rule>> {
        let rules = self.rules.read().expect("rule repository lock poisoned");
        let mut all: Vec<Rule> = rules.values().filter(|r| !active_only || r.is_active).cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }
}
