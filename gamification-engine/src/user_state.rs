//! Component D: per-user aggregate state (spec §3 "User State", §4.D).

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::catalog::Aggregation;
use crate::error::Result;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserState {
    pub user_id: String,
    pub points_by_category: HashMap<String, i64>,
    pub badges: HashSet<String>,
    pub trophies: HashSet<String>,
    /// category -> current level id, recomputed after point changes.
    pub levels: HashMap<String, String>,
    /// Bookkeeping for the `Avg`/`Count` aggregations, which need more than
    /// the running total to combine the next delta correctly.
    #[serde(default)]
    pub category_event_counts: HashMap<String, i64>,
}

impl UserState {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    pub fn balance(&self, category: &str) -> i64 {
        *self.points_by_category.get(category).unwrap_or(&0)
    }

    /// Combines `delta` into the category total per the category's
    /// aggregation rule. `Avg` is the running average of all deltas ever
    /// applied (floor division); `Count` ignores the delta's magnitude and
    /// counts applications.
    pub fn apply_points(&mut self, category: &str, delta: i64, aggregation: Aggregation) {
        let count = self.category_event_counts.entry(category.to_string()).or_insert(0);
        let current = self.points_by_category.entry(category.to_string()).or_insert(0);

        *current = match aggregation {
            Aggregation::Sum => *current + delta,
            Aggregation::Max => {
                if *count == 0 {
                    delta
                } else {
                    (*current).max(delta)
                }
            }
            Aggregation::Min => {
                if *count == 0 {
                    delta
                } else {
                    (*current).min(delta)
                }
            }
            Aggregation::Avg => {
                let total_before = *current * *count;
                let new_count = *count + 1;
                (total_before + delta) / new_count
            }
            Aggregation::Count => *current + 1,
        };
        *count += 1;
    }

    /// Idempotent: re-granting a badge the user already holds is a no-op.
    pub fn grant_badge(&mut self, badge_id: impl Into<String>) -> bool {
        self.badges.insert(badge_id.into())
    }

    pub fn grant_trophy(&mut self, trophy_id: impl Into<String>) -> bool {
        self.trophies.insert(trophy_id.into())
    }

    pub fn set_level(&mut self, category: impl Into<String>, level_id: impl Into<String>) {
        self.levels.insert(category.into(), level_id.into());
    }
}

#[async_trait]
pub trait UserStateRepository: Send + Sync {
    /// Returns the user's state, creating an empty one if absent.
    async fn get_by_user(&self, user_id: &str) -> Result<UserState>;

    /// Persists atomically (read-modify-write under the caller's per-user
    /// lock; see the locking module).
    async fn save(&self, state: &UserState) -> Result<()>;

    /// All known users, for leaderboard ranking. Order is unspecified; the
    /// leaderboard projector sorts by its own ranking key.
    async fn list_all(&self) -> Result<Vec<UserState>>;
}

/// In-memory development/test backing for [`UserStateRepository`].
#[derive(Default)]
pub struct InMemoryUserStateRepository {
    states: RwLock<HashMap<String, UserState>>,
}

impl InMemoryUserStateRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStateRepository for InMemoryUserStateRepository {
    async fn get_by_user(&self, user_id: &str) -> Result<UserState> {
        let states = self.states.read().expect("user state lock poisoned");
        Ok(states.get(user_id).cloned().unwrap_or_else(|| UserState::new(user_id)))
    }

    async fn save(&self, state: &UserState) -> Result<()> {
        let mut states = self.states.write().expect("user state lock poisoned");
        states.insert(state.user_id.clone(), state.clone());
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<UserState>> {
        let states = self.states.read().expect("user state lock poisoned");
        Ok(states.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_aggregation_accumulates() {
        let mut state = UserState::new("u1");
        state.apply_points("xp", 10, Aggregation::Sum);
        state.apply_points("xp", 5, Aggregation::Sum);
        assert_eq!(state.balance("xp"), 15);
    }

    #[test]
    fn max_aggregation_keeps_largest_delta() {
        let mut state = UserState::new("u1");
        state.apply_points("xp", 10, Aggregation::Max);
        state.apply_points("xp", 5, Aggregation::Max);
        state.apply_points("xp", 20, Aggregation::Max);
        assert_eq!(state.balance("xp"), 20);
    }

    #[test]
    fn avg_aggregation_computes_running_average() {
        let mut state = UserState::new("u1");
        state.apply_points("xp", 10, Aggregation::Avg);
        state.apply_points("xp", 20, Aggregation::Avg);
        assert_eq!(state.balance("xp"), 15);
    }

    #[test]
    fn count_aggregation_ignores_delta_magnitude() {
        let mut state = UserState::new("u1");
        state.apply_points("xp", 500, Aggregation::Count);
        state.apply_points("xp", 1, Aggregation::Count);
        assert_eq!(state.balance("xp"), 2);
    }

    #[test]
    fn granting_badge_twice_is_idempotent() {
        let mut state = UserState::new("u1");
        assert!(state.grant_badge("first-comment"));
        assert!(!state.grant_badge("first-comment"));
        assert_eq!(state.badges.len(), 1);
    }

    #[tokio::test]
    async fn repository_creates_empty_state_when_absent() {
        let repo = InMemoryUserStateRepository::new();
        let state = repo.get_by_user("new-user").await.unwrap();
        assert_eq!(state.user_id, "new-user");
        assert_eq!(state.balance("xp"), 0);
    }
}
