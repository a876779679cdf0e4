//! Component K: the leaderboard projector. A read-mostly view over user
//! state and the wallet ledger, ranked and paginated on demand, backed by a
//! short-TTL cache so repeated queries over a hot window don't re-scan every
//! user on every request.
//!
//! The cache entry shape and TTL bookkeeping are grounded in
//! `fo3-wallet-api/src/cache/mod.rs`'s `CacheEntry<T>` (`created_at`,
//! `expires_at`, `is_expired()`); the single-flight-per-key guarantee is
//! implemented with a per-key `tokio::sync::Mutex` rather than that module's
//! Redis-backed `Cache` trait, since the projector has no external cache tier.
//!
//! The `Level` kind ranks by a user's current level threshold (resolved
//! against the entity catalog), not their raw balance -- two users on the
//! same level tie, same as two users with the same badge count.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::catalog::EntityCatalog;
use crate::error::{DomainError, Result};
use crate::user_state::UserStateRepository;
use crate::wallet::{WalletLedger, WalletTransactionType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaderboardKind {
    Points,
    Badges,
    Trophies,
    Level,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeRange {
    Daily,
    Weekly,
    Monthly,
    AllTime,
}

impl TimeRange {
    /// `[windowStart, windowEnd)` in UTC calendar units relative to
    /// `reference`. `AllTime` has no window (`None`).
    fn window(&self, reference: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        match self {
            TimeRange::AllTime => None,
            TimeRange::Daily => {
                let start = reference.date_naive().and_hms_opt(0, 0, 0).unwrap();
                let start = Utc.from_utc_datetime(&start);
                Some((start, start + chrono::Duration::days(1)))
            }
            TimeRange::Weekly => {
                let days_since_monday = reference.weekday().num_days_from_monday() as i64;
                let start = reference.date_naive().and_hms_opt(0, 0, 0).unwrap();
                let start = Utc.from_utc_datetime(&start) - chrono::Duration::days(days_since_monday);
                Some((start, start + chrono::Duration::days(7)))
            }
            TimeRange::Monthly => {
                let start_naive = reference
                    .date_naive()
                    .with_day(1)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap();
                let start = Utc.from_utc_datetime(&start_naive);
                let (next_year, next_month) = if reference.month() == 12 {
                    (reference.year() + 1, 1)
                } else {
                    (reference.year(), reference.month() + 1)
                };
                let end_naive = chrono::NaiveDate::from_ymd_opt(next_year, next_month, 1)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap();
                let end = Utc.from_utc_datetime(&end_naive);
                Some((start, end))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub user_id: String,
    pub metric: i64,
    pub rank: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardPage {
    pub kind: LeaderboardKind,
    pub category: Option<String>,
    pub time_range: TimeRange,
    pub page: usize,
    pub page_size: usize,
    pub total_entries: usize,
    pub entries: Vec<LeaderboardEntry>,
}

pub const MAX_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    kind: LeaderboardKind,
    category: Option<String>,
    time_range: TimeRange,
    window_start: Option<DateTime<Utc>>,
}

struct CacheEntry {
    data: Vec<LeaderboardEntry>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl CacheEntry {
    fn new(data: Vec<LeaderboardEntry>, ttl: Duration, now: DateTime<Utc>) -> Self {
        Self {
            data,
            created_at: now,
            expires_at: now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(60)),
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Ranked view over user state and wallet balances, cached per `(kind,
/// category, timeRange, windowStart)` with a TTL and single-flight recompute.
///
/// Holds its repositories behind `Arc` (rather than the borrowed `&'a dyn`
/// references the evaluator and reward engine use) so one projector — and
/// its cache — can outlive any single request in the HTTP edge.
pub struct LeaderboardProjector {
    catalog: Arc<EntityCatalog>,
    user_states: Arc<dyn UserStateRepository>,
    wallet: Arc<dyn WalletLedger>,
    cache: Mutex<HashMap<CacheKey, CacheEntry>>,
    ttl: Duration,
}

impl LeaderboardProjector {
    pub fn new(
        catalog: Arc<EntityCatalog>,
        user_states: Arc<dyn UserStateRepository>,
        wallet: Arc<dyn WalletLedger>,
        ttl_seconds: u64,
    ) -> Self {
        Self {
            catalog,
            user_states,
            wallet,
            cache: Mutex::new(HashMap::new()),
            ttl: Duration::from_secs(ttl_seconds.max(1)),
        }
    }

    pub async fn query(
        &self,
        kind: LeaderboardKind,
        category: Option<&str>,
        time_range: TimeRange,
        page: usize,
        page_size: usize,
        reference: DateTime<Utc>,
    ) -> Result<LeaderboardPage> {
        if page == 0 {
            return Err(DomainError::Validation("page must be 1-based".into()));
        }
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(DomainError::Validation(format!("pageSize must be in [1, {MAX_PAGE_SIZE}]")));
        }
        if matches!(kind, LeaderboardKind::Points | LeaderboardKind::Level) && category.is_none() {
            return Err(DomainError::Validation(format!("{kind:?} leaderboard requires a category")));
        }

        let ranked = self.ranked_entries(kind, category, time_range, reference).await?;
        let total_entries = ranked.len();
        let start = (page - 1) * page_size;
        let entries = ranked.into_iter().skip(start).take(page_size).collect();

        Ok(LeaderboardPage {
            kind,
            category: category.map(str::to_string),
            time_range,
            page,
            page_size,
            total_entries,
            entries,
        })
    }

    /// A single user's dense rank within the full ranking, or `None` if they
    /// have no entry (metric of zero still ranks; absence means the user has
    /// no recorded state at all).
    pub async fn rank_of(
        &self,
        user_id: &str,
        kind: LeaderboardKind,
        category: Option<&str>,
        time_range: TimeRange,
        reference: DateTime<Utc>,
    ) -> Result<Option<LeaderboardEntry>> {
        let ranked = self.ranked_entries(kind, category, time_range, reference).await?;
        Ok(ranked.into_iter().find(|e| e.user_id == user_id))
    }

    /// Evicts the cache entry for a specific `(kind, category, timeRange)` at
    /// the window implied by `reference`, forcing the next query to recompute.
    pub async fn refresh(&self, kind: LeaderboardKind, category: Option<&str>, time_range: TimeRange, reference: DateTime<Utc>) {
        let window_start = time_range.window(reference).map(|(start, _)| start);
        let key = CacheKey {
            kind,
            category: category.map(str::to_string),
            time_range,
            window_start,
        };
        let mut cache = self.cache.lock().await;
        cache.remove(&key);
    }

    async fn ranked_entries(
        &self,
        kind: LeaderboardKind,
        category: Option<&str>,
        time_range: TimeRange,
        reference: DateTime<Utc>,
    ) -> Result<Vec<LeaderboardEntry>> {
        let window_start = time_range.window(reference).map(|(start, _)| start);
        let key = CacheKey {
            kind,
            category: category.map(str::to_string),
            time_range,
            window_start,
        };

        {
            let cache = self.cache.lock().await;
            if let Some(entry) = cache.get(&key) {
                if !entry.is_expired(Utc::now()) {
                    return Ok(entry.data.clone());
                }
            }
        }

        // Holding the lock across the recompute makes concurrent misses for
        // the same key single-flight: the second caller blocks on the mutex
        // and then observes the first caller's freshly-populated entry.
        let mut cache = self.cache.lock().await;
        if let Some(entry) = cache.get(&key) {
            if !entry.is_expired(Utc::now()) {
                return Ok(entry.data.clone());
            }
        }

        let computed = self.compute(kind, category, time_range, reference).await?;
        let now = Utc::now();
        cache.insert(key, CacheEntry::new(computed.clone(), self.ttl, now));
        Ok(computed)
    }

    async fn compute(
        &self,
        kind: LeaderboardKind,
        category: Option<&str>,
        time_range: TimeRange,
        reference: DateTime<Utc>,
    ) -> Result<Vec<LeaderboardEntry>> {
        let states = self.user_states.list_all().await?;
        let window = time_range.window(reference);

        let mut metrics: Vec<(String, i64)> = Vec::with_capacity(states.len());
        for state in &states {
            let metric = match kind {
                LeaderboardKind::Badges => state.badges.len() as i64,
                LeaderboardKind::Trophies => state.trophies.len() as i64,
                LeaderboardKind::Points => {
                    let category = category.expect("validated by caller");
                    match window {
                        None => state.balance(category),
                        Some((start, end)) => self.earned_in_window(&state.user_id, category, start, end).await?,
                    }
                }
                // Ranked by the current level's threshold, not the raw balance,
                // so two users on the same level always tie -- the time window
                // is meaningless here, a level is a standing, not an accrual.
                LeaderboardKind::Level => {
                    let category = category.expect("validated by caller");
                    self.catalog
                        .current_level_for_balance(category, state.balance(category))
                        .map(|level| level.min_points)
                        .unwrap_or(0)
                }
            };
            metrics.push((state.user_id.clone(), metric));
        }

        metrics.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        // Dense rank (spec §4.K "rank numbers are dense over the whole
        // dataset"): ties share a rank, and the next distinct metric value
        // takes the very next integer -- no gaps, unlike competition ranking.
        let mut ranked = Vec::with_capacity(metrics.len());
        let mut rank = 0u64;
        let mut last_metric: Option<i64> = None;
        for (user_id, metric) in metrics {
            if last_metric != Some(metric) {
                rank += 1;
                last_metric = Some(metric);
            }
            ranked.push(LeaderboardEntry { user_id, metric, rank });
        }
        Ok(ranked)
    }

    async fn earned_in_window(&self, user_id: &str, category: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<i64> {
        let transactions = self.wallet.get_transactions(user_id, category, Some(start), Some(end)).await?;
        Ok(transactions
            .into_iter()
            .filter(|t| t.transaction_type == WalletTransactionType::Earn && t.timestamp < end)
            .map(|t| t.amount)
            .sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user_state::InMemoryUserStateRepository;
    use crate::wallet::InMemoryWalletLedger;
    use chrono::TimeZone;

    fn backing() -> (Arc<EntityCatalog>, Arc<InMemoryUserStateRepository>, Arc<InMemoryWalletLedger>) {
        (
            Arc::new(EntityCatalog::default()),
            Arc::new(InMemoryUserStateRepository::new()),
            Arc::new(InMemoryWalletLedger::new(false)),
        )
    }

    async fn seed_points(states: &InMemoryUserStateRepository, wallet: &InMemoryWalletLedger, user_id: &str, amount: i64) {
        let mut state = states.get_by_user(user_id).await.unwrap();
        state.apply_points("xp", amount, crate::catalog::Aggregation::Sum);
        states.save(&state).await.unwrap();
        wallet
            .credit(user_id, "xp", amount, WalletTransactionType::Earn, "seed", None, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn alltime_points_ranked_descending_with_userid_tiebreak() {
        let (catalog, states, wallet) = backing();
        seed_points(&states, &wallet, "bob", 50).await;
        seed_points(&states, &wallet, "alice", 50).await;
        seed_points(&states, &wallet, "carol", 100).await;

        let projector = LeaderboardProjector::new(catalog, states.clone(), wallet.clone(), 60);
        let now = Utc::now();
        let page = projector
            .query(LeaderboardKind::Points, Some("xp"), TimeRange::AllTime, 1, 10, now)
            .await
            .unwrap();

        assert_eq!(page.entries[0].user_id, "carol");
        assert_eq!(page.entries[0].rank, 1);
        assert_eq!(page.entries[1].user_id, "alice");
        assert_eq!(page.entries[1].rank, 2);
        assert_eq!(page.entries[2].user_id, "bob");
        assert_eq!(page.entries[2].rank, 2);
    }

    #[tokio::test]
    async fn points_leaderboard_requires_a_category() {
        let (catalog, states, wallet) = backing();
        let projector = LeaderboardProjector::new(catalog, states, wallet, 60);
        let result = projector
            .query(LeaderboardKind::Points, None, TimeRange::AllTime, 1, 10, Utc::now())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn refresh_evicts_cached_entry_so_next_query_recomputes() {
        let (catalog, states, wallet) = backing();
        seed_points(&states, &wallet, "alice", 10).await;

        let projector = LeaderboardProjector::new(catalog, states.clone(), wallet.clone(), 3600);
        let now = Utc::now();
        let first = projector
            .query(LeaderboardKind::Points, Some("xp"), TimeRange::AllTime, 1, 10, now)
            .await
            .unwrap();
        assert_eq!(first.entries[0].metric, 10);

        seed_points(&states, &wallet, "alice", 5).await;
        let cached = projector
            .query(LeaderboardKind::Points, Some("xp"), TimeRange::AllTime, 1, 10, now)
            .await
            .unwrap();
        assert_eq!(cached.entries[0].metric, 10, "stale cache still served within TTL");

        projector.refresh(LeaderboardKind::Points, Some("xp"), TimeRange::AllTime, now).await;
        let refreshed = projector
            .query(LeaderboardKind::Points, Some("xp"), TimeRange::AllTime, 1, 10, now)
            .await
            .unwrap();
        assert_eq!(refreshed.entries[0].metric, 15);
    }

    #[tokio::test]
    async fn pagination_splits_ranked_entries_by_page_size() {
        let (catalog, states, wallet) = backing();
        for (name, points) in [("a", 10), ("b", 20), ("c", 30), ("d", 40)] {
            seed_points(&states, &wallet, name, points).await;
        }
        let projector = LeaderboardProjector::new(catalog, states, wallet, 60);
        let now = Utc::now();
        let page1 = projector
            .query(LeaderboardKind::Points, Some("xp"), TimeRange::AllTime, 1, 2, now)
            .await
            .unwrap();
        let page2 = projector
            .query(LeaderboardKind::Points, Some("xp"), TimeRange::AllTime, 2, 2, now)
            .await
            .unwrap();
        assert_eq!(page1.entries.len(), 2);
        assert_eq!(page2.entries.len(), 2);
        assert_eq!(page1.total_entries, 4);
        assert_eq!(page1.entries[0].user_id, "d");
        assert_eq!(page2.entries[1].user_id, "a");
    }

    #[tokio::test]
    async fn badges_leaderboard_ranks_by_badge_count() {
        let (catalog, states, wallet) = backing();
        let mut alice = states.get_by_user("alice").await.unwrap();
        alice.grant_badge("b1");
        alice.grant_badge("b2");
        states.save(&alice).await.unwrap();
        let mut bob = states.get_by_user("bob").await.unwrap();
        bob.grant_badge("b1");
        states.save(&bob).await.unwrap();

        let projector = LeaderboardProjector::new(catalog, states, wallet, 60);
        let page = projector
            .query(LeaderboardKind::Badges, None, TimeRange::AllTime, 1, 10, Utc::now())
            .await
            .unwrap();
        assert_eq!(page.entries[0].user_id, "alice");
        assert_eq!(page.entries[0].metric, 2);
    }

    #[tokio::test]
    async fn level_leaderboard_ranks_by_current_level_threshold_not_balance() {
        let (catalog, states, wallet) = backing();
        catalog
            .put_level(crate::catalog::Level {
                id: "bronze".into(),
                name: "Bronze".into(),
                description: String::new(),
                image: String::new(),
                visible: true,
                category: "xp".into(),
                min_points: 0,
            })
            .unwrap();
        catalog
            .put_level(crate::catalog::Level {
                id: "gold".into(),
                name: "Gold".into(),
                description: String::new(),
                image: String::new(),
                visible: true,
                category: "xp".into(),
                min_points: 100,
            })
            .unwrap();

        // alice and bob both clear the gold threshold but sit at different
        // balances above it -- they must tie, not split by raw balance.
        seed_points(&states, &wallet, "alice", 150).await;
        seed_points(&states, &wallet, "bob", 500).await;
        seed_points(&states, &wallet, "carol", 50).await;

        let projector = LeaderboardProjector::new(catalog, states, wallet, 60);
        let page = projector
            .query(LeaderboardKind::Level, Some("xp"), TimeRange::AllTime, 1, 10, Utc::now())
            .await
            .unwrap();

        let by_user: HashMap<&str, &LeaderboardEntry> = page.entries.iter().map(|e| (e.user_id.as_str(), e)).collect();
        assert_eq!(by_user["alice"].metric, 100);
        assert_eq!(by_user["bob"].metric, 100);
        assert_eq!(by_user["alice"].rank, by_user["bob"].rank);
        assert_eq!(by_user["carol"].metric, 0);
        assert!(by_user["carol"].rank > by_user["alice"].rank);
    }

    #[tokio::test]
    async fn ranks_are_dense_with_no_gap_after_a_tie() {
        let (catalog, states, wallet) = backing();
        seed_points(&states, &wallet, "carol", 100).await;
        seed_points(&states, &wallet, "alice", 50).await;
        seed_points(&states, &wallet, "bob", 50).await;
        seed_points(&states, &wallet, "dave", 10).await;

        let projector = LeaderboardProjector::new(catalog, states, wallet, 60);
        let page = projector
            .query(LeaderboardKind::Points, Some("xp"), TimeRange::AllTime, 1, 10, Utc::now())
            .await
            .unwrap();

        let ranks: Vec<u64> = page.entries.iter().map(|e| e.rank).collect();
        assert_eq!(ranks, vec![1, 2, 2, 3], "dense ranking must not skip 3 after the tie at 2");
    }

    #[test]
    fn weekly_window_spans_monday_to_next_monday() {
        let reference = Utc.with_ymd_and_hms(2026, 7, 29, 15, 0, 0).unwrap(); // Wednesday
        let (start, end) = TimeRange::Weekly.window(reference).unwrap();
        assert_eq!(start.weekday(), chrono::Weekday::Mon);
        assert_eq!(end - start, chrono::Duration::days(7));
    }
}
