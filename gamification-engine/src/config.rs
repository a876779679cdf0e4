//! Engine configuration.
//!
//! Plain struct populated from environment variables, the way
//! `fo3-wallet-api`'s `AppState`/`ObservabilityConfig` read `std::env::var`
//! with a fallback. YAML config loading is an external collaborator per the
//! spec and is not implemented here.

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Gates the dry-run sandbox endpoint/service.
    pub simulation_enabled: bool,
    /// Identifies this engine instance (for logging/metrics correlation).
    pub engine_id: String,
    /// Leaderboard cache entry lifetime.
    pub leaderboard_cache_ttl_seconds: u64,
    /// Max history events per type loaded per rule evaluation.
    pub evaluator_history_window: usize,
    /// If false, spends/penalties that would underflow a category fail
    /// instead of going negative.
    pub wallet_allow_negative: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            simulation_enabled: true,
            engine_id: "gamification-engine".to_string(),
            leaderboard_cache_ttl_seconds: 60,
            evaluator_history_window: 1000,
            wallet_allow_negative: false,
        }
    }
}

impl EngineConfig {
    /// Load from environment, falling back to defaults field by field.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            simulation_enabled: std::env::var("SIMULATION_ENABLED")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.simulation_enabled),
            engine_id: std::env::var("ENGINE_ID").unwrap_or(defaults.engine_id),
            leaderboard_cache_ttl_seconds: std::env::var("LEADERBOARD_CACHE_TTL_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.leaderboard_cache_ttl_seconds),
            evaluator_history_window: std::env::var("EVALUATOR_HISTORY_WINDOW")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.evaluator_history_window),
            wallet_allow_negative: std::env::var("WALLET_ALLOW_NEGATIVE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.wallet_allow_negative),
        }
    }
}
