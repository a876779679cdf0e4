//! Gamification engine core: event queue, event store, entity catalog, user
//! state, wallet ledger, condition engine, reward engine, rule evaluator,
//! queue processor, dry-run sandbox, and leaderboard projector.
//!
//! The HTTP controller layer, authentication, YAML configuration loading,
//! the ORM/persistence driver, webhook delivery transport, and the
//! OpenAPI-generated client are external collaborators consumed through the
//! repository traits exposed here (`EventRepository`, `UserStateRepository`,
//! `RuleRepository`, `WalletLedger`); this crate treats them as interfaces
//! only and ships in-memory implementations for development and testing.

pub mod catalog;
pub mod condition;
pub mod config;
pub mod dryrun;
pub mod error;
pub mod evaluator;
pub mod event;
pub mod leaderboard;
pub mod locks;
pub mod processor;
pub mod queue;
pub mod reward;
pub mod rule;
pub mod store;
pub mod user_state;
pub mod wallet;

pub use config::EngineConfig;
pub use error::{DomainError, Result};
pub use event::Event;
