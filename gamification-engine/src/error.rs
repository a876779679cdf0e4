//! Error taxonomy for the gamification engine.
//!
//! Mirrors the kinds described by the domain spec, not the call stack that
//! produced them: validation, not-found, conflict, insufficient balance,
//! repository I/O failure, and evaluation failure. Transport layers (the API
//! crate) map these onto status codes; the engine itself never throws a raw
//! string.

use thiserror::Error;

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, DomainError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("insufficient balance for user {user_id} category {category}: needed {needed}, available {available}")]
    InsufficientBalance {
        user_id: String,
        category: String,
        needed: i64,
        available: i64,
    },

    #[error("event storage error: {0}")]
    StorageError(String),

    #[error("event retrieval error: {0}")]
    RetrievalError(String),

    #[error("rule evaluation error: {0}")]
    RuleEvaluationError(String),
}

impl DomainError {
    /// Fatal errors are the only ones the processor should retry on;
    /// everything else is a terminal per-request failure.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DomainError::StorageError(_) | DomainError::RetrievalError(_))
    }
}
