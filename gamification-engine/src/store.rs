//! Component B: the append-only event store (spec §4.B).
//!
//! A repository trait plus an in-memory implementation, grounded in
//! `fo3-wallet-api`'s `LedgerRepository`/`InMemoryLedgerRepository` pairing:
//! a `#[async_trait]` interface the engine depends on, with a development/
//! test-only in-memory backing. Durable persistence is an external
//! collaborator (the ORM/persistence driver) per spec §1.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{DomainError, Result};
use crate::event::Event;

pub const MAX_PAGE_LIMIT: usize = 1000;

#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Idempotent on `event_id`: storing a duplicate is a no-op success.
    async fn store(&self, event: &Event) -> Result<()>;

    /// Events for `user_id`, ordered by `occurred_at` ascending.
    async fn get_by_user(&self, user_id: &str, limit: usize, offset: usize) -> Result<Vec<Event>>;

    /// Events of `event_type`, ordered by `occurred_at` ascending.
    async fn get_by_type(&self, event_type: &str, limit: usize, offset: usize) -> Result<Vec<Event>>;

    async fn get_by_id(&self, event_id: &str) -> Result<Option<Event>>;
}

fn check_page_bounds(limit: usize) -> Result<()> {
    if limit == 0 || limit > MAX_PAGE_LIMIT {
        return Err(DomainError::Validation(format!(
            "limit must be in [1, {MAX_PAGE_LIMIT}], got {limit}"
        )));
    }
    Ok(())
}

fn paginate(mut events: Vec<Event>, limit: usize, offset: usize) -> Vec<Event> {
    events.sort_by_key(|e| e.occurred_at);
    events.into_iter().skip(offset).take(limit).collect()
}

/// In-memory development/test backing for [`EventRepository`].
#[derive(Default)]
pub struct InMemoryEventStore {
    by_id: RwLock<HashMap<String, Event>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventRepository for InMemoryEventStore {
    async fn store(&self, event: &Event) -> Result<()> {
        let mut by_id = self.by_id.write().map_err(|_| {
            DomainError::StorageError("event store lock poisoned".into())
        })?;
        by_id.entry(event.event_id.clone()).or_insert_with(|| event.clone());
        Ok(())
    }

    async fn get_by_user(&self, user_id: &str, limit: usize, offset: usize) -> Result<Vec<Event>> {
        check_page_bounds(limit)?;
        let by_id = self.by_id.read().map_err(|_| {
            DomainError::RetrievalError("event store lock poisoned".into())
        })?;
        let matching: Vec<Event> = by_id
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        Ok(paginate(matching, limit, offset))
    }

    async fn get_by_type(&self, event_type: &str, limit: usize, offset: usize) -> Result<Vec<Event>> {
        check_page_bounds(limit)?;
        let by_id = self.by_id.read().map_err(|_| {
            DomainError::RetrievalError("event store lock poisoned".into())
        })?;
        let matching: Vec<Event> = by_id
            .values()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect();
        Ok(paginate(matching, limit, offset))
    }

    async fn get_by_id(&self, event_id: &str) -> Result<Option<Event>> {
        let by_id = self.by_id.read().map_err(|_| {
            DomainError::RetrievalError("event store lock poisoned".into())
        })?;
        Ok(by_id.get(event_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use std::collections::HashMap as Map;

    fn event(id: &str, user: &str, kind: &str, offset_secs: i64) -> Event {
        Event::new(
            Some(id.into()),
            kind,
            user,
            Utc::now() + Duration::seconds(offset_secs),
            Map::new(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn store_is_idempotent_on_event_id() {
        let store = InMemoryEventStore::new();
        let e = event("e1", "u1", "USER_LOGIN", 0);
        store.store(&e).await.unwrap();
        store.store(&e).await.unwrap();
        let all = store.get_by_user("u1", 10, 0).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn get_by_user_orders_ascending_by_occurred_at() {
        let store = InMemoryEventStore::new();
        store.store(&event("e2", "u1", "USER_LOGIN", 10)).await.unwrap();
        store.store(&event("e1", "u1", "USER_LOGIN", 0)).await.unwrap();

        let events = store.get_by_user("u1", 10, 0).await.unwrap();
        assert_eq!(events[0].event_id, "e1");
        assert_eq!(events[1].event_id, "e2");
    }

    #[tokio::test]
    async fn rejects_limit_outside_bounds() {
        let store = InMemoryEventStore::new();
        assert!(store.get_by_user("u1", 0, 0).await.is_err());
        assert!(store.get_by_user("u1", MAX_PAGE_LIMIT + 1, 0).await.is_err());
    }

    #[tokio::test]
    async fn get_by_id_returns_none_when_absent() {
        let store = InMemoryEventStore::new();
        assert!(store.get_by_id("missing").await.unwrap().is_none());
    }
}
