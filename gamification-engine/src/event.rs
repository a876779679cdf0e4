//! Event and event-definition data model (spec §3 "Event", "Event Definition").

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{DomainError, Result};

/// An immutable fact ingested into the engine. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_id: String,
    pub event_type: String,
    pub user_id: String,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}

impl Event {
    /// Construct an event, generating `event_id` if the caller didn't supply
    /// one. Enforces the non-empty invariants on `event_type`/`user_id`.
    pub fn new(
        event_id: Option<String>,
        event_type: impl Into<String>,
        user_id: impl Into<String>,
        occurred_at: DateTime<Utc>,
        attributes: HashMap<String, Value>,
    ) -> Result<Self> {
        let event_type = event_type.into();
        let user_id = user_id.into();
        if event_type.trim().is_empty() {
            return Err(DomainError::Validation("eventType must not be empty".into()));
        }
        if user_id.trim().is_empty() {
            return Err(DomainError::Validation("userId must not be empty".into()));
        }
        let event_id = event_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Ok(Self {
            event_id,
            event_type,
            user_id,
            occurred_at,
            attributes,
        })
    }

    pub fn attribute_number(&self, name: &str) -> Option<f64> {
        self.attributes.get(name).and_then(|v| v.as_f64())
    }

    /// The attribute as an exact integer, if the JSON number carries no
    /// fractional part. `i128` so large `i64` amounts survive comparison
    /// without the precision loss an `f64` round-trip would introduce.
    pub fn attribute_integer(&self, name: &str) -> Option<i128> {
        let value = self.attributes.get(name)?;
        if let Some(v) = value.as_i64() {
            return Some(v as i128);
        }
        if let Some(v) = value.as_u64() {
            return Some(v as i128);
        }
        None
    }

    pub fn attribute_str(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(|v| v.as_str())
    }
}

/// A catalog entry describing a recognized event type and its payload shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventDefinition {
    pub id: String,
    pub description: String,
    /// attribute name -> type descriptor (e.g. "string", "number", "boolean")
    pub payload_schema: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_event_type() {
        let err = Event::new(None, "", "u1", Utc::now(), HashMap::new()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn generates_id_when_absent() {
        let event = Event::new(None, "USER_LOGIN", "u1", Utc::now(), HashMap::new()).unwrap();
        assert!(!event.event_id.is_empty());
    }

    #[test]
    fn preserves_supplied_id() {
        let event = Event::new(
            Some("client-supplied-1".into()),
            "USER_LOGIN",
            "u1",
            Utc::now(),
            HashMap::new(),
        )
        .unwrap();
        assert_eq!(event.event_id, "client-supplied-1");
    }
}
