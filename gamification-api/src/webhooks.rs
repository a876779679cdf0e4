//! Webhook registration/test endpoints. Delivery transport is an external
//! collaborator this crate does not implement; registrations are held
//! in-memory and "test" simulates a delivery attempt without dispatching
//! an actual HTTP call anywhere.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Webhook {
    pub id: String,
    pub url: String,
    pub event_types: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookTestResult {
    pub webhook_id: String,
    pub delivered: bool,
    pub message: String,
}

#[derive(Default)]
pub struct WebhookRegistry {
    webhooks: RwLock<HashMap<String, Webhook>>,
}

impl WebhookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, url: String, event_types: Vec<String>) -> Webhook {
        let webhook = Webhook {
            id: Uuid::new_v4().to_string(),
            url,
            event_types,
            is_active: true,
            created_at: Utc::now(),
        };
        self.webhooks.write().expect("webhook registry lock poisoned").insert(webhook.id.clone(), webhook.clone());
        webhook
    }

    pub fn get(&self, id: &str) -> Option<Webhook> {
        self.webhooks.read().expect("webhook registry lock poisoned").get(id).cloned()
    }

    pub fn list(&self) -> Vec<Webhook> {
        self.webhooks.read().expect("webhook registry lock poisoned").values().cloned().collect()
    }

    pub fn delete(&self, id: &str) -> bool {
        self.webhooks.write().expect("webhook registry lock poisoned").remove(id).is_some()
    }

    /// Simulates a delivery attempt. No network call is made; this only
    /// confirms the registration exists and is active.
    pub fn test(&self, id: &str) -> Option<WebhookTestResult> {
        let webhook = self.get(id)?;
        Some(WebhookTestResult {
            webhook_id: webhook.id,
            delivered: webhook.is_active,
            message: if webhook.is_active {
                "simulated delivery succeeded".into()
            } else {
                "webhook is inactive".into()
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_test_reports_simulated_delivery() {
        let registry = WebhookRegistry::new();
        let webhook = registry.register("https://example.com/hook".into(), vec!["USER_LOGIN".into()]);
        let result = registry.test(&webhook.id).unwrap();
        assert!(result.delivered);
    }

    #[test]
    fn test_on_unknown_id_returns_none() {
        let registry = WebhookRegistry::new();
        assert!(registry.test("missing").is_none());
    }

    #[test]
    fn delete_removes_registration() {
        let registry = WebhookRegistry::new();
        let webhook = registry.register("https://example.com/hook".into(), vec![]);
        assert!(registry.delete(&webhook.id));
        assert!(registry.get(&webhook.id).is_none());
    }
}
