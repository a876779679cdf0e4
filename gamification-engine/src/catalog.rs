//! Component C: the entity catalog (spec §4.C) plus the catalog entities
//! themselves (spec §3 "Point Category", "Badge / Trophy / Level").
//!
//! Read-mostly and copy-on-write (spec §5 "Catalog / Rules"): mutations
//! build a new immutable snapshot and atomically swap the "current" pointer
//! under a `std::sync::RwLock`, so readers never block on a writer.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, Result};
use crate::event::EventDefinition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Sum,
    Max,
    Min,
    Avg,
    Count,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointCategory {
    pub id: String,
    pub name: String,
    pub description: String,
    pub aggregation: Aggregation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Badge {
    pub id: String,
    pub name: String,
    pub description: String,
    pub image: String,
    pub visible: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trophy {
    pub id: String,
    pub name: String,
    pub description: String,
    pub image: String,
    pub visible: bool,
}

/// Invariant: within a category, `min_points` values form a strictly
/// increasing sequence; a user's current level is the one with the
/// greatest `min_points <= balance`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Level {
    pub id: String,
    pub name: String,
    pub description: String,
    pub image: String,
    pub visible: bool,
    pub category: String,
    pub min_points: i64,
}

/// Immutable point-in-time view over the catalog. New snapshots are built
/// wholesale and swapped in; nothing here is mutated in place.
#[derive(Debug, Clone, Default)]
struct CatalogSnapshot {
    point_categories: HashMap<String, PointCategory>,
    badges: HashMap<String, Badge>,
    trophies: HashMap<String, Trophy>,
    /// category -> levels sorted ascending by min_points
    levels_by_category: HashMap<String, Vec<Level>>,
    event_definitions: HashMap<String, EventDefinition>,
}

pub struct EntityCatalog {
    snapshot: RwLock<Arc<CatalogSnapshot>>,
    strict_event_validation: bool,
}

impl Default for EntityCatalog {
    fn default() -> Self {
        Self::new(true)
    }
}

impl EntityCatalog {
    pub fn new(strict_event_validation: bool) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(CatalogSnapshot::default())),
            strict_event_validation,
        }
    }

    fn current(&self) -> Arc<CatalogSnapshot> {
        self.snapshot.read().expect("catalog lock poisoned").clone()
    }

    fn swap(&self, new_snapshot: CatalogSnapshot) {
        *self.snapshot.write().expect("catalog lock poisoned") = Arc::new(new_snapshot);
    }

    // -- point categories --------------------------------------------------

    pub fn put_point_category(&self, category: PointCategory) {
        let mut snap = (*self.current()).clone();
        snap.point_categories.insert(category.id.clone(), category);
        self.swap(snap);
    }

    pub fn get_point_category(&self, id: &str) -> Option<PointCategory> {
        self.current().point_categories.get(id).cloned()
    }

    pub fn list_point_categories(&self) -> Vec<PointCategory> {
        self.current().point_categories.values().cloned().collect()
    }

    pub fn delete_point_category(&self, id: &str) -> Result<()> {
        let mut snap = (*self.current()).clone();
        snap.point_categories
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| DomainError::NotFound(format!("point category {id} not found")))?;
        self.swap(snap);
        Ok(())
    }

    // -- badges --------------------------------------------------------------

    pub fn put_badge(&self, badge: Badge) {
        let mut snap = (*self.current()).clone();
        snap.badges.insert(badge.id.clone(), badge);
        self.swap(snap);
    }

    pub fn get_badge(&self, id: &str) -> Option<Badge> {
        self.current().badges.get(id).cloned()
    }

    pub fn list_badges(&self, visible_only: bool) -> Vec<Badge> {
        self.current()
            .badges
            .values()
            .filter(|b| !visible_only || b.visible)
            .cloned()
            .collect()
    }

    pub fn delete_badge(&self, id: &str) -> Result<()> {
        let mut snap = (*self.current()).clone();
        snap.badges
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| DomainError::NotFound(format!("badge {id} not found")))?;
        self.swap(snap);
        Ok(())
    }

    // -- trophies --------------------------------------------------------------

    pub fn put_trophy(&self, trophy: Trophy) {
        let mut snap = (*self.current()).clone();
        snap.trophies.insert(trophy.id.clone(), trophy);
        self.swap(snap);
    }

    pub fn get_trophy(&self, id: &str) -> Option<Trophy> {
        self.current().trophies.get(id).cloned()
    }

    pub fn list_trophies(&self, visible_only: bool) -> Vec<Trophy> {
        self.current()
            .trophies
            .values()
            .filter(|t| !visible_only || t.visible)
            .cloned()
            .collect()
    }

    pub fn delete_trophy(&self, id: &str) -> Result<()> {
        let mut snap = (*self.current()).clone();
        snap.trophies
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| DomainError::NotFound(format!("trophy {id} not found")))?;
        self.swap(snap);
        Ok(())
    }

    // -- levels --------------------------------------------------------------

    /// Inserts or replaces a level, re-sorting its category's level list and
    /// re-validating the strictly-increasing `min_points` invariant.
    pub fn put_level(&self, level: Level) -> Result<()> {
        let mut snap = (*self.current()).clone();
        let bucket = snap.levels_by_category.entry(level.category.clone()).or_default();
        bucket.retain(|l| l.id != level.id);
        bucket.push(level);
        bucket.sort_by_key(|l| l.min_points);

        let mut seen_thresholds = std::collections::HashSet::new();
        for l in bucket.iter() {
            if !seen_thresholds.insert(l.min_points) {
                return Err(DomainError::Validation(format!(
                    "duplicate minPoints {} in category {}",
                    l.min_points, l.category
                )));
            }
        }

        self.swap(snap);
        Ok(())
    }

    pub fn get_level(&self, id: &str) -> Option<Level> {
        self.current()
            .levels_by_category
            .values()
            .flatten()
            .find(|l| l.id == id)
            .cloned()
    }

    pub fn levels_for_category(&self, category: &str) -> Vec<Level> {
        self.current()
            .levels_by_category
            .get(category)
            .cloned()
            .unwrap_or_default()
    }

    pub fn delete_level(&self, id: &str) -> Result<()> {
        let mut snap = (*self.current()).clone();
        let mut found = false;
        for bucket in snap.levels_by_category.values_mut() {
            let before = bucket.len();
            bucket.retain(|l| l.id != id);
            if bucket.len() != before {
                found = true;
            }
        }
        if !found {
            return Err(DomainError::NotFound(format!("level {id} not found")));
        }
        self.swap(snap);
        Ok(())
    }

    /// The level with the greatest `min_points <= balance`, or `None` if no
    /// level in the category qualifies.
    pub fn current_level_for_balance(&self, category: &str, balance: i64) -> Option<Level> {
        self.levels_for_category(category)
            .into_iter()
            .filter(|l| l.min_points <= balance)
            .last()
    }

    // -- event definitions -----------------------------------------------------

    pub fn put_event_definition(&self, definition: EventDefinition) {
        let mut snap = (*self.current()).clone();
        snap.event_definitions.insert(definition.id.clone(), definition);
        self.swap(snap);
    }

    pub fn get_event_definition(&self, id: &str) -> Option<EventDefinition> {
        self.current().event_definitions.get(id).cloned()
    }

    pub fn list_event_definitions(&self) -> Vec<EventDefinition> {
        self.current().event_definitions.values().cloned().collect()
    }

    /// Events of unknown type are rejected unless strict validation is
    /// disabled (spec §3 "Event Definition").
    pub fn validate_event_type(&self, event_type: &str) -> Result<()> {
        if !self.strict_event_validation {
            return Ok(());
        }
        if self.current().event_definitions.contains_key(event_type) {
            Ok(())
        } else {
            Err(DomainError::Validation(format!(
                "unknown event type: {event_type}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(id: &str, category: &str, min_points: i64) -> Level {
        Level {
            id: id.into(),
            name: id.into(),
            description: String::new(),
            image: String::new(),
            visible: true,
            category: category.into(),
            min_points,
        }
    }

    #[test]
    fn current_level_picks_greatest_threshold_not_exceeding_balance() {
        let catalog = EntityCatalog::default();
        catalog.put_level(level("beginner", "xp", 0)).unwrap();
        catalog.put_level(level("intermediate", "xp", 100)).unwrap();
        catalog.put_level(level("advanced", "xp", 500)).unwrap();

        assert_eq!(catalog.current_level_for_balance("xp", 90).unwrap().id, "beginner");
        assert_eq!(catalog.current_level_for_balance("xp", 105).unwrap().id, "intermediate");
        assert_eq!(catalog.current_level_for_balance("xp", 500).unwrap().id, "advanced");
        assert_eq!(catalog.current_level_for_balance("xp", 10_000).unwrap().id, "advanced");
    }

    #[test]
    fn rejects_duplicate_thresholds_within_a_category() {
        let catalog = EntityCatalog::default();
        catalog.put_level(level("a", "xp", 100)).unwrap();
        assert!(catalog.put_level(level("b", "xp", 100)).is_err());
    }

    #[test]
    fn unknown_event_type_rejected_when_strict() {
        let catalog = EntityCatalog::new(true);
        assert!(catalog.validate_event_type("UNKNOWN").is_err());
        catalog.put_event_definition(EventDefinition {
            id: "UNKNOWN".into(),
            description: String::new(),
            payload_schema: HashMap::new(),
        });
        assert!(catalog.validate_event_type("UNKNOWN").is_ok());
    }

    #[test]
    fn unknown_event_type_accepted_when_not_strict() {
        let catalog = EntityCatalog::new(false);
        assert!(catalog.validate_event_type("UNKNOWN").is_ok());
    }

    #[test]
    fn delete_badge_removes_it_and_rejects_unknown_id() {
        let catalog = EntityCatalog::default();
        catalog.put_badge(Badge {
            id: "b1".into(),
            name: "Badge".into(),
            description: String::new(),
            image: String::new(),
            visible: true,
        });
        catalog.delete_badge("b1").unwrap();
        assert!(catalog.get_badge("b1").is_none());
        assert!(catalog.delete_badge("b1").is_err());
    }

    #[test]
    fn delete_level_removes_from_its_category_bucket() {
        let catalog = EntityCatalog::default();
        catalog.put_level(level("a", "xp", 100)).unwrap();
        catalog.delete_level("a").unwrap();
        assert!(catalog.levels_for_category("xp").is_empty());
        assert!(catalog.delete_level("a").is_err());
    }
}
