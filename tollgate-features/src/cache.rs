//! Local assignment cache
//!
//! Sticky assignments made in this process, so repeat evaluations of the
//! same entity skip the sticky fetcher. The cache is unbounded.

use parking_lot::Mutex;
use std::collections::HashMap;
use tollgate_expr::Dynamic;

use crate::sticky::StickyAssignment;

/// Entity type name and id.
type EntityKey = (String, String);

#[derive(Debug, Default)]
pub struct AssignmentCache {
    entries: Mutex<HashMap<String, HashMap<EntityKey, StickyAssignment>>>,
}

impl AssignmentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached assignment of `entity` to `feature`, if any
    pub fn get(&self, feature: &str, entity: &Dynamic) -> Option<StickyAssignment> {
        self.entries
            .lock()
            .get(feature)
            .and_then(|assignments| assignments.get(&entity_key(entity)))
            .cloned()
    }

    pub fn set(&self, feature: &str, entity: &Dynamic, assignment: StickyAssignment) {
        self.entries
            .lock()
            .entry(feature.to_string())
            .or_default()
            .insert(entity_key(entity), assignment);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of cached assignments across all features
    pub fn len(&self) -> usize {
        self.entries.lock().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Entities without an `id` all share the `None` key.
fn entity_key(entity: &Dynamic) -> EntityKey {
    let id = match entity.get("id") {
        Dynamic::Null => "None".to_string(),
        id => id.to_string(),
    };
    (entity.type_name().to_string(), id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_set_get_clear() {
        let cache = AssignmentCache::new();
        let user = Dynamic::map([("id", "one")]);
        assert!(cache.get("f", &user).is_none());

        cache.set("f", &user, StickyAssignment::new("b", "B", Utc::now()));
        assert_eq!(cache.get("f", &user).unwrap().variant, "b");
        assert!(cache.get("other", &user).is_none());
        assert!(cache.get("f", &Dynamic::map([("id", "two")])).is_none());
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get("f", &user).is_none());
    }

    #[test]
    fn test_entity_key() {
        assert_eq!(
            entity_key(&Dynamic::map([("id", 7)])),
            ("dict".to_string(), "7".to_string())
        );
        assert_eq!(
            entity_key(&Dynamic::map([("name", "x")])),
            ("dict".to_string(), "None".to_string())
        );
    }
}
