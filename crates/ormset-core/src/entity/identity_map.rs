//! Per-repository identity map.
//!
//! At most one live entity exists per primary key. Removed or known missing
//! keys are remembered as tombstones.

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use ormset_proto::Value;
use tracing::debug;

use super::EntityRef;

/// State of one key.
#[derive(Debug, Clone)]
pub enum IdentitySlot {
    Present(EntityRef),
    Tombstone,
}

/// Result of an identity map lookup.
#[derive(Debug, Clone)]
pub enum IdentityLookup {
    Present(EntityRef),
    Tombstone,
    Absent,
}

/// Maps primary keys (joined with `,` for composite keys) to entities.
#[derive(Debug, Default)]
pub struct IdentityMap {
    entries: DashMap<String, IdentitySlot>,
    refresh: DashSet<String>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a primary key value.
    pub fn get(&self, id: &Value) -> IdentityLookup {
        match self.entries.get(&id.to_key()).as_deref() {
            Some(IdentitySlot::Present(entity)) => IdentityLookup::Present(entity.clone()),
            Some(IdentitySlot::Tombstone) => IdentityLookup::Tombstone,
            None => IdentityLookup::Absent,
        }
    }

    /// Whether a live entity is registered for `id`.
    pub fn has(&self, id: &Value) -> bool {
        matches!(self.get(id), IdentityLookup::Present(_))
    }

    /// Register an entity, replacing a tombstone.
    pub fn add(&self, id: &Value, entity: EntityRef) {
        self.entries.insert(id.to_key(), IdentitySlot::Present(entity));
    }

    /// Replace the entry with a tombstone.
    pub fn remove(&self, id: &Value) {
        let key = id.to_key();
        self.refresh.remove(&key);
        self.entries.insert(key, IdentitySlot::Tombstone);
    }

    /// Return the tracked entity for `id` or register the one built by `create`.
    ///
    /// A tracked entity marked for refresh gets `values` applied. A tombstone
    /// is replaced by a new entity since storage returned the row again.
    pub fn get_or_create(
        &self,
        id: &Value,
        values: std::collections::HashMap<String, Value>,
        create: impl FnOnce(std::collections::HashMap<String, Value>) -> EntityRef,
    ) -> EntityRef {
        let key = id.to_key();
        let existing = match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => match occupied.get() {
                IdentitySlot::Present(entity) => entity.clone(),
                IdentitySlot::Tombstone => {
                    let entity = create(values);
                    occupied.insert(IdentitySlot::Present(entity.clone()));
                    return entity;
                }
            },
            Entry::Vacant(vacant) => {
                let entity = create(values);
                vacant.insert(IdentitySlot::Present(entity.clone()));
                return entity;
            }
        };
        if self.refresh.remove(&key).is_some() {
            debug!(entity = %existing.metadata().name, id = %key, "refreshing entity");
            existing.refresh(values);
        }
        existing
    }

    /// Reload every tracked entity the next time storage returns its row.
    pub fn mark_for_refresh(&self) {
        for entry in self.entries.iter() {
            if matches!(entry.value(), IdentitySlot::Present(_)) {
                self.refresh.insert(entry.key().clone());
            }
        }
    }

    /// Live entities.
    pub fn entities(&self) -> Vec<EntityRef> {
        self.entries
            .iter()
            .filter_map(|entry| match entry.value() {
                IdentitySlot::Present(entity) => Some(entity.clone()),
                IdentitySlot::Tombstone => None,
            })
            .collect()
    }

    /// Forget everything, detaching relationship state of tracked entities.
    pub fn clear(&self) {
        for entity in self.entities() {
            entity.detach();
        }
        self.entries.clear();
        self.refresh.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Weak};

    use crate::entity::Entity;
    use crate::metadata::{EntityMetadata, PropertyMetadata, ScalarType};

    fn metadata() -> Arc<EntityMetadata> {
        let mut metadata = EntityMetadata::new("Tag")
            .property(PropertyMetadata::primary_key("id", ScalarType::Int))
            .property(PropertyMetadata::new("name", ScalarType::String));
        metadata.primary_key = vec!["id".into()];
        Arc::new(metadata)
    }

    fn values(id: i64, name: &str) -> HashMap<String, Value> {
        HashMap::from([("id".to_string(), Value::Int(id)), ("name".to_string(), name.into())])
    }

    fn create(values: HashMap<String, Value>) -> EntityRef {
        Entity::hydrated(metadata(), Weak::new(), values)
    }

    #[test]
    fn test_reuses_instance() {
        let map = IdentityMap::new();
        let a = map.get_or_create(&Value::Int(1), values(1, "a"), create);
        let b = map.get_or_create(&Value::Int(1), values(1, "changed"), create);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.get("name").unwrap(), Value::String("a".into()));
    }

    #[test]
    fn test_refresh_applies_values() {
        let map = IdentityMap::new();
        let a = map.get_or_create(&Value::Int(1), values(1, "a"), create);
        map.mark_for_refresh();
        let b = map.get_or_create(&Value::Int(1), values(1, "fresh"), create);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.get("name").unwrap(), Value::String("fresh".into()));
    }

    #[test]
    fn test_tombstone() {
        let map = IdentityMap::new();
        let a = map.get_or_create(&Value::Int(1), values(1, "a"), create);
        map.remove(&Value::Int(1));
        assert!(matches!(map.get(&Value::Int(1)), IdentityLookup::Tombstone));
        assert!(matches!(map.get(&Value::Int(2)), IdentityLookup::Absent));

        let b = map.get_or_create(&Value::Int(1), values(1, "a"), create);
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(map.has(&Value::Int(1)));
    }

    #[test]
    fn test_composite_keys() {
        let map = IdentityMap::new();
        let id = Value::List(vec![1.into(), 2.into()]);
        let a = map.get_or_create(&id, values(1, "a"), create);
        match map.get(&Value::List(vec![1.into(), 2.into()])) {
            IdentityLookup::Present(found) => assert!(Arc::ptr_eq(&a, &found)),
            other => panic!("unexpected {:?}", other),
        }
    }
}
