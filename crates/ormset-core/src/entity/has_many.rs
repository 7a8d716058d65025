//! To-many relationship container with pending edits.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use ormset_proto::Value;
use parking_lot::Mutex;

use crate::collection::{Collection, HasManyCollection};
use crate::error::{Error, Result};
use crate::metadata::{PropertyMetadata, RelationshipType};

use super::has_one::ReverseGuard;
use super::{Entity, EntityRef};

#[derive(Default)]
struct HasManyState {
    to_add: Vec<EntityRef>,
    to_remove: Vec<EntityRef>,
    /// Entities seen in fetched results.
    tracked: Vec<Weak<Entity>>,
    collection: Option<Collection>,
}

/// A one-has-many or many-has-many property of one entity.
///
/// Added and removed entities stay pending until the parent is persisted.
/// Until then [`HasMany::collection`] overlays them on the stored relationship.
pub struct HasMany {
    parent: Weak<Entity>,
    property: Arc<PropertyMetadata>,
    state: Mutex<HasManyState>,
    updating_reverse: AtomicBool,
    this: Weak<HasMany>,
}

impl HasMany {
    pub(super) fn new(parent: Weak<Entity>, property: Arc<PropertyMetadata>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            parent,
            property,
            state: Mutex::new(HasManyState::default()),
            updating_reverse: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    pub fn property(&self) -> &Arc<PropertyMetadata> {
        &self.property
    }

    fn parent(&self) -> Result<EntityRef> {
        self.parent
            .upgrade()
            .ok_or_else(|| Error::invalid_state("relationship parent has been dropped"))
    }

    fn kind(&self) -> RelationshipType {
        self.property
            .relationship
            .as_ref()
            .map_or(RelationshipType::OneHasMany, |r| r.kind)
    }

    fn reverse(&self) -> Option<&str> {
        self.property
            .relationship
            .as_ref()
            .and_then(|r| r.reverse.as_deref())
    }

    fn check_target(&self, entity: &EntityRef) -> Result<()> {
        let expected = self
            .property
            .relationship
            .as_ref()
            .map(|r| r.entity.as_str())
            .unwrap_or_default();
        if entity.metadata().name != expected {
            return Err(Error::invalid_argument(format!(
                "'{}' expects {} entities, got {}",
                self.property.name,
                expected,
                entity.metadata().name
            )));
        }
        Ok(())
    }

    /// Add an entity to the relationship.
    pub fn add(&self, entity: EntityRef) -> Result<()> {
        if self.updating_reverse.load(Ordering::Acquire) {
            return Ok(());
        }
        self.check_target(&entity)?;
        let parent = self.parent()?;
        {
            let mut state = self.state.lock();
            if let Some(i) = state.to_remove.iter().position(|e| Arc::ptr_eq(e, &entity)) {
                state.to_remove.remove(i);
            } else if state.to_add.iter().any(|e| Arc::ptr_eq(e, &entity)) {
                return Ok(());
            } else {
                state.to_add.push(entity.clone());
            }
            state.collection = None;
        }

        let Some(_guard) = ReverseGuard::acquire(&self.updating_reverse) else {
            return Ok(());
        };
        match (self.kind(), self.reverse()) {
            (RelationshipType::OneHasMany, Some(reverse)) => {
                entity.has_one(reverse)?.set(Some(parent))?
            }
            (RelationshipType::ManyHasMany, Some(reverse)) => {
                entity.has_many(reverse)?.add(parent)?
            }
            _ => {}
        }
        Ok(())
    }

    /// Remove an entity from the relationship.
    ///
    /// For a one-has-many relationship the reverse foreign key is cleared,
    /// which needs a nullable reverse property unless removal cascades.
    pub fn remove(&self, entity: EntityRef) -> Result<()> {
        if self.updating_reverse.load(Ordering::Acquire) {
            return Ok(());
        }
        self.check_target(&entity)?;
        let parent = self.parent()?;
        let clears_key = self.kind() == RelationshipType::OneHasMany
            && self.reverse().is_some_and(|reverse| {
                entity
                    .metadata()
                    .get_property(reverse)
                    .is_some_and(|p| p.nullable)
            });
        let cascades = self
            .property
            .relationship
            .as_ref()
            .is_some_and(|r| r.cascade.remove);
        // The owning side moved to another parent and already holds the new key.
        let reassigned = self.reverse().is_some_and(|reverse| {
            entity
                .existing_has_one(reverse)
                .is_some_and(|container| container.is_updating())
        });
        if self.kind() == RelationshipType::OneHasMany && !clears_key && !cascades && !reassigned {
            return Err(Error::invalid_state(format!(
                "cannot remove from '{}': the reverse relationship is not nullable and removal does not cascade",
                self.property.name
            )));
        }

        {
            let mut state = self.state.lock();
            if let Some(i) = state.to_add.iter().position(|e| Arc::ptr_eq(e, &entity)) {
                state.to_add.remove(i);
            } else if !state.to_remove.iter().any(|e| Arc::ptr_eq(e, &entity)) {
                state.to_remove.push(entity.clone());
            }
            state.tracked.retain(|e| !std::ptr::eq(e.as_ptr(), Arc::as_ptr(&entity)));
            state.collection = None;
        }

        let Some(_guard) = ReverseGuard::acquire(&self.updating_reverse) else {
            return Ok(());
        };
        match (self.kind(), self.reverse()) {
            (RelationshipType::OneHasMany, Some(reverse)) if clears_key && !reassigned => {
                entity.has_one(reverse)?.set(None)?
            }
            (RelationshipType::ManyHasMany, Some(reverse)) => {
                entity.has_many(reverse)?.remove(parent)?
            }
            _ => {}
        }
        Ok(())
    }

    /// Replace the related entities.
    pub fn set(&self, entities: Vec<EntityRef>) -> Result<()> {
        let current = self.fetch_all()?;
        for entity in &current {
            if !entities.iter().any(|e| Arc::ptr_eq(e, entity)) {
                self.remove(entity.clone())?;
            }
        }
        for entity in entities {
            if !current.iter().any(|e| Arc::ptr_eq(e, &entity)) {
                self.add(entity)?;
            }
        }
        Ok(())
    }

    /// Whether the entity is currently related.
    pub fn has(&self, entity: &EntityRef) -> Result<bool> {
        Ok(self.fetch_all()?.iter().any(|e| Arc::ptr_eq(e, entity)))
    }

    /// Collection of related entities with pending edits applied.
    ///
    /// Every call returns a fresh copy of the cached collection.
    pub fn collection(&self) -> Result<Collection> {
        if let Some(collection) = self.state.lock().collection.clone() {
            return Ok(collection);
        }
        let collection = self.build_collection()?;
        self.state.lock().collection = Some(collection.clone());
        Ok(collection)
    }

    fn build_collection(&self) -> Result<Collection> {
        let parent = self.parent()?;
        let repository = parent.repository()?;
        let model = repository.model()?;
        let relationship = self.property.relationship.as_ref().ok_or_else(|| {
            Error::invalid_state(format!("'{}' is not a relationship", self.property.name))
        })?;
        let target = model.repository(&relationship.entity)?;
        let (to_add, to_remove) = {
            let state = self.state.lock();
            (state.to_add.clone(), state.to_remove.clone())
        };

        if !parent.is_persisted() {
            let mut collection = if to_add.is_empty() {
                Collection::empty(target.metadata().clone())
            } else {
                target.to_collection(to_add)?
            };
            for (property, direction) in &relationship.order_by {
                collection = collection.order_by(property.as_str(), *direction)?;
            }
            return Ok(collection);
        }

        let mapper = repository.mapper().relationship_mapper(&self.property)?;
        let mut storage = target.find_all()?.with_relationship(mapper, parent)?;
        for (property, direction) in &relationship.order_by {
            storage = storage.order_by(property.as_str(), *direction)?;
        }
        let tracker = self.this.clone();
        storage.subscribe_on_entity_fetch(Arc::new(move |entities: &[EntityRef]| {
            if let Some(container) = tracker.upgrade() {
                container.track(entities);
            }
        }));

        if to_add.is_empty() && to_remove.is_empty() {
            return Ok(storage);
        }
        let removed: Vec<Value> = to_remove
            .iter()
            .filter(|e| e.is_persisted())
            .map(|e| e.id())
            .collect();
        let collection = HasManyCollection::new(
            &model,
            storage,
            target.to_collection(to_add)?,
            removed,
            relationship.order_by.clone(),
        )?;
        Ok(Collection::HasMany(Box::new(collection)))
    }

    fn track(&self, entities: &[EntityRef]) {
        let mut state = self.state.lock();
        for entity in entities {
            let known = state
                .tracked
                .iter()
                .any(|e| std::ptr::eq(e.as_ptr(), Arc::as_ptr(entity)));
            if !known {
                state.tracked.push(Arc::downgrade(entity));
            }
        }
    }

    /// Related entities.
    pub fn fetch_all(&self) -> Result<Vec<EntityRef>> {
        self.collection()?.fetch_all()
    }

    /// Number of related entities, pending edits included.
    pub fn count(&self) -> Result<usize> {
        self.collection()?.count()
    }

    /// Entities added since the last persist.
    pub fn pending_added(&self) -> Vec<EntityRef> {
        self.state.lock().to_add.clone()
    }

    /// Entities removed since the last persist.
    pub fn pending_removed(&self) -> Vec<EntityRef> {
        self.state.lock().to_remove.clone()
    }

    /// Whether there are pending edits.
    pub fn is_modified(&self) -> bool {
        let state = self.state.lock();
        !state.to_add.is_empty() || !state.to_remove.is_empty()
    }

    /// Fetched entities still alive.
    pub fn tracked(&self) -> Vec<EntityRef> {
        self.state
            .lock()
            .tracked
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Clear pending edits after they were written.
    pub(crate) fn mark_persisted(&self) {
        let mut state = self.state.lock();
        state.to_add.clear();
        state.to_remove.clear();
        state.collection = None;
    }

    /// Drop the cached collection.
    pub(crate) fn invalidate(&self) {
        self.state.lock().collection = None;
    }
}

impl fmt::Debug for HasMany {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("HasMany")
            .field("property", &self.property.name)
            .field("to_add", &state.to_add.len())
            .field("to_remove", &state.to_remove.len())
            .finish()
    }
}
