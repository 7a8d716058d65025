//! Entities, their relationship containers and the identity map.
//!
//! An [`Entity`] holds raw property values keyed by property name (embeddable
//! properties use `embeddable.property` keys) and tracks which of them were
//! modified since the last persist. Relationship properties are reached through
//! [`HasOne`] and [`HasMany`] containers created on first access.

mod has_many;
mod has_one;
mod identity_map;
mod preload;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};

use ormset_proto::Value;
use parking_lot::{Mutex, RwLock};

use crate::error::{Error, Result};
use crate::metadata::{EntityMetadata, PropertyMetadata, RelationshipType, ScalarType};
use crate::repository::Repository;

pub use has_many::HasMany;
pub use has_one::HasOne;
pub use identity_map::{IdentityLookup, IdentityMap, IdentitySlot};
pub use preload::PreloadContainer;

pub(crate) use preload::siblings;

/// Shared entity handle. Identity is pointer identity.
pub type EntityRef = Arc<Entity>;

#[derive(Debug, Default)]
struct EntityState {
    values: HashMap<String, Value>,
    modified: HashSet<String>,
    persisted_id: Option<Value>,
    removed: bool,
}

#[derive(Clone)]
enum RelationshipContainer {
    One(Arc<HasOne>),
    Many(Arc<HasMany>),
}

/// An entity instance.
pub struct Entity {
    metadata: Arc<EntityMetadata>,
    repository: Weak<Repository>,
    state: RwLock<EntityState>,
    relationships: Mutex<HashMap<String, RelationshipContainer>>,
    preload: RwLock<Option<Arc<PreloadContainer>>>,
    this: Weak<Entity>,
}

impl Entity {
    /// Create an unpersisted entity.
    pub(crate) fn new(metadata: Arc<EntityMetadata>, repository: Weak<Repository>) -> EntityRef {
        Self::build(metadata, repository, EntityState::default())
    }

    /// Create an entity from storage values.
    pub(crate) fn hydrated(
        metadata: Arc<EntityMetadata>,
        repository: Weak<Repository>,
        values: HashMap<String, Value>,
    ) -> EntityRef {
        let id = primary_value(&metadata, &values);
        Self::build(
            metadata,
            repository,
            EntityState {
                values,
                persisted_id: Some(id),
                ..EntityState::default()
            },
        )
    }

    fn build(
        metadata: Arc<EntityMetadata>,
        repository: Weak<Repository>,
        state: EntityState,
    ) -> EntityRef {
        Arc::new_cyclic(|this| Entity {
            metadata,
            repository,
            state: RwLock::new(state),
            relationships: Mutex::new(HashMap::new()),
            preload: RwLock::new(None),
            this: this.clone(),
        })
    }

    pub fn metadata(&self) -> &Arc<EntityMetadata> {
        &self.metadata
    }

    /// Repository the entity belongs to.
    pub fn repository(&self) -> Result<Arc<Repository>> {
        self.repository.upgrade().ok_or_else(|| {
            Error::invalid_state(format!(
                "entity '{}' is not attached to a repository",
                self.metadata.name
            ))
        })
    }

    pub(crate) fn self_ref(&self) -> Result<EntityRef> {
        self.this
            .upgrade()
            .ok_or_else(|| Error::invalid_state("entity has been dropped"))
    }

    /// Read a property value.
    ///
    /// Many-has-one and main one-has-one properties return the raw foreign key;
    /// use [`Entity::has_one`] for the related entity.
    pub fn get(&self, key: &str) -> Result<Value> {
        let property = self.resolve(key)?;
        if property.is_primary_proxy() {
            return Ok(self.id());
        }
        match property.relationship_type() {
            Some(RelationshipType::OneHasMany | RelationshipType::ManyHasMany) => {
                Err(Error::invalid_argument(format!(
                    "'{}' is a to-many relationship, use has_many()",
                    key
                )))
            }
            Some(RelationshipType::OneHasOne) if property.is_virtual => Err(
                Error::invalid_argument(format!("'{}' holds no foreign key, use has_one()", key)),
            ),
            _ => Ok(self.get_raw(key)),
        }
    }

    /// Raw value of a key, null when unset.
    pub fn get_raw(&self, key: &str) -> Value {
        self.state
            .read()
            .values
            .get(key)
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Set a property value.
    ///
    /// The value is coerced to the property's scalar type. Setting a foreign
    /// key resets the loaded related entity.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let property = self.resolve(key)?;
        if property.is_primary_proxy() {
            return Err(Error::invalid_argument(format!(
                "'{}' is a composite key, set its parts instead",
                key
            )));
        }
        match property.relationship_type() {
            Some(RelationshipType::OneHasMany | RelationshipType::ManyHasMany) => {
                return Err(Error::invalid_argument(format!(
                    "'{}' is a to-many relationship, use has_many()",
                    key
                )))
            }
            Some(RelationshipType::OneHasOne) if property.is_virtual => {
                return Err(Error::invalid_argument(format!(
                    "'{}' holds no foreign key, use has_one()",
                    key
                )))
            }
            _ => {}
        }

        let value = property.scalar_type.coerce(&value)?;
        if value.is_null() && !property.nullable {
            return Err(Error::invalid_argument(format!(
                "property '{}' of entity '{}' is not nullable",
                key, self.metadata.name
            )));
        }
        if property.is_primary && self.is_persisted() && !self.get_raw(key).loose_eq(&value) {
            return Err(Error::invalid_state(format!(
                "primary key '{}' of a persisted entity cannot change",
                key
            )));
        }

        self.set_raw(key, value);
        if property.relationship.is_some() {
            if let Some(RelationshipContainer::One(container)) =
                self.relationships.lock().get(key).cloned()
            {
                container.invalidate();
            }
        }
        Ok(())
    }

    /// Store a value without validation, marking it modified when it changed.
    pub(crate) fn set_raw(&self, key: &str, value: Value) {
        let mut state = self.state.write();
        let changed = state
            .values
            .get(key)
            .map_or(!value.is_null(), |current| !current.loose_eq(&value));
        state.values.insert(key.to_string(), value);
        if changed {
            state.modified.insert(key.to_string());
        }
    }

    /// Overwrite values with fresh storage values.
    pub(crate) fn refresh(&self, values: HashMap<String, Value>) {
        {
            let mut state = self.state.write();
            state.values = values;
            state.modified.clear();
        }
        for container in self.relationships.lock().values() {
            if let RelationshipContainer::One(container) = container {
                container.invalidate();
            }
        }
    }

    /// Primary key value; a list for composite keys.
    pub fn id(&self) -> Value {
        primary_value(&self.metadata, &self.state.read().values)
    }

    /// Primary key the entity was last stored under.
    pub fn persisted_id(&self) -> Option<Value> {
        self.state.read().persisted_id.clone()
    }

    pub fn is_persisted(&self) -> bool {
        let state = self.state.read();
        state.persisted_id.is_some() && !state.removed
    }

    pub fn is_removed(&self) -> bool {
        self.state.read().removed
    }

    /// Whether stored values changed since the last persist.
    pub fn is_modified(&self) -> bool {
        !self.state.read().modified.is_empty()
    }

    /// Names of modified keys.
    pub fn modified_keys(&self) -> Vec<String> {
        self.state.read().modified.iter().cloned().collect()
    }

    /// Snapshot of raw values.
    pub fn values(&self) -> HashMap<String, Value> {
        self.state.read().values.clone()
    }

    pub(crate) fn mark_persisted(&self) {
        let mut state = self.state.write();
        state.persisted_id = Some(primary_value(&self.metadata, &state.values));
        state.modified.clear();
        state.removed = false;
    }

    pub(crate) fn mark_removed(&self) {
        let mut state = self.state.write();
        state.removed = true;
        state.persisted_id = None;
    }

    /// Container of a many-has-one or one-has-one property.
    pub fn has_one(&self, name: &str) -> Result<Arc<HasOne>> {
        match self.container(name)? {
            RelationshipContainer::One(container) => Ok(container),
            RelationshipContainer::Many(_) => Err(Error::invalid_argument(format!(
                "'{}' is a to-many relationship, use has_many()",
                name
            ))),
        }
    }

    /// Container of a one-has-many or many-has-many property.
    pub fn has_many(&self, name: &str) -> Result<Arc<HasMany>> {
        match self.container(name)? {
            RelationshipContainer::Many(container) => Ok(container),
            RelationshipContainer::One(_) => Err(Error::invalid_argument(format!(
                "'{}' is a to-one relationship, use has_one()",
                name
            ))),
        }
    }

    /// Already created container of a to-one property.
    pub(crate) fn existing_has_one(&self, name: &str) -> Option<Arc<HasOne>> {
        match self.relationships.lock().get(name) {
            Some(RelationshipContainer::One(container)) => Some(container.clone()),
            _ => None,
        }
    }

    /// Already created container of a to-many property.
    pub(crate) fn existing_has_many(&self, name: &str) -> Option<Arc<HasMany>> {
        match self.relationships.lock().get(name) {
            Some(RelationshipContainer::Many(container)) => Some(container.clone()),
            _ => None,
        }
    }

    fn container(&self, name: &str) -> Result<RelationshipContainer> {
        let property = self.metadata.property_checked(name)?.clone();
        let relationship = property.relationship_type().ok_or_else(|| {
            Error::invalid_argument(format!(
                "property '{}' of entity '{}' is not a relationship",
                name, self.metadata.name
            ))
        })?;

        let mut relationships = self.relationships.lock();
        if let Some(container) = relationships.get(name) {
            return Ok(container.clone());
        }
        let container = if relationship.is_to_many() {
            RelationshipContainer::Many(HasMany::new(self.this.clone(), property))
        } else {
            RelationshipContainer::One(Arc::new(HasOne::new(self.this.clone(), property)))
        };
        relationships.insert(name.to_string(), container.clone());
        Ok(container)
    }

    pub fn preload_container(&self) -> Option<Arc<PreloadContainer>> {
        self.preload.read().clone()
    }

    pub(crate) fn set_preload_container(&self, container: Option<Arc<PreloadContainer>>) {
        *self.preload.write() = container;
    }

    /// Drop relationship state and the preload container.
    pub(crate) fn detach(&self) {
        self.relationships.lock().clear();
        self.set_preload_container(None);
    }

    /// Property metadata for a key, embeddable keys included.
    fn resolve(&self, key: &str) -> Result<Arc<PropertyMetadata>> {
        match key.split_once('.') {
            Some((outer, inner)) => {
                let property = self.metadata.property_checked(outer)?;
                property
                    .embeddable_metadata()
                    .and_then(|embeddable| embeddable.get_property(inner))
                    .cloned()
                    .ok_or_else(|| {
                        Error::invalid_argument(format!(
                            "undefined property '{}' on entity '{}'",
                            key, self.metadata.name
                        ))
                    })
            }
            None => {
                let property = self.metadata.property_checked(key)?;
                if property.embeddable_metadata().is_some() {
                    return Err(Error::invalid_argument(format!(
                        "'{}' is an embeddable, address its properties as '{}.<name>'",
                        key, key
                    )));
                }
                Ok(property.clone())
            }
        }
    }
}

/// Primary key of a value map; a list for composite keys.
pub(crate) fn primary_value(metadata: &EntityMetadata, values: &HashMap<String, Value>) -> Value {
    let mut parts: Vec<Value> = metadata
        .primary_key
        .iter()
        .map(|key| values.get(key).cloned().unwrap_or(Value::Null))
        .collect();
    match parts.len() {
        1 => parts.remove(0),
        _ => Value::List(parts),
    }
}

/// Scalar type of the primary key of an entity.
pub(crate) fn primary_type(metadata: &EntityMetadata) -> ScalarType {
    metadata
        .primary_key
        .first()
        .and_then(|key| metadata.get_property(key))
        .map_or(ScalarType::Int, |p| p.scalar_type)
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("Entity")
            .field("entity", &self.metadata.name)
            .field("values", &state.values)
            .field("persisted", &state.persisted_id.is_some())
            .finish()
    }
}
