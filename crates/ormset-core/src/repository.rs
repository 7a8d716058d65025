//! Per-entity entry point: lookups, collections, persistence.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};

use ormset_proto::{Condition, Value};
use tracing::{debug, instrument};

use crate::collection::{
    ArrayCollection, Collection, CollectionMethod, DbalCollection,
};
use crate::dbal::Row;
use crate::entity::{primary_value, Entity, EntityRef, IdentityLookup, IdentityMap};
use crate::error::{Error, Result};
use crate::mapper::{Conventions, DbalMapper};
use crate::metadata::{EntityMetadata, PropertyMetadata, RelationshipType};
use crate::model::Model;

/// Entities already handled by one persist or remove call, by address.
type Visited = HashSet<usize>;

fn address(entity: &EntityRef) -> usize {
    Arc::as_ptr(entity) as usize
}

/// Repository of one entity type.
///
/// Owns the identity map and the SQL mapper of the type. Named queries
/// registered on the model are reachable through [`Repository::call`] and
/// [`Collection::call`].
pub struct Repository {
    metadata: Arc<EntityMetadata>,
    model: Weak<Model>,
    mapper: DbalMapper,
    identity_map: IdentityMap,
    methods: HashMap<String, CollectionMethod>,
    this: Weak<Repository>,
}

impl Repository {
    pub(crate) fn new(
        model: Weak<Model>,
        conventions: Arc<Conventions>,
        methods: HashMap<String, CollectionMethod>,
        cache_relationships: bool,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            metadata: conventions.metadata().clone(),
            mapper: DbalMapper::new(conventions, model.clone(), this.clone(), cache_relationships),
            model,
            identity_map: IdentityMap::new(),
            methods,
            this: this.clone(),
        })
    }

    pub fn metadata(&self) -> &Arc<EntityMetadata> {
        &self.metadata
    }

    /// Model the repository belongs to.
    pub fn model(&self) -> Result<Arc<Model>> {
        self.model
            .upgrade()
            .ok_or_else(|| Error::invalid_state("model has been dropped"))
    }

    pub fn mapper(&self) -> &DbalMapper {
        &self.mapper
    }

    pub fn identity_map(&self) -> &IdentityMap {
        &self.identity_map
    }

    /// A new, unpersisted entity.
    pub fn create(&self) -> EntityRef {
        Entity::new(self.metadata.clone(), self.this.clone())
    }

    /// Every stored entity, as a SQL-backed collection.
    pub fn find_all(&self) -> Result<Collection> {
        let model = self.model()?;
        Ok(Collection::Dbal(DbalCollection::new(
            model,
            self.metadata.clone(),
            self.mapper.builder(),
        )))
    }

    /// Stored entities matching `condition`.
    pub fn find_by(&self, condition: impl Into<Condition>) -> Result<Collection> {
        self.find_all()?.find_by(condition)
    }

    /// First stored entity matching `condition`.
    pub fn get_by(&self, condition: impl Into<Condition>) -> Result<Option<EntityRef>> {
        self.find_all()?.get_by(condition)
    }

    /// Like [`Repository::get_by`], failing with [`Error::NoResult`].
    pub fn get_by_checked(&self, condition: impl Into<Condition>) -> Result<EntityRef> {
        self.find_all()?.get_by_checked(condition)
    }

    /// Entity by primary key; composite keys are passed as a list.
    ///
    /// Tracked entities are returned without a query and known missing keys
    /// return `None`.
    pub fn get_by_id(&self, id: impl Into<Value>) -> Result<Option<EntityRef>> {
        let id = id.into();
        if let Value::List(parts) = &id {
            if parts.len() != self.metadata.primary_key.len() {
                return Err(Error::invalid_argument(format!(
                    "entity '{}' has {} primary key columns, got {} values",
                    self.metadata.name,
                    self.metadata.primary_key.len(),
                    parts.len()
                )));
            }
        }
        match self.identity_map.get(&id) {
            IdentityLookup::Present(entity) => return Ok(Some(entity)),
            IdentityLookup::Tombstone => return Ok(None),
            IdentityLookup::Absent => {}
        }
        let found = self.find_all()?.get_by_id(id.clone())?;
        if found.is_none() {
            self.identity_map.remove(&id);
        }
        Ok(found)
    }

    /// Like [`Repository::get_by_id`], failing with [`Error::NoResult`].
    pub fn get_by_id_checked(&self, id: impl Into<Value>) -> Result<EntityRef> {
        let id = id.into();
        self.get_by_id(id.clone())?.ok_or_else(|| {
            Error::NoResult(format!("{} with id {} not found", self.metadata.name, id))
        })
    }

    /// Collection over already loaded entities.
    pub fn to_collection(&self, entities: Vec<EntityRef>) -> Result<Collection> {
        let model = self.model()?;
        Ok(Collection::Array(ArrayCollection::new(
            model,
            self.metadata.clone(),
            entities,
        )))
    }

    /// Named query registered for this entity.
    pub fn method(&self, name: &str) -> Option<CollectionMethod> {
        self.methods.get(name).cloned()
    }

    /// Run a named query on [`Repository::find_all`].
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Collection> {
        match self.method(name) {
            Some(method) => method(self.find_all()?, args),
            None => Err(Error::MemberAccess {
                target: format!("repository {}", self.metadata.name),
                method: name.to_string(),
            }),
        }
    }

    /// Turn a storage row into the tracked entity for its primary key.
    ///
    /// Columns that do not belong to the entity are ignored.
    pub fn hydrate(&self, row: &Row) -> Result<EntityRef> {
        let conventions = self.mapper.conventions();
        let mut values = HashMap::new();
        for (column, value) in row.columns().iter().zip(row.values()) {
            let Some(key) = conventions.convert_storage_to_entity_key(column) else {
                continue;
            };
            let value = match conventions.column_type(column) {
                Some(scalar_type) => scalar_type.coerce(value)?,
                None => value.clone(),
            };
            values.insert(key.to_string(), value);
        }

        let id = primary_value(&self.metadata, &values);
        if is_missing(&id) {
            return Err(Error::invalid_state(format!(
                "row of entity '{}' has no primary key",
                self.metadata.name
            )));
        }
        Ok(self.identity_map.get_or_create(&id, values, |values| {
            Entity::hydrated(self.metadata.clone(), self.this.clone(), values)
        }))
    }

    /// Store an entity and, following cascade flags, everything it references.
    ///
    /// Writes run inside the model's transaction; call [`Model::flush`] to
    /// commit them.
    #[instrument(skip_all, fields(entity = %self.metadata.name))]
    pub fn persist(&self, entity: &EntityRef) -> Result<()> {
        self.check_owned(entity)?;
        let model = self.model()?;
        let mut visited = Visited::new();
        let result = persist_cascade(&model, entity, &mut visited);
        model.clear_caches();
        result
    }

    /// Delete an entity, cascading to relationships flagged for removal.
    #[instrument(skip_all, fields(entity = %self.metadata.name))]
    pub fn remove(&self, entity: &EntityRef) -> Result<()> {
        self.check_owned(entity)?;
        let model = self.model()?;
        let mut visited = Visited::new();
        let result = remove_cascade(&model, entity, &mut visited);
        model.clear_caches();
        result
    }

    fn check_owned(&self, entity: &EntityRef) -> Result<()> {
        if entity.metadata().name != self.metadata.name {
            return Err(Error::invalid_argument(format!(
                "repository {} cannot store a {} entity",
                self.metadata.name,
                entity.metadata().name
            )));
        }
        Ok(())
    }

    fn persist_one(&self, model: &Model, entity: &EntityRef, visited: &mut Visited) -> Result<()> {
        if !visited.insert(address(entity)) {
            return Ok(());
        }
        if entity.is_removed() {
            return Err(Error::invalid_state(format!(
                "{} {} was removed and cannot be persisted",
                self.metadata.name,
                entity.id()
            )));
        }

        // Targets referenced by a foreign key first, so the key is known.
        for property in self.metadata.properties() {
            if holds_key(property) {
                self.persist_referenced(model, entity, property, visited)?;
            }
        }

        if !entity.is_persisted() {
            self.mapper.insert(entity)?;
        } else if entity.is_modified() {
            self.mapper.update(entity)?;
        }
        entity.mark_persisted();
        self.identity_map.add(&entity.id(), entity.clone());

        for property in self.metadata.properties() {
            let Some(relationship) = &property.relationship else {
                continue;
            };
            match relationship.kind {
                RelationshipType::OneHasOne if !relationship.is_main => {
                    let loaded = entity.existing_has_one(&property.name).and_then(|c| c.loaded());
                    if let (Some(Some(target)), true) = (loaded, relationship.cascade.persist) {
                        persist_cascade(model, &target, visited)?;
                    }
                }
                RelationshipType::OneHasMany => {
                    self.persist_children(model, entity, property, visited)?
                }
                RelationshipType::ManyHasMany => {
                    self.persist_links(model, entity, property, visited)?
                }
                _ => {}
            }
        }
        debug!(id = %entity.id(), "persisted entity");
        Ok(())
    }

    /// Persist the loaded target of a to-one property holding the foreign key
    /// and copy its key into the entity.
    fn persist_referenced(
        &self,
        model: &Model,
        entity: &EntityRef,
        property: &PropertyMetadata,
        visited: &mut Visited,
    ) -> Result<()> {
        let Some(container) = entity.existing_has_one(&property.name) else {
            return Ok(());
        };
        let Some(Some(target)) = container.loaded() else {
            return Ok(());
        };
        if cascades_persist(property) {
            persist_cascade(model, &target, visited)?;
        }
        if !target.is_persisted() {
            return Err(Error::invalid_state(format!(
                "{}::{} references an unpersisted {}",
                self.metadata.name,
                property.name,
                target.metadata().name
            )));
        }
        let id = target.id();
        if !entity.get_raw(&property.name).loose_eq(&id) {
            entity.set_raw(&property.name, id);
        }
        Ok(())
    }

    fn persist_children(
        &self,
        model: &Model,
        entity: &EntityRef,
        property: &PropertyMetadata,
        visited: &mut Visited,
    ) -> Result<()> {
        let Some(container) = entity.existing_has_many(&property.name) else {
            return Ok(());
        };
        for child in container.pending_added() {
            if cascades_persist(property) {
                persist_cascade(model, &child, visited)?;
            } else if !child.is_persisted() {
                return Err(unpersisted(&self.metadata, property, &child));
            }
        }
        let cascade_remove = property
            .relationship
            .as_ref()
            .is_some_and(|r| r.cascade.remove);
        for child in container.pending_removed() {
            if !child.is_persisted() {
                continue;
            }
            if cascade_remove {
                remove_cascade(model, &child, &mut Visited::new())?;
            } else {
                // The reverse foreign key was cleared or moved.
                persist_cascade(model, &child, visited)?;
            }
        }
        container.mark_persisted();
        Ok(())
    }

    fn persist_links(
        &self,
        model: &Model,
        entity: &EntityRef,
        property: &Arc<PropertyMetadata>,
        visited: &mut Visited,
    ) -> Result<()> {
        let Some(container) = entity.existing_has_many(&property.name) else {
            return Ok(());
        };
        let added = container.pending_added();
        for target in &added {
            if cascades_persist(property) {
                persist_cascade(model, target, visited)?;
            } else if !target.is_persisted() {
                return Err(unpersisted(&self.metadata, property, target));
            }
        }

        let is_main = property.relationship.as_ref().is_some_and(|r| r.is_main);
        if is_main {
            let mapper = self.mapper.many_has_many_mapper(property)?;
            let removed: Vec<Value> = container
                .pending_removed()
                .iter()
                .filter(|e| e.is_persisted())
                .map(|e| e.id())
                .collect();
            mapper.remove(entity, &removed)?;
            let added: Vec<Value> = added.iter().map(|e| e.id()).collect();
            mapper.add(entity, &added)?;
        }
        // The non-main side is written by the reverse container of each target.
        container.mark_persisted();
        Ok(())
    }

    fn remove_one(&self, model: &Model, entity: &EntityRef, visited: &mut Visited) -> Result<()> {
        if !visited.insert(address(entity)) || entity.is_removed() {
            return Ok(());
        }
        if !entity.is_persisted() {
            return Err(Error::invalid_state(format!(
                "{} is not persisted and cannot be removed",
                self.metadata.name
            )));
        }

        for property in self.metadata.properties() {
            let Some(relationship) = &property.relationship else {
                continue;
            };
            match relationship.kind {
                RelationshipType::OneHasMany if relationship.cascade.remove => {
                    for child in entity.has_many(&property.name)?.fetch_all()? {
                        if child.is_persisted() {
                            remove_cascade(model, &child, visited)?;
                        }
                    }
                }
                RelationshipType::OneHasOne if !relationship.is_main && relationship.cascade.remove => {
                    if let Some(target) = entity.has_one(&property.name)?.get()? {
                        remove_cascade(model, &target, visited)?;
                    }
                }
                RelationshipType::ManyHasMany => {
                    self.mapper.many_has_many_mapper(property)?.unlink_all(entity)?;
                }
                _ => {}
            }
        }

        let id = entity.id();
        self.mapper.delete(entity)?;
        self.identity_map.remove(&id);
        entity.mark_removed();
        debug!(id = %id, "removed entity");
        Ok(())
    }
}

fn persist_cascade(model: &Model, entity: &EntityRef, visited: &mut Visited) -> Result<()> {
    model
        .repository(&entity.metadata().name)?
        .persist_one(model, entity, visited)
}

fn remove_cascade(model: &Model, entity: &EntityRef, visited: &mut Visited) -> Result<()> {
    model
        .repository(&entity.metadata().name)?
        .remove_one(model, entity, visited)
}

/// Whether the property stores the foreign key of a to-one relationship.
fn holds_key(property: &PropertyMetadata) -> bool {
    property.relationship.as_ref().is_some_and(|r| {
        r.kind == RelationshipType::ManyHasOne || (r.kind == RelationshipType::OneHasOne && r.is_main)
    })
}

fn cascades_persist(property: &PropertyMetadata) -> bool {
    property
        .relationship
        .as_ref()
        .is_some_and(|r| r.cascade.persist)
}

fn unpersisted(metadata: &EntityMetadata, property: &PropertyMetadata, target: &EntityRef) -> Error {
    Error::invalid_state(format!(
        "{}::{} holds an unpersisted {} and does not cascade persist",
        metadata.name,
        property.name,
        target.metadata().name
    ))
}

/// Null key, or a composite key with a null part.
fn is_missing(id: &Value) -> bool {
    match id {
        Value::List(parts) => parts.iter().any(Value::is_null),
        other => other.is_null(),
    }
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("entity", &self.metadata.name)
            .field("tracked", &self.identity_map.len())
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}
