//! Sibling sets used to batch relationship loading.

use std::sync::{Arc, Weak};

use super::{Entity, EntityRef};

/// Entities materialized together by one collection fetch.
///
/// Every entity of the set points to the same container, so a relationship
/// mapper asked for one entity's relationship can load it for all siblings
/// with a single query.
#[derive(Debug, Default)]
pub struct PreloadContainer {
    entities: Vec<Weak<Entity>>,
}

impl PreloadContainer {
    pub fn new(entities: &[EntityRef]) -> Self {
        Self {
            entities: entities.iter().map(Arc::downgrade).collect(),
        }
    }

    /// Siblings still alive.
    pub fn entities(&self) -> Vec<EntityRef> {
        self.entities.iter().filter_map(Weak::upgrade).collect()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Attach a fresh container to every entity of a fetched set.
    pub(crate) fn attach(entities: &[EntityRef]) {
        if entities.is_empty() {
            return;
        }
        let container = Arc::new(Self::new(entities));
        for entity in entities {
            entity.set_preload_container(Some(container.clone()));
        }
    }
}

/// Siblings of `entity` sharing its metadata, the entity itself included.
pub(crate) fn siblings(entity: &EntityRef) -> Vec<EntityRef> {
    let mut out: Vec<EntityRef> = match entity.preload_container() {
        Some(container) => container
            .entities()
            .into_iter()
            .filter(|e| e.metadata().name == entity.metadata().name && e.is_persisted())
            .collect(),
        None => Vec::new(),
    };
    if !out.iter().any(|e| Arc::ptr_eq(e, entity)) {
        out.push(entity.clone());
    }
    out
}
