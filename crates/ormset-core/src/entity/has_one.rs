//! To-one relationship container.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use ormset_proto::Value;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::metadata::{PropertyMetadata, RelationshipType};

use super::{Entity, EntityRef, IdentityLookup};

/// Holds the reentrancy flag while the reverse side is updated.
pub(super) struct ReverseGuard<'a>(&'a AtomicBool);

impl<'a> ReverseGuard<'a> {
    /// Set the flag; `None` when it was already set.
    pub(super) fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        if flag.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(Self(flag))
        }
    }
}

impl Drop for ReverseGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A many-has-one or one-has-one property of one entity.
///
/// The related entity is loaded lazily on the first [`HasOne::get`]. Setting
/// it updates the foreign key (on the owning side) and the reverse property of
/// both the old and the new target.
#[derive(Debug)]
pub struct HasOne {
    parent: Weak<Entity>,
    property: Arc<PropertyMetadata>,
    /// `None` until loaded.
    loaded: Mutex<Option<Option<EntityRef>>>,
    updating_reverse: AtomicBool,
}

impl HasOne {
    pub(super) fn new(parent: Weak<Entity>, property: Arc<PropertyMetadata>) -> Self {
        Self {
            parent,
            property,
            loaded: Mutex::new(None),
            updating_reverse: AtomicBool::new(false),
        }
    }

    pub fn property(&self) -> &Arc<PropertyMetadata> {
        &self.property
    }

    fn parent(&self) -> Result<EntityRef> {
        self.parent
            .upgrade()
            .ok_or_else(|| Error::invalid_state("relationship parent has been dropped"))
    }

    /// Whether this side stores the foreign key.
    fn holds_key(&self) -> bool {
        match &self.property.relationship {
            Some(r) => r.kind == RelationshipType::ManyHasOne || r.is_main,
            None => false,
        }
    }

    /// Whether the reverse side is being synchronised from here.
    pub(super) fn is_updating(&self) -> bool {
        self.updating_reverse.load(Ordering::Acquire)
    }

    /// The related entity, loaded on first access.
    pub fn get(&self) -> Result<Option<EntityRef>> {
        if let Some(loaded) = self.loaded.lock().clone() {
            return Ok(loaded);
        }
        let entity = self.load()?;
        *self.loaded.lock() = Some(entity.clone());
        Ok(entity)
    }

    /// The related entity if it was loaded or set, without touching storage.
    pub(crate) fn loaded(&self) -> Option<Option<EntityRef>> {
        self.loaded.lock().clone()
    }

    fn load(&self) -> Result<Option<EntityRef>> {
        let parent = self.parent()?;
        let repository = parent.repository()?;
        let model = repository.model()?;
        let target = model.repository(&self.target_name()?)?;

        if self.holds_key() {
            let key = parent.get_raw(&self.property.name);
            if key.is_null() {
                return Ok(None);
            }
            match target.identity_map().get(&key) {
                IdentityLookup::Present(entity) => return Ok(Some(entity)),
                IdentityLookup::Tombstone => return Ok(None),
                IdentityLookup::Absent => {}
            }
        } else if !parent.is_persisted() {
            return Ok(None);
        }

        let mapper = repository.mapper().relationship_mapper(&self.property)?;
        target.find_all()?.with_relationship(mapper, parent)?.fetch()
    }

    /// Replace the related entity.
    pub fn set(&self, entity: Option<EntityRef>) -> Result<()> {
        if self.updating_reverse.load(Ordering::Acquire) {
            return Ok(());
        }
        let parent = self.parent()?;
        let target_name = self.target_name()?;
        if let Some(entity) = &entity {
            if entity.metadata().name != target_name {
                return Err(Error::invalid_argument(format!(
                    "'{}' expects a {} entity, got {}",
                    self.property.name,
                    target_name,
                    entity.metadata().name
                )));
            }
        }
        if entity.is_none() && self.holds_key() && !self.property.nullable {
            return Err(Error::invalid_argument(format!(
                "relationship '{}' of entity '{}' is not nullable",
                self.property.name,
                parent.metadata().name
            )));
        }

        let old = self.get()?;
        let unchanged = match (&old, &entity) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return Ok(());
        }

        if self.holds_key() {
            let key = entity.as_ref().map_or(Value::Null, |e| e.id());
            parent.set_raw(&self.property.name, key);
        }
        *self.loaded.lock() = Some(entity.clone());

        let Some(_guard) = ReverseGuard::acquire(&self.updating_reverse) else {
            return Ok(());
        };
        self.update_reverse(&parent, old, entity)
    }

    fn update_reverse(
        &self,
        parent: &EntityRef,
        old: Option<EntityRef>,
        new: Option<EntityRef>,
    ) -> Result<()> {
        let Some(relationship) = &self.property.relationship else {
            return Ok(());
        };
        let Some(reverse) = relationship.reverse.as_deref() else {
            return Ok(());
        };
        match relationship.kind {
            RelationshipType::ManyHasOne => {
                if let Some(old) = old {
                    old.has_many(reverse)?.remove(parent.clone())?;
                }
                if let Some(new) = new {
                    new.has_many(reverse)?.add(parent.clone())?;
                }
            }
            RelationshipType::OneHasOne => {
                if let Some(old) = old {
                    old.has_one(reverse)?.set(None)?;
                }
                if let Some(new) = new {
                    new.has_one(reverse)?.set(Some(parent.clone()))?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Forget the loaded entity; the next access reloads it.
    pub(crate) fn invalidate(&self) {
        *self.loaded.lock() = None;
    }

    fn target_name(&self) -> Result<String> {
        self.property
            .relationship
            .as_ref()
            .map(|r| r.entity.clone())
            .ok_or_else(|| {
                Error::invalid_state(format!("'{}' is not a relationship", self.property.name))
            })
    }
}
