//! Stored relationship overlaid with pending edits.

use std::sync::Arc;

use ormset_proto::{Condition, Direction, FunctionCall, OrderExpr, Value};

use crate::entity::EntityRef;
use crate::error::Result;
use crate::metadata::EntityMetadata;
use crate::model::Model;

use super::array::{slice, sort_entities};
use super::helpers::{normalize, normalize_order, ArrayCollectionHelper};
use super::state::FetchState;
use super::Collection;

/// Relationship collection of a stored entity with unsaved edits.
///
/// Removed stored entities are filtered out of the storage query so paging
/// and counting stay right; added entities are appended by identity, since
/// they may have no primary key yet. Filters apply to both sides, ordering and
/// limits to the merged result.
#[derive(Clone)]
pub struct HasManyCollection {
    model: Arc<Model>,
    metadata: Arc<EntityMetadata>,
    storage: Collection,
    added: Collection,
    sorters: Vec<(FunctionCall, Direction)>,
    limit: Option<(usize, Option<usize>)>,
    pub(super) state: Arc<FetchState>,
}

impl HasManyCollection {
    pub fn new(
        model: &Arc<Model>,
        storage: Collection,
        added: Collection,
        removed: Vec<Value>,
        order_by: Vec<(String, Direction)>,
    ) -> Result<Self> {
        let metadata = storage.metadata().clone();
        let storage = if removed.is_empty() {
            storage
        } else {
            let condition =
                Condition::property(format!("{}!=", metadata.id_property()), Value::List(removed));
            storage.apply_filter(&normalize(&condition)?)?
        };
        let sorters = order_by
            .iter()
            .map(|(property, direction)| {
                Ok((normalize_order(&OrderExpr::from(property.as_str()))?, *direction))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            model: model.clone(),
            metadata,
            storage,
            added,
            sorters,
            limit: None,
            state: FetchState::new(),
        })
    }

    pub fn metadata(&self) -> &Arc<EntityMetadata> {
        &self.metadata
    }

    pub(super) fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// The stored side, removed entities excluded.
    pub fn storage(&self) -> &Collection {
        &self.storage
    }

    fn derive(&self) -> Self {
        Self {
            state: self.state.derive(),
            ..self.clone()
        }
    }

    pub(super) fn find_by(&self, call: &FunctionCall) -> Result<Self> {
        let mut next = self.derive();
        next.storage = self.storage.apply_filter(call)?;
        next.added = self.added.apply_filter(call)?;
        Ok(next)
    }

    pub(super) fn order_by(&self, call: FunctionCall, direction: Direction) -> Result<Self> {
        let mut next = self.derive();
        next.storage = self.storage.apply_order(&call, direction)?;
        next.sorters.push((call, direction));
        Ok(next)
    }

    pub(super) fn reset_order_by(&self) -> Self {
        let mut next = self.derive();
        next.storage = self.storage.reset_order_by();
        next.sorters.clear();
        next
    }

    pub(super) fn limit_by(&self, limit: usize, offset: Option<usize>) -> Self {
        let mut next = self.derive();
        next.limit = Some((limit, offset));
        next
    }

    pub(super) fn entities(&self) -> Result<Arc<[EntityRef]>> {
        self.state.entities(|| {
            let mut entities = self.storage.fetch_all()?;
            for entity in self.added.fetch_all()? {
                if !entities.iter().any(|e| Arc::ptr_eq(e, &entity)) {
                    entities.push(entity);
                }
            }
            let helper = ArrayCollectionHelper::new(&self.model, &self.metadata);
            let entities = sort_entities(&helper, entities, &self.sorters)?;
            Ok(slice(entities, self.limit))
        })
    }

    pub(super) fn count_stored(&self) -> Result<usize> {
        self.state
            .stored_count(|| Ok(self.storage.count_stored()? + self.added.count()?))
    }
}
