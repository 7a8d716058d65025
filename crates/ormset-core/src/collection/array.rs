//! In-memory collection over already loaded entities.

use std::cmp::Ordering;
use std::sync::Arc;

use ormset_proto::{Direction, FunctionCall, Value};

use crate::entity::EntityRef;
use crate::error::Result;
use crate::metadata::EntityMetadata;
use crate::model::Model;

use super::helpers::{compare_sort_values, ArrayCollectionHelper};
use super::state::FetchState;

/// Collection over a fixed list of entities.
///
/// Filters, sorters and the limit are recorded and applied together on the
/// first read: filtering first, then a stable sort, then the slice.
#[derive(Clone)]
pub struct ArrayCollection {
    model: Arc<Model>,
    metadata: Arc<EntityMetadata>,
    data: Arc<[EntityRef]>,
    filters: Vec<FunctionCall>,
    sorters: Vec<(FunctionCall, Direction)>,
    limit: Option<(usize, Option<usize>)>,
    pub(super) state: Arc<FetchState>,
}

impl ArrayCollection {
    pub fn new(model: Arc<Model>, metadata: Arc<EntityMetadata>, data: Vec<EntityRef>) -> Self {
        Self {
            model,
            metadata,
            data: data.into(),
            filters: Vec::new(),
            sorters: Vec::new(),
            limit: None,
            state: FetchState::new(),
        }
    }

    pub fn metadata(&self) -> &Arc<EntityMetadata> {
        &self.metadata
    }

    pub(super) fn model(&self) -> &Arc<Model> {
        &self.model
    }

    fn derive(&self) -> Self {
        Self {
            state: self.state.derive(),
            ..self.clone()
        }
    }

    pub(super) fn find_by(&self, call: FunctionCall) -> Self {
        let mut next = self.derive();
        next.filters.push(call);
        next
    }

    pub(super) fn order_by(&self, call: FunctionCall, direction: Direction) -> Self {
        let mut next = self.derive();
        next.sorters.push((call, direction));
        next
    }

    pub(super) fn reset_order_by(&self) -> Self {
        let mut next = self.derive();
        next.sorters.clear();
        next
    }

    pub(super) fn limit_by(&self, limit: usize, offset: Option<usize>) -> Self {
        let mut next = self.derive();
        next.limit = Some((limit, offset));
        next
    }

    pub(super) fn entities(&self) -> Result<Arc<[EntityRef]>> {
        self.state.entities(|| self.process())
    }

    fn process(&self) -> Result<Vec<EntityRef>> {
        let helper = ArrayCollectionHelper::new(&self.model, &self.metadata);
        let mut entities = Vec::with_capacity(self.data.len());
        'entities: for entity in self.data.iter() {
            for filter in &self.filters {
                if !helper.is_true(entity, filter)? {
                    continue 'entities;
                }
            }
            entities.push(entity.clone());
        }
        let entities = sort_entities(&helper, entities, &self.sorters)?;
        Ok(slice(entities, self.limit))
    }
}

/// Stable sort by several keys; the first unequal key decides.
pub(crate) fn sort_entities(
    helper: &ArrayCollectionHelper<'_>,
    entities: Vec<EntityRef>,
    sorters: &[(FunctionCall, Direction)],
) -> Result<Vec<EntityRef>> {
    if sorters.is_empty() {
        return Ok(entities);
    }
    let mut keyed = entities
        .into_iter()
        .map(|entity| {
            let keys = sorters
                .iter()
                .map(|(call, _)| helper.sort_value(&entity, call))
                .collect::<Result<Vec<Value>>>()?;
            Ok((keys, entity))
        })
        .collect::<Result<Vec<_>>>()?;
    keyed.sort_by(|(a, _), (b, _)| {
        sorters
            .iter()
            .zip(a.iter().zip(b))
            .map(|((_, direction), (a, b))| compare_sort_values(a, b, *direction))
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
    Ok(keyed.into_iter().map(|(_, entity)| entity).collect())
}

/// Apply LIMIT and OFFSET.
pub(crate) fn slice(entities: Vec<EntityRef>, limit: Option<(usize, Option<usize>)>) -> Vec<EntityRef> {
    match limit {
        Some((limit, offset)) => entities
            .into_iter()
            .skip(offset.unwrap_or(0))
            .take(limit)
            .collect(),
        None => entities,
    }
}
