//! Storage backed collection.

use std::fmt;
use std::sync::{Arc, Weak};

use ormset_proto::{Direction, FunctionCall};

use crate::dbal::{Clause, Fragment, QueryBuilder};
use crate::entity::{Entity, EntityRef};
use crate::error::{Error, Result};
use crate::mapper::RelationshipMapper;
use crate::metadata::EntityMetadata;
use crate::model::Model;

use super::helpers::DbalQueryBuilderHelper;
use super::state::FetchState;

/// Relationship the collection is read through.
#[derive(Clone)]
pub(crate) struct RelationshipBinding {
    pub(crate) mapper: Arc<dyn RelationshipMapper>,
    pub(crate) parent: Weak<Entity>,
}

impl RelationshipBinding {
    fn parent(&self) -> Result<EntityRef> {
        self.parent
            .upgrade()
            .ok_or_else(|| Error::invalid_state("relationship parent has been dropped"))
    }
}

/// Collection backed by a SELECT query.
///
/// Mutators work on a copy of the query builder; nothing runs until the first
/// read. Entities and the stored count are cached separately.
#[derive(Clone)]
pub struct DbalCollection {
    model: Arc<Model>,
    metadata: Arc<EntityMetadata>,
    builder: QueryBuilder,
    /// Plain columns ordered by, grouped by as well once the query is grouped.
    order_columns: Vec<Fragment>,
    relationship: Option<RelationshipBinding>,
    pub(super) state: Arc<FetchState>,
}

impl DbalCollection {
    pub fn new(model: Arc<Model>, metadata: Arc<EntityMetadata>, builder: QueryBuilder) -> Self {
        Self {
            model,
            metadata,
            builder,
            order_columns: Vec::new(),
            relationship: None,
            state: FetchState::new(),
        }
    }

    pub fn metadata(&self) -> &Arc<EntityMetadata> {
        &self.metadata
    }

    pub(super) fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// The query the collection reads from.
    pub fn query_builder(&self) -> &QueryBuilder {
        &self.builder
    }

    fn derive(&self) -> Self {
        Self {
            state: self.state.derive(),
            ..self.clone()
        }
    }

    fn helper(&self) -> DbalQueryBuilderHelper<'_> {
        DbalQueryBuilderHelper::new(&self.model, &self.metadata)
    }

    fn sync_group_by(&mut self) {
        if self.builder.clause(Clause::Group).is_empty() {
            return;
        }
        for column in &self.order_columns {
            self.builder.add_group_by(column.clone());
        }
    }

    pub(super) fn find_by(&self, call: &FunctionCall) -> Result<Self> {
        let mut next = self.derive();
        self.helper().filter(&mut next.builder, call)?;
        next.sync_group_by();
        Ok(next)
    }

    pub(super) fn order_by(&self, call: &FunctionCall, direction: Direction) -> Result<Self> {
        let mut next = self.derive();
        let columns = self.helper().order(&mut next.builder, call, direction)?;
        next.order_columns.extend(columns);
        next.sync_group_by();
        Ok(next)
    }

    pub(super) fn reset_order_by(&self) -> Self {
        let mut next = self.derive();
        next.builder.reset_order_by();
        next.order_columns.clear();
        next
    }

    pub(super) fn limit_by(&self, limit: usize, offset: Option<usize>) -> Self {
        let mut next = self.derive();
        next.builder.limit_by(Some(limit), offset);
        next
    }

    pub(super) fn with_relationship(
        &self,
        mapper: Arc<dyn RelationshipMapper>,
        parent: &EntityRef,
    ) -> Self {
        let mut next = self.derive();
        next.relationship = Some(RelationshipBinding {
            mapper,
            parent: Arc::downgrade(parent),
        });
        next
    }

    pub(super) fn entities(&self) -> Result<Arc<[EntityRef]>> {
        self.state.entities(|| match &self.relationship {
            Some(binding) => binding.mapper.fetch(&self.builder, &binding.parent()?),
            None => self
                .model
                .repository(&self.metadata.name)?
                .mapper()
                .fetch(&self.builder),
        })
    }

    pub(super) fn count_stored(&self) -> Result<usize> {
        self.state.stored_count(|| match &self.relationship {
            Some(binding) => binding.mapper.count(&self.builder, &binding.parent()?),
            None => self
                .model
                .repository(&self.metadata.name)?
                .mapper()
                .count(&self.builder),
        })
    }
}

impl fmt::Debug for DbalCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbalCollection")
            .field("entity", &self.metadata.name)
            .field("builder", &self.builder)
            .field("relationship", &self.relationship.is_some())
            .finish()
    }
}
