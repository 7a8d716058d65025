//! Relationships whose foreign key is stored on the parent.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tracing::debug;

use crate::dbal::{Clause, QueryBuilder};
use crate::entity::{siblings, EntityRef};
use crate::error::Result;
use crate::metadata::{EntityMetadata, PropertyMetadata};
use crate::model::Model;

use super::{
    cache_key, column_in, distinct, primary_column, qualified, MapperContext, RelationshipMapper,
    ResultCache,
};

/// Loads many-has-one and main side one-has-one properties.
///
/// The foreign keys of all siblings are collected and the targets loaded with
/// one `pk IN (...)` query. Keys storage did not return are remembered as
/// missing in the target's identity map.
pub struct ManyHasOneMapper {
    context: MapperContext,
    cache: ResultCache<EntityRef>,
}

impl ManyHasOneMapper {
    pub(crate) fn new(
        model: Weak<Model>,
        source: Arc<EntityMetadata>,
        property: Arc<PropertyMetadata>,
        cache_enabled: bool,
    ) -> Result<Self> {
        Ok(Self {
            context: MapperContext::new(model, source, property)?,
            cache: ResultCache::new(cache_enabled),
        })
    }
}

impl RelationshipMapper for ManyHasOneMapper {
    fn property(&self) -> &Arc<PropertyMetadata> {
        &self.context.property
    }

    fn fetch(&self, builder: &QueryBuilder, parent: &EntityRef) -> Result<Vec<EntityRef>> {
        let name = &self.context.property.name;
        let key = parent.get_raw(name);
        if key.is_null() {
            return Ok(Vec::new());
        }
        let keys = distinct(siblings(parent).into_iter().map(|e| e.get_raw(name)));

        let model = self.context.model()?;
        let target = self.context.target(&model)?;
        let conventions = model.conventions(&target.metadata().name)?;
        let primary = qualified(builder.get_from_alias()?, &primary_column(&conventions)?);

        let cache_key = cache_key(&model, "many_has_one", builder, &keys)?;
        let targets = self.cache.get_or_load(cache_key, || {
            debug!(
                relationship = %self.context.name(),
                strategy = "one_pass",
                parents = keys.len(),
                "loading relationship"
            );
            let mut query = builder.clone();
            query.limit_by(None, None);
            query.and_where(column_in(primary, keys.clone()));
            let found: HashMap<String, EntityRef> = target
                .mapper()
                .fetch(&query)?
                .into_iter()
                .map(|e| (e.id().to_key(), e))
                .collect();

            // Only an unfiltered query proves a key is gone.
            if builder.clause(Clause::Where).is_empty() {
                for key in &keys {
                    if !found.contains_key(&key.to_key()) {
                        target.identity_map().remove(key);
                    }
                }
            }
            Ok(found)
        })?;
        Ok(targets.get(&key.to_key()).cloned().into_iter().collect())
    }

    fn count(&self, builder: &QueryBuilder, parent: &EntityRef) -> Result<usize> {
        Ok(self.fetch(builder, parent)?.len())
    }

    fn clear_cache(&self) {
        self.cache.clear();
    }
}
