//! Relationships whose foreign key is stored on the target.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use ormset_proto::Value;
use tracing::debug;

use crate::dbal::{Clause, Fragment, QueryBuilder, SqlArg};
use crate::entity::EntityRef;
use crate::error::Result;
use crate::metadata::{EntityMetadata, PropertyMetadata};
use crate::model::Model;

use super::{
    cache_key, check_two_pass, column_equals, column_in, count_per_parent, counts, key_pairs,
    load_pairs, primary_column, qualified, query_per_parent, select_as, MapperContext,
    RelationshipMapper, ResultCache, PARENT_KEY, TARGET_KEY,
};

/// Loads one-has-many and non-main one-has-one properties.
pub struct OneHasManyMapper {
    context: MapperContext,
    entities: ResultCache<Vec<EntityRef>>,
    counts: ResultCache<usize>,
}

/// Columns of one target query.
struct Columns {
    /// Foreign key referencing the parent.
    foreign: String,
    primary: String,
}

impl OneHasManyMapper {
    pub(crate) fn new(
        model: Weak<Model>,
        source: Arc<EntityMetadata>,
        property: Arc<PropertyMetadata>,
        cache_enabled: bool,
    ) -> Result<Self> {
        Ok(Self {
            context: MapperContext::new(model, source, property)?,
            entities: ResultCache::new(cache_enabled),
            counts: ResultCache::new(cache_enabled),
        })
    }

    fn columns(&self, model: &Model, builder: &QueryBuilder) -> Result<Columns> {
        let target = self.context.target(model)?;
        let conventions = model.conventions(&target.metadata().name)?;
        let alias = builder.get_from_alias()?;
        let foreign = conventions.convert_entity_to_storage_key(self.context.reverse()?)?;
        Ok(Columns {
            foreign: qualified(alias, foreign),
            primary: qualified(alias, &primary_column(&conventions)?),
        })
    }

    fn load(
        &self,
        model: &Model,
        builder: &QueryBuilder,
        keys: &[Value],
    ) -> Result<HashMap<String, Vec<EntityRef>>> {
        let target = self.context.target(model)?;
        let columns = self.columns(model, builder)?;
        let reverse = self.context.reverse()?;

        if !builder.has_limit_offset_clause() {
            debug!(
                relationship = %self.context.name(),
                strategy = "one_pass",
                parents = keys.len(),
                "loading relationship"
            );
            let mut query = builder.clone();
            query.and_where(column_in(columns.foreign, keys.to_vec()));
            let mut grouped: HashMap<String, Vec<EntityRef>> = HashMap::new();
            for entity in target.mapper().fetch(&query)? {
                grouped
                    .entry(entity.get_raw(reverse).to_key())
                    .or_default()
                    .push(entity);
            }
            return Ok(grouped);
        }

        check_two_pass(&self.context, builder)?;
        debug!(
            relationship = %self.context.name(),
            strategy = "two_pass",
            parents = keys.len(),
            "loading relationship"
        );
        let first = keys
            .iter()
            .map(|key| {
                let mut query = builder.clone();
                query.select(select_as(columns.foreign.clone(), PARENT_KEY));
                query.add_select(select_as(columns.primary.clone(), TARGET_KEY));
                query.and_where(column_equals(columns.foreign.clone(), key.clone()));
                query
            })
            .collect();
        let pairs = key_pairs(&query_per_parent(model, first)?);
        load_pairs(&target, builder, columns.primary, pairs)
    }
}

impl RelationshipMapper for OneHasManyMapper {
    fn property(&self) -> &Arc<PropertyMetadata> {
        &self.context.property
    }

    fn fetch(&self, builder: &QueryBuilder, parent: &EntityRef) -> Result<Vec<EntityRef>> {
        if !parent.is_persisted() {
            return Ok(Vec::new());
        }
        let keys = self.context.sibling_ids(parent)?;
        let model = self.context.model()?;
        let cache_key = cache_key(&model, "one_has_many", builder, &keys)?;
        let grouped = self
            .entities
            .get_or_load(cache_key, || self.load(&model, builder, &keys))?;
        Ok(grouped.get(&parent.id().to_key()).cloned().unwrap_or_default())
    }

    fn count(&self, builder: &QueryBuilder, parent: &EntityRef) -> Result<usize> {
        if !parent.is_persisted() {
            return Ok(0);
        }
        let keys = self.context.sibling_ids(parent)?;
        let model = self.context.model()?;
        let cache_key = cache_key(&model, "one_has_many_count", builder, &keys)?;
        let counted = self.counts.get_or_load(cache_key, || {
            let columns = self.columns(&model, builder)?;
            let simple = !builder.has_limit_offset_clause()
                && builder.clause(Clause::Group).is_empty();
            if simple {
                let mut query = builder.clone();
                query.reset_order_by();
                query.select(select_as(columns.foreign.clone(), PARENT_KEY));
                query.add_select(Fragment::new(
                    "COUNT(DISTINCT %column) AS %column",
                    vec![
                        SqlArg::Column(columns.primary),
                        SqlArg::Column(super::COUNT.to_string()),
                    ],
                ));
                query.and_where(column_in(columns.foreign.clone(), keys.clone()));
                query.group_by(vec![Fragment::column(columns.foreign)]);
                let (sql, params) = query.build(model.platform())?;
                return counts(&model.connection().query(&sql, &params)?);
            }

            let limited = builder.has_limit_offset_clause();
            let subqueries = keys
                .iter()
                .map(|key| {
                    let mut query = builder.clone();
                    if !limited {
                        query.reset_order_by();
                    }
                    query.select(Fragment::column(columns.primary.clone()));
                    query.and_where(column_equals(columns.foreign.clone(), key.clone()));
                    (key.clone(), query)
                })
                .collect();
            count_per_parent(&model, subqueries)
        })?;
        Ok(counted.get(&parent.id().to_key()).copied().unwrap_or(0))
    }

    fn clear_cache(&self) {
        self.entities.clear();
        self.counts.clear();
    }
}
