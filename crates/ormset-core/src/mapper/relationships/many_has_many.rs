//! Relationships stored in a join table.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use ormset_proto::Value;
use tracing::debug;

use crate::dbal::{Clause, Fragment, QueryBuilder, SqlArg};
use crate::entity::{EntityRef, PreloadContainer};
use crate::error::{Error, Result};
use crate::metadata::{EntityMetadata, PropertyMetadata};
use crate::model::Model;

use super::{
    cache_key, check_two_pass, column_equals, column_in, count_per_parent, counts, key_pairs,
    load_pairs, primary_column, qualified, query_per_parent, select_as, MapperContext,
    RelationshipMapper, ResultCache, PARENT_KEY, TARGET_KEY,
};

/// Alias of the join table in target queries.
const LINK: &str = "link";

/// Loads many-has-many properties and maintains their join table.
pub struct ManyHasManyMapper {
    context: MapperContext,
    entities: ResultCache<Vec<EntityRef>>,
    counts: ResultCache<usize>,
}

/// Join table layout as seen from the parent.
struct Link {
    table: String,
    /// Column referencing the parent.
    own: String,
    /// Column referencing the target.
    other: String,
}

impl ManyHasManyMapper {
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

    fn link(&self, model: &Model) -> Result<Link> {
        let own = model.conventions(&self.context.source.name)?;
        let target = model.conventions(&self.context.target)?;
        let property = &self.context.property;
        let (own_column, other_column) = own.many_has_many_storage_keys(property, &target)?;
        Ok(Link {
            table: own.many_has_many_storage_name(property, &target)?,
            own: own_column,
            other: other_column,
        })
    }

    /// Target query joined to the join table; returns the target key column.
    fn joined(&self, model: &Model, builder: &QueryBuilder, link: &Link) -> Result<(QueryBuilder, String)> {
        let conventions = model.conventions(&self.context.target)?;
        let primary = qualified(builder.get_from_alias()?, &primary_column(&conventions)?);
        let mut query = builder.clone();
        query.inner_join(
            link.table.clone(),
            LINK,
            Fragment::new(
                "%column = %column",
                vec![
                    SqlArg::Column(qualified(LINK, &link.other)),
                    SqlArg::Column(primary.clone()),
                ],
            ),
        );
        Ok((query, primary))
    }

    fn load(
        &self,
        model: &Model,
        builder: &QueryBuilder,
        keys: &[Value],
    ) -> Result<HashMap<String, Vec<EntityRef>>> {
        let target = self.context.target(model)?;
        let link = self.link(model)?;
        let own = qualified(LINK, &link.own);

        if !builder.has_limit_offset_clause() {
            debug!(
                relationship = %self.context.name(),
                strategy = "one_pass",
                parents = keys.len(),
                "loading relationship"
            );
            let (mut query, _) = self.joined(model, builder, &link)?;
            query.add_select(select_as(own.clone(), PARENT_KEY));
            query.and_where(column_in(own.clone(), keys.to_vec()));
            if !query.clause(Clause::Group).is_empty() {
                query.add_group_by(Fragment::column(own));
            }

            let mut grouped: HashMap<String, Vec<EntityRef>> = HashMap::new();
            let mut loaded: Vec<EntityRef> = Vec::new();
            for row in target.mapper().query(&query)? {
                let parent = row.get(PARENT_KEY).cloned().unwrap_or(Value::Null);
                let entity = target.hydrate(&row)?;
                if !loaded.iter().any(|e| Arc::ptr_eq(e, &entity)) {
                    loaded.push(entity.clone());
                }
                grouped.entry(parent.to_key()).or_default().push(entity);
            }
            PreloadContainer::attach(&loaded);
            return Ok(grouped);
        }

        check_two_pass(&self.context, builder)?;
        debug!(
            relationship = %self.context.name(),
            strategy = "two_pass",
            parents = keys.len(),
            "loading relationship"
        );
        let mut first = Vec::with_capacity(keys.len());
        let mut primary = String::new();
        for key in keys {
            let (mut query, target_primary) = self.joined(model, builder, &link)?;
            query.select(select_as(own.clone(), PARENT_KEY));
            query.add_select(select_as(target_primary.clone(), TARGET_KEY));
            query.and_where(column_equals(own.clone(), key.clone()));
            if !query.clause(Clause::Group).is_empty() {
                query.add_group_by(Fragment::column(own.clone()));
            }
            first.push(query);
            primary = target_primary;
        }
        let pairs = key_pairs(&query_per_parent(model, first)?);
        load_pairs(&target, builder, primary, pairs)
    }

    fn check_main(&self) -> Result<()> {
        let is_main = self
            .context
            .property
            .relationship
            .as_ref()
            .is_some_and(|r| r.is_main);
        if !is_main {
            return Err(Error::invalid_state(format!(
                "{} is not the main side and cannot persist the relationship",
                self.context.name()
            )));
        }
        Ok(())
    }

    /// Insert join table rows relating `parent` to the targets `ids`.
    ///
    /// Only the main side writes the join table.
    pub fn add(&self, parent: &EntityRef, ids: &[Value]) -> Result<()> {
        self.check_main()?;
        if ids.is_empty() {
            return Ok(());
        }
        let model = self.context.model()?;
        let link = self.link(&model)?;
        model.coordinator().begin_transaction()?;
        for id in ids {
            let insert = Fragment::new(
                "INSERT INTO %table (%column[]) VALUES %any[]",
                vec![
                    SqlArg::Table(link.table.clone()),
                    SqlArg::Columns(vec![link.own.clone(), link.other.clone()]),
                    SqlArg::Values(vec![parent.id(), id.clone()]),
                ],
            );
            let (sql, params) = insert.render(model.platform())?;
            model.connection().execute(&sql, &params)?;
        }
        self.clear_cache();
        Ok(())
    }

    /// Delete join table rows relating `parent` to the targets `ids`.
    pub fn remove(&self, parent: &EntityRef, ids: &[Value]) -> Result<()> {
        self.check_main()?;
        if ids.is_empty() {
            return Ok(());
        }
        let model = self.context.model()?;
        let link = self.link(&model)?;
        model.coordinator().begin_transaction()?;
        let delete = Fragment::new(
            "DELETE FROM %table WHERE %column = %any AND %column IN %any[]",
            vec![
                SqlArg::Table(link.table.clone()),
                SqlArg::Column(link.own.clone()),
                SqlArg::Value(parent.id()),
                SqlArg::Column(link.other.clone()),
                SqlArg::Values(ids.to_vec()),
            ],
        );
        let (sql, params) = delete.render(model.platform())?;
        model.connection().execute(&sql, &params)?;
        self.clear_cache();
        Ok(())
    }

    /// Delete every join table row of `parent` before it is removed.
    ///
    /// Allowed from both sides since it removes the entity, not an edge.
    pub(crate) fn unlink_all(&self, parent: &EntityRef) -> Result<()> {
        let model = self.context.model()?;
        let link = self.link(&model)?;
        model.coordinator().begin_transaction()?;
        let delete = Fragment::new(
            "DELETE FROM %table WHERE %column = %any",
            vec![
                SqlArg::Table(link.table),
                SqlArg::Column(link.own),
                SqlArg::Value(parent.id()),
            ],
        );
        let (sql, params) = delete.render(model.platform())?;
        model.connection().execute(&sql, &params)?;
        self.clear_cache();
        Ok(())
    }
}

impl RelationshipMapper for ManyHasManyMapper {
    fn property(&self) -> &Arc<PropertyMetadata> {
        &self.context.property
    }

    fn fetch(&self, builder: &QueryBuilder, parent: &EntityRef) -> Result<Vec<EntityRef>> {
        if !parent.is_persisted() {
            return Ok(Vec::new());
        }
        let keys = self.context.sibling_ids(parent)?;
        let model = self.context.model()?;
        let cache_key = cache_key(&model, "many_has_many", builder, &keys)?;
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
        let cache_key = cache_key(&model, "many_has_many_count", builder, &keys)?;
        let counted = self.counts.get_or_load(cache_key, || {
            let link = self.link(&model)?;
            let own = qualified(LINK, &link.own);
            let simple = !builder.has_limit_offset_clause()
                && builder.clause(Clause::Group).is_empty();
            if simple {
                let (mut query, primary) = self.joined(&model, builder, &link)?;
                query.reset_order_by();
                query.select(select_as(own.clone(), PARENT_KEY));
                query.add_select(Fragment::new(
                    "COUNT(DISTINCT %column) AS %column",
                    vec![
                        SqlArg::Column(primary),
                        SqlArg::Column(super::COUNT.to_string()),
                    ],
                ));
                query.and_where(column_in(own.clone(), keys.clone()));
                query.group_by(vec![Fragment::column(own)]);
                let (sql, params) = query.build(model.platform())?;
                return counts(&model.connection().query(&sql, &params)?);
            }

            let limited = builder.has_limit_offset_clause();
            let mut subqueries = Vec::with_capacity(keys.len());
            for key in &keys {
                let (mut query, primary) = self.joined(&model, builder, &link)?;
                if !limited {
                    query.reset_order_by();
                }
                query.select(Fragment::column(primary));
                query.and_where(column_equals(own.clone(), key.clone()));
                if !query.clause(Clause::Group).is_empty() {
                    query.add_group_by(Fragment::column(own.clone()));
                }
                subqueries.push((key.clone(), query));
            }
            count_per_parent(&model, subqueries)
        })?;
        Ok(counted.get(&parent.id().to_key()).copied().unwrap_or(0))
    }

    fn clear_cache(&self) {
        self.entities.clear();
        self.counts.clear();
    }
}
