//! Batched relationship loading.
//!
//! A relationship mapper loads one relationship of one entity, but the query
//! it runs covers every sibling of that entity: the entities materialized by
//! the same collection read (see [`PreloadContainer`]). Results are grouped by
//! parent and cached, so reading the relationship of the other siblings hits
//! the cache instead of storage.
//!
//! Without LIMIT/OFFSET on the target query a single `IN (...)` query does
//! (one pass). A limit has to apply per parent, so the mapper first selects
//! the target keys per parent, composed with UNION ALL where the platform
//! allows it, then loads the rows for all keys at once (two passes).
//!
//! [`PreloadContainer`]: crate::entity::PreloadContainer

mod many_has_many;
mod many_has_one;
mod one_has_many;

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use ormset_proto::Value;
use parking_lot::Mutex;
use tracing::trace;

use crate::dbal::{Fragment, QueryBuilder, Row, SqlArg};
use crate::entity::{siblings, EntityRef};
use crate::error::{Error, Result};
use crate::mapper::Conventions;
use crate::metadata::{EntityMetadata, PropertyMetadata};
use crate::model::Model;
use crate::repository::Repository;

pub use many_has_many::ManyHasManyMapper;
pub use many_has_one::ManyHasOneMapper;
pub use one_has_many::OneHasManyMapper;

/// Column alias of the parent key in batch queries.
pub(crate) const PARENT_KEY: &str = "parent_key";
/// Column alias of the target key in first pass queries.
pub(crate) const TARGET_KEY: &str = "target_key";
const COUNT: &str = "count";

/// Loads one relationship property for a parent entity.
pub trait RelationshipMapper: Send + Sync {
    /// The relationship property on the parent side.
    fn property(&self) -> &Arc<PropertyMetadata>;

    /// Entities related to `parent`, restricted by the target query `builder`.
    fn fetch(&self, builder: &QueryBuilder, parent: &EntityRef) -> Result<Vec<EntityRef>>;

    /// Number of entities related to `parent` in storage.
    fn count(&self, builder: &QueryBuilder, parent: &EntityRef) -> Result<usize>;

    /// Forget cached results.
    fn clear_cache(&self);
}

/// State shared by every relationship mapper kind.
pub(crate) struct MapperContext {
    model: Weak<Model>,
    source: Arc<EntityMetadata>,
    property: Arc<PropertyMetadata>,
    target: String,
}

impl MapperContext {
    pub(crate) fn new(
        model: Weak<Model>,
        source: Arc<EntityMetadata>,
        property: Arc<PropertyMetadata>,
    ) -> Result<Self> {
        let target = property
            .relationship
            .as_ref()
            .map(|r| r.entity.clone())
            .ok_or_else(|| {
                Error::invalid_state(format!(
                    "{}::{} is not a relationship",
                    source.name, property.name
                ))
            })?;
        Ok(Self {
            model,
            source,
            property,
            target,
        })
    }

    fn model(&self) -> Result<Arc<Model>> {
        self.model
            .upgrade()
            .ok_or_else(|| Error::invalid_state("model has been dropped"))
    }

    fn target(&self, model: &Model) -> Result<Arc<Repository>> {
        model.repository(&self.target)
    }

    fn name(&self) -> String {
        format!("{}::{}", self.source.name, self.property.name)
    }

    /// Reverse property name, required by mappers reading the target's key.
    fn reverse(&self) -> Result<&str> {
        self.property
            .relationship
            .as_ref()
            .and_then(|r| r.reverse.as_deref())
            .ok_or_else(|| {
                Error::invalid_state(format!("{} needs a reverse property", self.name()))
            })
    }

    /// Primary keys of the persisted siblings of `parent`.
    fn sibling_ids(&self, parent: &EntityRef) -> Result<Vec<Value>> {
        if self.source.has_composite_key() {
            return Err(Error::not_supported(format!(
                "loading {} for a composite primary key",
                self.name()
            )));
        }
        Ok(distinct(
            siblings(parent)
                .into_iter()
                .filter(|e| e.is_persisted())
                .map(|e| e.id()),
        ))
    }
}

/// Results grouped by parent key, cached per query.
pub(crate) struct ResultCache<T> {
    enabled: bool,
    entries: Mutex<HashMap<String, Arc<HashMap<String, T>>>>,
}

impl<T> ResultCache<T> {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            enabled,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn get_or_load(
        &self,
        key: String,
        load: impl FnOnce() -> Result<HashMap<String, T>>,
    ) -> Result<Arc<HashMap<String, T>>> {
        if self.enabled {
            if let Some(hit) = self.entries.lock().get(&key) {
                trace!(key = %key, "relationship cache hit");
                return Ok(hit.clone());
            }
        }
        let loaded = Arc::new(load()?);
        if self.enabled {
            self.entries.lock().insert(key, loaded.clone());
        }
        Ok(loaded)
    }

    pub(crate) fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// Digest of a target query and the parent keys it is batched over.
fn cache_key(model: &Model, kind: &str, builder: &QueryBuilder, keys: &[Value]) -> Result<String> {
    let (sql, params) = builder.build(model.platform())?;
    let mut hasher = blake3::Hasher::new();
    hasher.update(kind.as_bytes());
    hasher.update(sql.as_bytes());
    hasher.update(format!("{:?}", params).as_bytes());
    for key in keys {
        hasher.update(b"\0");
        hasher.update(key.to_key().as_bytes());
    }
    Ok(hex::encode(hasher.finalize().as_bytes()))
}

/// Values without nulls and duplicates, in first seen order.
fn distinct(values: impl IntoIterator<Item = Value>) -> Vec<Value> {
    let mut seen = std::collections::HashSet::new();
    values
        .into_iter()
        .filter(|v| !v.is_null() && seen.insert(v.to_key()))
        .collect()
}

/// The single primary key column of an entity.
fn primary_column(conventions: &Conventions) -> Result<String> {
    let mut key = conventions.storage_primary_key()?;
    if key.len() != 1 {
        return Err(Error::not_supported(format!(
            "relationships to the composite primary key of '{}'",
            conventions.metadata().name
        )));
    }
    Ok(key.remove(0))
}

fn qualified(alias: &str, column: &str) -> String {
    format!("{}.{}", alias, column)
}

/// `column AS alias` select item.
fn select_as(column: String, alias: &str) -> Fragment {
    Fragment::new(
        "%column AS %column",
        vec![SqlArg::Column(column), SqlArg::Column(alias.to_string())],
    )
}

fn column_in(column: String, values: Vec<Value>) -> Fragment {
    Fragment::new(
        "%column IN %any[]",
        vec![SqlArg::Column(column), SqlArg::Values(values)],
    )
}

fn column_equals(column: String, value: Value) -> Fragment {
    Fragment::new(
        "%column = %any",
        vec![SqlArg::Column(column), SqlArg::Value(value)],
    )
}

/// Run one limited query per parent, as one UNION ALL query when possible.
fn query_per_parent(model: &Model, builders: Vec<QueryBuilder>) -> Result<Vec<Row>> {
    let platform = model.platform();
    let connection = model.connection();
    if !platform.supports_union_with_limit() {
        let mut rows = Vec::new();
        for builder in builders {
            let (sql, params) = builder.build(platform)?;
            rows.extend(connection.query(&sql, &params)?);
        }
        return Ok(rows);
    }
    let mut params = Vec::new();
    let mut parts = Vec::with_capacity(builders.len());
    for builder in builders {
        let mut part = String::new();
        builder.build_into(platform, &mut part, &mut params)?;
        parts.push(part);
    }
    if parts.is_empty() {
        return Ok(Vec::new());
    }
    connection.query(&platform.union_all(&parts), &params)
}

/// Count rows of one subquery per parent in a single statement.
fn count_per_parent(
    model: &Model,
    subqueries: Vec<(Value, QueryBuilder)>,
) -> Result<HashMap<String, usize>> {
    if subqueries.is_empty() {
        return Ok(HashMap::new());
    }
    let platform = model.platform();
    let mut params = Vec::new();
    let mut parts = Vec::with_capacity(subqueries.len());
    for (key, subquery) in subqueries {
        params.push(key);
        let mut part = format!(
            "SELECT {} AS {}, COUNT(*) AS {} FROM (",
            platform.placeholder(params.len()),
            platform.quote_identifier(PARENT_KEY),
            platform.quote_identifier(COUNT)
        );
        subquery.build_into(platform, &mut part, &mut params)?;
        part.push_str(&format!(") AS {}", platform.quote_identifier("temp")));
        parts.push(part);
    }
    let rows = model
        .connection()
        .query(&parts.join(" UNION ALL "), &params)?;
    counts(&rows)
}

/// Read `(parent_key, count)` rows.
fn counts(rows: &[Row]) -> Result<HashMap<String, usize>> {
    rows.iter()
        .map(|row| {
            let parent = row.get(PARENT_KEY).cloned().unwrap_or(Value::Null);
            let count = row.get(COUNT).and_then(Value::as_i64).ok_or_else(|| {
                Error::invalid_state("relationship count query returned no count")
            })?;
            Ok((parent.to_key(), count.max(0) as usize))
        })
        .collect()
}

/// `(parent key, target key)` pairs of first pass rows.
fn key_pairs(rows: &[Row]) -> Vec<(String, Value)> {
    rows.iter()
        .filter_map(|row| {
            let parent = row.get(PARENT_KEY)?;
            let target = row.get(TARGET_KEY)?;
            Some((parent.to_key(), target.clone()))
        })
        .collect()
}

/// Second pass: load the rows of the keys found by the first pass and group
/// them by parent in first pass order.
fn load_pairs(
    target: &Repository,
    builder: &QueryBuilder,
    primary: String,
    pairs: Vec<(String, Value)>,
) -> Result<HashMap<String, Vec<EntityRef>>> {
    let ids = distinct(pairs.iter().map(|(_, id)| id.clone()));
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let mut second = builder.clone();
    second.limit_by(None, None);
    second.and_where(column_in(primary, ids));
    let by_id: HashMap<String, EntityRef> = target
        .mapper()
        .fetch(&second)?
        .into_iter()
        .map(|e| (e.id().to_key(), e))
        .collect();

    let mut grouped: HashMap<String, Vec<EntityRef>> = HashMap::new();
    for (parent, id) in pairs {
        if let Some(entity) = by_id.get(&id.to_key()) {
            grouped.entry(parent).or_default().push(entity.clone());
        }
    }
    Ok(grouped)
}

/// Check the builder allows a per parent limit.
fn check_two_pass(context: &MapperContext, builder: &QueryBuilder) -> Result<()> {
    use crate::dbal::Clause;
    if !builder.clause(Clause::Group).is_empty() && !builder.clause(Clause::Order).is_empty() {
        return Err(Error::not_supported(format!(
            "loading {} with LIMIT over a grouped and ordered query",
            context.name()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distinct_keeps_order() {
        let values = vec![
            Value::Int(2),
            Value::Null,
            Value::Int(1),
            Value::Int(2),
            Value::from("2"),
        ];
        assert_eq!(distinct(values), vec![Value::Int(2), Value::Int(1)]);
    }

    #[test]
    fn test_cache_disabled() {
        let cache: ResultCache<usize> = ResultCache::new(false);
        let mut loads = 0;
        for _ in 0..2 {
            cache
                .get_or_load("k".into(), || {
                    loads += 1;
                    Ok(HashMap::new())
                })
                .unwrap();
        }
        assert_eq!(loads, 2);
    }

    #[test]
    fn test_cache_clear() {
        let cache: ResultCache<usize> = ResultCache::new(true);
        let load = || Ok(HashMap::from([("1".to_string(), 3)]));
        let first = cache.get_or_load("k".into(), load).unwrap();
        let second = cache
            .get_or_load("k".into(), || Ok(HashMap::new()))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        cache.clear();
        let third = cache
            .get_or_load("k".into(), || Ok(HashMap::new()))
            .unwrap();
        assert!(third.is_empty());
    }

    #[test]
    fn test_counts() {
        let columns: Arc<[String]> = vec![PARENT_KEY.to_string(), COUNT.to_string()].into();
        let rows = vec![
            Row::new(columns.clone(), vec![Value::Int(1), Value::Int(2)]),
            Row::new(columns, vec![Value::Int(2), Value::Int(0)]),
        ];
        let counts = counts(&rows).unwrap();
        assert_eq!(counts.get("1"), Some(&2));
        assert_eq!(counts.get("2"), Some(&0));
    }
}
