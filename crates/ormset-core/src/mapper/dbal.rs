//! SQL mapper of one entity type.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use ormset_proto::Value;
use parking_lot::Mutex;
use tracing::debug;

use crate::dbal::{Fragment, QueryBuilder, Row, SqlArg};
use crate::entity::{EntityRef, PreloadContainer};
use crate::error::{Error, Result};
use crate::metadata::{EntityMetadata, PropertyMetadata, RelationshipType};
use crate::model::Model;
use crate::repository::Repository;

use super::conventions::Conventions;
use super::relationships::{
    ManyHasManyMapper, ManyHasOneMapper, OneHasManyMapper, RelationshipMapper,
};

/// Reads and writes the table of one entity type.
///
/// Relationship mappers are created on first use and kept per property.
pub struct DbalMapper {
    metadata: Arc<EntityMetadata>,
    conventions: Arc<Conventions>,
    model: Weak<Model>,
    repository: Weak<Repository>,
    cache_relationships: bool,
    relationships: Mutex<HashMap<String, Arc<dyn RelationshipMapper>>>,
    many_has_many: Mutex<HashMap<String, Arc<ManyHasManyMapper>>>,
}

impl DbalMapper {
    pub(crate) fn new(
        conventions: Arc<Conventions>,
        model: Weak<Model>,
        repository: Weak<Repository>,
        cache_relationships: bool,
    ) -> Self {
        Self {
            metadata: conventions.metadata().clone(),
            conventions,
            model,
            repository,
            cache_relationships,
            relationships: Mutex::new(HashMap::new()),
            many_has_many: Mutex::new(HashMap::new()),
        }
    }

    pub fn conventions(&self) -> &Arc<Conventions> {
        &self.conventions
    }

    fn model(&self) -> Result<Arc<Model>> {
        self.model
            .upgrade()
            .ok_or_else(|| Error::invalid_state("model has been dropped"))
    }

    fn repository(&self) -> Result<Arc<Repository>> {
        self.repository
            .upgrade()
            .ok_or_else(|| Error::invalid_state("repository has been dropped"))
    }

    /// `SELECT table.* FROM table AS table`.
    pub fn builder(&self) -> QueryBuilder {
        let table = self.conventions.table();
        let mut builder = QueryBuilder::new().from(table, table);
        builder.select(Fragment::column(format!("{}.*", table)));
        builder
    }

    /// Run a query built for this mapper's table.
    pub fn query(&self, builder: &QueryBuilder) -> Result<Vec<Row>> {
        let model = self.model()?;
        let (sql, params) = builder.build(model.platform())?;
        model.connection().query(&sql, &params)
    }

    /// Run a query and hydrate its rows into tracked entities.
    ///
    /// The fetched entities share a preload container.
    pub fn fetch(&self, builder: &QueryBuilder) -> Result<Vec<EntityRef>> {
        let repository = self.repository()?;
        let entities = self
            .query(builder)?
            .iter()
            .map(|row| repository.hydrate(row))
            .collect::<Result<Vec<_>>>()?;
        PreloadContainer::attach(&entities);
        Ok(entities)
    }

    /// Number of rows the query returns.
    ///
    /// Counts `SELECT pk` wrapped in a subquery; ORDER BY is dropped unless
    /// a limit makes it significant.
    pub fn count(&self, builder: &QueryBuilder) -> Result<usize> {
        let model = self.model()?;
        let platform = model.platform();
        let alias = builder.get_from_alias()?.to_string();
        let mut query = builder.clone();
        if !query.has_limit_offset_clause() {
            query.reset_order_by();
        }
        let primary = self
            .conventions
            .storage_primary_key()?
            .into_iter()
            .map(|column| format!("{}.{}", alias, column))
            .collect();
        query.select(Fragment::new("%column[]", vec![SqlArg::Columns(primary)]));

        let (inner, params) = query.build(platform)?;
        let sql = format!(
            "SELECT COUNT(*) AS {} FROM ({}) AS {}",
            platform.quote_identifier("count"),
            inner,
            platform.quote_identifier("temp")
        );
        let rows = model.connection().query(&sql, &params)?;
        let count = rows
            .first()
            .and_then(|row| row.get_index(0))
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::invalid_state("count query returned no rows"))?;
        Ok(count.max(0) as usize)
    }

    /// Mapper loading `property` of this entity type.
    pub fn relationship_mapper(
        &self,
        property: &Arc<PropertyMetadata>,
    ) -> Result<Arc<dyn RelationshipMapper>> {
        if let Some(mapper) = self.relationships.lock().get(&property.name) {
            return Ok(mapper.clone());
        }
        let relationship = property.relationship.as_ref().ok_or_else(|| {
            Error::invalid_argument(format!(
                "property '{}' of entity '{}' is not a relationship",
                property.name, self.metadata.name
            ))
        })?;
        let model = self.model.clone();
        let source = self.metadata.clone();
        let cache = self.cache_relationships;
        let mapper: Arc<dyn RelationshipMapper> = match relationship.kind {
            RelationshipType::ManyHasOne => Arc::new(ManyHasOneMapper::new(
                model,
                source,
                property.clone(),
                cache,
            )?),
            RelationshipType::OneHasOne if relationship.is_main => Arc::new(
                ManyHasOneMapper::new(model, source, property.clone(), cache)?,
            ),
            RelationshipType::OneHasOne | RelationshipType::OneHasMany => Arc::new(
                OneHasManyMapper::new(model, source, property.clone(), cache)?,
            ),
            RelationshipType::ManyHasMany => self.many_has_many_mapper(property)?,
        };
        self.relationships
            .lock()
            .insert(property.name.clone(), mapper.clone());
        Ok(mapper)
    }

    /// Mapper of a many-has-many property, which also writes the join table.
    pub fn many_has_many_mapper(
        &self,
        property: &Arc<PropertyMetadata>,
    ) -> Result<Arc<ManyHasManyMapper>> {
        if property.relationship_type() != Some(RelationshipType::ManyHasMany) {
            return Err(Error::invalid_argument(format!(
                "property '{}' of entity '{}' is not a many-has-many relationship",
                property.name, self.metadata.name
            )));
        }
        let mut mappers = self.many_has_many.lock();
        if let Some(mapper) = mappers.get(&property.name) {
            return Ok(mapper.clone());
        }
        let mapper = Arc::new(ManyHasManyMapper::new(
            self.model.clone(),
            self.metadata.clone(),
            property.clone(),
            self.cache_relationships,
        )?);
        mappers.insert(property.name.clone(), mapper.clone());
        Ok(mapper)
    }

    /// Drop the cached results of every relationship mapper.
    pub fn clear_cache(&self) {
        for mapper in self.relationships.lock().values() {
            mapper.clear_cache();
        }
    }

    /// Equality conditions on the stored primary key of `entity`.
    fn primary_condition(&self, entity: &EntityRef) -> Result<Fragment> {
        let id = entity
            .persisted_id()
            .ok_or_else(|| Error::invalid_state("entity is not stored"))?;
        let parts = match id {
            Value::List(parts) => parts,
            single => vec![single],
        };
        let columns = self.conventions.storage_primary_key()?;
        let conditions = columns
            .into_iter()
            .zip(parts)
            .map(|(column, value)| {
                Fragment::new(
                    "%column = %any",
                    vec![SqlArg::Column(column), SqlArg::Value(value)],
                )
            })
            .collect();
        Ok(Fragment::and(conditions))
    }

    /// INSERT a new entity, reading back a generated primary key.
    pub(crate) fn insert(&self, entity: &EntityRef) -> Result<()> {
        let model = self.model()?;
        let values = entity.values();
        let generated = match self.metadata.primary_key.as_slice() {
            [key] if values.get(key).map_or(true, Value::is_null) => Some(key.clone()),
            _ => None,
        };
        let mut stored: Vec<(String, Value)> = Vec::new();
        for key in self.conventions.stored_keys() {
            if generated.as_ref() == Some(key) {
                continue;
            }
            let value = values.get(key).cloned().unwrap_or(Value::Null);
            stored.push((self.conventions.convert_entity_to_storage_key(key)?.to_string(), value));
        }

        let (columns, params): (Vec<String>, Vec<Value>) = stored.into_iter().unzip();
        let insert = if columns.is_empty() {
            Fragment::new(
                "INSERT INTO %table DEFAULT VALUES",
                vec![SqlArg::Table(self.conventions.table().to_string())],
            )
        } else {
            Fragment::new(
                "INSERT INTO %table (%column[]) VALUES %any[]",
                vec![
                    SqlArg::Table(self.conventions.table().to_string()),
                    SqlArg::Columns(columns),
                    SqlArg::Values(params),
                ],
            )
        };
        let (sql, params) = insert.render(model.platform())?;
        model.coordinator().begin_transaction()?;
        model.connection().execute(&sql, &params)?;

        if let Some(key) = generated {
            let id = model.connection().last_inserted_id(None)?;
            let scalar_type = self.metadata.property_checked(&key)?.scalar_type;
            entity.set_raw(&key, scalar_type.coerce(&id)?);
        }
        debug!(entity = %self.metadata.name, id = %entity.id(), "inserted entity");
        Ok(())
    }

    /// UPDATE the modified columns of a stored entity.
    pub(crate) fn update(&self, entity: &EntityRef) -> Result<()> {
        let values = entity.values();
        let mut assignments = Vec::new();
        let mut args = vec![SqlArg::Table(self.conventions.table().to_string())];
        for key in entity.modified_keys() {
            // Relationship containers and virtual keys are not columns.
            let Ok(column) = self.conventions.convert_entity_to_storage_key(&key) else {
                continue;
            };
            assignments.push("%column = %any");
            args.push(SqlArg::Column(column.to_string()));
            args.push(SqlArg::Value(values.get(&key).cloned().unwrap_or(Value::Null)));
        }
        if assignments.is_empty() {
            return Ok(());
        }
        args.push(SqlArg::Expr(self.primary_condition(entity)?));

        let model = self.model()?;
        let update = Fragment::new(
            format!("UPDATE %table SET {} WHERE %ex", assignments.join(", ")),
            args,
        );
        let (sql, params) = update.render(model.platform())?;
        model.coordinator().begin_transaction()?;
        model.connection().execute(&sql, &params)?;
        debug!(entity = %self.metadata.name, id = %entity.id(), "updated entity");
        Ok(())
    }

    /// DELETE a stored entity.
    pub(crate) fn delete(&self, entity: &EntityRef) -> Result<()> {
        let model = self.model()?;
        let delete = Fragment::new(
            "DELETE FROM %table WHERE %ex",
            vec![
                SqlArg::Table(self.conventions.table().to_string()),
                SqlArg::Expr(self.primary_condition(entity)?),
            ],
        );
        let (sql, params) = delete.render(model.platform())?;
        model.coordinator().begin_transaction()?;
        model.connection().execute(&sql, &params)?;
        debug!(entity = %self.metadata.name, id = %entity.id(), "deleted entity");
        Ok(())
    }
}
