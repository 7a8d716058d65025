//! Entity collections.
//!
//! A [`Collection`] is an immutable description of a set of entities:
//! [`Collection::find_by`], [`Collection::order_by`] and
//! [`Collection::limit_by`] return new collections and leave the receiver
//! untouched. Entities are materialized on the first read and cached for the
//! lifetime of the value and its clones.
//!
//! Four backends share the API:
//!
//! - [`ArrayCollection`] evaluates conditions against loaded entities.
//! - [`DbalCollection`] compiles them into SQL.
//! - [`HasManyCollection`] overlays pending relationship edits on storage.
//! - [`EmptyCollection`] holds nothing.
//!
//! Conditions and orderings go through the same [`functions`], so both
//! evaluation strategies agree on the selected entities.

mod array;
mod dbal;
mod empty;
pub mod functions;
mod has_many;
pub mod helpers;
mod state;

use std::fmt;
use std::sync::Arc;

use ormset_proto::{Condition, Direction, FunctionCall, OrderExpr, Value};

use crate::dbal::QueryBuilder;
use crate::entity::EntityRef;
use crate::error::{Error, Result};
use crate::mapper::RelationshipMapper;
use crate::metadata::EntityMetadata;
use crate::model::Model;

pub use array::ArrayCollection;
pub use dbal::DbalCollection;
pub use empty::EmptyCollection;
pub use has_many::HasManyCollection;

use helpers::{normalize, normalize_order, ArrayCollectionHelper, ArrayExpressionResult};
use state::FetchState;

/// Callback run with the entities of each materialization.
pub type EntityFetchCallback = Arc<dyn Fn(&[EntityRef]) + Send + Sync>;

/// Named query registered on a repository, callable on its collections.
pub type CollectionMethod = Arc<dyn Fn(Collection, &[Value]) -> Result<Collection> + Send + Sync>;

/// Result of [`Collection::fetch_pairs`].
#[derive(Debug, Clone)]
pub enum Pairs {
    /// Values of the value path, in collection order.
    Values(Vec<Value>),
    /// Entities keyed by the key path.
    Entities(Vec<(Value, EntityRef)>),
    /// Key path values paired with value path values.
    Map(Vec<(Value, Value)>),
}

/// A lazily evaluated, copy-on-write set of entities.
#[derive(Clone)]
pub enum Collection {
    Array(ArrayCollection),
    Dbal(DbalCollection),
    HasMany(Box<HasManyCollection>),
    Empty(EmptyCollection),
}

impl Collection {
    /// An empty collection of `metadata` entities.
    pub fn empty(metadata: Arc<EntityMetadata>) -> Self {
        Collection::Empty(EmptyCollection::new(metadata))
    }

    pub fn metadata(&self) -> &Arc<EntityMetadata> {
        match self {
            Collection::Array(c) => c.metadata(),
            Collection::Dbal(c) => c.metadata(),
            Collection::HasMany(c) => c.metadata(),
            Collection::Empty(c) => c.metadata(),
        }
    }

    fn model(&self) -> Option<&Arc<Model>> {
        match self {
            Collection::Array(c) => Some(c.model()),
            Collection::Dbal(c) => Some(c.model()),
            Collection::HasMany(c) => Some(c.model()),
            Collection::Empty(_) => None,
        }
    }

    fn state(&self) -> &Arc<FetchState> {
        match self {
            Collection::Array(c) => &c.state,
            Collection::Dbal(c) => &c.state,
            Collection::HasMany(c) => &c.state,
            Collection::Empty(c) => &c.state,
        }
    }

    /// The SQL query of a storage backed collection.
    pub fn query_builder(&self) -> Option<&QueryBuilder> {
        match self {
            Collection::Dbal(c) => Some(c.query_builder()),
            Collection::HasMany(c) => c.storage().query_builder(),
            Collection::Array(_) | Collection::Empty(_) => None,
        }
    }

    /// Entities matching `condition`.
    ///
    /// The condition is parsed and checked here; errors that depend on data
    /// surface on the first read.
    pub fn find_by(&self, condition: impl Into<Condition>) -> Result<Collection> {
        let call = normalize(&condition.into())?;
        if let Some(model) = self.model() {
            model.functions().validate_predicate(&call)?;
        }
        self.apply_filter(&call)
    }

    pub(crate) fn apply_filter(&self, call: &FunctionCall) -> Result<Collection> {
        Ok(match self {
            Collection::Array(c) => Collection::Array(c.find_by(call.clone())),
            Collection::Dbal(c) => Collection::Dbal(c.find_by(call)?),
            Collection::HasMany(c) => Collection::HasMany(Box::new(c.find_by(call)?)),
            Collection::Empty(_) => self.clone(),
        })
    }

    /// Append an ordering key.
    ///
    /// `expr` is a property path or a value producing call such as
    /// `FunctionCall::count("books")`.
    pub fn order_by(&self, expr: impl Into<OrderExpr>, direction: Direction) -> Result<Collection> {
        let call = normalize_order(&expr.into())?;
        if let Some(model) = self.model() {
            model.functions().validate(&call)?;
        }
        self.apply_order(&call, direction)
    }

    /// Append several ordering keys; earlier keys take precedence.
    pub fn order_by_many(
        &self,
        keys: impl IntoIterator<Item = (OrderExpr, Direction)>,
    ) -> Result<Collection> {
        keys.into_iter()
            .try_fold(self.clone(), |collection, (expr, direction)| {
                collection.order_by(expr, direction)
            })
    }

    pub(crate) fn apply_order(&self, call: &FunctionCall, direction: Direction) -> Result<Collection> {
        Ok(match self {
            Collection::Array(c) => Collection::Array(c.order_by(call.clone(), direction)),
            Collection::Dbal(c) => Collection::Dbal(c.order_by(call, direction)?),
            Collection::HasMany(c) => {
                Collection::HasMany(Box::new(c.order_by(call.clone(), direction)?))
            }
            Collection::Empty(_) => self.clone(),
        })
    }

    /// Drop every ordering key.
    pub fn reset_order_by(&self) -> Collection {
        match self {
            Collection::Array(c) => Collection::Array(c.reset_order_by()),
            Collection::Dbal(c) => Collection::Dbal(c.reset_order_by()),
            Collection::HasMany(c) => Collection::HasMany(Box::new(c.reset_order_by())),
            Collection::Empty(_) => self.clone(),
        }
    }

    /// Keep at most `limit` entities after skipping `offset`.
    pub fn limit_by(&self, limit: usize, offset: Option<usize>) -> Collection {
        match self {
            Collection::Array(c) => Collection::Array(c.limit_by(limit, offset)),
            Collection::Dbal(c) => Collection::Dbal(c.limit_by(limit, offset)),
            Collection::HasMany(c) => Collection::HasMany(Box::new(c.limit_by(limit, offset))),
            Collection::Empty(_) => self.clone(),
        }
    }

    /// Read the collection through a relationship of `parent`.
    ///
    /// Only storage backed collections can be bound; the mapper batches the
    /// query over the siblings of `parent`.
    pub fn with_relationship(
        &self,
        mapper: Arc<dyn RelationshipMapper>,
        parent: EntityRef,
    ) -> Result<Collection> {
        match self {
            Collection::Dbal(c) => Ok(Collection::Dbal(c.with_relationship(mapper, &parent))),
            Collection::Empty(_) => Ok(self.clone()),
            Collection::Array(_) | Collection::HasMany(_) => Err(Error::not_supported(format!(
                "only storage collections of '{}' can be read through a relationship",
                self.metadata().name
            ))),
        }
    }

    fn entities(&self) -> Result<Arc<[EntityRef]>> {
        match self {
            Collection::Array(c) => c.entities(),
            Collection::Dbal(c) => c.entities(),
            Collection::HasMany(c) => c.entities(),
            Collection::Empty(c) => c.state.entities(|| Ok(Vec::new())),
        }
    }

    /// All entities.
    pub fn fetch_all(&self) -> Result<Vec<EntityRef>> {
        Ok(self.entities()?.to_vec())
    }

    /// The first entity.
    pub fn fetch(&self) -> Result<Option<EntityRef>> {
        Ok(self.entities()?.first().cloned())
    }

    /// Number of entities, materializing them.
    pub fn count(&self) -> Result<usize> {
        Ok(self.entities()?.len())
    }

    /// Number of entities as counted by storage, without materializing them.
    pub fn count_stored(&self) -> Result<usize> {
        match self {
            Collection::Dbal(c) => c.count_stored(),
            Collection::HasMany(c) => c.count_stored(),
            Collection::Array(_) | Collection::Empty(_) => {
                self.state().stored_count(|| self.count())
            }
        }
    }

    /// Key/value pairs read from every entity.
    ///
    /// With only `value`, returns the values; with only `key`, the entities
    /// keyed by it; with both, key/value pairs.
    pub fn fetch_pairs(&self, key: Option<&str>, value: Option<&str>) -> Result<Pairs> {
        if key.is_none() && value.is_none() {
            return Err(Error::invalid_argument(
                "fetch_pairs needs a key path, a value path or both",
            ));
        }
        let entities = self.entities()?;
        let Some(model) = self.model() else {
            return Ok(match (key, value) {
                (None, _) => Pairs::Values(Vec::new()),
                (_, None) => Pairs::Entities(Vec::new()),
                _ => Pairs::Map(Vec::new()),
            });
        };
        let helper = ArrayCollectionHelper::new(model, self.metadata());
        let read = |entity: &EntityRef, path: &str| -> Result<Value> {
            match helper.get_value(entity, path, None)? {
                ArrayExpressionResult::Single { value, .. } => Ok(value),
                ArrayExpressionResult::Multi { .. } => Err(Error::invalid_argument(format!(
                    "fetch_pairs path '{}' reaches more than one value",
                    path
                ))),
            }
        };

        Ok(match (key, value) {
            (None, Some(value)) => Pairs::Values(
                entities
                    .iter()
                    .map(|e| read(e, value))
                    .collect::<Result<_>>()?,
            ),
            (Some(key), None) => Pairs::Entities(
                entities
                    .iter()
                    .map(|e| Ok((read(e, key)?, e.clone())))
                    .collect::<Result<_>>()?,
            ),
            (Some(key), Some(value)) => Pairs::Map(
                entities
                    .iter()
                    .map(|e| Ok((read(e, key)?, read(e, value)?)))
                    .collect::<Result<_>>()?,
            ),
            (None, None) => Pairs::Values(Vec::new()),
        })
    }

    /// First entity matching `condition`.
    pub fn get_by(&self, condition: impl Into<Condition>) -> Result<Option<EntityRef>> {
        self.find_by(condition)?.limit_by(1, None).fetch()
    }

    /// First entity matching `condition`, failing with `NoResult` when none does.
    pub fn get_by_checked(&self, condition: impl Into<Condition>) -> Result<EntityRef> {
        let condition = condition.into();
        self.get_by(condition.clone())?.ok_or_else(|| {
            Error::NoResult(format!(
                "no {} entity matches {:?}",
                self.metadata().name,
                condition
            ))
        })
    }

    /// Entity with primary key `id`; composite keys are passed as a list.
    pub fn get_by_id(&self, id: impl Into<Value>) -> Result<Option<EntityRef>> {
        let id_property = self.metadata().id_property().to_string();
        self.get_by(Condition::property(id_property, id.into()))
    }

    /// Entity with primary key `id`, failing with `NoResult` when missing.
    pub fn get_by_id_checked(&self, id: impl Into<Value>) -> Result<EntityRef> {
        let id = id.into();
        self.get_by_id(id.clone())?.ok_or_else(|| {
            Error::NoResult(format!("{} with id {} not found", self.metadata().name, id))
        })
    }

    /// Run `callback` with the entities of each materialization.
    pub fn subscribe_on_entity_fetch(&self, callback: EntityFetchCallback) {
        self.state().subscribe(callback);
    }

    /// Call a named query registered on the repository.
    pub fn call(&self, method: &str, args: &[Value]) -> Result<Collection> {
        let registered = match self.model() {
            Some(model) => model.repository(&self.metadata().name)?.method(method),
            None => None,
        };
        match registered {
            Some(method) => method(self.clone(), args),
            None => Err(Error::MemberAccess {
                target: format!("collection of {}", self.metadata().name),
                method: method.to_string(),
            }),
        }
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Collection::Array(_) => "array",
            Collection::Dbal(_) => "dbal",
            Collection::HasMany(_) => "has_many",
            Collection::Empty(_) => "empty",
        };
        f.debug_struct("Collection")
            .field("kind", &kind)
            .field("entity", &self.metadata().name)
            .finish()
    }
}
