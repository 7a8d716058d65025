//! ormset core - entity collections over SQL storage.
//!
//! This crate maps entities described by a [`MetadataRegistry`] to SQL tables
//! and exposes them through lazy, copy-on-write [`Collection`]s. Conditions
//! and orderings are evaluated either in memory or compiled into SQL, with the
//! same semantics for both. Relationships are loaded in batches for every
//! entity fetched by the same query.

pub mod collection;
pub mod config;
pub mod dbal;
pub mod entity;
pub mod error;
pub mod mapper;
pub mod metadata;
pub mod model;
pub mod repository;

pub use collection::functions::{CollectionFunction, FunctionRegistry};
pub use collection::{
    ArrayCollection, Collection, CollectionMethod, DbalCollection, EmptyCollection,
    EntityFetchCallback, HasManyCollection, Pairs,
};
pub use config::OrmConfig;
pub use dbal::{Connection, Fragment, Platform, QueryBuilder, Row, SqlArg, SqliteConnection};
pub use entity::{Entity, EntityRef, HasMany, HasOne, IdentityLookup, IdentityMap, PreloadContainer};
pub use error::{Error, Result};
pub use mapper::{Conventions, DbalMapper, MapperCoordinator, RelationshipMapper};
pub use metadata::{
    Cascade, EmbeddableMetadata, EntityMetadata, JoinTable, MetadataRegistry, PropertyMetadata,
    PropertyRelationshipMetadata, RelationshipType, ScalarType,
};
pub use model::{Model, ModelBuilder};
pub use repository::Repository;

/// Re-export IR types.
pub use ormset_proto as proto;
pub use ormset_proto::{Aggregator, Condition, Direction, FunctionCall, LikeExpression, OrderExpr, Value, AND, OR};
