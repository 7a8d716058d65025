//! The model: repositories of every entity over one connection.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::collection::functions::{CollectionFunction, FunctionRegistry};
use crate::collection::CollectionMethod;
use crate::config::OrmConfig;
use crate::dbal::{Connection, Platform};
use crate::entity::EntityRef;
use crate::error::{Error, Result};
use crate::mapper::{Conventions, MapperCoordinator};
use crate::metadata::MetadataRegistry;
use crate::repository::Repository;

/// Entry point of the collection engine.
///
/// Created once from the metadata registry and a connection; owns one
/// [`Repository`] per entity and the transaction shared by their writes.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use ormset_core::{Condition, Model, MetadataRegistry, OrmConfig, SqliteConnection};
/// # fn demo(registry: MetadataRegistry) -> ormset_core::Result<()> {
/// let config = OrmConfig::default();
/// let connection = Arc::new(SqliteConnection::open_in_memory(&config)?);
/// let model = Model::builder(registry, connection).config(config).build()?;
/// let books = model.repository("Book")?.find_by(Condition::property("author->name", "Alice"))?;
/// # let _ = books;
/// # Ok(())
/// # }
/// ```
pub struct Model {
    registry: Arc<MetadataRegistry>,
    functions: FunctionRegistry,
    connection: Arc<dyn Connection>,
    coordinator: MapperCoordinator,
    config: OrmConfig,
    conventions: HashMap<String, Arc<Conventions>>,
    repositories: HashMap<String, Arc<Repository>>,
}

impl Model {
    /// Start building a model.
    pub fn builder(registry: MetadataRegistry, connection: Arc<dyn Connection>) -> ModelBuilder {
        ModelBuilder {
            registry,
            connection,
            config: OrmConfig::default(),
            functions: FunctionRegistry::default(),
            methods: Vec::new(),
        }
    }

    pub fn registry(&self) -> &MetadataRegistry {
        &self.registry
    }

    /// Collection functions available to conditions and orderings.
    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    pub fn config(&self) -> &OrmConfig {
        &self.config
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    pub fn coordinator(&self) -> &MapperCoordinator {
        &self.coordinator
    }

    /// SQL dialect used to render queries.
    pub fn platform(&self) -> Platform {
        self.config
            .platform
            .unwrap_or_else(|| self.connection.platform())
    }

    /// Storage conventions of an entity.
    pub fn conventions(&self, entity: &str) -> Result<Arc<Conventions>> {
        self.conventions
            .get(entity)
            .cloned()
            .ok_or_else(|| Error::invalid_argument(format!("unknown entity '{}'", entity)))
    }

    /// Repository of an entity.
    pub fn repository(&self, entity: &str) -> Result<Arc<Repository>> {
        self.repositories
            .get(entity)
            .cloned()
            .ok_or_else(|| Error::invalid_argument(format!("unknown entity '{}'", entity)))
    }

    pub fn repositories(&self) -> impl Iterator<Item = &Arc<Repository>> {
        self.repositories.values()
    }

    /// Persist an entity through its repository.
    pub fn persist(&self, entity: &EntityRef) -> Result<()> {
        self.repository(&entity.metadata().name)?.persist(entity)
    }

    /// Remove an entity through its repository.
    pub fn remove(&self, entity: &EntityRef) -> Result<()> {
        self.repository(&entity.metadata().name)?.remove(entity)
    }

    /// Commit pending writes. Returns whether anything was committed.
    pub fn flush(&self) -> Result<bool> {
        let committed = self.coordinator.flush()?;
        self.clear_caches();
        if committed {
            info!("flushed pending writes");
        }
        Ok(committed)
    }

    /// Discard pending writes.
    ///
    /// Tracked entities are refreshed from storage the next time a query
    /// returns them.
    pub fn rollback(&self) -> Result<bool> {
        let rolled_back = self.coordinator.rollback();
        self.clear_caches();
        for repository in self.repositories.values() {
            repository.identity_map().mark_for_refresh();
        }
        let rolled_back = rolled_back?;
        if rolled_back {
            info!("rolled back pending writes");
        }
        Ok(rolled_back)
    }

    /// Forget every tracked entity and cached relationship.
    pub fn clear(&self) {
        self.clear_caches();
        for repository in self.repositories.values() {
            repository.identity_map().clear();
        }
        debug!("model cleared");
    }

    /// Drop cached relationship results of every repository.
    pub(crate) fn clear_caches(&self) {
        for repository in self.repositories.values() {
            repository.mapper().clear_cache();
        }
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entities: Vec<_> = self.repositories.keys().collect();
        entities.sort();
        f.debug_struct("Model")
            .field("entities", &entities)
            .field("platform", &self.platform())
            .field("config", &self.config)
            .finish()
    }
}

/// Builder of a [`Model`].
pub struct ModelBuilder {
    registry: MetadataRegistry,
    connection: Arc<dyn Connection>,
    config: OrmConfig,
    functions: FunctionRegistry,
    methods: Vec<(String, String, CollectionMethod)>,
}

impl ModelBuilder {
    pub fn config(mut self, config: OrmConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a collection function, replacing a built-in of the same name.
    pub fn function(mut self, name: impl Into<String>, function: Arc<dyn CollectionFunction>) -> Self {
        self.functions.register(name, function);
        self
    }

    /// Register a named query on an entity's repository and collections.
    pub fn method(
        mut self,
        entity: impl Into<String>,
        name: impl Into<String>,
        method: CollectionMethod,
    ) -> Self {
        self.methods.push((entity.into(), name.into(), method));
        self
    }

    pub fn build(self) -> Result<Arc<Model>> {
        let mut methods: HashMap<String, HashMap<String, CollectionMethod>> = HashMap::new();
        for (entity, name, method) in self.methods {
            if !self.registry.contains(&entity) {
                return Err(Error::invalid_argument(format!(
                    "method '{}' registered on unknown entity '{}'",
                    name, entity
                )));
            }
            methods.entry(entity).or_default().insert(name, method);
        }

        let conventions: HashMap<String, Arc<Conventions>> = self
            .registry
            .entity_names()
            .map(|name| {
                self.registry
                    .get(name)
                    .map(|metadata| (name.to_string(), Arc::new(Conventions::new(metadata.clone()))))
            })
            .collect::<Result<_>>()?;

        let cache_relationships = self.config.cache_relationships;
        let model = Arc::new_cyclic(|model| {
            let repositories = conventions
                .iter()
                .map(|(name, conventions)| {
                    let repository = Repository::new(
                        model.clone(),
                        conventions.clone(),
                        methods.remove(name).unwrap_or_default(),
                        cache_relationships,
                    );
                    (name.clone(), repository)
                })
                .collect();
            Model {
                registry: Arc::new(self.registry),
                functions: self.functions,
                coordinator: MapperCoordinator::new(self.connection.clone()),
                connection: self.connection,
                config: self.config,
                conventions,
                repositories,
            }
        });
        debug!(
            entities = model.repositories.len(),
            platform = ?model.platform(),
            cache_relationships,
            "model built"
        );
        Ok(model)
    }
}
