//! Lazily materialized collection results.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::entity::EntityRef;
use crate::error::Result;

use super::EntityFetchCallback;

enum Materialized<T> {
    Unevaluated,
    Evaluated(T),
}

impl<T: Clone> Materialized<T> {
    fn get(&self) -> Option<T> {
        match self {
            Materialized::Unevaluated => None,
            Materialized::Evaluated(value) => Some(value.clone()),
        }
    }
}

/// Fetched entities and stored count of one collection value.
///
/// Clones of a collection share the state; mutators derive a fresh one that
/// keeps the subscribers.
pub(crate) struct FetchState {
    entities: Mutex<Materialized<Arc<[EntityRef]>>>,
    stored_count: Mutex<Materialized<usize>>,
    subscribers: Mutex<Vec<EntityFetchCallback>>,
}

impl FetchState {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            entities: Mutex::new(Materialized::Unevaluated),
            stored_count: Mutex::new(Materialized::Unevaluated),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    /// Unevaluated state with the subscribers of `self`.
    pub(crate) fn derive(&self) -> Arc<Self> {
        let state = Self::new();
        *state.subscribers.lock() = self.subscribers.lock().clone();
        state
    }

    /// Materialized entities, loading them on first access.
    ///
    /// Subscribers are notified once, right after the load.
    pub(crate) fn entities(
        &self,
        load: impl FnOnce() -> Result<Vec<EntityRef>>,
    ) -> Result<Arc<[EntityRef]>> {
        let mut entities = self.entities.lock();
        if let Some(loaded) = entities.get() {
            return Ok(loaded);
        }
        let loaded: Arc<[EntityRef]> = load()?.into();
        trace!(entities = loaded.len(), "collection materialized");
        *entities = Materialized::Evaluated(loaded.clone());
        drop(entities);

        let subscribers = self.subscribers.lock().clone();
        for subscriber in subscribers {
            subscriber(&loaded);
        }
        Ok(loaded)
    }

    /// Materialized entities if already loaded.
    pub(crate) fn loaded(&self) -> Option<Arc<[EntityRef]>> {
        self.entities.lock().get()
    }

    /// Stored count, loading it on first access.
    pub(crate) fn stored_count(&self, load: impl FnOnce() -> Result<usize>) -> Result<usize> {
        let mut count = self.stored_count.lock();
        if let Some(count) = count.get() {
            return Ok(count);
        }
        let loaded = load()?;
        *count = Materialized::Evaluated(loaded);
        Ok(loaded)
    }

    /// Register a callback; it runs immediately when entities are already loaded.
    pub(crate) fn subscribe(&self, callback: EntityFetchCallback) {
        self.subscribers.lock().push(callback.clone());
        if let Some(loaded) = self.loaded() {
            callback(&loaded);
        }
    }
}
