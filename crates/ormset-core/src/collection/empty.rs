//! Collection that never holds entities.

use std::sync::Arc;

use crate::metadata::EntityMetadata;

use super::state::FetchState;

/// Relationship collection of an entity that is not stored yet.
///
/// Every operation returns another empty collection and no query is run.
#[derive(Clone)]
pub struct EmptyCollection {
    metadata: Arc<EntityMetadata>,
    pub(super) state: Arc<FetchState>,
}

impl EmptyCollection {
    pub fn new(metadata: Arc<EntityMetadata>) -> Self {
        Self {
            metadata,
            state: FetchState::new(),
        }
    }

    pub fn metadata(&self) -> &Arc<EntityMetadata> {
        &self.metadata
    }
}
