//! Entity metadata: the fixed data model consumed by the collection engine.

mod entity;
mod property;
mod registry;
mod relationship;
mod types;

pub use entity::EntityMetadata;
pub use property::{EmbeddableMetadata, PropertyMetadata, PropertyWrapper};
pub use registry::{MetadataRegistry, MetadataRegistryBuilder};
pub use relationship::{Cascade, JoinTable, PropertyRelationshipMetadata, RelationshipType};
pub use types::ScalarType;
