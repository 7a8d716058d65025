//! Mapping between entities and SQL tables.
//!
//! [`Conventions`] translate property names into columns, [`DbalMapper`] runs
//! the queries of one entity type and the relationship mappers batch-load
//! related entities for every sibling of a fetched entity at once.

mod conventions;
mod coordinator;
mod dbal;
mod relationships;

pub use conventions::Conventions;
pub use coordinator::MapperCoordinator;
pub use dbal::DbalMapper;
pub use relationships::{ManyHasManyMapper, ManyHasOneMapper, OneHasManyMapper, RelationshipMapper};
