//! Relationship descriptors attached to entity properties.

use ormset_proto::Direction;

/// Kind of relationship a property describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationshipType {
    /// Many entities point to one target; the foreign key lives on this side.
    ManyHasOne,
    /// One entity points to one target; the main side stores the foreign key.
    OneHasOne,
    /// One entity has many targets holding a foreign key back to it.
    OneHasMany,
    /// Many entities have many targets through a join table owned by the main side.
    ManyHasMany,
}

impl RelationshipType {
    /// Whether the relationship yields a collection.
    pub fn is_to_many(self) -> bool {
        matches!(self, RelationshipType::OneHasMany | RelationshipType::ManyHasMany)
    }

    /// The type the reverse side must have.
    pub fn reverse(self) -> RelationshipType {
        match self {
            RelationshipType::ManyHasOne => RelationshipType::OneHasMany,
            RelationshipType::OneHasMany => RelationshipType::ManyHasOne,
            RelationshipType::OneHasOne => RelationshipType::OneHasOne,
            RelationshipType::ManyHasMany => RelationshipType::ManyHasMany,
        }
    }
}

/// Cascade flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cascade {
    pub persist: bool,
    pub remove: bool,
}

impl Default for Cascade {
    fn default() -> Self {
        Self {
            persist: true,
            remove: false,
        }
    }
}

/// Explicit join table of a many-has-many relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTable {
    pub table: String,
    /// Column referencing the main side entity.
    pub main_column: String,
    /// Column referencing the non-main side entity.
    pub other_column: String,
}

/// Relationship part of a property description.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyRelationshipMetadata {
    pub kind: RelationshipType,
    /// Target entity name, resolved through the registry.
    pub entity: String,
    /// Name of the symmetric property on the target, if any.
    pub reverse: Option<String>,
    /// Whether this side owns the foreign key or the join table rows.
    pub is_main: bool,
    /// Default ordering applied to to-many collections.
    pub order_by: Vec<(String, Direction)>,
    pub cascade: Cascade,
    pub join_table: Option<JoinTable>,
}

impl PropertyRelationshipMetadata {
    pub fn new(kind: RelationshipType, entity: impl Into<String>) -> Self {
        Self {
            kind,
            entity: entity.into(),
            reverse: None,
            is_main: matches!(kind, RelationshipType::ManyHasOne),
            order_by: Vec::new(),
            cascade: Cascade::default(),
            join_table: None,
        }
    }
}
