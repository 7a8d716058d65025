//! Property descriptions.

use std::sync::Arc;

use ormset_proto::Direction;

use super::relationship::{Cascade, JoinTable, PropertyRelationshipMetadata, RelationshipType};
use super::types::ScalarType;

/// Value object wrapping of a property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyWrapper {
    /// Embedded value object flattened into the owner's columns.
    Embeddable(Arc<EmbeddableMetadata>),
    /// Virtual `id` standing for a composite primary key.
    PrimaryProxy,
}

/// Description of one entity property.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyMetadata {
    pub name: String,
    pub scalar_type: ScalarType,
    pub nullable: bool,
    pub is_primary: bool,
    /// Computed, not stored.
    pub is_virtual: bool,
    pub relationship: Option<PropertyRelationshipMetadata>,
    pub wrapper: Option<PropertyWrapper>,
    /// Storage column override.
    pub column: Option<String>,
}

impl PropertyMetadata {
    /// Create a stored, non-nullable scalar property.
    pub fn new(name: impl Into<String>, scalar_type: ScalarType) -> Self {
        Self {
            name: name.into(),
            scalar_type,
            nullable: false,
            is_primary: false,
            is_virtual: false,
            relationship: None,
            wrapper: None,
            column: None,
        }
    }

    /// Create a primary key property.
    pub fn primary_key(name: impl Into<String>, scalar_type: ScalarType) -> Self {
        Self::new(name, scalar_type).primary()
    }

    /// Create an embeddable property.
    pub fn embeddable(name: impl Into<String>, embeddable: EmbeddableMetadata) -> Self {
        let mut property = Self::new(name, ScalarType::String);
        property.wrapper = Some(PropertyWrapper::Embeddable(Arc::new(embeddable)));
        property
    }

    /// Create a many-has-one relationship holding the foreign key.
    pub fn many_has_one(
        name: impl Into<String>,
        entity: impl Into<String>,
        reverse: Option<&str>,
    ) -> Self {
        Self::relationship(name, RelationshipType::ManyHasOne, entity, reverse)
    }

    /// Create a one-has-many relationship; `reverse` names the many-has-one side.
    pub fn one_has_many(
        name: impl Into<String>,
        entity: impl Into<String>,
        reverse: &str,
    ) -> Self {
        Self::relationship(name, RelationshipType::OneHasMany, entity, Some(reverse))
    }

    /// Create a one-has-one relationship.
    pub fn one_has_one(
        name: impl Into<String>,
        entity: impl Into<String>,
        reverse: Option<&str>,
        is_main: bool,
    ) -> Self {
        Self::relationship(name, RelationshipType::OneHasOne, entity, reverse).main(is_main)
    }

    /// Create a many-has-many relationship.
    pub fn many_has_many(
        name: impl Into<String>,
        entity: impl Into<String>,
        reverse: Option<&str>,
        is_main: bool,
    ) -> Self {
        Self::relationship(name, RelationshipType::ManyHasMany, entity, reverse).main(is_main)
    }

    fn relationship(
        name: impl Into<String>,
        kind: RelationshipType,
        entity: impl Into<String>,
        reverse: Option<&str>,
    ) -> Self {
        let mut relationship = PropertyRelationshipMetadata::new(kind, entity);
        relationship.reverse = reverse.map(str::to_string);
        let mut property = Self::new(name, ScalarType::Int);
        property.nullable = kind != RelationshipType::ManyHasOne;
        property.is_virtual = kind.is_to_many();
        property.relationship = Some(relationship);
        property
    }

    /// Mark as part of the primary key.
    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self.nullable = false;
        self
    }

    /// Allow NULL values.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Mark as computed and not stored.
    pub fn computed(mut self) -> Self {
        self.is_virtual = true;
        self
    }

    /// Override the storage column.
    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    /// Override the scalar type (foreign keys default to integers).
    pub fn with_type(mut self, scalar_type: ScalarType) -> Self {
        self.scalar_type = scalar_type;
        self
    }

    /// Add a default ordering for to-many relationship collections.
    pub fn with_order_by(mut self, property: impl Into<String>, direction: Direction) -> Self {
        if let Some(relationship) = self.relationship.as_mut() {
            relationship.order_by.push((property.into(), direction));
        }
        self
    }

    /// Set cascade flags.
    pub fn with_cascade(mut self, cascade: Cascade) -> Self {
        if let Some(relationship) = self.relationship.as_mut() {
            relationship.cascade = cascade;
        }
        self
    }

    /// Set an explicit many-has-many join table.
    pub fn with_join_table(
        mut self,
        table: impl Into<String>,
        main_column: impl Into<String>,
        other_column: impl Into<String>,
    ) -> Self {
        if let Some(relationship) = self.relationship.as_mut() {
            relationship.join_table = Some(JoinTable {
                table: table.into(),
                main_column: main_column.into(),
                other_column: other_column.into(),
            });
        }
        self
    }

    fn main(mut self, is_main: bool) -> Self {
        if let Some(relationship) = self.relationship.as_mut() {
            relationship.is_main = is_main;
        }
        // Only the main side of a one-has-one stores a column.
        if self
            .relationship
            .as_ref()
            .is_some_and(|r| r.kind == RelationshipType::OneHasOne)
        {
            self.is_virtual = !is_main;
        }
        self
    }

    pub(crate) fn primary_proxy(name: impl Into<String>) -> Self {
        let mut property = Self::new(name, ScalarType::Int);
        property.is_virtual = true;
        property.wrapper = Some(PropertyWrapper::PrimaryProxy);
        property
    }

    /// The embeddable description when this property wraps a value object.
    pub fn embeddable_metadata(&self) -> Option<&Arc<EmbeddableMetadata>> {
        match &self.wrapper {
            Some(PropertyWrapper::Embeddable(e)) => Some(e),
            _ => None,
        }
    }

    pub fn is_primary_proxy(&self) -> bool {
        matches!(self.wrapper, Some(PropertyWrapper::PrimaryProxy))
    }

    /// Whether the property stores a value in its own column.
    pub fn is_stored(&self) -> bool {
        !self.is_virtual && self.embeddable_metadata().is_none()
    }

    /// Relationship kind, if this is a relationship property.
    pub fn relationship_type(&self) -> Option<RelationshipType> {
        self.relationship.as_ref().map(|r| r.kind)
    }
}

/// Description of an embeddable value object.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddableMetadata {
    pub name: String,
    pub properties: Vec<Arc<PropertyMetadata>>,
}

impl EmbeddableMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
        }
    }

    /// Add a property.
    pub fn property(mut self, property: PropertyMetadata) -> Self {
        self.properties.push(Arc::new(property));
        self
    }

    /// Look up a property by name.
    pub fn get_property(&self, name: &str) -> Option<&Arc<PropertyMetadata>> {
        self.properties.iter().find(|p| p.name == name)
    }
}
