//! Metadata registry built once at start-up.
//!
//! The registry owns every [`EntityMetadata`] and is handed explicitly to the
//! model, its repositories and the collection helpers. Relationship targets
//! are referenced by entity name and resolved through the registry, so
//! entities may reference each other cyclically.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};

use super::entity::EntityMetadata;
use super::property::PropertyMetadata;
use super::relationship::RelationshipType;

/// Validated entity descriptions.
#[derive(Debug, Default)]
pub struct MetadataRegistry {
    entities: HashMap<String, Arc<EntityMetadata>>,
}

impl MetadataRegistry {
    /// Start building a registry.
    pub fn builder() -> MetadataRegistryBuilder {
        MetadataRegistryBuilder::default()
    }

    /// Look up an entity.
    pub fn get(&self, entity: &str) -> Result<&Arc<EntityMetadata>> {
        self.entities
            .get(entity)
            .ok_or_else(|| Error::invalid_argument(format!("unknown entity '{}'", entity)))
    }

    /// Whether an entity is registered.
    pub fn contains(&self, entity: &str) -> bool {
        self.entities.contains_key(entity)
    }

    /// Registered entity names.
    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    /// Resolve the target entity of a relationship property.
    pub fn target_of(&self, property: &PropertyMetadata) -> Result<&Arc<EntityMetadata>> {
        let relationship = property.relationship.as_ref().ok_or_else(|| {
            Error::invalid_state(format!("property '{}' is not a relationship", property.name))
        })?;
        self.get(&relationship.entity)
    }

    /// Resolve the reverse property of a relationship, if declared.
    pub fn reverse_of(&self, property: &PropertyMetadata) -> Result<Option<Arc<PropertyMetadata>>> {
        let Some(reverse) = property
            .relationship
            .as_ref()
            .and_then(|r| r.reverse.as_deref())
        else {
            return Ok(None);
        };
        let target = self.target_of(property)?;
        Ok(Some(target.property_checked(reverse)?.clone()))
    }
}

/// Builder validating cross references between entities.
#[derive(Debug, Default)]
pub struct MetadataRegistryBuilder {
    entities: Vec<EntityMetadata>,
}

impl MetadataRegistryBuilder {
    /// Register an entity.
    pub fn entity(mut self, entity: EntityMetadata) -> Self {
        self.entities.push(entity);
        self
    }

    /// Validate and build.
    pub fn build(self) -> Result<MetadataRegistry> {
        let mut entities = HashMap::new();
        for mut entity in self.entities {
            entity.primary_key = entity
                .properties()
                .iter()
                .filter(|p| p.is_primary)
                .map(|p| p.name.clone())
                .collect();
            if entity.primary_key.is_empty() {
                return Err(Error::invalid_state(format!(
                    "entity '{}' has no primary key",
                    entity.name
                )));
            }
            if entity.has_composite_key() && entity.get_property("id").is_none() {
                entity.push_property(PropertyMetadata::primary_proxy("id"));
            }
            if entities.contains_key(&entity.name) {
                return Err(Error::invalid_state(format!(
                    "entity '{}' registered twice",
                    entity.name
                )));
            }
            entities.insert(entity.name.clone(), Arc::new(entity));
        }

        let registry = MetadataRegistry { entities };
        for entity in registry.entities.values() {
            for property in entity.properties() {
                validate_relationship(&registry, entity, property)?;
            }
        }
        debug!(entities = registry.entities.len(), "metadata registry built");
        Ok(registry)
    }
}

fn validate_relationship(
    registry: &MetadataRegistry,
    entity: &EntityMetadata,
    property: &PropertyMetadata,
) -> Result<()> {
    let Some(relationship) = &property.relationship else {
        return Ok(());
    };
    let target = registry.get(&relationship.entity).map_err(|_| {
        Error::invalid_state(format!(
            "{}::{} targets unknown entity '{}'",
            entity.name, property.name, relationship.entity
        ))
    })?;

    let Some(reverse_name) = &relationship.reverse else {
        if relationship.kind == RelationshipType::OneHasMany {
            return Err(Error::invalid_state(format!(
                "{}::{} needs a reverse many-has-one property",
                entity.name, property.name
            )));
        }
        return Ok(());
    };

    let reverse = target
        .get_property(reverse_name)
        .and_then(|p| p.relationship.as_ref())
        .ok_or_else(|| {
            Error::invalid_state(format!(
                "{}::{} names reverse '{}::{}' which is not a relationship",
                entity.name, property.name, target.name, reverse_name
            ))
        })?;

    if reverse.entity != entity.name
        || reverse.kind != relationship.kind.reverse()
        || reverse.reverse.as_deref() != Some(property.name.as_str())
    {
        return Err(Error::invalid_state(format!(
            "{}::{} and {}::{} are not symmetric",
            entity.name, property.name, target.name, reverse_name
        )));
    }

    let needs_single_main = matches!(
        relationship.kind,
        RelationshipType::OneHasOne | RelationshipType::ManyHasMany
    );
    if needs_single_main && relationship.is_main == reverse.is_main {
        return Err(Error::invalid_state(format!(
            "exactly one of {}::{} and {}::{} must be the main side",
            entity.name, property.name, target.name, reverse_name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ScalarType;

    fn author() -> EntityMetadata {
        EntityMetadata::new("Author")
            .property(PropertyMetadata::primary_key("id", ScalarType::Int))
            .property(PropertyMetadata::new("name", ScalarType::String))
            .property(PropertyMetadata::one_has_many("books", "Book", "author"))
    }

    fn book() -> EntityMetadata {
        EntityMetadata::new("Book")
            .property(PropertyMetadata::primary_key("id", ScalarType::Int))
            .property(PropertyMetadata::many_has_one("author", "Author", Some("books")))
    }

    #[test]
    fn test_build_resolves_relationships() {
        let registry = MetadataRegistry::builder()
            .entity(author())
            .entity(book())
            .build()
            .unwrap();
        let books = registry.get("Author").unwrap().get_property("books").unwrap().clone();
        assert_eq!(registry.target_of(&books).unwrap().name, "Book");
        let reverse = registry.reverse_of(&books).unwrap().unwrap();
        assert_eq!(reverse.name, "author");
        assert_eq!(registry.get("Book").unwrap().primary_key, vec!["id".to_string()]);
    }

    #[test]
    fn test_unknown_target() {
        let err = MetadataRegistry::builder().entity(author()).build().unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn test_asymmetric_reverse() {
        let book = EntityMetadata::new("Book")
            .property(PropertyMetadata::primary_key("id", ScalarType::Int))
            .property(PropertyMetadata::many_has_one("author", "Author", Some("other")));
        let err = MetadataRegistry::builder()
            .entity(author())
            .entity(book)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn test_composite_key_gets_primary_proxy() {
        let link = EntityMetadata::new("Link")
            .property(PropertyMetadata::primary_key("left", ScalarType::Int))
            .property(PropertyMetadata::primary_key("right", ScalarType::Int));
        let registry = MetadataRegistry::builder().entity(link).build().unwrap();
        let link = registry.get("Link").unwrap();
        assert!(link.has_composite_key());
        assert!(link.get_property("id").unwrap().is_primary_proxy());
        assert_eq!(link.id_property(), "id");
    }

    #[test]
    fn test_many_has_many_needs_one_main_side() {
        let a = EntityMetadata::new("A")
            .property(PropertyMetadata::primary_key("id", ScalarType::Int))
            .property(PropertyMetadata::many_has_many("bs", "B", Some("as_"), true));
        let b = EntityMetadata::new("B")
            .property(PropertyMetadata::primary_key("id", ScalarType::Int))
            .property(PropertyMetadata::many_has_many("as_", "A", Some("bs"), true));
        let err = MetadataRegistry::builder().entity(a).entity(b).build().unwrap_err();
        assert!(err.to_string().contains("main side"));
    }
}
