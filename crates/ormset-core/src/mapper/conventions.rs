//! Naming conventions between entity properties and storage columns.

use std::collections::HashMap;
use std::sync::Arc;

use ormset_proto::Value;

use crate::error::{Error, Result};
use crate::metadata::{EntityMetadata, PropertyMetadata, RelationshipType, ScalarType};

/// Maps property keys of one entity to storage columns and back.
///
/// Property keys are property names; embeddable properties use
/// `embeddable.property` keys.
#[derive(Debug, Clone)]
pub struct Conventions {
    metadata: Arc<EntityMetadata>,
    table: String,
    to_storage: HashMap<String, String>,
    to_entity: HashMap<String, String>,
    types: HashMap<String, ScalarType>,
    /// Stored keys in declaration order.
    keys: Vec<String>,
}

impl Conventions {
    pub fn new(metadata: Arc<EntityMetadata>) -> Self {
        let table = metadata
            .table
            .clone()
            .unwrap_or_else(|| snake_case(&metadata.name));
        let mut conventions = Self {
            metadata: metadata.clone(),
            table,
            to_storage: HashMap::new(),
            to_entity: HashMap::new(),
            types: HashMap::new(),
            keys: Vec::new(),
        };

        for property in metadata.properties() {
            if let Some(embeddable) = property.embeddable_metadata() {
                for inner in &embeddable.properties {
                    let key = format!("{}.{}", property.name, inner.name);
                    let column = inner.column.clone().unwrap_or_else(|| {
                        format!("{}_{}", snake_case(&property.name), snake_case(&inner.name))
                    });
                    conventions.register(key, column, inner.scalar_type);
                }
                continue;
            }
            if !property.is_stored() {
                continue;
            }
            let column = property.column.clone().unwrap_or_else(|| default_column(property));
            conventions.register(property.name.clone(), column, property.scalar_type);
        }
        conventions
    }

    fn register(&mut self, key: String, column: String, scalar_type: ScalarType) {
        self.types.insert(column.clone(), scalar_type);
        self.to_entity.insert(column.clone(), key.clone());
        self.to_storage.insert(key.clone(), column);
        self.keys.push(key);
    }

    pub fn metadata(&self) -> &Arc<EntityMetadata> {
        &self.metadata
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Column of a stored property key.
    pub fn convert_entity_to_storage_key(&self, key: &str) -> Result<&str> {
        self.to_storage.get(key).map(String::as_str).ok_or_else(|| {
            Error::invalid_argument(format!(
                "property '{}' of entity '{}' is not stored",
                key, self.metadata.name
            ))
        })
    }

    /// Property key of a column, if the column belongs to the entity.
    pub fn convert_storage_to_entity_key(&self, column: &str) -> Option<&str> {
        self.to_entity.get(column).map(String::as_str)
    }

    /// Map property values to column values, skipping keys that are not stored.
    pub fn convert_entity_to_storage<'a>(
        &self,
        values: impl IntoIterator<Item = (&'a String, &'a Value)>,
    ) -> Vec<(String, Value)> {
        values
            .into_iter()
            .filter_map(|(key, value)| {
                self.to_storage
                    .get(key)
                    .map(|column| (column.clone(), value.clone()))
            })
            .collect()
    }

    /// Stored property keys in declaration order.
    pub fn stored_keys(&self) -> &[String] {
        &self.keys
    }

    /// Every stored column in declaration order.
    pub fn storage_columns(&self) -> Vec<&str> {
        self.keys
            .iter()
            .filter_map(|key| self.to_storage.get(key).map(String::as_str))
            .collect()
    }

    /// Primary key columns in key order.
    pub fn storage_primary_key(&self) -> Result<Vec<String>> {
        self.metadata
            .primary_key
            .iter()
            .map(|key| self.convert_entity_to_storage_key(key).map(str::to_string))
            .collect()
    }

    /// Scalar type hint of a column.
    pub fn column_type(&self, column: &str) -> Option<ScalarType> {
        self.types.get(column).copied()
    }

    /// Join table of a many-has-many property declared on this entity.
    pub fn many_has_many_storage_name(
        &self,
        property: &PropertyMetadata,
        target: &Conventions,
    ) -> Result<String> {
        Ok(self.many_has_many_storage(property, target)?.0)
    }

    /// Join table columns as `(referencing this entity, referencing the target)`.
    pub fn many_has_many_storage_keys(
        &self,
        property: &PropertyMetadata,
        target: &Conventions,
    ) -> Result<(String, String)> {
        let (_, own, other) = self.many_has_many_storage(property, target)?;
        Ok((own, other))
    }

    fn many_has_many_storage(
        &self,
        property: &PropertyMetadata,
        target: &Conventions,
    ) -> Result<(String, String, String)> {
        let relationship = property
            .relationship
            .as_ref()
            .filter(|r| r.kind == RelationshipType::ManyHasMany)
            .ok_or_else(|| {
                Error::invalid_state(format!("'{}' is not a many-has-many property", property.name))
            })?;

        let (main, other) = if relationship.is_main {
            (self, target)
        } else {
            (target, self)
        };

        // The main side may declare the join table explicitly; look at both sides.
        let explicit = relationship.join_table.clone().or_else(|| {
            relationship
                .reverse
                .as_deref()
                .and_then(|reverse| target.metadata.get_property(reverse))
                .and_then(|p| p.relationship.as_ref())
                .and_then(|r| r.join_table.clone())
        });

        let (table, main_column, other_column) = match explicit {
            Some(join) => (join.table, join.main_column, join.other_column),
            None => (
                format!("{}_x_{}", main.table, other.table),
                format!("{}_id", snake_case(&main.metadata.name)),
                format!("{}_id", snake_case(&other.metadata.name)),
            ),
        };

        if relationship.is_main {
            Ok((table, main_column, other_column))
        } else {
            Ok((table, other_column, main_column))
        }
    }
}

fn default_column(property: &PropertyMetadata) -> String {
    match property.relationship_type() {
        Some(RelationshipType::ManyHasOne) | Some(RelationshipType::OneHasOne) => {
            format!("{}_id", snake_case(&property.name))
        }
        _ => snake_case(&property.name),
    }
}

/// `publishedAt` and `BookTag` become `published_at` and `book_tag`.
pub(crate) fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::EmbeddableMetadata;

    fn author() -> Arc<EntityMetadata> {
        Arc::new(
            EntityMetadata::new("Author")
                .with_table("authors")
                .property(PropertyMetadata::primary_key("id", ScalarType::Int))
                .property(PropertyMetadata::new("fullName", ScalarType::String))
                .property(PropertyMetadata::new("born", ScalarType::Int).with_column("birth_year"))
                .property(PropertyMetadata::embeddable(
                    "address",
                    EmbeddableMetadata::new("Address")
                        .property(PropertyMetadata::new("city", ScalarType::String)),
                ))
                .property(PropertyMetadata::one_has_many("books", "Book", "author")),
        )
    }

    #[test]
    fn test_snake_case() {
        assert_eq!(snake_case("publishedAt"), "published_at");
        assert_eq!(snake_case("BookTag"), "book_tag");
        assert_eq!(snake_case("id"), "id");
    }

    #[test]
    fn test_columns() {
        let conventions = Conventions::new(author());
        assert_eq!(conventions.table(), "authors");
        assert_eq!(conventions.convert_entity_to_storage_key("fullName").unwrap(), "full_name");
        assert_eq!(conventions.convert_entity_to_storage_key("born").unwrap(), "birth_year");
        assert_eq!(
            conventions.convert_entity_to_storage_key("address.city").unwrap(),
            "address_city"
        );
        assert_eq!(conventions.convert_storage_to_entity_key("birth_year"), Some("born"));
        assert!(conventions.convert_entity_to_storage_key("books").is_err());
        assert_eq!(conventions.storage_primary_key().unwrap(), vec!["id".to_string()]);
        assert_eq!(conventions.column_type("birth_year"), Some(ScalarType::Int));
    }

    #[test]
    fn test_many_has_many_names() {
        let book = Arc::new(
            EntityMetadata::new("Book")
                .with_table("books")
                .property(PropertyMetadata::primary_key("id", ScalarType::Int))
                .property(PropertyMetadata::many_has_many("tags", "Tag", Some("books"), true)),
        );
        let tag = Arc::new(
            EntityMetadata::new("Tag")
                .with_table("tags")
                .property(PropertyMetadata::primary_key("id", ScalarType::Int))
                .property(PropertyMetadata::many_has_many("books", "Book", Some("tags"), false)),
        );
        let books = Conventions::new(book.clone());
        let tags = Conventions::new(tag.clone());

        let tags_property = book.get_property("tags").unwrap();
        assert_eq!(
            books.many_has_many_storage_name(tags_property, &tags).unwrap(),
            "books_x_tags"
        );
        assert_eq!(
            books.many_has_many_storage_keys(tags_property, &tags).unwrap(),
            ("book_id".to_string(), "tag_id".to_string())
        );

        let books_property = tag.get_property("books").unwrap();
        assert_eq!(
            tags.many_has_many_storage_name(books_property, &books).unwrap(),
            "books_x_tags"
        );
        assert_eq!(
            tags.many_has_many_storage_keys(books_property, &books).unwrap(),
            ("tag_id".to_string(), "book_id".to_string())
        );
    }
}
