//! Entity descriptions.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};

use super::property::PropertyMetadata;

/// Description of an entity: primary key and properties.
///
/// Immutable once the registry is built.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityMetadata {
    pub name: String,
    /// Storage table override.
    pub table: Option<String>,
    /// Primary key property names, in key order.
    pub primary_key: Vec<String>,
    properties: Vec<Arc<PropertyMetadata>>,
    index: HashMap<String, usize>,
}

impl EntityMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            primary_key: Vec::new(),
            properties: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Set the storage table.
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Add a property. A later property with the same name replaces the earlier one.
    pub fn property(mut self, property: PropertyMetadata) -> Self {
        self.push_property(property);
        self
    }

    pub(crate) fn push_property(&mut self, property: PropertyMetadata) {
        match self.index.get(&property.name) {
            Some(&i) => self.properties[i] = Arc::new(property),
            None => {
                self.index.insert(property.name.clone(), self.properties.len());
                self.properties.push(Arc::new(property));
            }
        }
    }

    /// All properties in declaration order.
    pub fn properties(&self) -> &[Arc<PropertyMetadata>] {
        &self.properties
    }

    /// Look up a property.
    pub fn get_property(&self, name: &str) -> Option<&Arc<PropertyMetadata>> {
        self.index.get(name).map(|&i| &self.properties[i])
    }

    /// Look up a property, failing for undefined names.
    pub fn property_checked(&self, name: &str) -> Result<&Arc<PropertyMetadata>> {
        self.get_property(name).ok_or_else(|| {
            Error::invalid_argument(format!(
                "undefined property '{}' on entity '{}'",
                name, self.name
            ))
        })
    }

    /// Whether the primary key spans more than one property.
    pub fn has_composite_key(&self) -> bool {
        self.primary_key.len() > 1
    }

    /// Name of the property used by `get_by_id`.
    pub fn id_property(&self) -> &str {
        match self.primary_key.as_slice() {
            [single] => single,
            _ => "id",
        }
    }
}
