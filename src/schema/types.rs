//! Entity type metadata
//!
//! Supported property types:
//! - string: UTF-8 string (Edm.String)
//! - int: 64-bit signed integer (Edm.Int32/Int64)
//! - double: 64-bit floating point (Edm.Double)
//! - boolean: Boolean (Edm.Boolean)

use std::collections::HashSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Declared property types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PropertyType {
    String,
    Int,
    Double,
    Boolean,
}

impl PropertyType {
    /// Returns the type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyType::String => "string",
            PropertyType::Int => "int",
            PropertyType::Double => "double",
            PropertyType::Boolean => "boolean",
        }
    }
}

/// Declared property of an entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDef {
    #[serde(flatten)]
    pub property_type: PropertyType,
    /// Whether the property may be null or omitted (default: true)
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl PropertyDef {
    pub fn nullable(property_type: PropertyType) -> Self {
        Self {
            property_type,
            nullable: true,
        }
    }

    pub fn required(property_type: PropertyType) -> Self {
        Self {
            property_type,
            nullable: false,
        }
    }
}

/// Navigation from one entity type to the entity set `target`
///
/// Names start with an underscore, e.g. `_Supplier`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationProperty {
    pub name: String,
    pub target: String,
}

/// One entity type. Its entity set carries the same name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityType {
    pub name: String,
    /// Stable identifier used for natural keys (`{id}:{__id}`)
    pub id: String,
    #[serde(default)]
    pub properties: IndexMap<String, PropertyDef>,
    #[serde(default)]
    pub navigation_properties: Vec<NavigationProperty>,
    /// Accept undeclared (dynamic) properties (default: true)
    #[serde(default = "default_open")]
    pub open: bool,
}

fn default_open() -> bool {
    true
}

impl EntityType {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            properties: IndexMap::new(),
            navigation_properties: Vec::new(),
            open: true,
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, def: PropertyDef) -> Self {
        self.properties.insert(name.into(), def);
        self
    }

    /// Add `_{target}` navigating to entity set `target`
    pub fn with_navigation(mut self, target: impl Into<String>) -> Self {
        let target = target.into();
        self.navigation_properties.push(NavigationProperty {
            name: format!("_{}", target),
            target,
        });
        self
    }

    pub fn closed(mut self) -> Self {
        self.open = false;
        self
    }

    /// Find a navigation property by its underscore-prefixed name
    pub fn navigation(&self, name: &str) -> Option<&NavigationProperty> {
        self.navigation_properties.iter().find(|np| np.name == name)
    }
}

/// All entity types of a collection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ODataSchema {
    #[serde(default)]
    pub entity_types: Vec<EntityType>,
}

impl ODataSchema {
    pub fn new(entity_types: Vec<EntityType>) -> Self {
        Self { entity_types }
    }

    pub fn find(&self, entity_set: &str) -> Option<&EntityType> {
        self.entity_types.iter().find(|t| t.name == entity_set)
    }

    /// Validates the metadata itself (not a document)
    pub fn validate_structure(&self) -> Result<(), String> {
        let mut names = HashSet::new();
        let mut ids = HashSet::new();

        for entity_type in &self.entity_types {
            if entity_type.name.is_empty() || entity_type.id.is_empty() {
                return Err("entity type name and id must not be empty".into());
            }
            if !names.insert(entity_type.name.as_str()) {
                return Err(format!("duplicate entity type '{}'", entity_type.name));
            }
            if !ids.insert(entity_type.id.as_str()) {
                return Err(format!("duplicate entity type id '{}'", entity_type.id));
            }
        }

        for entity_type in &self.entity_types {
            for np in &entity_type.navigation_properties {
                if !np.name.starts_with('_') {
                    return Err(format!(
                        "navigation property '{}' of '{}' must start with '_'",
                        np.name, entity_type.name
                    ));
                }
                if !names.contains(np.target.as_str()) {
                    return Err(format!(
                        "navigation property '{}' of '{}' targets unknown entity set '{}'",
                        np.name, entity_type.name, np.target
                    ));
                }
            }
        }

        Ok(())
    }
}
