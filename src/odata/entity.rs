//! Entity values exchanged with the producer

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::schema::EntityType;

/// Reserved property carrying the entity key
pub const ID_PROPERTY: &str = "__id";

/// A validated request body ready to be persisted
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDocument {
    pub entity_set: String,
    pub entity_type_id: String,
    pub id: Option<String>,
    pub properties: Map<String, Value>,
}

impl EntityDocument {
    pub fn new(entity_type: &EntityType, id: Option<String>, properties: Map<String, Value>) -> Self {
        Self {
            entity_set: entity_type.name.clone(),
            entity_type_id: entity_type.id.clone(),
            id,
            properties,
        }
    }

    /// Give the document a generated key if the body did not carry one.
    pub fn assign_id_if_missing(&mut self) -> &str {
        self.id
            .get_or_insert_with(|| Uuid::new_v4().simple().to_string())
            .as_str()
    }

    /// `entityTypeId:id`, the key used for duplicate detection within a batch
    pub fn natural_key(&self) -> Option<String> {
        self.id
            .as_ref()
            .map(|id| format!("{}:{}", self.entity_type_id, id))
    }
}

/// A stored entity as returned by the producer
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub entity_set: String,
    pub id: String,
    pub etag: String,
    pub properties: Map<String, Value>,
    pub published: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// One page of a list request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityList {
    pub entities: Vec<Entity>,
    /// Total matches, present when `$inlinecount=allpages`
    pub count: Option<usize>,
}

/// An entity addressed by set and key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityRef {
    pub entity_set: String,
    pub key: String,
}

impl EntityRef {
    pub fn new(entity_set: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            entity_set: entity_set.into(),
            key: key.into(),
        }
    }
}

/// Create an entity through a navigation property of an existing entity
#[derive(Debug, Clone, PartialEq)]
pub struct NavigationCreate {
    pub source: EntityRef,
    pub navigation_property: String,
    pub document: EntityDocument,
}
