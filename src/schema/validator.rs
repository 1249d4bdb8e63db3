//! Request body validation
//!
//! Turns a JSON request body into an [`EntityDocument`]:
//! - The body must be a JSON object
//! - `__id` must be a well-formed key when present
//! - Declared properties must match their type; non-nullable ones must be present
//! - Undeclared properties are accepted only on open types, and only as scalars
//!
//! Validation is deterministic and does not touch storage.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use super::types::{EntityType, PropertyType};
use crate::errors::{codes, CoreError, CoreResult};
use crate::odata::{EntityDocument, ID_PROPERTY};

/// Read-only properties that clients may echo back; they are dropped.
const IGNORED_PROPERTIES: &[&str] = &["__metadata", "__published", "__updated"];

pub struct EntityValidator<'a> {
    entity_type: &'a EntityType,
}

impl<'a> EntityValidator<'a> {
    pub fn new(entity_type: &'a EntityType) -> Self {
        Self { entity_type }
    }

    /// Parse and validate a request body.
    pub fn to_document(&self, body: &str) -> CoreResult<EntityDocument> {
        let value: Value = serde_json::from_str(body)
            .map_err(|e| CoreError::new(codes::JSON_PARSE_ERROR).with_cause(e))?;

        let Value::Object(mut object) = value else {
            return Err(CoreError::new(codes::JSON_PARSE_ERROR).with_cause("body is not a JSON object"));
        };

        let id = match object.remove(ID_PROPERTY) {
            None | Some(Value::Null) => None,
            Some(Value::String(id)) if is_valid_key(&id) => Some(id),
            Some(_) => return Err(field_error(ID_PROPERTY)),
        };

        for ignored in IGNORED_PROPERTIES {
            object.remove(*ignored);
        }

        self.validate_properties(&object)?;
        Ok(EntityDocument::new(self.entity_type, id, object))
    }

    fn validate_properties(&self, object: &Map<String, Value>) -> CoreResult<()> {
        for (name, def) in &self.entity_type.properties {
            match object.get(name) {
                None | Some(Value::Null) if !def.nullable => return Err(field_error(name)),
                None | Some(Value::Null) => {}
                Some(value) if !type_matches(def.property_type, value) => {
                    return Err(field_error(name))
                }
                Some(_) => {}
            }
        }

        for (name, value) in object {
            if self.entity_type.properties.contains_key(name) {
                continue;
            }
            if name.starts_with("__") || !self.entity_type.open {
                return Err(field_error(name));
            }
            if value.is_object() || value.is_array() {
                return Err(field_error(name));
            }
        }
        Ok(())
    }
}

fn type_matches(property_type: PropertyType, value: &Value) -> bool {
    match property_type {
        PropertyType::String => value.is_string(),
        PropertyType::Int => value.is_i64() || value.is_u64(),
        PropertyType::Double => value.is_number(),
        PropertyType::Boolean => value.is_boolean(),
    }
}

/// Keys: 1-200 characters, alphanumeric first, then `-`, `_` or `:`.
pub fn is_valid_key(key: &str) -> bool {
    static KEY_PATTERN: OnceLock<Regex> = OnceLock::new();
    KEY_PATTERN
        .get_or_init(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9\-_:]{0,199}$").expect("static pattern"))
        .is_match(key)
}

fn field_error(name: &str) -> CoreError {
    CoreError::new(codes::REQUEST_FIELD_FORMAT_ERROR).with_params([name])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PropertyDef;

    fn sales() -> EntityType {
        EntityType::new("Sales", "t-sales")
            .with_property("amount", PropertyDef::required(PropertyType::Int))
            .with_property("note", PropertyDef::nullable(PropertyType::String))
    }

    #[test]
    fn test_valid_body() {
        let entity_type = sales();
        let doc = EntityValidator::new(&entity_type)
            .to_document(r#"{"__id": "k1", "amount": 3, "extra": "x"}"#)
            .unwrap();
        assert_eq!(doc.id.as_deref(), Some("k1"));
        assert_eq!(doc.entity_type_id, "t-sales");
        assert_eq!(doc.properties["amount"], 3);
        assert!(!doc.properties.contains_key(ID_PROPERTY));
    }

    #[test]
    fn test_malformed_json() {
        let entity_type = sales();
        let err = EntityValidator::new(&entity_type).to_document("{not json").unwrap_err();
        assert!(err.is(codes::JSON_PARSE_ERROR));
        assert!(err.cause().is_some());

        let err = EntityValidator::new(&entity_type).to_document("[1, 2]").unwrap_err();
        assert!(err.is(codes::JSON_PARSE_ERROR));
    }

    #[test]
    fn test_missing_required_property() {
        let entity_type = sales();
        let err = EntityValidator::new(&entity_type)
            .to_document(r#"{"note": "n"}"#)
            .unwrap_err();
        assert!(err.is(codes::REQUEST_FIELD_FORMAT_ERROR));
        assert!(err.message().contains("[amount]"));
    }

    #[test]
    fn test_type_mismatch() {
        let entity_type = sales();
        let err = EntityValidator::new(&entity_type)
            .to_document(r#"{"amount": "three"}"#)
            .unwrap_err();
        assert!(err.message().contains("[amount]"));
    }

    #[test]
    fn test_invalid_key() {
        let entity_type = sales();
        let err = EntityValidator::new(&entity_type)
            .to_document(r#"{"__id": "-bad", "amount": 1}"#)
            .unwrap_err();
        assert!(err.message().contains("[__id]"));
    }

    #[test]
    fn test_closed_type_rejects_dynamic_property() {
        let entity_type = sales().closed();
        let err = EntityValidator::new(&entity_type)
            .to_document(r#"{"amount": 1, "extra": true}"#)
            .unwrap_err();
        assert!(err.message().contains("[extra]"));
    }

    #[test]
    fn test_metadata_is_dropped() {
        let entity_type = sales();
        let doc = EntityValidator::new(&entity_type)
            .to_document(r#"{"amount": 1, "__metadata": {"uri": "x"}}"#)
            .unwrap();
        assert!(!doc.properties.contains_key("__metadata"));
    }

    #[test]
    fn test_key_pattern() {
        assert!(is_valid_key("a"));
        assert!(is_valid_key("srcKey_1:x-y"));
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("_lead"));
        assert!(!is_valid_key(&"a".repeat(201)));
    }
}
