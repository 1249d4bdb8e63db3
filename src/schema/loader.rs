//! Loads entity type metadata at startup
//!
//! The metadata file is one JSON document:
//!
//! ```json
//! {"entity_types": [{"name": "Sales", "id": "t-sales", "properties": {...}}]}
//! ```

use std::fs;
use std::path::Path;

use super::errors::{SchemaError, SchemaResult};
use super::types::ODataSchema;

pub struct SchemaLoader;

impl SchemaLoader {
    /// Load and validate a metadata file.
    pub fn load_file(path: &Path) -> SchemaResult<ODataSchema> {
        let content = fs::read_to_string(path).map_err(|source| SchemaError::Read {
            path: path.display().to_string(),
            source,
        })?;

        Self::load_str(&path.display().to_string(), &content)
    }

    /// Parse metadata held in memory. `origin` names the source in errors.
    pub fn load_str(origin: &str, content: &str) -> SchemaResult<ODataSchema> {
        let schema: ODataSchema = serde_json::from_str(content)
            .map_err(|e| SchemaError::malformed(origin, format!("Invalid JSON: {}", e)))?;

        schema
            .validate_structure()
            .map_err(|e| SchemaError::malformed(origin, e))?;

        Ok(schema)
    }
}
