//! Entity type metadata for OData collections
//!
//! Metadata is loaded once at boot and is read-only afterwards. Request
//! bodies are validated against it before anything is written.

mod errors;
mod loader;
mod types;
mod validator;

pub use errors::{SchemaError, SchemaResult};
pub use loader::SchemaLoader;
pub use types::{EntityType, NavigationProperty, ODataSchema, PropertyDef, PropertyType};
pub use validator::{is_valid_key, EntityValidator};
