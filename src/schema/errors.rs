//! Schema loading errors
//!
//! Loader failures are fatal at boot. Request bodies that violate a loaded
//! schema are reported as [`crate::errors::CoreError`] instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    /// Metadata file could not be read
    #[error("Failed to read schema {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Metadata file is not valid JSON or is structurally inconsistent
    #[error("Malformed schema {path}: {reason}")]
    Malformed { path: String, reason: String },
}

impl SchemaError {
    pub fn malformed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        SchemaError::Malformed {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type SchemaResult<T> = Result<T, SchemaError>;
