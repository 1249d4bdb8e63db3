//! Unit configuration
//!
//! One explicitly constructed `UnitConfig` is loaded at boot and handed to
//! the server and the batch engine. Every field has a default so an empty
//! JSON object is a valid configuration.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http_server::HttpServerConfig;
use crate::odata::Privilege;

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Top-level configuration of one unit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitConfig {
    #[serde(default)]
    pub http: HttpServerConfig,

    #[serde(default)]
    pub batch: BatchLimits,

    #[serde(default)]
    pub odata: ODataLimits,

    /// Reject every write method while the unit is under maintenance
    #[serde(default)]
    pub read_delete_only_mode: bool,

    /// How long a writer waits for the per-cell lock (default: 1000)
    #[serde(default = "default_lock_wait_millis")]
    pub lock_wait_millis: u64,

    /// Entity type metadata file loaded at boot
    #[serde(default)]
    pub schema_path: Option<PathBuf>,

    #[serde(default)]
    pub access: AccessConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Limits applied to one `$batch` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchLimits {
    /// Maximum number of parts (default: 1000)
    #[serde(default = "default_bulk_request_max_size")]
    pub bulk_request_max_size: usize,

    /// Whole-batch deadline (default: 270000)
    #[serde(default = "default_timeout_millis")]
    pub timeout_millis: u64,

    /// Yield sleep for low priority batches (default: 50)
    #[serde(default = "default_sleep_millis")]
    pub sleep_millis: u64,

    /// Minimum gap between two yields (default: 1000)
    #[serde(default = "default_sleep_interval_millis")]
    pub sleep_interval_millis: u64,
}

/// OData query limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ODataLimits {
    /// Maximum `$top`, per request and summed over a batch (default: 10000)
    #[serde(default = "default_top_max")]
    pub top_max: u32,

    /// `$top` applied to list requests that omit it (default: 25)
    #[serde(default = "default_top_default")]
    pub top_default: u32,

    /// Maximum `$skip` (default: 100000)
    #[serde(default = "default_skip_max")]
    pub skip_max: u32,
}

/// Privileges granted by the stand-alone server
///
/// Token validation lives outside this crate; the server only tells
/// anonymous callers apart from callers that present credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessConfig {
    #[serde(default)]
    pub anonymous_privileges: Vec<String>,

    #[serde(default = "default_authenticated_privileges")]
    pub authenticated_privileges: Vec<String>,
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit one JSON object per line
    #[serde(default)]
    pub json: bool,
}

fn default_bulk_request_max_size() -> usize {
    1000
}
fn default_timeout_millis() -> u64 {
    270_000
}
fn default_sleep_millis() -> u64 {
    50
}
fn default_sleep_interval_millis() -> u64 {
    1000
}
fn default_top_max() -> u32 {
    10_000
}
fn default_top_default() -> u32 {
    25
}
fn default_skip_max() -> u32 {
    100_000
}
fn default_lock_wait_millis() -> u64 {
    1000
}
fn default_authenticated_privileges() -> Vec<String> {
    vec!["read".to_string(), "write".to_string()]
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            bulk_request_max_size: default_bulk_request_max_size(),
            timeout_millis: default_timeout_millis(),
            sleep_millis: default_sleep_millis(),
            sleep_interval_millis: default_sleep_interval_millis(),
        }
    }
}

impl Default for ODataLimits {
    fn default() -> Self {
        Self {
            top_max: default_top_max(),
            top_default: default_top_default(),
            skip_max: default_skip_max(),
        }
    }
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            anonymous_privileges: Vec::new(),
            authenticated_privileges: default_authenticated_privileges(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AccessConfig {
    pub fn anonymous(&self) -> ConfigResult<Vec<Privilege>> {
        parse_privileges(&self.anonymous_privileges)
    }

    pub fn authenticated(&self) -> ConfigResult<Vec<Privilege>> {
        parse_privileges(&self.authenticated_privileges)
    }
}

fn parse_privileges(names: &[String]) -> ConfigResult<Vec<Privilege>> {
    names
        .iter()
        .map(|name| {
            name.parse::<Privilege>()
                .map_err(|_| ConfigError::Invalid(format!("unknown privilege '{}'", name)))
        })
        .collect()
}

impl UnitConfig {
    /// Load configuration from a JSON file and validate it
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let config: UnitConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject limits that would make every batch fail
    pub fn validate(&self) -> ConfigResult<()> {
        if self.batch.bulk_request_max_size == 0 {
            return Err(ConfigError::Invalid(
                "batch.bulk_request_max_size must be > 0".to_string(),
            ));
        }
        if self.batch.timeout_millis == 0 {
            return Err(ConfigError::Invalid("batch.timeout_millis must be > 0".to_string()));
        }
        if self.odata.top_max == 0 {
            return Err(ConfigError::Invalid("odata.top_max must be > 0".to_string()));
        }
        if self.odata.top_default > self.odata.top_max {
            return Err(ConfigError::Invalid(format!(
                "odata.top_default ({}) exceeds odata.top_max ({})",
                self.odata.top_default, self.odata.top_max
            )));
        }
        self.access.anonymous()?;
        self.access.authenticated()?;
        Ok(())
    }

    /// Small fixed limits for tests
    pub fn for_tests() -> Self {
        Self {
            batch: BatchLimits {
                bulk_request_max_size: 20,
                timeout_millis: 1000,
                sleep_millis: 10,
                sleep_interval_millis: 100,
            },
            odata: ODataLimits {
                top_max: 100,
                top_default: 25,
                skip_max: 1000,
            },
            lock_wait_millis: 20,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_gives_defaults() {
        let config: UnitConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.batch.bulk_request_max_size, 1000);
        assert_eq!(config.batch.timeout_millis, 270_000);
        assert_eq!(config.batch.sleep_millis, 50);
        assert_eq!(config.batch.sleep_interval_millis, 1000);
        assert_eq!(config.odata.top_max, 10_000);
        assert!(!config.read_delete_only_mode);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config: UnitConfig =
            serde_json::from_str(r#"{"batch": {"timeout_millis": 5}}"#).unwrap();
        assert_eq!(config.batch.timeout_millis, 5);
        assert_eq!(config.batch.bulk_request_max_size, 1000);
    }

    #[test]
    fn test_zero_limits_rejected() {
        let mut config = UnitConfig::default();
        config.batch.bulk_request_max_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_unknown_privilege_rejected() {
        let mut config = UnitConfig::default();
        config.access.anonymous_privileges = vec!["fly".to_string()];
        assert!(config.validate().is_err());
    }
}
