//! CLI command implementations
//!
//! `serve` boots in a fixed order: config, logging, schema, store, server.
//! Any failure before the listener is bound is fatal.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::UnitConfig;
use crate::http_server::HttpServer;
use crate::observability::{init_logging, Event};
use crate::odata::MemoryStore;
use crate::schema::{ODataSchema, SchemaLoader};

use super::args::Command;
use super::errors::{CliError, CliResult};

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
/// This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Serve { config, port } => serve(&config, port),
        Command::CheckConfig { config } => {
            let rendered = check_config(&config)?;
            println!("{}", rendered);
            Ok(())
        }
    }
}

/// Load config and schema, then serve until the process stops
pub fn serve(config_path: &Path, port: Option<u16>) -> CliResult<()> {
    let mut config = UnitConfig::load(config_path)?;
    if let Some(port) = port {
        config.http.port = port;
    }

    init_logging(&config.logging);
    tracing::info!(event = %Event::BootStart, version = env!("CARGO_PKG_VERSION"), "starting cellbatch");
    tracing::info!(
        event = %Event::ConfigLoaded,
        path = %config_path.display(),
        read_delete_only = config.read_delete_only_mode,
        "configuration loaded"
    );

    let schema = load_schema(&config)?;
    tracing::info!(
        event = %Event::SchemasLoaded,
        entity_types = schema.entity_types.len(),
        "entity types loaded"
    );

    let store = Arc::new(MemoryStore::new(
        schema,
        Duration::from_millis(config.lock_wait_millis),
    ));
    let server = HttpServer::with_config(Arc::new(config), store);

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::boot_failed(format!("Failed to create tokio runtime: {}", e)))?;

    rt.block_on(async {
        server
            .start()
            .await
            .map_err(|e| CliError::boot_failed(format!("HTTP server failed: {}", e)))
    })
}

/// Validate a config file and return the effective configuration as JSON.
///
/// The schema file is loaded too when one is configured.
pub fn check_config(config_path: &Path) -> CliResult<String> {
    let config = UnitConfig::load(config_path)?;
    load_schema(&config)?;
    Ok(serde_json::to_string_pretty(&config)?)
}

fn load_schema(config: &UnitConfig) -> CliResult<ODataSchema> {
    match &config.schema_path {
        Some(path) => Ok(SchemaLoader::load_file(path)?),
        None => Ok(ODataSchema::default()),
    }
}
