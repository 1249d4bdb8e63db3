//! # HTTP Server Module
//!
//! axum adapter in front of the batch engine.
//!
//! # Endpoints
//!
//! - `POST /{cell}/{box}/{collection}/$batch` - OData batch
//! - `/health` - Health check
//! - `/metrics` - Batch counters

pub mod batch_routes;
pub mod config;
pub mod observability_routes;
pub mod server;

pub use batch_routes::BatchState;
pub use config::HttpServerConfig;
pub use server::HttpServer;
