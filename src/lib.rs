//! cellbatch - OData `$batch` processing for cell/box collections
//!
//! The [`batch`] engine is independent of HTTP; [`http_server`] is the axum
//! adapter and [`cli`] the process entry point.

pub mod batch;
pub mod cli;
pub mod config;
pub mod errors;
pub mod http_server;
pub mod observability;
pub mod odata;
pub mod schema;
