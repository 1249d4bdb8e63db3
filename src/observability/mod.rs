//! Observability for cellbatch
//!
//! - Structured logging through `tracing`, JSON or plain
//! - Typed lifecycle event names
//! - Batch counters exposed at `/metrics`
//!
//! # Usage
//!
//! ```ignore
//! use cellbatch::observability::{BatchMetrics, Event};
//!
//! tracing::info!(event = %Event::BatchComplete, parts = 12, "batch complete");
//!
//! let metrics = BatchMetrics::new();
//! metrics.increment_batches_processed();
//! ```

mod events;
mod logging;
mod metrics;

pub use events::Event;
pub use logging::init_logging;
pub use metrics::{BatchMetrics, MetricsSnapshot};
