//! Observable lifecycle events
//!
//! Events are explicit and typed. They are attached to log records as the
//! `event` field so that log consumers can filter on a stable name.

use std::fmt;

/// Observable events in cellbatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Boot & Lifecycle
    /// Startup begins
    BootStart,
    /// Configuration loaded
    ConfigLoaded,
    /// Entity type metadata loaded
    SchemasLoaded,
    /// Server bound and accepting requests
    Serving,

    // Batch processing
    /// $batch request accepted for processing
    BatchBegin,
    /// $batch request rejected before any part ran
    BatchRejected,
    /// $batch response assembled
    BatchComplete,
    /// Deadline passed, remaining parts answered with 408
    BatchTimedOut,
    /// Shutter tripped, remaining writes answered with 503
    ShutterTripped,
    /// Buffered creates submitted to storage
    BulkFlush,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::BootStart => "CELLBATCH_STARTUP_BEGIN",
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::SchemasLoaded => "SCHEMAS_LOADED",
            Event::Serving => "CELLBATCH_SERVING",

            Event::BatchBegin => "BATCH_BEGIN",
            Event::BatchRejected => "BATCH_REJECTED",
            Event::BatchComplete => "BATCH_COMPLETE",
            Event::BatchTimedOut => "BATCH_TIMED_OUT",
            Event::ShutterTripped => "BATCH_SHUTTER_TRIPPED",
            Event::BulkFlush => "BULK_FLUSH",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
