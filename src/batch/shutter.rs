//! Batch admission shutter
//!
//! Once storage reports "too many concurrent requests", the rest of the
//! batch stops writing: every later write part is answered with the same
//! error without being attempted. Reads still go through. The shutter is
//! scoped to one batch and never reopens.

use axum::http::Method;

use crate::errors::{codes, CoreError};
use crate::observability::Event;

#[derive(Debug, Default)]
pub struct AdmissionShutter {
    tripped: bool,
}

impl AdmissionShutter {
    pub fn new() -> Self {
        Self::default()
    }

    /// May a part with this method still run?
    pub fn accept(&self, method: &Method) -> bool {
        !self.tripped || *method == Method::GET
    }

    /// Feed an error from a write. Trips on resource exhaustion only.
    ///
    /// Returns true when this call tripped the shutter.
    pub fn update_status(&mut self, error: &CoreError) -> bool {
        if self.tripped || !error.is(codes::TOO_MANY_CONCURRENT_REQUESTS) {
            return false;
        }
        self.tripped = true;
        tracing::warn!(event = %Event::ShutterTripped, "write admission closed for this batch");
        true
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped
    }
}
