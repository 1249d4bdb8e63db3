//! Batch metrics
//!
//! Counters only. Monotonic, reset on process start.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters for the batch engine
///
/// Uses Relaxed ordering; counters are independent of each other.
#[derive(Debug, Default)]
pub struct BatchMetrics {
    batches_processed: AtomicU64,
    batches_rejected: AtomicU64,
    parts_executed: AtomicU64,
    parts_timed_out: AtomicU64,
    parts_shuttered: AtomicU64,
    bulk_flushes: AtomicU64,
    shutter_trips: AtomicU64,
}

/// Point-in-time copy of [`BatchMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub batches_processed: u64,
    pub batches_rejected: u64,
    pub parts_executed: u64,
    pub parts_timed_out: u64,
    pub parts_shuttered: u64,
    pub bulk_flushes: u64,
    pub shutter_trips: u64,
}

impl BatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_batches_processed(&self) {
        self.batches_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_batches_rejected(&self) {
        self.batches_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_parts_executed(&self, parts: u64) {
        self.parts_executed.fetch_add(parts, Ordering::Relaxed);
    }

    pub fn add_parts_timed_out(&self, parts: u64) {
        self.parts_timed_out.fetch_add(parts, Ordering::Relaxed);
    }

    pub fn add_parts_shuttered(&self, parts: u64) {
        self.parts_shuttered.fetch_add(parts, Ordering::Relaxed);
    }

    pub fn increment_bulk_flushes(&self) {
        self.bulk_flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_shutter_trips(&self) {
        self.shutter_trips.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            batches_processed: self.batches_processed.load(Ordering::Relaxed),
            batches_rejected: self.batches_rejected.load(Ordering::Relaxed),
            parts_executed: self.parts_executed.load(Ordering::Relaxed),
            parts_timed_out: self.parts_timed_out.load(Ordering::Relaxed),
            parts_shuttered: self.parts_shuttered.load(Ordering::Relaxed),
            bulk_flushes: self.bulk_flushes.load(Ordering::Relaxed),
            shutter_trips: self.shutter_trips.load(Ordering::Relaxed),
        }
    }
}
