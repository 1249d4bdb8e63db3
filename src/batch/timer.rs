//! # Batch elapsed timer
//!
//! Tracks the whole-batch deadline. Low priority batches also yield the
//! worker for a short sleep at most once per interval, so that one large
//! batch does not starve other requests contending for the same cell.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::BatchLimits;
use crate::observability::Event;

/// Request header selecting the batch priority
pub const PRIORITY_HEADER: &str = "X-Personium-Priority";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    High,
    Low,
}

impl Priority {
    /// `high` (any case) is HIGH; anything else, or no header, is LOW.
    pub fn from_header(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.trim().eq_ignore_ascii_case("high") => Priority::High,
            _ => Priority::Low,
        }
    }
}

/// Whether a deadline check may sleep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Check only
    Hold,
    /// Check, sleeping first if this is a low priority batch due a yield
    Yield,
}

/// Time source for the timer
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Clock that only moves when told to. Sleeping advances it.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
    slept: Arc<Mutex<Vec<Duration>>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
            slept: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn advance(&self, duration: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += duration;
        }
    }

    /// Every sleep requested so far
    pub fn sleeps(&self) -> Vec<Duration> {
        self.slept.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.lock().map(|now| *now).unwrap_or_else(|p| *p.into_inner())
    }

    fn sleep(&self, duration: Duration) {
        if let Ok(mut slept) = self.slept.lock() {
            slept.push(duration);
        }
        self.advance(duration);
    }
}

/// Deadline tracker for one batch
pub struct ElapsedTimer {
    clock: Arc<dyn Clock>,
    start: Instant,
    deadline: Instant,
    last_yield: Instant,
    sleep: Duration,
    sleep_interval: Duration,
    priority: Priority,
    timed_out: bool,
}

impl ElapsedTimer {
    pub fn new(clock: Arc<dyn Clock>, limits: &BatchLimits, priority: Priority) -> Self {
        let start = clock.now();
        Self {
            clock,
            start,
            deadline: start + Duration::from_millis(limits.timeout_millis),
            last_yield: start,
            sleep: Duration::from_millis(limits.sleep_millis),
            sleep_interval: Duration::from_millis(limits.sleep_interval_millis),
            priority,
            timed_out: false,
        }
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// True once the deadline has passed. Sticky.
    pub fn should_break(&mut self, mode: Mode) -> bool {
        if self.timed_out {
            return true;
        }

        if mode == Mode::Yield && self.priority == Priority::Low {
            let now = self.clock.now();
            if now.duration_since(self.last_yield) >= self.sleep_interval {
                self.clock.sleep(self.sleep);
                self.last_yield = self.clock.now();
            }
        }

        let now = self.clock.now();
        if now > self.deadline {
            self.timed_out = true;
            tracing::info!(
                event = %Event::BatchTimedOut,
                elapsed_ms = now.duration_since(self.start).as_millis() as u64,
                "batch deadline exceeded"
            );
        }
        self.timed_out
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out
    }
}
