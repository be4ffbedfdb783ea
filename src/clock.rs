//! Capture clock for scrape timestamps
//!
//! Timestamp keys are RFC3339 strings at second precision, so the clock
//! hands out whole seconds and never goes backward.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

/// A clock source that never returns a second earlier than one it already returned.
#[derive(Debug, Default)]
pub struct CaptureClock {
    /// High-water mark: the largest timestamp we've ever returned (seconds)
    high_water_secs: AtomicI64,
}

impl CaptureClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a non-decreasing whole-second timestamp in seconds since the epoch.
    ///
    /// If the wall clock has gone backward (e.g. NTP adjustment), returns the
    /// previous high-water mark instead.
    pub fn now_secs(&self) -> i64 {
        let wall = Utc::now().timestamp();
        loop {
            let prev = self.high_water_secs.load(Ordering::Acquire);
            let ts = wall.max(prev);
            match self.high_water_secs.compare_exchange_weak(
                prev,
                ts,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return ts,
                Err(_) => continue,
            }
        }
    }

    /// Returns `chrono::DateTime<Utc>` truncated to whole seconds.
    pub fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.now_secs(), 0).unwrap_or(DateTime::UNIX_EPOCH)
    }

    /// Seed the high-water mark, e.g. from the latest stored key.
    ///
    /// Times ahead of the wall clock are capped at the wall clock, so a
    /// future-dated key cannot pin every later capture to one second.
    pub fn observe(&self, when: DateTime<Utc>) {
        let secs = when.timestamp().min(Utc::now().timestamp());
        self.high_water_secs.fetch_max(secs, Ordering::AcqRel);
    }
}
