//! Wall-clock helpers and the snapshot version clock.
//!
//! DESIGN
//! ======
//! Snapshot versions must be strictly increasing per board. Raw wall-clock
//! milliseconds collide under rapid successive snapshots and go backwards
//! under clock skew, so versions come from a hybrid clock: the next version
//! is the largest of wall time, the last issued version + 1, and the latest
//! stored version + 1.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

#[derive(Debug, Default)]
pub struct VersionClock {
    last: Mutex<i64>,
}

impl VersionClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next version, seeded by the latest version already stored.
    pub fn next(&self, latest_stored: Option<i64>) -> i64 {
        self.next_at(now_ms(), latest_stored)
    }

    pub(crate) fn next_at(&self, now: i64, latest_stored: Option<i64>) -> i64 {
        let mut last = self.last.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let floor = latest_stored.map_or(i64::MIN, |v| v.saturating_add(1));
        let next = now.max(last.saturating_add(1)).max(floor);
        *last = next;
        next
    }
}

#[cfg(test)]
#[path = "clock_test.rs"]
mod tests;
