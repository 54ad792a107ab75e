//! Wall-clock abstraction
//!
//! Command envelopes carry a Unix timestamp; routing that through a trait
//! keeps envelope construction testable without real time.

use std::time::{SystemTime, UNIX_EPOCH};

/// Source of wall-clock time for timestamped payloads.
pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch.
    fn now_unix(&self) -> u64;
}

/// System wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_sane() {
        // 2020-01-01 as a floor; catches a zeroed or misconverted clock.
        assert!(SystemClock.now_unix() > 1_577_836_800);
    }
}
