//! Clock readings used by transactions and spans.
//!
//! Durations are always computed from monotonic readings; the wall clock is
//! only used for the reported start timestamp.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;

static ANCHOR: Lazy<Instant> = Lazy::new(Instant::now);

/// Microseconds elapsed since a process-wide anchor. Never goes backwards.
pub fn monotonic_micros() -> u64 {
    ANCHOR.elapsed().as_micros() as u64
}

/// Microseconds since the Unix epoch, or 0 if the system clock is before it.
pub fn wall_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_never_decreases() {
        let a = monotonic_micros();
        let b = monotonic_micros();
        assert!(b >= a);
    }

    #[test]
    fn test_wall_clock_is_after_epoch() {
        assert!(wall_micros() > 0);
    }
}
