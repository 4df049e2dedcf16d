//! ## vindkanal-core::clock
//! **Monotonic nanosecond clock shared by every timer in the event core**
//!
//! All deadlines inside a link (delay queue, shaping cursors, condition
//! transitions) are expressed as nanoseconds since a process-wide epoch,
//! which keeps them totally ordered and cheap to compare.

use once_cell::sync::Lazy;
use std::time::{Duration, Instant};

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Nanoseconds elapsed since the process epoch.
#[inline]
pub fn now_ns() -> u64 {
    EPOCH.elapsed().as_nanos() as u64
}

/// Converts an absolute deadline in epoch nanoseconds into the wait needed
/// from now. Past deadlines collapse to zero.
#[inline]
pub fn until(deadline_ns: u64) -> Duration {
    Duration::from_nanos(deadline_ns.saturating_sub(now_ns()))
}

pub const NS_PER_MS: u64 = 1_000_000;

#[inline]
pub fn ms_to_ns(ms: f64) -> u64 {
    if ms <= 0.0 {
        0
    } else {
        (ms * NS_PER_MS as f64) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_is_monotonic() {
        let a = now_ns();
        let b = now_ns();
        assert!(b >= a);
    }

    #[test]
    fn until_saturates_for_past_deadlines() {
        assert_eq!(until(0), Duration::ZERO);
    }

    #[test]
    fn ms_conversion() {
        assert_eq!(ms_to_ns(1.5), 1_500_000);
        assert_eq!(ms_to_ns(-3.0), 0);
    }
}
