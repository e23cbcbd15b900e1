//! Monotonic time base shared by all ports.
//!
//! Deadlines and health stamps use monotonic nanoseconds since process
//! start. Wall-clock time never enters control decisions; it is for logs
//! only.

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Monotonic nanoseconds since the first call in this process.
///
/// The zero point is arbitrary but fixed for the process lifetime, so
/// differences between two readings are valid durations.
#[inline]
pub fn monotonic_ns() -> u64 {
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_nanos() as u64
}

/// Convert a duration in seconds to monotonic nanoseconds.
#[inline]
pub fn secs_to_ns(secs: f32) -> u64 {
    (secs as f64 * 1e9) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_never_decreases() {
        let a = monotonic_ns();
        let b = monotonic_ns();
        assert!(b >= a);
    }

    #[test]
    fn test_secs_to_ns() {
        assert_eq!(secs_to_ns(1.0), 1_000_000_000);
        assert_eq!(secs_to_ns(0.005), 5_000_000);
    }
}
