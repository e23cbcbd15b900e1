//! Port health probes.
//!
//! Every port reports when it last produced data and whether it considers
//! itself operational. The thread that owns a port polls its probe every
//! control period and mirrors it into a shared snapshot; the safety
//! supervisor's watchdog reads that snapshot and never calls into a
//! backend it does not own.

use crate::clock::monotonic_ns;

/// Health snapshot of a single hardware port.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortHealth {
    /// Monotonic timestamp (ns) of the last successful update.
    pub last_update_monotonic: u64,
    /// Whether the backend considers itself operational.
    pub ok: bool,
}

impl PortHealth {
    /// A healthy probe stamped now.
    pub fn ok_now() -> Self {
        Self {
            last_update_monotonic: monotonic_ns(),
            ok: true,
        }
    }

    /// A failed probe stamped now.
    pub fn failed_now() -> Self {
        Self {
            last_update_monotonic: monotonic_ns(),
            ok: false,
        }
    }

    /// Age of the last update in seconds, relative to `now` (monotonic ns).
    #[inline]
    pub fn age_secs(&self, now: u64) -> f32 {
        now.saturating_sub(self.last_update_monotonic) as f32 / 1e9
    }

    /// Whether the port is ok and updated within `timeout_secs` of `now`.
    #[inline]
    pub fn is_fresh(&self, now: u64, timeout_secs: f32) -> bool {
        self.ok && self.age_secs(now) <= timeout_secs
    }
}

impl Default for PortHealth {
    fn default() -> Self {
        Self {
            last_update_monotonic: 0,
            ok: false,
        }
    }
}
