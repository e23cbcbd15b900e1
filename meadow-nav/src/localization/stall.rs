//! Encoder stall detection.
//!
//! A commanded vehicle whose encoders stop ticking is stuck on something
//! the bumpers did not catch (sunk wheels, a lip, tall grass). The stall
//! signal is exported to the safety supervisor.

/// Detects absence of encoder motion under a non-trivial command.
#[derive(Debug)]
pub struct StallDetector {
    /// Commanded speed below which stalls are not judged, m/s
    min_commanded_speed: f32,
    /// How long motion may be absent before the stall latches, seconds
    stall_timeout: f32,
    /// Time the current no-motion streak started, monotonic ns
    streak_start_ns: Option<u64>,
}

impl StallDetector {
    pub fn new(min_commanded_speed: f32, stall_timeout: f32) -> Self {
        Self {
            min_commanded_speed,
            stall_timeout,
            streak_start_ns: None,
        }
    }

    /// Feed one control period; returns true while a stall is detected.
    ///
    /// `commanded_speed` is the magnitude of the linear command and
    /// `moved` whether the encoders produced any ticks this period.
    pub fn update(&mut self, commanded_speed: f32, moved: bool, now_ns: u64) -> bool {
        if commanded_speed.abs() < self.min_commanded_speed || moved {
            self.streak_start_ns = None;
            return false;
        }

        let start = *self.streak_start_ns.get_or_insert(now_ns);
        (now_ns.saturating_sub(start)) as f32 / 1e9 >= self.stall_timeout
    }
}
