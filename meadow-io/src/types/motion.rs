//! Motion command types and the arbitration token.
//!
//! Producers (local planner, docking) emit [`MotionCommand`]s; only the
//! safety supervisor turns them into [`GatedCommand`]s. Actuator backends
//! accept gated commands exclusively, so a stale producer cannot drive the
//! wheels around the supervisor.

/// 2D velocity setpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Velocity2D {
    /// Linear velocity (m/s), positive forward
    pub linear: f32,
    /// Angular velocity (rad/s), positive counter-clockwise
    pub angular: f32,
}

impl Velocity2D {
    /// Create new velocity
    pub fn new(linear: f32, angular: f32) -> Self {
        Self { linear, angular }
    }

    /// Check if velocity is near zero
    pub fn is_zero(&self) -> bool {
        self.linear.abs() < 0.001 && self.angular.abs() < 0.001
    }
}

/// A velocity command with an expiry deadline.
///
/// The deadline is monotonic nanoseconds (see [`crate::clock`]). The
/// supervisor zeroes commands whose deadline has passed, so a wedged
/// producer decays to a stop rather than a runaway.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionCommand {
    pub velocity: Velocity2D,
    /// Monotonic ns after which this command must not be acted on.
    pub deadline_monotonic: u64,
}

impl MotionCommand {
    /// Create a command valid until `deadline_monotonic`.
    pub fn new(linear: f32, angular: f32, deadline_monotonic: u64) -> Self {
        Self {
            velocity: Velocity2D::new(linear, angular),
            deadline_monotonic,
        }
    }

    /// A zero-velocity command valid until `deadline_monotonic`.
    pub fn stop(deadline_monotonic: u64) -> Self {
        Self {
            velocity: Velocity2D::default(),
            deadline_monotonic,
        }
    }

    /// Whether the command has expired at monotonic time `now`.
    #[inline]
    pub fn is_expired(&self, now: u64) -> bool {
        now > self.deadline_monotonic
    }
}

/// Per-tick tag proving a command passed supervisor arbitration.
///
/// The supervisor rotates the token on every decision tick. Actuators
/// remember the last token they accepted and reject reuse, which makes
/// replay of an old gated command structurally impossible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ArbitrationToken(pub u64);

impl ArbitrationToken {
    /// The token no command has ever carried.
    pub const INITIAL: ArbitrationToken = ArbitrationToken(0);

    /// Next token in the rotation.
    #[inline]
    pub fn next(self) -> Self {
        ArbitrationToken(self.0.wrapping_add(1))
    }
}

/// A supervisor-arbitrated command, the only thing actuators accept.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GatedCommand {
    pub command: MotionCommand,
    pub token: ArbitrationToken,
}
