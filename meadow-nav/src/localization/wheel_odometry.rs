//! Wheel odometry from encoder ticks.
//!
//! Converts differential drive wheel encoder readings to pose deltas using
//! differential drive kinematics. Handles 16-bit encoder wraparound.

use crate::core::types::Pose2D;

/// Configuration for wheel odometry.
#[derive(Debug, Clone, Copy)]
pub struct WheelOdometryConfig {
    /// Encoder ticks per meter of wheel travel.
    ///
    /// Derived from the drivetrain: ppr / (π × wheel_diameter)
    pub ticks_per_meter: f32,

    /// Distance between wheel centers in meters.
    pub wheel_base: f32,
}

/// One odometry step.
#[derive(Debug, Clone, Copy)]
pub struct OdometryDelta {
    /// Pose change in the robot frame at the start of the motion
    pub delta: Pose2D,
    /// Distance traveled by the body center (signed), meters
    pub distance: f32,
}

/// Wheel odometry calculator.
///
/// Maintains encoder state and computes pose deltas from tick changes.
///
/// # Differential Drive Kinematics
///
/// - Both wheels forward equally → straight line motion
/// - Wheels moving in opposite directions → rotation in place
/// - Unequal wheel motion → arc motion
///
/// The pose delta is computed in the robot's local frame, where x is
/// forward, y is left and theta is counter-clockwise.
#[derive(Debug)]
pub struct WheelOdometry {
    config: WheelOdometryConfig,
    last_left: Option<u16>,
    last_right: Option<u16>,
}

impl WheelOdometry {
    /// Create a new wheel odometry calculator.
    pub fn new(config: WheelOdometryConfig) -> Self {
        Self {
            config,
            last_left: None,
            last_right: None,
        }
    }

    /// Update with new encoder readings.
    ///
    /// Returns `None` on the first call (initializes state).
    pub fn update(&mut self, left: u16, right: u16) -> Option<OdometryDelta> {
        let result = match (self.last_left, self.last_right) {
            (Some(prev_left), Some(prev_right)) => {
                Some(self.compute_delta(prev_left, prev_right, left, right))
            }
            _ => None,
        };

        self.last_left = Some(left);
        self.last_right = Some(right);
        result
    }

    /// Signed tick delta handling 16-bit wraparound.
    #[inline]
    fn tick_delta(current: u16, previous: u16) -> i32 {
        // wrapping_sub then i16 cast interprets large positive differences
        // as negative
        current.wrapping_sub(previous) as i16 as i32
    }

    /// Compute pose delta from encoder tick changes.
    fn compute_delta(&self, prev_left: u16, prev_right: u16, left: u16, right: u16) -> OdometryDelta {
        let dl = Self::tick_delta(left, prev_left);
        let dr = Self::tick_delta(right, prev_right);

        let dist_left = dl as f32 / self.config.ticks_per_meter;
        let dist_right = dr as f32 / self.config.ticks_per_meter;

        let distance = (dist_left + dist_right) / 2.0;
        let dtheta = (dist_right - dist_left) / self.config.wheel_base;

        // Midpoint integration: translate along the average heading of the
        // step rather than the start heading
        let half = dtheta / 2.0;
        let delta = Pose2D::new(
            distance * half.cos(),
            distance * half.sin(),
            dtheta,
        );

        OdometryDelta { delta, distance }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn mower_config() -> WheelOdometryConfig {
        // wheel_diameter 0.065, ppr 1000
        WheelOdometryConfig {
            ticks_per_meter: 1000.0 / (std::f32::consts::PI * 0.065),
            wheel_base: 0.235,
        }
    }

    #[test]
    fn test_first_reading_initializes() {
        let mut odom = WheelOdometry::new(mower_config());
        assert!(odom.update(100, 100).is_none());
        assert!(odom.update(110, 110).is_some());
    }

    #[test]
    fn test_straight_line_1000_ticks() {
        let mut odom = WheelOdometry::new(mower_config());
        odom.update(0, 0);

        // 1000 ticks on each wheel is one wheel revolution: π × 0.065 m
        let step = odom.update(1000, 1000).unwrap();
        assert_relative_eq!(step.delta.x, 0.2042, epsilon = 0.002);
        assert_relative_eq!(step.delta.y, 0.0, epsilon = 1e-6);
        assert_relative_eq!(step.delta.theta, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_in_place_turn() {
        let mut odom = WheelOdometry::new(mower_config());
        odom.update(0, 0);

        // Left +500, right -500: clockwise in-place turn.
        // Each wheel travels 0.5 × π × 0.065 = 0.1021 m, so
        // |Δθ| = 2 × 0.1021 / 0.235 = 0.869 rad
        let step = odom
            .update(500, 0u16.wrapping_sub(500))
            .unwrap();
        assert_relative_eq!(step.delta.theta, -0.869, epsilon = 0.035); // within 2°
        assert!(step.distance.abs() < 1e-6);
    }

    #[test]
    fn test_wraparound() {
        let mut odom = WheelOdometry::new(mower_config());
        odom.update(65530, 65530);

        // Wrap past zero: 65530 -> 10 is a forward delta of 16
        let step = odom.update(10, 10).unwrap();
        assert!(step.distance > 0.0);
        assert_relative_eq!(
            step.distance,
            16.0 / mower_config().ticks_per_meter,
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_reverse_motion() {
        let mut odom = WheelOdometry::new(mower_config());
        odom.update(1000, 1000);
        let step = odom.update(900, 900).unwrap();
        assert!(step.distance < 0.0);
        assert!(step.delta.x < 0.0);
    }
}
