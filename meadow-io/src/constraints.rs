//! Kinodynamic constraints and safety limits

use crate::types::Velocity2D;

/// Motion constraints for safe operation
#[derive(Debug, Clone, Copy)]
pub struct MotionConstraints {
    /// Maximum linear velocity (m/s)
    pub max_linear_velocity: f32,

    /// Maximum angular velocity (rad/s)
    pub max_angular_velocity: f32,

    /// Linear acceleration limit (m/s²)
    pub linear_acceleration: f32,

    /// Angular acceleration limit (rad/s²)
    pub angular_acceleration: f32,

    /// Emergency deceleration (m/s²)
    pub emergency_deceleration: f32,
}

impl MotionConstraints {
    /// Apply velocity constraints
    pub fn constrain_velocity(&self, linear: f32, angular: f32) -> Velocity2D {
        Velocity2D::new(
            linear.clamp(-self.max_linear_velocity, self.max_linear_velocity),
            angular.clamp(-self.max_angular_velocity, self.max_angular_velocity),
        )
    }

    /// Apply acceleration constraints
    /// Returns new velocity after applying acceleration limits
    pub fn apply_acceleration(
        &self,
        current: Velocity2D,
        target: Velocity2D,
        dt: f32,
        emergency: bool,
    ) -> Velocity2D {
        if dt <= 0.0 {
            return current;
        }

        let linear_accel_limit = if emergency {
            self.emergency_deceleration
        } else {
            self.linear_acceleration
        };

        let angular_accel_limit = if emergency {
            // Angular can decelerate faster
            self.emergency_deceleration * 2.0
        } else {
            self.angular_acceleration
        };

        let linear_accel =
            ((target.linear - current.linear) / dt).clamp(-linear_accel_limit, linear_accel_limit);
        let angular_accel = ((target.angular - current.angular) / dt)
            .clamp(-angular_accel_limit, angular_accel_limit);

        self.constrain_velocity(
            current.linear + linear_accel * dt,
            current.angular + angular_accel * dt,
        )
    }

    /// Scale the velocity limits by a mode factor, keeping accelerations.
    pub fn scaled(&self, speed_factor: f32) -> Self {
        Self {
            max_linear_velocity: self.max_linear_velocity * speed_factor,
            max_angular_velocity: self.max_angular_velocity * speed_factor,
            ..*self
        }
    }
}

impl Default for MotionConstraints {
    fn default() -> Self {
        Self {
            max_linear_velocity: 0.5,
            max_angular_velocity: 1.0,
            linear_acceleration: 0.5,
            angular_acceleration: 1.0,
            emergency_deceleration: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_velocity_constraints() {
        let constraints = MotionConstraints::default();

        let v = constraints.constrain_velocity(0.2, 0.5);
        assert_eq!(v.linear, 0.2);
        assert_eq!(v.angular, 0.5);

        let v = constraints.constrain_velocity(1.0, 3.0);
        assert_eq!(v.linear, constraints.max_linear_velocity);
        assert_eq!(v.angular, constraints.max_angular_velocity);

        let v = constraints.constrain_velocity(-1.0, -3.0);
        assert_eq!(v.linear, -constraints.max_linear_velocity);
        assert_eq!(v.angular, -constraints.max_angular_velocity);
    }

    #[test]
    fn test_acceleration_limits() {
        let constraints = MotionConstraints::default();

        let v = constraints.apply_acceleration(
            Velocity2D::default(),
            Velocity2D::new(0.3, 0.0),
            1.0,
            false,
        );
        assert!(v.linear <= constraints.linear_acceleration);

        // Emergency stop decelerates faster
        let v = constraints.apply_acceleration(
            Velocity2D::new(0.3, 0.0),
            Velocity2D::default(),
            0.1,
            true,
        );
        assert!(v.linear < 0.3);
        assert!(v.linear >= 0.0);
    }

    #[test]
    fn test_mode_scaling() {
        let constraints = MotionConstraints::default();
        let conservative = constraints.scaled(0.5);
        assert_relative_eq!(conservative.max_linear_velocity, 0.25);
        assert_relative_eq!(
            conservative.linear_acceleration,
            constraints.linear_acceleration
        );
    }

    #[test]
    fn test_zero_dt_is_identity() {
        let constraints = MotionConstraints::default();
        let current = Velocity2D::new(0.2, 0.1);
        let v = constraints.apply_acceleration(current, Velocity2D::default(), 0.0, false);
        assert_eq!(v, current);
    }
}
