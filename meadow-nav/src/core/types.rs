//! Core data types for planar navigation.

use serde::{Deserialize, Serialize};

use super::math::normalize_angle;

/// A 2D point in meters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2D {
    /// X coordinate in meters
    pub x: f32,
    /// Y coordinate in meters
    pub y: f32,
}

impl Point2D {
    /// Create a new point.
    #[inline]
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Squared distance to another point (avoids sqrt).
    #[inline]
    pub fn distance_squared(&self, other: &Point2D) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    /// Distance to another point.
    #[inline]
    pub fn distance(&self, other: &Point2D) -> f32 {
        self.distance_squared(other).sqrt()
    }

    /// Heading angle from this point to another, in [-π, π].
    #[inline]
    pub fn bearing_to(&self, other: &Point2D) -> f32 {
        (other.y - self.y).atan2(other.x - self.x)
    }
}

/// Robot pose in 2D space.
///
/// Position (x, y) in meters and heading (theta) in radians.
/// Theta is normalized to [-π, π].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose2D {
    /// X position in meters
    pub x: f32,
    /// Y position in meters
    pub y: f32,
    /// Heading in radians, normalized to [-π, π]
    pub theta: f32,
}

impl Pose2D {
    /// Create a new pose with theta normalized to [-π, π].
    #[inline]
    pub fn new(x: f32, y: f32, theta: f32) -> Self {
        Self {
            x,
            y,
            theta: normalize_angle(theta),
        }
    }

    /// Identity pose at origin with zero heading.
    #[inline]
    pub fn identity() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            theta: 0.0,
        }
    }

    /// Position component as a point.
    #[inline]
    pub fn position(&self) -> Point2D {
        Point2D::new(self.x, self.y)
    }

    /// Compose two poses: self ⊕ other
    ///
    /// Applies `other` transform relative to `self` frame.
    #[inline]
    pub fn compose(&self, other: &Pose2D) -> Pose2D {
        let (sin_t, cos_t) = self.theta.sin_cos();
        Pose2D::new(
            self.x + other.x * cos_t - other.y * sin_t,
            self.y + other.x * sin_t + other.y * cos_t,
            self.theta + other.theta,
        )
    }

    /// Transform a point from local frame to global frame.
    #[inline]
    pub fn transform_point(&self, point: &Point2D) -> Point2D {
        let (sin_t, cos_t) = self.theta.sin_cos();
        Point2D::new(
            self.x + point.x * cos_t - point.y * sin_t,
            self.y + point.x * sin_t + point.y * cos_t,
        )
    }

    /// Transform a point from global frame to local frame.
    #[inline]
    pub fn inverse_transform_point(&self, point: &Point2D) -> Point2D {
        let (sin_t, cos_t) = self.theta.sin_cos();
        let dx = point.x - self.x;
        let dy = point.y - self.y;
        Point2D::new(dx * cos_t + dy * sin_t, -dx * sin_t + dy * cos_t)
    }
}

impl Default for Pose2D {
    fn default() -> Self {
        Self::identity()
    }
}

/// 3x3 covariance matrix for 2D pose uncertainty (x, y, theta).
///
/// Stored as row-major array: [xx, xy, xt, yx, yy, yt, tx, ty, tt]
/// where t = theta.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Covariance2D {
    /// Row-major 3x3 matrix data
    data: [f32; 9],
}

impl Covariance2D {
    /// Create a zero covariance matrix.
    #[inline]
    pub fn zero() -> Self {
        Self { data: [0.0; 9] }
    }

    /// Create a diagonal covariance matrix.
    ///
    /// Parameters are variances: xx = σ²_x, yy = σ²_y, tt = σ²_θ
    #[inline]
    pub fn diagonal(xx: f32, yy: f32, tt: f32) -> Self {
        Self {
            data: [xx, 0.0, 0.0, 0.0, yy, 0.0, 0.0, 0.0, tt],
        }
    }

    /// Create from row-major array.
    #[inline]
    pub fn from_array(data: [f32; 9]) -> Self {
        Self { data }
    }

    /// Get variance of x (element [0,0]).
    #[inline]
    pub fn var_x(&self) -> f32 {
        self.data[0]
    }

    /// Get variance of y (element [1,1]).
    #[inline]
    pub fn var_y(&self) -> f32 {
        self.data[4]
    }

    /// Get variance of theta (element [2,2]).
    #[inline]
    pub fn var_theta(&self) -> f32 {
        self.data[8]
    }

    /// Get raw data as slice.
    #[inline]
    pub fn as_slice(&self) -> &[f32; 9] {
        &self.data
    }

    /// Force symmetry by averaging off-diagonal pairs.
    ///
    /// Repeated propagation accumulates asymmetry from rounding; callers
    /// re-symmetrize after each covariance update.
    pub fn symmetrized(&self) -> Self {
        let p = &self.data;
        let xy = 0.5 * (p[1] + p[3]);
        let xt = 0.5 * (p[2] + p[6]);
        let yt = 0.5 * (p[5] + p[7]);
        Self {
            data: [p[0], xy, xt, xy, p[4], yt, xt, yt, p[8]],
        }
    }

    /// Check symmetric positive-definiteness via leading principal minors.
    pub fn is_spd(&self) -> bool {
        let p = &self.data;
        let sym = (p[1] - p[3]).abs() < 1e-4
            && (p[2] - p[6]).abs() < 1e-4
            && (p[5] - p[7]).abs() < 1e-4;
        if !sym {
            return false;
        }
        let m1 = p[0];
        let m2 = p[0] * p[4] - p[1] * p[3];
        let m3 = p[0] * (p[4] * p[8] - p[5] * p[7]) - p[1] * (p[3] * p[8] - p[5] * p[6])
            + p[2] * (p[3] * p[7] - p[4] * p[6]);
        m1 > 0.0 && m2 > 0.0 && m3 > 0.0
    }
}

impl Default for Covariance2D {
    fn default() -> Self {
        Self::zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn test_point_distance() {
        let a = Point2D::new(0.0, 0.0);
        let b = Point2D::new(3.0, 4.0);
        assert_relative_eq!(a.distance(&b), 5.0);
        assert_relative_eq!(a.distance_squared(&b), 25.0);
    }

    #[test]
    fn test_bearing_to() {
        let a = Point2D::new(1.0, 1.0);
        let b = Point2D::new(1.0, 2.0);
        assert_relative_eq!(a.bearing_to(&b), FRAC_PI_2);
    }

    #[test]
    fn test_pose_compose_identity() {
        let p = Pose2D::new(1.0, 2.0, 0.5);
        let result = p.compose(&Pose2D::identity());
        assert_relative_eq!(result.x, p.x);
        assert_relative_eq!(result.y, p.y);
        assert_relative_eq!(result.theta, p.theta);
    }

    #[test]
    fn test_pose_composition_order() {
        let move_forward = Pose2D::new(1.0, 0.0, 0.0);
        let rotate = Pose2D::new(0.0, 0.0, FRAC_PI_2);

        let result = rotate.compose(&move_forward);
        assert_relative_eq!(result.x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(result.y, 1.0, epsilon = 1e-6);
        assert_relative_eq!(result.theta, FRAC_PI_2, epsilon = 1e-6);
    }

    #[test]
    fn test_transform_point_roundtrip() {
        let pose = Pose2D::new(1.0, -2.0, 0.7);
        let p = Point2D::new(0.5, 1.5);
        let global = pose.transform_point(&p);
        let local = pose.inverse_transform_point(&global);
        assert_relative_eq!(local.x, p.x, epsilon = 1e-5);
        assert_relative_eq!(local.y, p.y, epsilon = 1e-5);
    }

    #[test]
    fn test_covariance_spd() {
        assert!(Covariance2D::diagonal(0.1, 0.1, 0.05).is_spd());
        assert!(!Covariance2D::zero().is_spd());
        assert!(!Covariance2D::diagonal(-0.1, 0.1, 0.05).is_spd());
    }

    #[test]
    fn test_covariance_symmetrize() {
        let p = Covariance2D::from_array([1.0, 0.2, 0.0, 0.1, 1.0, 0.0, 0.0, 0.0, 0.5]);
        let s = p.symmetrized();
        let d = s.as_slice();
        assert_relative_eq!(d[1], d[3]);
        assert_relative_eq!(d[1], 0.15);
    }
}
