//! Extended Kalman filter fusing wheel odometry, IMU yaw rate and GNSS.
//!
//! # State Representation
//!
//! The filter tracks pose (x, y, θ) with a 3×3 covariance; linear and
//! angular velocity ride along as derived state without covariance.
//!
//! # Algorithm
//!
//! 1. **Prediction** at the encoder rate: differential-drive kinematics,
//!    with heading change taken from a complementary blend of the IMU yaw
//!    rate (primary) and differential-wheel odometry (secondary).
//! 2. **Update** on each accepted GNSS fix: the fix is projected into the
//!    local frame anchored at the first accepted fix, and fused with a
//!    measurement covariance scaled by HDOP².
//! 3. **Gating**: fixes whose innovation exceeds `k·sqrt(S)` are rejected
//!    as outliers and only counted.
//!
//! The yaw-rate bias is estimated whenever the vehicle is stationary (zero
//! encoder deltas) and subtracted from subsequent samples, so an
//! uncalibrated gyro does not turn dead reckoning into a slow pirouette.

use meadow_io::types::GnssFix;

use crate::core::geo::LocalFrame;
use crate::core::types::{Covariance2D, Point2D, Pose2D};
use crate::core::GeodeticPoint;

use super::wheel_odometry::OdometryDelta;

/// Time constant of the quality decay during GNSS dropout, seconds.
const QUALITY_DECAY_TAU: f32 = 20.0;

/// Samples averaged into the stationary gyro bias estimate.
const BIAS_WINDOW: f32 = 200.0;

/// Configuration for the fusion filter.
#[derive(Debug, Clone, Copy)]
pub struct EkfConfig {
    /// Scalar multiplier on the process covariance
    pub process_noise: f32,
    /// Scalar multiplier on the GNSS measurement covariance
    pub measurement_noise: f32,
    /// IMU weight in the complementary heading blend (0 = wheels only)
    pub gyro_blend_weight: f32,
    /// Fixes with HDOP at or above this are ignored
    pub hdop_bound: f32,
    /// Innovation gate multiplier k
    pub outlier_gate: f32,
}

impl Default for EkfConfig {
    fn default() -> Self {
        Self {
            process_noise: 0.1,
            measurement_noise: 0.5,
            gyro_blend_weight: 0.9,
            hdop_bound: 3.0,
            outlier_gate: 5.0,
        }
    }
}

/// Outcome of feeding one GNSS fix to the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GnssOutcome {
    /// First accepted fix; the local frame is now anchored here
    Anchored,
    /// Fix fused into the estimate
    Accepted,
    /// Fix failed the quality/HDOP gate and was ignored
    RejectedQuality,
    /// Fix failed the innovation gate and was ignored
    RejectedOutlier,
}

/// Published pose snapshot.
#[derive(Debug, Clone, Copy)]
pub struct PoseEstimate {
    pub pose: Pose2D,
    /// Body linear velocity, m/s
    pub linear_velocity: f32,
    /// Body angular velocity, rad/s
    pub angular_velocity: f32,
    pub covariance: Covariance2D,
    /// Localization quality in [0, 1]
    pub quality: f32,
    /// Monotonic ns of the last prediction
    pub timestamp_ns: u64,
}

/// The fusion filter.
#[derive(Debug)]
pub struct FusionEkf {
    config: EkfConfig,
    pose: Pose2D,
    covariance: Covariance2D,
    linear_velocity: f32,
    angular_velocity: f32,
    /// Anchored once the first acceptable fix arrives
    frame: Option<LocalFrame>,
    quality: f32,
    /// Running stationary gyro bias estimate, rad/s
    gyro_bias: f32,
    bias_initialized: bool,
    outliers_rejected: u32,
    last_timestamp_ns: u64,
}

impl FusionEkf {
    /// Create a filter at the origin with large position uncertainty.
    pub fn new(config: EkfConfig) -> Self {
        Self {
            config,
            pose: Pose2D::identity(),
            // Large prior: we genuinely do not know where we are until the
            // anchor fix arrives
            covariance: Covariance2D::diagonal(100.0, 100.0, 0.05),
            linear_velocity: 0.0,
            angular_velocity: 0.0,
            frame: None,
            quality: 0.0,
            gyro_bias: 0.0,
            bias_initialized: false,
            outliers_rejected: 0,
            last_timestamp_ns: 0,
        }
    }

    /// The local frame, once anchored.
    pub fn frame(&self) -> Option<LocalFrame> {
        self.frame
    }

    /// GNSS fixes rejected by the innovation gate so far.
    pub fn outliers_rejected(&self) -> u32 {
        self.outliers_rejected
    }

    /// Current snapshot.
    pub fn estimate(&self) -> PoseEstimate {
        PoseEstimate {
            pose: self.pose,
            linear_velocity: self.linear_velocity,
            angular_velocity: self.angular_velocity,
            covariance: self.covariance,
            quality: self.quality,
            timestamp_ns: self.last_timestamp_ns,
        }
    }

    /// Prediction step at the encoder rate.
    ///
    /// `gyro_z` is the calibrated-or-raw yaw rate in rad/s, or `None` when
    /// the IMU is unavailable (wheel-only fallback with widened heading
    /// noise).
    pub fn predict(&mut self, odom: &OdometryDelta, gyro_z: Option<f32>, dt: f32, now_ns: u64) {
        let stationary = odom.distance.abs() < 1e-6 && odom.delta.theta.abs() < 1e-6;

        // Stationary periods are the bias calibration opportunity: whatever
        // the gyro reads now is bias.
        if stationary {
            if let Some(gz) = gyro_z {
                if self.bias_initialized {
                    self.gyro_bias += (gz - self.gyro_bias) / BIAS_WINDOW;
                } else {
                    self.gyro_bias = gz;
                    self.bias_initialized = true;
                }
            }
        }

        let dtheta_encoder = odom.delta.theta;
        let (dtheta, imu_used) = match gyro_z {
            Some(gz) if !stationary && dt > 0.0 => {
                let dtheta_gyro = (gz - self.gyro_bias) * dt;
                let alpha = self.config.gyro_blend_weight;
                (alpha * dtheta_gyro + (1.0 - alpha) * dtheta_encoder, true)
            }
            // Stationary: the encoders say we are not turning, and they are
            // right; residual gyro bias must not leak in.
            _ => (dtheta_encoder, false),
        };

        let fused_delta = Pose2D::new(odom.delta.x, odom.delta.y, dtheta);
        self.pose = self.pose.compose(&fused_delta);

        if dt > 0.0 {
            self.linear_velocity = odom.distance / dt;
            self.angular_velocity = dtheta / dt;
        }

        // Process noise grows with motion magnitude
        let distance = odom.distance.abs();
        let rotation = dtheta.abs();
        let q_scale = self.config.process_noise;
        let q_xx = q_scale * 0.01 * distance + 1e-9;
        let q_yy = q_xx;
        // Wheel-only heading is noticeably worse than the blended one
        let heading_noise = if imu_used { 0.01 } else { 0.05 };
        let q_tt = q_scale * heading_noise * rotation + 1e-10;

        // Jacobian of the motion model with respect to state:
        // | 1  0  f02 |        f02 = -δx·sin(θ) - δy·cos(θ)
        // | 0  1  f12 |        f12 =  δx·cos(θ) - δy·sin(θ)
        // | 0  0  1   |
        let (sin_t, cos_t) = self.pose.theta.sin_cos();
        let f02 = -fused_delta.x * sin_t - fused_delta.y * cos_t;
        let f12 = fused_delta.x * cos_t - fused_delta.y * sin_t;

        let p = self.covariance.as_slice();

        // P · Fᵀ
        let pft00 = p[0] + p[2] * f02;
        let pft01 = p[1] + p[2] * f12;
        let pft02 = p[2];
        let pft10 = p[3] + p[5] * f02;
        let pft11 = p[4] + p[5] * f12;
        let pft12 = p[5];
        let pft20 = p[6] + p[8] * f02;
        let pft21 = p[7] + p[8] * f12;
        let pft22 = p[8];

        // F · (P · Fᵀ) + Q
        let new_p = [
            pft00 + f02 * pft20 + q_xx,
            pft01 + f02 * pft21,
            pft02 + f02 * pft22,
            pft10 + f12 * pft20,
            pft11 + f12 * pft21 + q_yy,
            pft12 + f12 * pft22,
            pft20,
            pft21,
            pft22 + q_tt,
        ];

        self.covariance = Covariance2D::from_array(new_p).symmetrized();

        // Quality decays while GNSS is silent
        if dt > 0.0 {
            self.quality *= (-dt / QUALITY_DECAY_TAU).exp();
        }

        self.last_timestamp_ns = now_ns;
    }

    /// Measurement update with a GNSS fix.
    pub fn update_gnss(&mut self, fix: &GnssFix) -> GnssOutcome {
        if !fix.is_acceptable(self.config.hdop_bound) {
            return GnssOutcome::RejectedQuality;
        }

        let geo = GeodeticPoint::new(fix.latitude, fix.longitude);

        let frame = match self.frame {
            Some(frame) => frame,
            None => {
                // First accepted fix: anchor the frame here and collapse the
                // position covariance to the receiver's accuracy
                let frame = LocalFrame::new(geo);
                self.frame = Some(frame);
                self.pose = Pose2D::new(0.0, 0.0, self.pose.theta);

                let var = self.measurement_variance(fix.hdop);
                let p = self.covariance.as_slice();
                self.covariance = Covariance2D::from_array([
                    var, 0.0, 0.0, 0.0, var, 0.0, 0.0, 0.0, p[8],
                ]);
                self.quality = 1.0;
                return GnssOutcome::Anchored;
            }
        };

        let z = frame.to_local(&geo);
        let innovation = Point2D::new(z.x - self.pose.x, z.y - self.pose.y);

        // Innovation covariance S = H·P·Hᵀ + R with H = [I₂ 0]
        let p = self.covariance.as_slice();
        let r = self.measurement_variance(fix.hdop);
        let s00 = p[0] + r;
        let s01 = p[1];
        let s10 = p[3];
        let s11 = p[4] + r;

        let det = s00 * s11 - s01 * s10;
        if det.abs() < 1e-12 {
            return GnssOutcome::RejectedOutlier;
        }
        let inv00 = s11 / det;
        let inv01 = -s01 / det;
        let inv10 = -s10 / det;
        let inv11 = s00 / det;

        // Mahalanobis distance of the innovation
        let m2 = innovation.x * (inv00 * innovation.x + inv01 * innovation.y)
            + innovation.y * (inv10 * innovation.x + inv11 * innovation.y);
        let gate = self.config.outlier_gate;
        if m2 > gate * gate {
            self.outliers_rejected += 1;
            tracing::debug!(
                "GNSS outlier rejected: innovation ({:.2}, {:.2}) m, mahalanobis {:.1}",
                innovation.x,
                innovation.y,
                m2.sqrt()
            );
            return GnssOutcome::RejectedOutlier;
        }

        // Kalman gain K = P·Hᵀ·S⁻¹ (3×2), using the first two columns of P
        let k00 = p[0] * inv00 + p[1] * inv10;
        let k01 = p[0] * inv01 + p[1] * inv11;
        let k10 = p[3] * inv00 + p[4] * inv10;
        let k11 = p[3] * inv01 + p[4] * inv11;
        let k20 = p[6] * inv00 + p[7] * inv10;
        let k21 = p[6] * inv01 + p[7] * inv11;

        self.pose = Pose2D::new(
            self.pose.x + k00 * innovation.x + k01 * innovation.y,
            self.pose.y + k10 * innovation.x + k11 * innovation.y,
            self.pose.theta + k20 * innovation.x + k21 * innovation.y,
        );

        // P' = (I − K·H)·P, with K·H filling the first two columns
        let a00 = 1.0 - k00;
        let a01 = -k01;
        let a10 = -k10;
        let a11 = 1.0 - k11;
        let a20 = -k20;
        let a21 = -k21;

        let new_p = [
            a00 * p[0] + a01 * p[3],
            a00 * p[1] + a01 * p[4],
            a00 * p[2] + a01 * p[5],
            a10 * p[0] + a11 * p[3],
            a10 * p[1] + a11 * p[4],
            a10 * p[2] + a11 * p[5],
            a20 * p[0] + a21 * p[3] + p[6],
            a20 * p[1] + a21 * p[4] + p[7],
            a20 * p[2] + a21 * p[5] + p[8],
        ];
        self.covariance = Covariance2D::from_array(new_p).symmetrized();

        // Healthy GNSS with a small innovation pulls quality back toward 1
        self.quality = 1.0 / (1.0 + m2.sqrt());

        GnssOutcome::Accepted
    }

    /// GNSS measurement variance scaled by HDOP².
    #[inline]
    fn measurement_variance(&self, hdop: f32) -> f32 {
        let hdop = hdop.max(0.5);
        self.config.measurement_noise * hdop * hdop
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::localization::{WheelOdometry, WheelOdometryConfig};
    use approx::assert_relative_eq;
    use meadow_io::types::FixQuality;

    fn odometry() -> WheelOdometry {
        WheelOdometry::new(WheelOdometryConfig {
            ticks_per_meter: 1000.0 / (std::f32::consts::PI * 0.065),
            wheel_base: 0.235,
        })
    }

    fn fix(lat: f64, lon: f64, hdop: f32) -> GnssFix {
        GnssFix {
            latitude: lat,
            longitude: lon,
            quality: FixQuality::Fix3D,
            hdop,
            timestamp_monotonic: 0,
        }
    }

    #[test]
    fn test_straight_line_dead_reckoning() {
        // 1000 ticks on both wheels over 5 s, zero IMU yaw: final pose
        // x ≈ 0.204 m within 2 mm
        let mut ekf = FusionEkf::new(EkfConfig::default());
        let mut odom = odometry();
        odom.update(0, 0);

        let steps = 50u16;
        let dt = 5.0 / steps as f32;
        for i in 1..=steps {
            let ticks = i * (1000 / steps);
            let delta = odom.update(ticks, ticks).unwrap();
            ekf.predict(&delta, Some(0.0), dt, (i as u64) * 100_000_000);
        }

        let est = ekf.estimate();
        assert_relative_eq!(est.pose.x, 0.2042, epsilon = 0.002);
        assert_relative_eq!(est.pose.y, 0.0, epsilon = 1e-4);
        assert_relative_eq!(est.pose.theta, 0.0, epsilon = 1e-4);
    }

    #[test]
    fn test_in_place_turn_fused() {
        // Left +500, right −500 with wheel_base 0.235: |Δθ| ≈ 0.868 rad,
        // fused heading within 2° of the analytic answer
        let mut ekf = FusionEkf::new(EkfConfig::default());
        let mut odom = odometry();
        odom.update(0, 0);

        let expected = -2.0 * (500.0 / (1000.0 / (std::f32::consts::PI * 0.065))) / 0.235;

        // Gyro agrees with the wheels: expected rate over 2 s
        let steps = 20u16;
        let dt = 2.0 / steps as f32;
        let gyro_rate = expected / 2.0;
        for i in 1..=steps {
            let l = i * (500 / steps);
            let r = 0u16.wrapping_sub(i * (500 / steps));
            let delta = odom.update(l, r).unwrap();
            ekf.predict(&delta, Some(gyro_rate), dt, (i as u64) * 100_000_000);
        }

        let est = ekf.estimate();
        let two_degrees = 2.0f32.to_radians();
        assert!(
            (est.pose.theta - expected).abs() < two_degrees,
            "theta {} expected {}",
            est.pose.theta,
            expected
        );
    }

    #[test]
    fn test_first_fix_anchors_and_collapses_covariance() {
        let mut ekf = FusionEkf::new(EkfConfig::default());
        assert!(ekf.frame().is_none());
        assert!(ekf.estimate().covariance.var_x() > 10.0);

        let outcome = ekf.update_gnss(&fix(39.9334, 32.8597, 1.0));
        assert_eq!(outcome, GnssOutcome::Anchored);
        assert!(ekf.frame().is_some());
        assert!(ekf.estimate().covariance.var_x() < 1.0);
        assert_relative_eq!(ekf.estimate().quality, 1.0);
    }

    #[test]
    fn test_high_hdop_fix_leaves_state_unchanged() {
        let mut ekf = FusionEkf::new(EkfConfig::default());
        ekf.update_gnss(&fix(39.9334, 32.8597, 1.0));
        let before = ekf.estimate();

        let outcome = ekf.update_gnss(&fix(39.9340, 32.8590, 8.0));
        assert_eq!(outcome, GnssOutcome::RejectedQuality);

        let after = ekf.estimate();
        assert_eq!(before.pose, after.pose);
        assert_eq!(before.covariance, after.covariance);
    }

    #[test]
    fn test_no_fix_quality_rejected() {
        let mut ekf = FusionEkf::new(EkfConfig::default());
        let mut bad = fix(39.9334, 32.8597, 1.0);
        bad.quality = FixQuality::NoFix;
        assert_eq!(ekf.update_gnss(&bad), GnssOutcome::RejectedQuality);
        assert!(ekf.frame().is_none());
    }

    #[test]
    fn test_outlier_fix_rejected() {
        let mut ekf = FusionEkf::new(EkfConfig::default());
        ekf.update_gnss(&fix(39.9334, 32.8597, 1.0));

        // A fix hundreds of meters away against a sub-meter covariance
        let outcome = ekf.update_gnss(&fix(39.9380, 32.8597, 1.0));
        assert_eq!(outcome, GnssOutcome::RejectedOutlier);
        assert_eq!(ekf.outliers_rejected(), 1);
    }

    #[test]
    fn test_gnss_pulls_position() {
        let mut ekf = FusionEkf::new(EkfConfig::default());
        ekf.update_gnss(&fix(39.9334, 32.8597, 1.0));

        // Dead-reckon forward 2 m with inflated covariance along the way
        let mut odom = odometry();
        odom.update(0, 0);
        for i in 1..=20u16 {
            let ticks = i * 500;
            if let Some(delta) = odom.update(ticks, ticks) {
                ekf.predict(&delta, Some(0.0), 0.1, (i as u64) * 100_000_000);
            }
        }
        let x_before = ekf.estimate().pose.x;

        // A fix a bit north of the anchor pulls y upward
        let frame = ekf.frame().unwrap();
        let target = frame.to_geodetic(&Point2D::new(x_before, 0.5));
        let outcome = ekf.update_gnss(&fix(target.latitude, target.longitude, 1.0));
        assert_eq!(outcome, GnssOutcome::Accepted);
        assert!(ekf.estimate().pose.y > 0.0);
    }

    #[test]
    fn test_quality_decays_during_dropout() {
        let mut ekf = FusionEkf::new(EkfConfig::default());
        ekf.update_gnss(&fix(39.9334, 32.8597, 1.0));
        assert_relative_eq!(ekf.estimate().quality, 1.0);

        let mut odom = odometry();
        odom.update(0, 0);
        for i in 1..=100u16 {
            let ticks = i * 100;
            if let Some(delta) = odom.update(ticks, ticks) {
                ekf.predict(&delta, Some(0.0), 0.5, (i as u64) * 500_000_000);
            }
        }
        // 50 s without GNSS
        assert!(ekf.estimate().quality < 0.2);
    }

    #[test]
    fn test_covariance_stays_spd() {
        let mut ekf = FusionEkf::new(EkfConfig::default());
        ekf.update_gnss(&fix(39.9334, 32.8597, 1.0));

        let mut odom = odometry();
        odom.update(0, 0);
        let frame = ekf.frame().unwrap();
        for i in 1..=200u32 {
            let ticks = (i * 137 % 65536) as u16;
            if let Some(delta) = odom.update(ticks, ticks.wrapping_add(40)) {
                ekf.predict(&delta, Some(0.05), 0.02, (i as u64) * 20_000_000);
            }
            if i % 50 == 0 {
                let here = ekf.estimate().pose;
                let geo = frame.to_geodetic(&Point2D::new(here.x + 0.2, here.y - 0.1));
                ekf.update_gnss(&fix(geo.latitude, geo.longitude, 1.5));
            }
            assert!(
                ekf.estimate().covariance.is_spd(),
                "covariance lost SPD at step {}",
                i
            );
            assert!(ekf.estimate().pose.theta.abs() <= std::f32::consts::PI);
        }
    }

    #[test]
    fn test_stationary_gyro_bias_learned() {
        let mut ekf = FusionEkf::new(EkfConfig::default());
        let still = OdometryDelta {
            delta: Pose2D::identity(),
            distance: 0.0,
        };
        // Sit still with a biased gyro
        for i in 0..300u64 {
            ekf.predict(&still, Some(0.02), 0.01, i * 10_000_000);
        }
        // Heading must not have drifted
        assert!(ekf.estimate().pose.theta.abs() < 1e-3);
        assert_relative_eq!(ekf.gyro_bias, 0.02, epsilon = 1e-4);
    }
}
