//! Sensor fusion and localization.
//!
//! Wheel odometry feeds the prediction step of an extended Kalman filter;
//! IMU yaw rate is blended into the heading prediction; accepted GNSS fixes
//! provide the position update. The output is a continuously published pose
//! estimate with a quality scalar that decays through GNSS dropouts.

mod ekf;
mod stall;
mod wheel_odometry;

pub use ekf::{EkfConfig, FusionEkf, GnssOutcome, PoseEstimate};
pub use stall::StallDetector;
pub use wheel_odometry::{OdometryDelta, WheelOdometry, WheelOdometryConfig};
