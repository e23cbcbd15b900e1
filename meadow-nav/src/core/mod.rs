//! Core math and data types shared across the control stack.

pub mod geo;
pub mod math;
pub mod types;

pub use geo::{GeodeticPoint, LocalFrame};
pub use types::{Covariance2D, Point2D, Pose2D};
