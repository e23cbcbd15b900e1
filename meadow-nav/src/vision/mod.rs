//! Fiducial vision engine.
//!
//! Classical pipeline on 8-bit luma frames: tile-based adaptive
//! thresholding, connected dark regions, quad extraction, codeword
//! decoding against the configured family, and planar pose recovery from
//! the calibrated intrinsics. Detections are smoothed over a short ring
//! buffer per marker.

mod detector;
mod homography;
mod intrinsics;
mod tracker;

pub use detector::{DetectorParams, FiducialDetector};
pub use homography::Homography;
pub use intrinsics::{CameraExtrinsics, CameraIntrinsics};
pub use tracker::DetectionTracker;

/// One decoded marker observation in the robot frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FiducialDetection {
    /// Decoded marker id (index into the family codeword list)
    pub marker_id: u32,
    /// Distance from the robot to the marker center, meters
    pub range_m: f32,
    /// Direction to the marker, radians, counter-clockwise positive
    pub bearing_rad: f32,
    /// Marker plane yaw relative to facing the robot head-on, radians
    pub yaw_offset_rad: f32,
    /// Decode and geometry confidence in [0, 1]
    pub confidence: f32,
    /// Capture timestamp of the source frame, monotonic ns
    pub frame_timestamp: u64,
    /// False when the tracker could not corroborate this detection
    pub smoothed: bool,
}
