//! Vision thread: fiducial detection as frames arrive.
//!
//! Decoupled from the control rates; each captured frame runs the
//! detection pipeline and the smoothed detections are published as a
//! snapshot for the docking state machine and the supervisor's clearance
//! channel.

use std::sync::Arc;
use std::time::Duration;

use meadow_io::clock::monotonic_ns;
use meadow_io::ports::CameraSource;

use crate::config::Config;
use crate::shared::SharedState;
use crate::vision::{
    CameraExtrinsics, CameraIntrinsics, DetectionTracker, DetectorParams, FiducialDetector,
};

/// Poll interval when no frame is ready.
const IDLE_SLEEP: Duration = Duration::from_millis(20);

/// Vision thread state and logic.
pub struct VisionThread {
    shared: Arc<SharedState>,
    camera: Box<dyn CameraSource>,
    detector: FiducialDetector,
    tracker: DetectionTracker,
}

impl VisionThread {
    pub fn new(config: Config, shared: Arc<SharedState>, camera: Box<dyn CameraSource>) -> Self {
        let apriltag = &config.charging.apriltag;

        let intrinsics = CameraIntrinsics::from_matrix(
            &apriltag.camera_matrix,
            &apriltag.distortion_coeffs,
        );

        let detector = FiducialDetector::new(
            DetectorParams {
                family_bits: apriltag.family.bits,
                codewords: apriltag.family.codewords.clone(),
                max_hamming: apriltag.family.max_hamming,
                tag_size: apriltag.tag_size,
                min_perimeter_rate: apriltag.detection.min_marker_perimeter_rate,
                max_perimeter_rate: apriltag.detection.max_marker_perimeter_rate,
                min_confidence: apriltag.detection.min_confidence,
                max_detection_distance: apriltag.detection.max_detection_distance,
                ..DetectorParams::default()
            },
            intrinsics,
            CameraExtrinsics::default(),
        );

        let tracker = DetectionTracker::new(apriltag.tracking_history, apriltag.obstacle_timeout);

        Self {
            shared,
            camera,
            detector,
            tracker,
        }
    }

    /// Run the vision loop until shutdown.
    pub fn run(&mut self) {
        tracing::info!("Vision thread started");

        while !self.shared.should_shutdown() {
            let now = monotonic_ns();
            self.shared.heartbeats.beat("vision", now);
            let camera_health = self.camera.health();
            self.shared.update_port_health(|h| h.camera = camera_health);

            match self.camera.frame() {
                Ok(Some(frame)) => {
                    let raw = self.detector.detect(&frame);
                    if !raw.is_empty() {
                        tracing::trace!("{} marker(s) in frame", raw.len());
                    }
                    let smoothed = self.tracker.update(&raw, now);
                    self.shared.publish_detections(smoothed);
                }
                Ok(None) => {
                    // Let evictions age out stale detections even without
                    // new frames
                    let smoothed = self.tracker.update(&[], now);
                    self.shared.publish_detections(smoothed);
                    std::thread::sleep(IDLE_SLEEP);
                }
                Err(e) => {
                    tracing::warn!("Camera read failed: {}", e);
                    std::thread::sleep(IDLE_SLEEP);
                }
            }
        }

        tracing::info!("Vision thread shutting down");
    }
}
