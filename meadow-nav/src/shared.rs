//! Shared state for the multi-threaded control stack.
//!
//! Each published datum lives in its own snapshot cell: hot scalars in
//! lock-free atomics, compound snapshots behind short-lived RwLocks that
//! are only ever swapped, never held across a channel send or an actuator
//! write. The supervisor reads exclusively from these cells.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::RwLock;

use meadow_io::clock::monotonic_ns;
use meadow_io::health::PortHealth;
use meadow_io::types::{BatteryState, MotionCommand, Velocity2D};

use crate::core::geo::LocalFrame;
use crate::core::types::{Covariance2D, Pose2D};
use crate::localization::PoseEstimate;
use crate::mission::{Directive, StatusSnapshot};
use crate::vision::FiducialDetection;

/// Atomic wrapper for f32 values.
/// Uses AtomicU32 with bit reinterpretation.
#[derive(Debug)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(val: f32) -> Self {
        Self(AtomicU32::new(val.to_bits()))
    }

    pub fn load(&self, order: Ordering) -> f32 {
        f32::from_bits(self.0.load(order))
    }

    pub fn store(&self, val: f32, order: Ordering) {
        self.0.store(val.to_bits(), order);
    }
}

/// Atomic wrapper for Pose2D.
/// Packs x, y into one u64 (as i32 millimeters) and theta into a
/// fixed-point u32 for lock-free access.
#[derive(Debug)]
pub struct AtomicPose {
    xy: AtomicU64,
    theta: AtomicU32,
}

impl AtomicPose {
    pub fn new(pose: Pose2D) -> Self {
        let cell = Self {
            xy: AtomicU64::new(0),
            theta: AtomicU32::new(0),
        };
        cell.store(pose, Ordering::Relaxed);
        cell
    }

    pub fn load(&self, order: Ordering) -> Pose2D {
        let xy = self.xy.load(order);
        let x_mm = (xy >> 32) as i32;
        let y_mm = xy as i32;
        let theta_fp = self.theta.load(order) as i32;

        Pose2D::new(
            x_mm as f32 / 1000.0,
            y_mm as f32 / 1000.0,
            theta_fp as f32 / 10000.0,
        )
    }

    pub fn store(&self, pose: Pose2D, order: Ordering) {
        let x_mm = (pose.x * 1000.0) as i32;
        let y_mm = (pose.y * 1000.0) as i32;
        let xy = ((x_mm as u64) << 32) | (y_mm as u32 as u64);
        let theta = (pose.theta * 10000.0) as i32 as u32;

        self.xy.store(xy, order);
        self.theta.store(theta, order);
    }
}

/// Periodic tasks covered by the supervisor watchdog.
pub const WATCHED_TASKS: [&str; 4] = ["sensor", "planner", "vision", "mission"];

/// Heartbeat stamps for the watchdog.
///
/// Each periodic task beats its slot every cycle; the supervisor compares
/// stamps against the timeout on its own tick.
#[derive(Debug)]
pub struct Heartbeats {
    stamps: [AtomicU64; 4],
}

impl Heartbeats {
    fn new() -> Self {
        let now = monotonic_ns();
        Self {
            stamps: [
                AtomicU64::new(now),
                AtomicU64::new(now),
                AtomicU64::new(now),
                AtomicU64::new(now),
            ],
        }
    }

    fn slot(task: &str) -> Option<usize> {
        WATCHED_TASKS.iter().position(|&t| t == task)
    }

    /// Record a heartbeat for `task`.
    pub fn beat(&self, task: &str, now_ns: u64) {
        if let Some(i) = Self::slot(task) {
            self.stamps[i].store(now_ns, Ordering::Release);
        }
    }

    /// First task whose heartbeat is older than `timeout_secs`, if any.
    pub fn starved(&self, now_ns: u64, timeout_secs: f32) -> Option<&'static str> {
        let timeout_ns = (timeout_secs as f64 * 1e9) as u64;
        for (i, &task) in WATCHED_TASKS.iter().enumerate() {
            let stamp = self.stamps[i].load(Ordering::Acquire);
            if now_ns.saturating_sub(stamp) > timeout_ns {
                return Some(task);
            }
        }
        None
    }
}

/// Pose snapshot plus the derived quality scalar.
#[derive(Debug, Clone, Copy)]
pub struct PoseSnapshot {
    pub pose: Pose2D,
    pub velocity: Velocity2D,
    pub covariance: Covariance2D,
    pub quality: f32,
    pub timestamp_ns: u64,
}

impl Default for PoseSnapshot {
    fn default() -> Self {
        Self {
            pose: Pose2D::identity(),
            velocity: Velocity2D::default(),
            covariance: Covariance2D::diagonal(100.0, 100.0, 0.05),
            quality: 0.0,
            timestamp_ns: 0,
        }
    }
}

/// Discrete safety inputs mirrored from the input port.
#[derive(Debug, Default)]
pub struct DiscreteCells {
    pub bumper_left: AtomicBool,
    pub bumper_right: AtomicBool,
    pub estop: AtomicBool,
}

/// Port health probes mirrored into shared state by the owning threads.
///
/// The supervisor watchdog reads this snapshot; it never calls into a
/// port backend itself.
#[derive(Debug, Clone, Copy)]
pub struct PortHealthReport {
    pub drive: PortHealth,
    pub encoders: PortHealth,
    pub imu: PortHealth,
    pub gnss: PortHealth,
    pub camera: PortHealth,
    pub power: PortHealth,
    pub inputs: PortHealth,
}

impl Default for PortHealthReport {
    fn default() -> Self {
        // Ports are assumed healthy until their first probe lands, the
        // same grace the heartbeat stamps get at startup
        let fresh = PortHealth::ok_now();
        Self {
            drive: fresh,
            encoders: fresh,
            imu: fresh,
            gnss: fresh,
            camera: fresh,
            power: fresh,
            inputs: fresh,
        }
    }
}

/// Shared state between all threads.
pub struct SharedState {
    /// Fused pose published by the sensor thread
    pose: AtomicPose,
    pose_detail: RwLock<PoseSnapshot>,

    /// Local frame, anchored once the first GNSS fix is accepted
    frame: RwLock<Option<LocalFrame>>,

    /// Latest command proposed by the active producer, awaiting
    /// supervisor arbitration
    proposed: RwLock<Option<MotionCommand>>,

    /// Linear velocity of the last gated command actually written to the
    /// actuator. Stall detection judges this, not the proposal, so a
    /// supervisor brake releases the stall instead of latching it.
    gated_linear: AtomicF32,

    /// Battery state published by the sensor thread
    battery: RwLock<BatteryState>,

    /// Smoothed fiducial detections published by the vision thread
    detections: RwLock<Vec<FiducialDetection>>,

    /// Discrete safety inputs
    pub discrete: DiscreteCells,

    /// Worst-axis tilt, radians
    tilt: AtomicF32,

    /// Smallest clearance reported by any obstacle channel, meters
    min_clearance: AtomicF32,

    /// Distance from the fused position to the boundary polygon, meters
    boundary_margin: AtomicF32,

    /// Port health probes mirrored by the owning threads
    port_health: RwLock<PortHealthReport>,

    /// Localization degraded (prolonged GNSS loss)
    pub degraded: AtomicBool,

    /// Encoder stall under commanded motion
    pub stuck: AtomicBool,

    /// Watchdog heartbeats
    pub heartbeats: Heartbeats,

    /// E-stop requested through the operator boundary
    pub operator_estop: AtomicBool,

    /// Operator requested an emergency-latch reset
    pub reset_requested: AtomicBool,

    /// Mirror of the supervisor's emergency latch
    pub safety_latched: AtomicBool,

    /// Speed factor of the active navigation mode (set by the planner,
    /// enforced by the supervisor)
    mode_speed_factor: AtomicF32,

    /// What the planner should currently be doing (written by the mission
    /// thread)
    directive: RwLock<Directive>,

    /// Boundary status snapshot (written by the mission thread)
    status: RwLock<Option<StatusSnapshot>>,

    /// Cooperative shutdown flag
    shutdown: AtomicBool,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            pose: AtomicPose::new(Pose2D::identity()),
            pose_detail: RwLock::new(PoseSnapshot::default()),
            frame: RwLock::new(None),
            proposed: RwLock::new(None),
            gated_linear: AtomicF32::new(0.0),
            battery: RwLock::new(BatteryState::default()),
            detections: RwLock::new(Vec::new()),
            discrete: DiscreteCells::default(),
            tilt: AtomicF32::new(0.0),
            min_clearance: AtomicF32::new(f32::INFINITY),
            boundary_margin: AtomicF32::new(f32::INFINITY),
            port_health: RwLock::new(PortHealthReport::default()),
            degraded: AtomicBool::new(false),
            stuck: AtomicBool::new(false),
            heartbeats: Heartbeats::new(),
            operator_estop: AtomicBool::new(false),
            reset_requested: AtomicBool::new(false),
            safety_latched: AtomicBool::new(false),
            mode_speed_factor: AtomicF32::new(1.0),
            directive: RwLock::new(Directive::Hold),
            status: RwLock::new(None),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Fast pose read (lock-free, millimeter resolution).
    pub fn pose(&self) -> Pose2D {
        self.pose.load(Ordering::Acquire)
    }

    /// Full pose snapshot with covariance and quality.
    pub fn pose_snapshot(&self) -> PoseSnapshot {
        match self.pose_detail.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Publish a new fused estimate (sensor thread only).
    ///
    /// Timestamps are monotonic: an older estimate never replaces a newer
    /// snapshot.
    pub fn publish_pose(&self, estimate: &PoseEstimate) {
        if let Ok(mut guard) = self.pose_detail.write() {
            if estimate.timestamp_ns < guard.timestamp_ns {
                return;
            }
            *guard = PoseSnapshot {
                pose: estimate.pose,
                velocity: Velocity2D::new(estimate.linear_velocity, estimate.angular_velocity),
                covariance: estimate.covariance,
                quality: estimate.quality,
                timestamp_ns: estimate.timestamp_ns,
            };
        }
        self.pose.store(estimate.pose, Ordering::Release);
    }

    pub fn frame(&self) -> Option<LocalFrame> {
        self.frame.read().ok().and_then(|g| *g)
    }

    pub fn set_frame(&self, frame: LocalFrame) {
        if let Ok(mut guard) = self.frame.write() {
            *guard = Some(frame);
        }
    }

    /// Latest proposed command, if any (supervisor side).
    pub fn proposed_command(&self) -> Option<MotionCommand> {
        self.proposed.read().ok().and_then(|g| *g)
    }

    /// Propose a command for arbitration (producer side).
    pub fn propose_command(&self, command: MotionCommand) {
        if let Ok(mut guard) = self.proposed.write() {
            *guard = Some(command);
        }
    }

    /// Linear velocity of the last command written to the actuator.
    pub fn gated_linear(&self) -> f32 {
        self.gated_linear.load(Ordering::Acquire)
    }

    /// Record the executed command (supervisor only).
    pub fn set_gated_linear(&self, linear: f32) {
        self.gated_linear.store(linear, Ordering::Release);
    }

    pub fn battery(&self) -> BatteryState {
        match self.battery.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn set_battery(&self, state: BatteryState) {
        if let Ok(mut guard) = self.battery.write() {
            *guard = state;
        }
    }

    pub fn detections(&self) -> Vec<FiducialDetection> {
        self.detections.read().map(|g| g.clone()).unwrap_or_default()
    }

    /// The smoothed observation of one marker, if currently tracked.
    pub fn detection_of(&self, marker_id: u32) -> Option<FiducialDetection> {
        self.detections
            .read()
            .ok()
            .and_then(|g| g.iter().find(|d| d.marker_id == marker_id).copied())
    }

    pub fn publish_detections(&self, detections: Vec<FiducialDetection>) {
        if let Ok(mut guard) = self.detections.write() {
            *guard = detections;
        }
    }

    pub fn tilt(&self) -> f32 {
        self.tilt.load(Ordering::Acquire)
    }

    pub fn set_tilt(&self, tilt: f32) {
        self.tilt.store(tilt, Ordering::Release);
    }

    /// Smallest obstacle clearance, or `None` when nothing is near.
    pub fn min_clearance(&self) -> Option<f32> {
        let v = self.min_clearance.load(Ordering::Acquire);
        v.is_finite().then_some(v)
    }

    pub fn set_min_clearance(&self, clearance: Option<f32>) {
        self.min_clearance
            .store(clearance.unwrap_or(f32::INFINITY), Ordering::Release);
    }

    /// Distance to the boundary, or `None` when no geofence is active.
    pub fn boundary_margin(&self) -> Option<f32> {
        let v = self.boundary_margin.load(Ordering::Acquire);
        v.is_finite().then_some(v)
    }

    pub fn set_boundary_margin(&self, margin: Option<f32>) {
        self.boundary_margin
            .store(margin.unwrap_or(f32::INFINITY), Ordering::Release);
    }

    /// Latest mirrored port health probes.
    pub fn port_health(&self) -> PortHealthReport {
        match self.port_health.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Update a subset of the port health report (owning threads only).
    pub fn update_port_health(&self, update: impl FnOnce(&mut PortHealthReport)) {
        if let Ok(mut guard) = self.port_health.write() {
            update(&mut guard);
        }
    }

    pub fn mode_speed_factor(&self) -> f32 {
        self.mode_speed_factor.load(Ordering::Acquire)
    }

    pub fn set_mode_speed_factor(&self, factor: f32) {
        self.mode_speed_factor.store(factor, Ordering::Release);
    }

    pub fn directive(&self) -> Directive {
        match self.directive.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn set_directive(&self, directive: Directive) {
        if let Ok(mut guard) = self.directive.write() {
            *guard = directive;
        }
    }

    pub fn status(&self) -> Option<StatusSnapshot> {
        self.status.read().ok().and_then(|g| g.clone())
    }

    pub fn publish_status(&self, status: StatusSnapshot) {
        if let Ok(mut guard) = self.status.write() {
            *guard = Some(status);
        }
    }

    pub fn signal_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn should_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_atomic_pose_roundtrip() {
        let cell = AtomicPose::new(Pose2D::identity());
        let pose = Pose2D::new(-12.345, 67.891, -2.5);
        cell.store(pose, Ordering::Release);

        let loaded = cell.load(Ordering::Acquire);
        assert_relative_eq!(loaded.x, pose.x, epsilon = 1e-3);
        assert_relative_eq!(loaded.y, pose.y, epsilon = 1e-3);
        assert_relative_eq!(loaded.theta, pose.theta, epsilon = 1e-3);
    }

    #[test]
    fn test_pose_publication_is_monotonic() {
        let shared = SharedState::new();

        let newer = PoseEstimate {
            pose: Pose2D::new(1.0, 0.0, 0.0),
            linear_velocity: 0.1,
            angular_velocity: 0.0,
            covariance: Covariance2D::diagonal(0.1, 0.1, 0.01),
            quality: 0.9,
            timestamp_ns: 2_000,
        };
        shared.publish_pose(&newer);

        let stale = PoseEstimate {
            pose: Pose2D::new(9.0, 9.0, 0.0),
            timestamp_ns: 1_000,
            ..newer
        };
        shared.publish_pose(&stale);

        // The detailed snapshot never goes backwards in time
        assert_eq!(shared.pose_snapshot().timestamp_ns, 2_000);
        assert_relative_eq!(shared.pose_snapshot().pose.x, 1.0);
    }

    #[test]
    fn test_heartbeat_starvation() {
        let beats = Heartbeats::new();
        let now = monotonic_ns();
        for task in WATCHED_TASKS {
            beats.beat(task, now);
        }
        assert_eq!(beats.starved(now, 0.5), None);

        // One second later, nobody has beaten
        let later = now + 1_000_000_000;
        assert_eq!(beats.starved(later, 0.5), Some("sensor"));

        beats.beat("sensor", later);
        assert_eq!(beats.starved(later, 0.5), Some("planner"));
    }

    #[test]
    fn test_min_clearance_none_when_clear() {
        let shared = SharedState::new();
        assert_eq!(shared.min_clearance(), None);

        shared.set_min_clearance(Some(0.4));
        assert_eq!(shared.min_clearance(), Some(0.4));

        shared.set_min_clearance(None);
        assert_eq!(shared.min_clearance(), None);
    }

    #[test]
    fn test_boundary_margin_cell() {
        let shared = SharedState::new();
        assert_eq!(shared.boundary_margin(), None);

        shared.set_boundary_margin(Some(0.8));
        assert_eq!(shared.boundary_margin(), Some(0.8));

        shared.set_boundary_margin(None);
        assert_eq!(shared.boundary_margin(), None);
    }

    #[test]
    fn test_port_health_mirror() {
        let shared = SharedState::new();
        // Fresh by default (startup grace)
        let now = monotonic_ns();
        assert!(shared.port_health().encoders.is_fresh(now, 0.5));

        shared.update_port_health(|h| h.encoders = PortHealth::failed_now());
        assert!(!shared.port_health().encoders.is_fresh(now, 0.5));
        // Other ports untouched
        assert!(shared.port_health().inputs.is_fresh(now, 0.5));
    }

    #[test]
    fn test_proposed_command_cell() {
        let shared = SharedState::new();
        assert!(shared.proposed_command().is_none());

        let cmd = MotionCommand::new(0.2, 0.1, 123);
        shared.propose_command(cmd);
        assert_eq!(shared.proposed_command(), Some(cmd));
    }
}
