//! Two-phase docking state machine.
//!
//! Coarse geospatial navigation toward the dock's GNSS position hands over
//! to fiducial-guided approach: rotate-in-place search, coarse approach on
//! marker line-of-sight micro-goals, precision alignment on (range,
//! bearing, yaw), then a creep-forward contact phase confirmed by the
//! dock-bus current sensor.
//!
//! The transition out of the traverse phase is one-way; once the marker has
//! been sighted the machine never falls back to GNSS guidance, which is
//! what keeps the detection-range boundary from oscillating.

use meadow_io::types::Velocity2D;

use crate::config::{AprilTagConfig, GpsDockConfig};
use crate::core::types::Point2D;
use crate::vision::FiducialDetection;

/// Hysteresis on the monotone-range guard, meters.
const RANGE_REGRESSION_EPSILON: f32 = 0.25;

/// Docking phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DockingState {
    /// GNSS-guided waypoint traversal toward the dock
    GnssTraverse,
    /// Rotate in place hunting for the dock marker
    Search,
    /// Drive micro-goals along the marker's line of sight
    CoarseApproach,
    /// Closed-loop alignment on range, bearing and yaw offset
    Precision,
    /// Creep forward until charge current confirms contact
    Contact,
    /// Terminal: charging confirmed
    Docked,
    /// Terminal: gave up
    Failed,
}

impl DockingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DockingState::GnssTraverse => "GNSS_TRAVERSE",
            DockingState::Search => "SEARCH",
            DockingState::CoarseApproach => "COARSE_APPROACH",
            DockingState::Precision => "PRECISION",
            DockingState::Contact => "CONTACT",
            DockingState::Docked => "DOCKED",
            DockingState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DockingState::Docked | DockingState::Failed)
    }
}

/// What the docking machine wants from the motion stack this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DockingAction {
    /// Keep following the planned path to the dock (traverse phase)
    FollowPath,
    /// Feed the local planner this micro-goal, speed-capped
    MicroGoal { target: Point2D, speed_cap: f32 },
    /// Drive this velocity directly (still supervisor-gated)
    Drive(Velocity2D),
    /// Charging confirmed; hold still
    Docked,
    /// Docking failed; hold still and report
    Failed,
}

/// The docking state machine.
pub struct DockingStateMachine {
    apriltag: AprilTagConfig,
    gps_dock: GpsDockConfig,

    state: DockingState,
    state_entered_ns: u64,

    /// +1 or -1, flipped after each half turn of searching
    search_direction: f32,
    search_leg_started_ns: u64,

    /// Time the marker was last seen during an approach phase
    last_seen_ns: u64,

    /// Smallest marker range seen in the current approach segment
    min_range_seen: f32,

    /// Docking attempts consumed (contact retries)
    attempts: u32,
}

impl DockingStateMachine {
    pub fn new(apriltag: AprilTagConfig, gps_dock: GpsDockConfig, now_ns: u64) -> Self {
        Self {
            apriltag,
            gps_dock,
            state: DockingState::GnssTraverse,
            state_entered_ns: now_ns,
            search_direction: 1.0,
            search_leg_started_ns: now_ns,
            last_seen_ns: now_ns,
            min_range_seen: f32::MAX,
            attempts: 0,
        }
    }

    pub fn state(&self) -> DockingState {
        self.state
    }

    /// Abort immediately (safety event or operator cancel).
    pub fn abort(&mut self, now_ns: u64) {
        if !self.state.is_terminal() {
            tracing::warn!("Docking aborted from {}", self.state.as_str());
            self.enter(DockingState::Failed, now_ns);
        }
    }

    /// One docking tick.
    ///
    /// `remaining_distance` is the GNSS-path distance to the dock;
    /// `detection` is the smoothed observation of the station marker (id
    /// already filtered); `charging` is the debounced dock-bus charge flag.
    pub fn tick(
        &mut self,
        remaining_distance: f32,
        detection: Option<&FiducialDetection>,
        charging: bool,
        now_ns: u64,
    ) -> DockingAction {
        // A marker observation feeds the lost-timer and the monotone-range
        // guard in every approach phase
        if let Some(det) = detection {
            self.last_seen_ns = now_ns;
            if matches!(
                self.state,
                DockingState::CoarseApproach | DockingState::Precision
            ) {
                if det.range_m > self.min_range_seen + RANGE_REGRESSION_EPSILON {
                    tracing::warn!(
                        "Marker range regressed ({:.2} m after {:.2} m), restarting search",
                        det.range_m,
                        self.min_range_seen
                    );
                    // The regressing observation is suspect; restart the
                    // search without it
                    self.enter(DockingState::Search, now_ns);
                    return self.tick_search(None, now_ns);
                }
                self.min_range_seen = self.min_range_seen.min(det.range_m);
            }
        }

        match self.state {
            DockingState::GnssTraverse => self.tick_traverse(remaining_distance, detection, now_ns),
            DockingState::Search => self.tick_search(detection, now_ns),
            DockingState::CoarseApproach => self.tick_coarse(detection, now_ns),
            DockingState::Precision => self.tick_precision(detection, now_ns),
            DockingState::Contact => self.tick_contact(charging, now_ns),
            DockingState::Docked => DockingAction::Docked,
            DockingState::Failed => DockingAction::Failed,
        }
    }

    fn tick_traverse(
        &mut self,
        remaining_distance: f32,
        detection: Option<&FiducialDetection>,
        now_ns: u64,
    ) -> DockingAction {
        let marker_in_range = detection
            .is_some_and(|d| d.range_m <= self.gps_dock.apriltag_detection_range);

        if remaining_distance < self.gps_dock.precise_approach_distance || marker_in_range {
            tracing::info!(
                "Traverse complete (remaining {:.2} m, marker {}), searching for dock marker",
                remaining_distance,
                if marker_in_range { "sighted" } else { "not sighted" }
            );
            self.enter(DockingState::Search, now_ns);
            return self.tick_search(detection, now_ns);
        }
        DockingAction::FollowPath
    }

    fn tick_search(
        &mut self,
        detection: Option<&FiducialDetection>,
        now_ns: u64,
    ) -> DockingAction {
        if let Some(det) = detection {
            if det.confidence >= self.apriltag.detection.min_confidence {
                tracing::info!(
                    "Dock marker acquired at {:.2} m, starting coarse approach",
                    det.range_m
                );
                self.enter(DockingState::CoarseApproach, now_ns);
                return self.tick_coarse(detection, now_ns);
            }
        }

        if self.elapsed_secs(self.state_entered_ns, now_ns) > self.apriltag.search_timeout {
            tracing::warn!("Dock marker search timed out");
            self.enter(DockingState::Failed, now_ns);
            return DockingAction::Failed;
        }

        // Alternate rotation direction after each half turn
        let leg_elapsed = self.elapsed_secs(self.search_leg_started_ns, now_ns);
        let half_turn_secs = std::f32::consts::PI / self.apriltag.rotation_speed.max(1e-3);
        if leg_elapsed > half_turn_secs {
            self.search_direction = -self.search_direction;
            self.search_leg_started_ns = now_ns;
        }

        DockingAction::Drive(Velocity2D::new(
            0.0,
            self.search_direction * self.apriltag.rotation_speed,
        ))
    }

    fn tick_coarse(
        &mut self,
        detection: Option<&FiducialDetection>,
        now_ns: u64,
    ) -> DockingAction {
        let det = match detection {
            Some(det) => det,
            None => {
                if self.elapsed_secs(self.last_seen_ns, now_ns) > self.apriltag.lost_timeout {
                    tracing::warn!("Dock marker lost during coarse approach");
                    self.enter(DockingState::Search, now_ns);
                    return self.tick_search(None, now_ns);
                }
                // Hold course briefly while the marker flickers
                return DockingAction::Drive(Velocity2D::default());
            }
        };

        if det.range_m <= self.apriltag.tolerances.target_distance {
            tracing::info!("Within {:.2} m, precision alignment", det.range_m);
            self.enter(DockingState::Precision, now_ns);
            return self.tick_precision(detection, now_ns);
        }

        // Micro-goal partway down the marker's line of sight, robot frame
        let advance = (det.range_m - self.apriltag.tolerances.target_distance * 0.5).max(0.2);
        let target = Point2D::new(
            advance * det.bearing_rad.cos(),
            advance * det.bearing_rad.sin(),
        );
        DockingAction::MicroGoal {
            target,
            speed_cap: self.gps_dock.approach_speeds.normal,
        }
    }

    fn tick_precision(
        &mut self,
        detection: Option<&FiducialDetection>,
        now_ns: u64,
    ) -> DockingAction {
        let det = match detection {
            Some(det) => det,
            None => {
                if self.elapsed_secs(self.last_seen_ns, now_ns) > self.apriltag.lost_timeout {
                    tracing::warn!("Dock marker lost during precision alignment");
                    self.enter(DockingState::Search, now_ns);
                    return self.tick_search(None, now_ns);
                }
                return DockingAction::Drive(Velocity2D::default());
            }
        };

        let angle_tol = self.apriltag.tolerances.angle_tolerance_rad();

        if det.range_m <= self.apriltag.tolerances.precise_distance
            && det.yaw_offset_rad.abs() <= angle_tol
        {
            tracing::info!("Aligned at {:.3} m, creeping to contact", det.range_m);
            self.enter(DockingState::Contact, now_ns);
            return self.tick_contact(false, now_ns);
        }

        // Bearing error halts forward motion until it is steered out
        if det.bearing_rad.abs() > angle_tol {
            let steer = det
                .bearing_rad
                .signum()
                * self.apriltag.rotation_speed.min(0.2);
            return DockingAction::Drive(Velocity2D::new(0.0, steer));
        }

        // Creep down the range with gentle bearing correction
        let correction = det.bearing_rad * 0.5;
        DockingAction::Drive(Velocity2D::new(
            self.gps_dock.approach_speeds.precise,
            correction,
        ))
    }

    fn tick_contact(&mut self, charging: bool, now_ns: u64) -> DockingAction {
        if charging {
            tracing::info!("Charge current confirmed, docked");
            self.enter(DockingState::Docked, now_ns);
            return DockingAction::Docked;
        }

        if self.elapsed_secs(self.state_entered_ns, now_ns) > self.apriltag.contact_timeout {
            self.attempts += 1;
            if self.attempts < self.apriltag.retry_budget {
                tracing::warn!(
                    "Contact not confirmed (attempt {}), backing off to search",
                    self.attempts
                );
                self.enter(DockingState::Search, now_ns);
                return self.tick_search(None, now_ns);
            }
            tracing::error!("Contact not confirmed after {} attempts", self.attempts);
            self.enter(DockingState::Failed, now_ns);
            return DockingAction::Failed;
        }

        DockingAction::Drive(Velocity2D::new(
            self.gps_dock.approach_speeds.ultra_slow,
            0.0,
        ))
    }

    fn enter(&mut self, state: DockingState, now_ns: u64) {
        tracing::debug!("Docking {} -> {}", self.state.as_str(), state.as_str());
        self.state = state;
        self.state_entered_ns = now_ns;
        if state == DockingState::Search {
            self.search_leg_started_ns = now_ns;
            self.min_range_seen = f32::MAX;
        }
        if state == DockingState::CoarseApproach {
            self.min_range_seen = f32::MAX;
        }
    }

    #[inline]
    fn elapsed_secs(&self, since_ns: u64, now_ns: u64) -> f32 {
        now_ns.saturating_sub(since_ns) as f32 / 1e9
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: u64 = 1_000_000_000;

    fn machine() -> DockingStateMachine {
        let apriltag = AprilTagConfig::default();
        let gps_dock = GpsDockConfig::default();
        DockingStateMachine::new(apriltag, gps_dock, 0)
    }

    fn marker(range: f32, bearing: f32, yaw: f32) -> FiducialDetection {
        FiducialDetection {
            marker_id: 0,
            range_m: range,
            bearing_rad: bearing,
            yaw_offset_rad: yaw,
            confidence: 0.9,
            frame_timestamp: 0,
            smoothed: true,
        }
    }

    #[test]
    fn test_traverse_follows_path_until_close() {
        let mut sm = machine();
        // 15 m out, no marker: keep following the GNSS path
        assert_eq!(sm.tick(15.0, None, false, 0), DockingAction::FollowPath);
        assert_eq!(sm.state(), DockingState::GnssTraverse);

        // Still outside the precise approach distance
        assert_eq!(sm.tick(2.0, None, false, SEC), DockingAction::FollowPath);
        assert_eq!(sm.state(), DockingState::GnssTraverse);
    }

    #[test]
    fn test_traverse_ends_at_precise_distance() {
        let mut sm = machine();
        sm.tick(15.0, None, false, 0);
        // Under 0.5 m remaining: switch to marker search
        let action = sm.tick(0.4, None, false, SEC);
        assert_eq!(sm.state(), DockingState::Search);
        assert!(matches!(action, DockingAction::Drive(_)));
    }

    #[test]
    fn test_marker_sighting_transitions_once_within_ticks() {
        let mut sm = machine();
        sm.tick(15.0, None, false, 0);

        // A valid marker at 0.4 m while still traversing: SEARCH then
        // COARSE within the same few ticks
        let det = marker(0.4, 0.0, 0.0);
        sm.tick(12.0, Some(&det), false, SEC);
        let mut ticks = 1;
        while sm.state() != DockingState::CoarseApproach && ticks < 3 {
            sm.tick(12.0, Some(&det), false, SEC + ticks * SEC / 10);
            ticks += 1;
        }
        assert_eq!(sm.state(), DockingState::CoarseApproach);
        // And it never falls back to GNSS traversal
        sm.tick(12.0, None, false, 2 * SEC);
        assert_ne!(sm.state(), DockingState::GnssTraverse);
    }

    #[test]
    fn test_search_rotates_and_alternates() {
        let mut sm = machine();
        sm.tick(0.3, None, false, 0); // into SEARCH

        let first = sm.tick(0.3, None, false, SEC);
        let w0 = match first {
            DockingAction::Drive(v) => {
                assert_eq!(v.linear, 0.0);
                v.angular
            }
            other => panic!("expected rotation, got {:?}", other),
        };

        // After more than a half turn the direction flips
        let half_turn = (std::f32::consts::PI / 0.3) as u64 + 1;
        let later = sm.tick(0.3, None, false, (half_turn + 2) * SEC);
        match later {
            DockingAction::Drive(v) => assert!(v.angular * w0 < 0.0, "direction should flip"),
            other => panic!("expected rotation, got {:?}", other),
        }
    }

    #[test]
    fn test_search_timeout_fails() {
        let mut sm = machine();
        sm.tick(0.3, None, false, 0);
        let action = sm.tick(0.3, None, false, 31 * SEC);
        assert_eq!(action, DockingAction::Failed);
        assert_eq!(sm.state(), DockingState::Failed);
    }

    #[test]
    fn test_coarse_emits_micro_goals() {
        let mut sm = machine();
        sm.tick(0.3, Some(&marker(2.0, 0.2, 0.0)), false, 0);
        assert_eq!(sm.state(), DockingState::CoarseApproach);

        let action = sm.tick(0.3, Some(&marker(1.8, 0.2, 0.0)), false, SEC / 10);
        match action {
            DockingAction::MicroGoal { target, speed_cap } => {
                assert!(target.x > 0.0);
                assert!(target.y > 0.0); // marker is to the left
                assert_eq!(speed_cap, GpsDockConfig::default().approach_speeds.normal);
            }
            other => panic!("expected micro-goal, got {:?}", other),
        }
    }

    #[test]
    fn test_coarse_to_precision_at_target_distance() {
        let mut sm = machine();
        sm.tick(0.3, Some(&marker(1.0, 0.0, 0.0)), false, 0);
        sm.tick(0.3, Some(&marker(0.2, 0.0, 0.0)), false, SEC / 10);
        assert_eq!(sm.state(), DockingState::Precision);
    }

    #[test]
    fn test_precision_halts_forward_on_bearing_error() {
        let mut sm = machine();
        sm.tick(0.3, Some(&marker(1.0, 0.0, 0.0)), false, 0);
        sm.tick(0.3, Some(&marker(0.2, 0.0, 0.0)), false, 1);
        assert_eq!(sm.state(), DockingState::Precision);

        // Large bearing error: rotate in place, zero forward
        let action = sm.tick(0.3, Some(&marker(0.2, 0.3, 0.0)), false, 2);
        match action {
            DockingAction::Drive(v) => {
                assert_eq!(v.linear, 0.0);
                assert!(v.angular > 0.0);
            }
            other => panic!("expected steering, got {:?}", other),
        }

        // Corrected: forward motion resumes
        let action = sm.tick(0.3, Some(&marker(0.2, 0.0, 0.0)), false, 3);
        match action {
            DockingAction::Drive(v) => assert!(v.linear > 0.0),
            other => panic!("expected creep, got {:?}", other),
        }
    }

    #[test]
    fn test_precision_to_contact_to_docked() {
        let mut sm = machine();
        sm.tick(0.3, Some(&marker(1.0, 0.0, 0.0)), false, 0);
        sm.tick(0.3, Some(&marker(0.2, 0.0, 0.0)), false, 1);

        // Aligned inside the precise distance: contact phase
        sm.tick(0.3, Some(&marker(0.05, 0.0, 0.0)), false, 2);
        assert_eq!(sm.state(), DockingState::Contact);

        // Creep until the charge current confirms
        let action = sm.tick(0.3, None, false, 3);
        match action {
            DockingAction::Drive(v) => {
                assert!(v.linear > 0.0 && v.linear <= 0.05);
            }
            other => panic!("expected creep, got {:?}", other),
        }

        let action = sm.tick(0.3, None, true, 4);
        assert_eq!(action, DockingAction::Docked);
        assert_eq!(sm.state(), DockingState::Docked);
    }

    #[test]
    fn test_contact_timeout_retries_then_fails() {
        let mut sm = machine();
        sm.tick(0.3, Some(&marker(1.0, 0.0, 0.0)), false, 0);
        sm.tick(0.3, Some(&marker(0.2, 0.0, 0.0)), false, 1);
        sm.tick(0.3, Some(&marker(0.05, 0.0, 0.0)), false, 2);
        assert_eq!(sm.state(), DockingState::Contact);

        // First timeout: back to search (retry budget 3)
        sm.tick(0.3, None, false, 20 * SEC);
        assert_eq!(sm.state(), DockingState::Search);

        // Re-acquire and fail out the remaining attempts
        for attempt in 1..3u64 {
            let t0 = (20 + 40 * attempt) * SEC;
            sm.tick(0.3, Some(&marker(1.0, 0.0, 0.0)), false, t0);
            sm.tick(0.3, Some(&marker(0.2, 0.0, 0.0)), false, t0 + 1);
            sm.tick(0.3, Some(&marker(0.05, 0.0, 0.0)), false, t0 + 2);
            assert_eq!(sm.state(), DockingState::Contact);
            sm.tick(0.3, None, false, t0 + 20 * SEC);
        }
        assert_eq!(sm.state(), DockingState::Failed);
    }

    #[test]
    fn test_range_regression_restarts_search() {
        let mut sm = machine();
        sm.tick(0.3, Some(&marker(2.0, 0.0, 0.0)), false, 0);
        sm.tick(0.3, Some(&marker(1.5, 0.0, 0.0)), false, 1);
        assert_eq!(sm.state(), DockingState::CoarseApproach);

        // Range jumps back up beyond the hysteresis: bogus track
        sm.tick(0.3, Some(&marker(2.2, 0.0, 0.0)), false, 2);
        assert_eq!(sm.state(), DockingState::Search);
    }

    #[test]
    fn test_abort_is_terminal() {
        let mut sm = machine();
        sm.tick(15.0, None, false, 0);
        sm.abort(SEC);
        assert_eq!(sm.state(), DockingState::Failed);
        assert_eq!(sm.tick(15.0, None, false, 2 * SEC), DockingAction::Failed);
    }
}
