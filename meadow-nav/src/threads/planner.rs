//! Planner thread: route planning, the local planner and docking.
//!
//! Runs at the control rate (10 Hz in coverage, 25 Hz while docking).
//! Consumes the mission directive, builds paths over the occupancy grid,
//! drains the obstacle-update queue, ticks the dynamic-window planner and
//! proposes motion commands for supervisor arbitration. During docking the
//! state machine drives the local planner directly with micro-goals.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{Receiver, SyncSender, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

use meadow_io::clock::{monotonic_ns, secs_to_ns};
use meadow_io::types::{MotionCommand, Velocity2D};

use crate::config::Config;
use crate::core::types::Point2D;
use crate::docking::{DockingAction, DockingState, DockingStateMachine};
use crate::dwa::{DwaOutcome, DwaPlanner, NavigationMode, Obstacle};
use crate::mission::{Directive, MissionSignal};
use crate::persist::PersistedState;
use crate::planning::{
    AStarPlanner, BoundaryMonitor, BoundaryStatus, CoveragePlanner, ObstacleUpdate, OccupancyGrid,
    Path, PlanningError,
};
use crate::planning::astar::AStarConfig;
use crate::shared::SharedState;

/// Learned obstacles older than this stop feeding the local planner, s.
const OBSTACLE_DECAY_SECS: f32 = 30.0;

/// Periodic persistence interval, seconds.
const PERSIST_INTERVAL_SECS: f32 = 30.0;

/// One remembered obstacle for the local planner.
struct LiveObstacle {
    obstacle: Obstacle,
    seen_ns: u64,
}

/// Planner thread state and logic.
pub struct PlannerThread {
    config: Config,
    shared: Arc<SharedState>,
    signal_tx: SyncSender<MissionSignal>,
    obstacle_rx: Receiver<ObstacleUpdate>,

    astar: AStarPlanner,
    coverage: CoveragePlanner,
    dwa: DwaPlanner,
    boundary: Option<BoundaryMonitor>,

    grid: Option<OccupancyGrid>,
    active_path: Option<Path>,
    active_directive: Directive,
    docking: Option<DockingStateMachine>,
    last_docking_phase: Option<DockingState>,
    obstacles: Vec<LiveObstacle>,

    persist_path: Option<PathBuf>,
    last_persist_ns: u64,
    last_replan_ns: u64,
    last_boundary_check_ns: u64,
    last_cursor_sent: usize,
}

impl PlannerThread {
    pub fn new(
        config: Config,
        shared: Arc<SharedState>,
        signal_tx: SyncSender<MissionSignal>,
        obstacle_rx: Receiver<ObstacleUpdate>,
    ) -> Self {
        let planning = &config.navigation.path_planning;
        let performance = &config.dynamic_obstacle_avoidance.performance;

        let astar = AStarPlanner::new(AStarConfig {
            inflated_penalty: planning.inflated_cell_penalty,
            waypoint_tolerance: performance.waypoint_tolerance,
            max_waypoint_step: planning.max_waypoint_step,
            ..AStarConfig::default()
        });

        let mowing = &config.navigation.missions.mowing;
        let coverage = CoveragePlanner::new(
            mowing.brush_width,
            mowing.overlap,
            planning.max_waypoint_step,
            performance.waypoint_tolerance,
        );

        let dwa = DwaPlanner::new(config.dynamic_obstacle_avoidance.clone());

        let persist_path = config
            .persistence
            .state_path
            .as_ref()
            .map(PathBuf::from);

        Self {
            config,
            shared,
            signal_tx,
            obstacle_rx,
            astar,
            coverage,
            dwa,
            boundary: None,
            grid: None,
            active_path: None,
            active_directive: Directive::Hold,
            docking: None,
            last_docking_phase: None,
            obstacles: Vec::new(),
            persist_path,
            last_persist_ns: 0,
            last_replan_ns: 0,
            last_boundary_check_ns: 0,
            last_cursor_sent: 0,
        }
    }

    /// Run the planner loop until shutdown.
    pub fn run(&mut self) {
        tracing::info!("Planner thread started");
        self.restore_persisted();

        while !self.shared.should_shutdown() {
            let now = monotonic_ns();
            self.shared.heartbeats.beat("planner", now);

            self.drain_obstacles(now);
            self.sync_directive(now);
            self.check_boundary(now);

            let tick = match self.active_directive {
                // Docking runs the faster control rate
                Directive::Dock => Duration::from_millis(40),
                _ => Duration::from_secs_f32(self.config.dynamic_obstacle_avoidance.dwa.dt),
            };

            match self.active_directive {
                Directive::Hold => {
                    self.propose_stop(now);
                }
                Directive::Mow { .. } | Directive::Goto(_) => {
                    self.tick_navigation(now);
                }
                Directive::Dock => {
                    self.tick_docking(now);
                }
            }

            self.maybe_persist(now);
            std::thread::sleep(tick);
        }

        self.persist_now();
        self.propose_stop(monotonic_ns());
        tracing::info!("Planner thread shutting down");
    }

    fn restore_persisted(&mut self) {
        let Some(path) = &self.persist_path else {
            return;
        };
        match PersistedState::load(path) {
            Ok(state) => {
                if state.grid.is_some() {
                    tracing::info!("Restored occupancy grid from {}", path.display());
                    self.grid = state.grid;
                }
                self.last_cursor_sent = state.coverage_cursor;
            }
            Err(e) => tracing::warn!("Persisted state unusable: {}", e),
        }
    }

    fn maybe_persist(&mut self, now: u64) {
        if self.persist_path.is_none() {
            return;
        }
        if now.saturating_sub(self.last_persist_ns) < secs_to_ns(PERSIST_INTERVAL_SECS) {
            return;
        }
        self.last_persist_ns = now;
        self.persist_now();
    }

    fn persist_now(&mut self) {
        let Some(path) = &self.persist_path else {
            return;
        };
        // last_cursor_sent tracks coverage only; the dock traverse path
        // must not clobber the mowing resume point
        let state = PersistedState {
            coverage_cursor: self.last_cursor_sent,
            grid: self.grid.clone(),
        };
        if let Err(e) = state.save(path) {
            tracing::warn!("Persist failed: {}", e);
        }
    }

    /// Apply queued obstacle learnings to the grid and the live list.
    fn drain_obstacles(&mut self, now: u64) {
        loop {
            match self.obstacle_rx.try_recv() {
                Ok(update) => {
                    if let Some(grid) = &mut self.grid {
                        grid.apply(&update);
                    }
                    self.obstacles.push(LiveObstacle {
                        obstacle: Obstacle {
                            position: update.center,
                            radius: update.radius,
                        },
                        seen_ns: now,
                    });
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        self.obstacles
            .retain(|o| now.saturating_sub(o.seen_ns) < secs_to_ns(OBSTACLE_DECAY_SECS));

        // Publish the worst clearance for the supervisor's hard check
        let pose = self.shared.pose();
        let robot_radius = self.config.dynamic_obstacle_avoidance.robot_physics.radius;
        let min_clearance = self
            .obstacles
            .iter()
            .map(|o| pose.position().distance(&o.obstacle.position) - o.obstacle.radius - robot_radius)
            .fold(f32::INFINITY, f32::min);
        self.shared
            .set_min_clearance(min_clearance.is_finite().then_some(min_clearance));
    }

    /// React to directive changes from the orchestrator.
    fn sync_directive(&mut self, now: u64) {
        let directive = self.shared.directive();
        if directive == self.active_directive {
            return;
        }
        tracing::info!("Planner directive: {:?}", directive);
        self.active_directive = directive;
        self.active_path = None;
        self.docking = None;
        self.last_docking_phase = None;
        self.dwa.reset_stuck();

        match directive {
            Directive::Dock => {
                self.docking = Some(DockingStateMachine::new(
                    self.config.charging.apriltag.clone(),
                    self.config.charging.gps_dock.clone(),
                    now,
                ));
                self.dwa.set_mode(NavigationMode::Conservative);
                self.shared.set_mode_speed_factor(
                    self.config
                        .dynamic_obstacle_avoidance
                        .navigation_modes
                        .conservative
                        .speed_factor,
                );
            }
            _ => {
                self.dwa.set_mode(NavigationMode::Normal);
                self.shared.set_mode_speed_factor(
                    self.config
                        .dynamic_obstacle_avoidance
                        .navigation_modes
                        .normal
                        .speed_factor,
                );
            }
        }
    }

    /// Periodic geofence check of the fused position.
    fn check_boundary(&mut self, now: u64) {
        let period = secs_to_ns(self.config.navigation.boundary_safety.check_frequency.max(0.1));
        if now.saturating_sub(self.last_boundary_check_ns) < period {
            return;
        }
        self.last_boundary_check_ns = now;

        if self.boundary.is_none() {
            self.boundary = self.build_boundary_monitor();
        }
        let Some(monitor) = &self.boundary else {
            return;
        };

        // The margin cell feeds the supervisor's slow-down check
        let status = monitor.check(&self.shared.pose().position());
        match status {
            BoundaryStatus::Safe { margin } => {
                self.shared.set_boundary_margin(Some(margin));
                // Back in the interior: undo the warning-band profile
                if self.active_directive != Directive::Dock {
                    self.dwa.set_mode(NavigationMode::Normal);
                    self.shared.set_mode_speed_factor(
                        self.config
                            .dynamic_obstacle_avoidance
                            .navigation_modes
                            .normal
                            .speed_factor,
                    );
                }
            }
            BoundaryStatus::Warning { margin } => {
                self.shared.set_boundary_margin(Some(margin));
                tracing::debug!("Near the boundary ({:.2} m), conservative profile", margin);
                if self.active_directive != Directive::Dock {
                    self.dwa.set_mode(NavigationMode::Conservative);
                    self.shared.set_mode_speed_factor(
                        self.config
                            .dynamic_obstacle_avoidance
                            .navigation_modes
                            .conservative
                            .speed_factor,
                    );
                }
            }
            BoundaryStatus::Outside { deviation } => {
                self.shared.set_boundary_margin(Some(0.0));
                tracing::warn!("Outside the boundary by {:.2} m", deviation);
            }
            BoundaryStatus::Breach { deviation } => {
                self.shared.set_boundary_margin(Some(0.0));
                tracing::error!("Boundary breach ({:.2} m), requesting dock return", deviation);
                let _ = self.signal_tx.try_send(MissionSignal::BatteryLow);
            }
        }
    }

    fn build_boundary_monitor(&self) -> Option<BoundaryMonitor> {
        let frame = self.shared.frame()?;
        let coords = &self.config.navigation.boundary_coordinates;
        if coords.len() < 3 {
            return None;
        }
        let polygon: Vec<Point2D> = coords
            .iter()
            .map(|p| frame.to_local(&(*p).into()))
            .collect();
        let safety = &self.config.navigation.boundary_safety;
        Some(BoundaryMonitor::new(
            polygon,
            safety.buffer_distance,
            safety.warning_distance,
            safety.max_deviation,
        ))
    }

    /// Coverage and point-to-point driving.
    fn tick_navigation(&mut self, now: u64) {
        if self.active_path.is_none() {
            match self.build_path() {
                Ok(path) => {
                    self.active_path = Some(path);
                }
                Err(e) => {
                    // Planning errors go to the orchestrator, rate-limited
                    // by the replanning frequency so a persistent failure
                    // does not flood it
                    let min_gap = secs_to_ns(
                        1.0 / self
                            .config
                            .dynamic_obstacle_avoidance
                            .performance
                            .max_replanning_frequency
                            .max(0.01),
                    );
                    if now.saturating_sub(self.last_replan_ns) >= min_gap {
                        self.last_replan_ns = now;
                        let _ = self.signal_tx.try_send(MissionSignal::PlanningFailed {
                            reason: e.to_string(),
                        });
                    }
                    self.propose_stop(now);
                    return;
                }
            }
        }

        let snapshot = self.shared.pose_snapshot();
        let obstacles: Vec<Obstacle> = self.obstacles.iter().map(|o| o.obstacle).collect();

        let Some(path) = self.active_path.as_mut() else {
            return;
        };

        let outcome = self
            .dwa
            .tick(&snapshot.pose, snapshot.velocity, path, &obstacles);

        // Coverage progress feeds persistence and resume
        if matches!(self.active_directive, Directive::Mow { .. }) {
            let cursor = path.cursor();
            if cursor != self.last_cursor_sent {
                self.last_cursor_sent = cursor;
                let _ = self
                    .signal_tx
                    .try_send(MissionSignal::CoverageCursor(cursor));
            }
        }

        match outcome {
            DwaOutcome::Command(v) => self.propose(v, now),
            DwaOutcome::GoalReached => {
                self.propose_stop(now);
                self.active_path = None;
                let _ = self.signal_tx.try_send(MissionSignal::GoalReached);
            }
            DwaOutcome::Stuck => {
                self.propose_stop(now);
                self.replan_around_block(now);
            }
        }
    }

    /// Build the path the current directive asks for.
    fn build_path(&mut self) -> Result<Path, PlanningError> {
        match self.active_directive {
            Directive::Mow { resume_cursor } => {
                let polygon = self.work_polygon().ok_or(PlanningError::EmptyPolygon)?;
                self.ensure_grid(&polygon)?;
                let plan = self.coverage.plan(&polygon)?;
                tracing::info!(
                    "Coverage plan: {} strips, {:.0} m",
                    plan.strips,
                    plan.path.total_length
                );
                let mut path = plan.path;
                path.restore_cursor(resume_cursor);
                Ok(path)
            }
            Directive::Goto(target) => {
                let polygon = self.work_polygon().ok_or(PlanningError::EmptyPolygon)?;
                self.ensure_grid(&polygon)?;
                let grid = self.grid.as_ref().ok_or(PlanningError::NoPathFound)?;
                let start = self.shared.pose().position();
                self.astar.plan(grid, start, target)
            }
            _ => Err(PlanningError::NoPathFound),
        }
    }

    /// The boundary polygon projected into the local frame.
    fn work_polygon(&self) -> Option<Vec<Point2D>> {
        let frame = self.shared.frame()?;
        let coords = &self.config.navigation.boundary_coordinates;
        if coords.len() < 3 {
            return None;
        }
        Some(coords.iter().map(|p| frame.to_local(&(*p).into())).collect())
    }

    fn ensure_grid(&mut self, polygon: &[Point2D]) -> Result<(), PlanningError> {
        if self.grid.is_some() {
            return Ok(());
        }
        let planning = &self.config.navigation.path_planning;
        let inflation = self.config.dynamic_obstacle_avoidance.robot_physics.radius
            + planning.obstacle_padding;
        let grid = OccupancyGrid::from_polygon(
            polygon,
            planning.grid_resolution,
            planning.grid_margin,
            inflation,
            planning.inflation_metric,
        )?;
        tracing::info!(
            "Occupancy grid built: {}×{} cells at {:.2} m",
            grid.width(),
            grid.height(),
            grid.resolution()
        );
        self.grid = Some(grid);
        Ok(())
    }

    /// After the stuck limit, detour to the current waypoint through the
    /// grid; an unreachable waypoint is skipped.
    fn replan_around_block(&mut self, _now: u64) {
        self.dwa.reset_stuck();
        let Some(path) = self.active_path.as_mut() else {
            return;
        };
        let Some(target) = path.current().map(|w| w.position()) else {
            return;
        };
        let Some(grid) = self.grid.as_ref() else {
            return;
        };

        let start = self.shared.pose().position();
        match self.astar.plan(grid, start, target) {
            Ok(detour) => {
                tracing::info!("Detour planned around blockage ({} waypoints)", detour.len());
                // Splice: drive the detour, then continue the original path
                let mut waypoints = detour.waypoints().to_vec();
                waypoints.extend_from_slice(&path.waypoints()[path.cursor()..]);
                let mut spliced = Path::new(waypoints);
                spliced.restore_cursor(0);
                *path = spliced;
            }
            Err(e) => {
                tracing::warn!("Detour failed ({}), skipping waypoint", e);
                let cursor = path.cursor();
                path.restore_cursor(cursor + 1);
            }
        }
    }

    /// Docking: the state machine owns the target queue.
    fn tick_docking(&mut self, now: u64) {
        let station_id = self.config.charging.apriltag.station_tag_id;
        let detection = self.shared.detection_of(station_id);
        let charging = self.shared.battery().charging;
        let remaining = self.remaining_to_dock();

        // Safety latch aborts the approach outright
        if self.shared.safety_latched.load(Ordering::Acquire) {
            if let Some(docking) = &mut self.docking {
                docking.abort(now);
            }
        }

        let Some(docking) = self.docking.as_mut() else {
            return;
        };

        let action = docking.tick(remaining, detection.as_ref(), charging, now);
        let phase = docking.state();
        if self.last_docking_phase != Some(phase) {
            self.last_docking_phase = Some(phase);
            let _ = self.signal_tx.try_send(MissionSignal::DockingPhase(phase));
        }

        match action {
            DockingAction::FollowPath => {
                if self.active_path.is_none() {
                    match self.plan_dock_traverse() {
                        Ok(path) => self.active_path = Some(path),
                        Err(e) => {
                            let _ = self.signal_tx.try_send(MissionSignal::PlanningFailed {
                                reason: e.to_string(),
                            });
                            self.propose_stop(now);
                            return;
                        }
                    }
                }
                let snapshot = self.shared.pose_snapshot();
                let obstacles: Vec<Obstacle> =
                    self.obstacles.iter().map(|o| o.obstacle).collect();
                if let Some(path) = self.active_path.as_mut() {
                    match self.dwa.tick(&snapshot.pose, snapshot.velocity, path, &obstacles) {
                        DwaOutcome::Command(v) => self.propose(v, now),
                        DwaOutcome::GoalReached | DwaOutcome::Stuck => self.propose_stop(now),
                    }
                }
            }
            DockingAction::MicroGoal { target, speed_cap } => {
                // Micro-goals are in the robot frame; lift into the world
                let snapshot = self.shared.pose_snapshot();
                let world = snapshot.pose.transform_point(&target);
                let obstacles: Vec<Obstacle> =
                    self.obstacles.iter().map(|o| o.obstacle).collect();
                match self
                    .dwa
                    .tick_toward(&snapshot.pose, snapshot.velocity, &world, &obstacles)
                {
                    Some(v) => {
                        let capped = Velocity2D::new(v.linear.min(speed_cap), v.angular);
                        self.propose(capped, now);
                    }
                    None => self.propose_stop(now),
                }
            }
            DockingAction::Drive(v) => self.propose(v, now),
            DockingAction::Docked => {
                self.propose_stop(now);
                let _ = self.signal_tx.try_send(MissionSignal::DockingSucceeded);
                self.docking = None;
                self.active_path = None;
            }
            DockingAction::Failed => {
                self.propose_stop(now);
                let _ = self.signal_tx.try_send(MissionSignal::DockingFailed);
                self.docking = None;
                self.active_path = None;
            }
        }
    }

    /// Straight-line range to the dock, or the remaining path length when
    /// a traverse path exists.
    fn remaining_to_dock(&self) -> f32 {
        if let Some(path) = &self.active_path {
            if !path.is_complete() {
                return path.remaining_length();
            }
        }
        match self.shared.frame() {
            Some(frame) => {
                let dock = frame.to_local(&self.config.dock_position());
                self.shared.pose().position().distance(&dock)
            }
            None => f32::MAX,
        }
    }

    fn plan_dock_traverse(&mut self) -> Result<Path, PlanningError> {
        let frame = self.shared.frame().ok_or(PlanningError::NoPathFound)?;
        let dock = frame.to_local(&self.config.dock_position());
        let start = self.shared.pose().position();

        if let Some(polygon) = self.work_polygon() {
            self.ensure_grid(&polygon)?;
        }
        match self.grid.as_ref() {
            Some(grid) => self.astar.plan(grid, start, dock),
            None => {
                // No boundary configured: drive the straight line
                let tolerance = self
                    .config
                    .dynamic_obstacle_avoidance
                    .performance
                    .waypoint_tolerance;
                Ok(Path::new(vec![crate::planning::Waypoint::new(
                    dock.x, dock.y, tolerance,
                )]))
            }
        }
    }

    fn propose(&self, v: Velocity2D, now: u64) {
        let deadline = now + 2 * secs_to_ns(self.config.dynamic_obstacle_avoidance.dwa.dt);
        self.shared
            .propose_command(MotionCommand::new(v.linear, v.angular, deadline));
    }

    fn propose_stop(&self, now: u64) {
        let deadline = now + secs_to_ns(1.0);
        self.shared.propose_command(MotionCommand::stop(deadline));
    }
}
