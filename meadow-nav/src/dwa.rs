//! Dynamic Window Approach local planner.
//!
//! Each control tick, candidate (v, ω) pairs are sampled from the
//! intersection of the vehicle's static limits, the window reachable under
//! the acceleration limits, and the safety window (trajectories that stay
//! clear of obstacles for at least the braking distance). Each candidate is
//! forward-simulated and scored for heading progress, obstacle clearance,
//! velocity and smoothness; the best admissible sample becomes the motion
//! command.

use meadow_io::types::Velocity2D;

use crate::config::{AvoidanceConfig, ModeProfile};
use crate::core::math::{angle_diff, normalize_angle};
use crate::core::types::{Point2D, Pose2D};
use crate::planning::Path;

/// A locally observed obstacle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Obstacle {
    pub position: Point2D,
    pub radius: f32,
}

/// Operator-selectable planner profiles. The emergency profile is reserved
/// for the safety supervisor and cannot be selected here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NavigationMode {
    #[default]
    Normal,
    Conservative,
    Aggressive,
}

/// Result of one planner tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DwaOutcome {
    /// Drive with this velocity
    Command(Velocity2D),
    /// The active path is exhausted
    GoalReached,
    /// No admissible sample for `stuck_detection_limit` consecutive ticks;
    /// the caller should request a replan
    Stuck,
}

/// Dynamic window local planner.
pub struct DwaPlanner {
    config: AvoidanceConfig,
    mode: NavigationMode,
    last_command: Velocity2D,
    stuck_counter: u32,
}

impl DwaPlanner {
    pub fn new(config: AvoidanceConfig) -> Self {
        Self {
            config,
            mode: NavigationMode::Normal,
            last_command: Velocity2D::default(),
            stuck_counter: 0,
        }
    }

    /// Select the planner profile.
    pub fn set_mode(&mut self, mode: NavigationMode) {
        if self.mode != mode {
            tracing::info!("Local planner mode: {:?}", mode);
            self.mode = mode;
        }
    }

    pub fn mode(&self) -> NavigationMode {
        self.mode
    }

    /// Consecutive ticks without an admissible sample.
    pub fn stuck_count(&self) -> u32 {
        self.stuck_counter
    }

    /// Clear the stuck counter (after a replan).
    pub fn reset_stuck(&mut self) {
        self.stuck_counter = 0;
    }

    fn profile(&self) -> ModeProfile {
        match self.mode {
            NavigationMode::Normal => self.config.navigation_modes.normal,
            NavigationMode::Conservative => self.config.navigation_modes.conservative,
            NavigationMode::Aggressive => self.config.navigation_modes.aggressive,
        }
    }

    /// One planner tick: advance the path cursor, sample the window, score
    /// trajectories, return the best command.
    pub fn tick(
        &mut self,
        pose: &Pose2D,
        current: Velocity2D,
        path: &mut Path,
        obstacles: &[Obstacle],
    ) -> DwaOutcome {
        if path.advance(&pose.position()) && path.is_complete() {
            self.last_command = Velocity2D::default();
            return DwaOutcome::GoalReached;
        }
        let target = match path.current() {
            Some(wp) => wp.position(),
            None => {
                self.last_command = Velocity2D::default();
                return DwaOutcome::GoalReached;
            }
        };

        match self.best_command(pose, current, &target, obstacles) {
            Some(cmd) => {
                self.stuck_counter = 0;
                self.last_command = cmd;
                DwaOutcome::Command(cmd)
            }
            None => {
                self.stuck_counter += 1;
                self.last_command = Velocity2D::default();
                if self.stuck_counter >= self.config.performance.stuck_detection_limit {
                    tracing::warn!(
                        "No admissible velocity for {} ticks, requesting replan",
                        self.stuck_counter
                    );
                    DwaOutcome::Stuck
                } else {
                    DwaOutcome::Command(Velocity2D::default())
                }
            }
        }
    }

    /// Drive toward an explicit point (docking micro-goals) rather than a
    /// path cursor.
    pub fn tick_toward(
        &mut self,
        pose: &Pose2D,
        current: Velocity2D,
        target: &Point2D,
        obstacles: &[Obstacle],
    ) -> Option<Velocity2D> {
        let cmd = self.best_command(pose, current, target, obstacles);
        if let Some(c) = cmd {
            self.stuck_counter = 0;
            self.last_command = c;
        } else {
            self.stuck_counter += 1;
            self.last_command = Velocity2D::default();
        }
        cmd
    }

    fn best_command(
        &self,
        pose: &Pose2D,
        current: Velocity2D,
        target: &Point2D,
        obstacles: &[Obstacle],
    ) -> Option<Velocity2D> {
        let profile = self.profile();
        let physics = &self.config.robot_physics;
        let dwa = &self.config.dwa;

        let v_max = physics.max_linear_speed * profile.speed_factor;
        let w_max = physics.max_angular_speed;

        // Dynamic window reachable within one control period
        let dt = dwa.dt;
        let v_lo = (current.linear - physics.max_linear_accel * dt).max(0.0);
        let v_hi = (current.linear + physics.max_linear_accel * dt).min(v_max);
        let w_lo = (current.angular - physics.max_angular_accel * dt).max(-w_max);
        let w_hi = (current.angular + physics.max_angular_accel * dt).min(w_max);

        let mut best: Option<(f32, f32, Velocity2D)> = None; // (score, continuity, cmd)

        let mut v = v_lo;
        while v <= v_hi + 1e-6 {
            let mut w = w_lo;
            while w <= w_hi + 1e-6 {
                if let Some(score) = self.score_sample(pose, v, w, target, obstacles) {
                    let continuity = -((v - self.last_command.linear).abs()
                        + (w - self.last_command.angular).abs());
                    let candidate = (score, continuity, Velocity2D::new(v, w));
                    let better = match &best {
                        None => true,
                        Some((bs, bc, _)) => {
                            // Higher score wins; exact ties prefer the
                            // sample closest to the last issued command
                            score > *bs || (score == *bs && continuity > *bc)
                        }
                    };
                    if better {
                        best = Some(candidate);
                    }
                }
                w += dwa.angular_resolution;
            }
            v += dwa.velocity_resolution;
        }

        best.map(|(_, _, cmd)| cmd)
    }

    /// Forward-simulate one sample and score it, or `None` if inadmissible.
    fn score_sample(
        &self,
        pose: &Pose2D,
        v: f32,
        w: f32,
        target: &Point2D,
        obstacles: &[Obstacle],
    ) -> Option<f32> {
        let profile = self.profile();
        let physics = &self.config.robot_physics;
        let dwa = &self.config.dwa;
        let clearance_cap = dwa.emergency_brake_distance;

        let mut x = pose.x;
        let mut y = pose.y;
        let mut theta = pose.theta;

        let mut min_clearance = clearance_cap;
        let mut traveled = 0.0f32;
        let mut collision_at: Option<f32> = None;

        let steps = (dwa.time_horizon / dwa.dt).round().max(1.0) as usize;
        for _ in 0..steps {
            x += v * theta.cos() * dwa.dt;
            y += v * theta.sin() * dwa.dt;
            theta = normalize_angle(theta + w * dwa.dt);
            traveled += v.abs() * dwa.dt;

            let here = Point2D::new(x, y);
            for obs in obstacles {
                let clearance = here.distance(&obs.position) - obs.radius - physics.radius;
                if clearance <= 0.0 {
                    collision_at.get_or_insert(traveled);
                }
                min_clearance = min_clearance.min(clearance.max(0.0));
            }
            if collision_at.is_some() {
                break;
            }
        }

        // Safety window: the trajectory must stay clear for at least the
        // braking distance of the sampled speed, and never closer than the
        // configured clearance setpoint
        if let Some(dist) = collision_at {
            let braking = v * v / (2.0 * physics.max_linear_accel.max(1e-6));
            if dist <= braking.max(dwa.emergency_brake_distance) {
                return None;
            }
        }

        let end = Point2D::new(x, y);
        let bearing = end.bearing_to(target);
        let heading_error = angle_diff(theta, bearing).abs();
        let h = 1.0 - heading_error / std::f32::consts::PI;

        let o = (min_clearance / clearance_cap).clamp(0.0, 1.0);

        let v_norm = if physics.max_linear_speed > 0.0 {
            v / physics.max_linear_speed
        } else {
            0.0
        };

        let s = -((v - self.last_command.linear).abs() / physics.max_linear_speed.max(1e-6)
            + (w - self.last_command.angular).abs() / physics.max_angular_speed.max(1e-6))
            / 2.0;

        let weights = &dwa.weights;
        Some(
            weights.heading * h
                + weights.obstacle * profile.safety_factor * o
                + weights.velocity * v_norm
                + weights.smoothness * s,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planning::Waypoint;

    fn config() -> AvoidanceConfig {
        AvoidanceConfig::default()
    }

    fn straight_path() -> Path {
        Path::new(vec![
            Waypoint::new(2.0, 0.0, 0.2),
            Waypoint::new(4.0, 0.0, 0.2),
        ])
    }

    #[test]
    fn test_clear_path_drives_forward() {
        let mut dwa = DwaPlanner::new(config());
        let pose = Pose2D::identity();
        let mut path = straight_path();

        // A few ticks to spin up through the acceleration window
        let mut v = Velocity2D::default();
        for _ in 0..5 {
            match dwa.tick(&pose, v, &mut path, &[]) {
                DwaOutcome::Command(cmd) => v = cmd,
                other => panic!("expected command, got {:?}", other),
            }
        }
        assert!(v.linear > 0.1, "should accelerate forward, got {:?}", v);
        assert!(v.angular.abs() < 0.3);
    }

    #[test]
    fn test_obstacle_ahead_turns_or_slows() {
        let mut dwa = DwaPlanner::new(config());
        let pose = Pose2D::identity();
        let mut path = straight_path();
        let obstacles = [Obstacle {
            position: Point2D::new(1.0, 0.0),
            radius: 0.2,
        }];

        let mut v = Velocity2D::new(0.3, 0.0);
        for _ in 0..5 {
            match dwa.tick(&pose, v, &mut path, &obstacles) {
                DwaOutcome::Command(cmd) => v = cmd,
                DwaOutcome::Stuck => return, // boxed in is acceptable
                other => panic!("unexpected {:?}", other),
            }
        }
        // Straight-at-speed into the obstacle must not be the answer
        let heads_straight_in = v.linear > 0.25 && v.angular.abs() < 0.05;
        assert!(!heads_straight_in, "drives into obstacle: {:?}", v);
    }

    #[test]
    fn test_goal_reached_after_walking_the_path() {
        let mut dwa = DwaPlanner::new(config());
        let mut path = straight_path();

        // Reach the first waypoint: cursor advances, still driving
        let at_first = Pose2D::new(2.0, 0.0, 0.0);
        match dwa.tick(&at_first, Velocity2D::new(0.2, 0.0), &mut path, &[]) {
            DwaOutcome::Command(_) => {}
            other => panic!("expected command, got {:?}", other),
        }
        assert_eq!(path.cursor(), 1);

        // Reach the last waypoint: path exhausted
        let at_last = Pose2D::new(4.0, 0.0, 0.0);
        let outcome = dwa.tick(&at_last, Velocity2D::new(0.2, 0.0), &mut path, &[]);
        assert_eq!(outcome, DwaOutcome::GoalReached);
        assert!(path.is_complete());
    }

    #[test]
    fn test_surrounded_raises_stuck() {
        let mut config = config();
        config.performance.stuck_detection_limit = 3;
        let mut dwa = DwaPlanner::new(config);
        let pose = Pose2D::identity();
        let mut path = straight_path();

        // Ring of obstacles leaves no escape
        let obstacles: Vec<Obstacle> = (0..12)
            .map(|i| {
                let a = i as f32 * std::f32::consts::TAU / 12.0;
                Obstacle {
                    position: Point2D::new(0.45 * a.cos(), 0.45 * a.sin()),
                    radius: 0.15,
                }
            })
            .collect();

        let mut outcome = DwaOutcome::Command(Velocity2D::default());
        for _ in 0..3 {
            outcome = dwa.tick(&pose, Velocity2D::new(0.2, 0.0), &mut path, &obstacles);
        }
        assert_eq!(outcome, DwaOutcome::Stuck);
        assert_eq!(dwa.stuck_count(), 3);

        dwa.reset_stuck();
        assert_eq!(dwa.stuck_count(), 0);
    }

    #[test]
    fn test_zero_weights_tie_breaks_to_continuity() {
        let mut cfg = config();
        cfg.dwa.weights.heading = 0.0;
        cfg.dwa.weights.obstacle = 0.0;
        cfg.dwa.weights.velocity = 0.0;
        cfg.dwa.weights.smoothness = 0.0;
        let mut dwa = DwaPlanner::new(cfg);

        let pose = Pose2D::identity();
        let mut path = straight_path();

        // Seed a last command, then tick with every score identical: the
        // tie-break must stay near it
        let seed = Velocity2D::new(0.2, 0.0);
        match dwa.tick(&pose, seed, &mut path, &[]) {
            DwaOutcome::Command(first) => {
                dwa.last_command = first;
            }
            other => panic!("unexpected {:?}", other),
        }
        let anchor = dwa.last_command;
        match dwa.tick(&pose, anchor, &mut path, &[]) {
            DwaOutcome::Command(cmd) => {
                assert!((cmd.linear - anchor.linear).abs() < 1e-4);
                assert!((cmd.angular - anchor.angular).abs() < 1e-4);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_conservative_mode_caps_speed() {
        let mut dwa = DwaPlanner::new(config());
        dwa.set_mode(NavigationMode::Conservative);
        let pose = Pose2D::identity();
        let mut path = straight_path();

        let mut v = Velocity2D::default();
        for _ in 0..30 {
            if let DwaOutcome::Command(cmd) = dwa.tick(&pose, v, &mut path, &[]) {
                v = cmd;
            }
        }
        // Default physics caps at 0.5; conservative halves it
        assert!(v.linear <= 0.25 + 1e-4, "conservative speed {:?}", v);
    }

    #[test]
    fn test_command_within_kinodynamic_limits() {
        let mut dwa = DwaPlanner::new(config());
        let pose = Pose2D::identity();
        let mut path = straight_path();
        let physics = config().robot_physics;

        let mut v = Velocity2D::default();
        for _ in 0..50 {
            if let DwaOutcome::Command(cmd) = dwa.tick(&pose, v, &mut path, &[]) {
                assert!(cmd.linear.abs() <= physics.max_linear_speed + 1e-5);
                assert!(cmd.angular.abs() <= physics.max_angular_speed + 1e-5);
                v = cmd;
            }
        }
    }
}
