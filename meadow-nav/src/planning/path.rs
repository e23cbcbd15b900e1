//! Waypoint paths with a monotonically advancing cursor.

use serde::{Deserialize, Serialize};

use crate::core::types::Point2D;

/// A waypoint along a planned path.
///
/// Coordinates are local-frame meters. Heading is optional; coverage strips
/// set it to keep the cut aligned, point-to-point paths leave it free.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub x: f32,
    pub y: f32,
    /// Required arrival heading, radians; `None` means any
    pub heading: Option<f32>,
    /// Arrival tolerance in meters
    pub tolerance: f32,
}

impl Waypoint {
    /// Create a waypoint with the given tolerance and no heading.
    pub fn new(x: f32, y: f32, tolerance: f32) -> Self {
        Self {
            x,
            y,
            heading: None,
            tolerance,
        }
    }

    /// Create a waypoint with a required heading.
    pub fn with_heading(x: f32, y: f32, heading: f32, tolerance: f32) -> Self {
        Self {
            x,
            y,
            heading: Some(heading),
            tolerance,
        }
    }

    /// Position as a point.
    #[inline]
    pub fn position(&self) -> Point2D {
        Point2D::new(self.x, self.y)
    }

    /// Distance to another waypoint.
    #[inline]
    pub fn distance_to(&self, other: &Waypoint) -> f32 {
        self.position().distance(&other.position())
    }
}

/// A planned path consumed linearly through a cursor.
///
/// The cursor only ever advances: a waypoint is popped when the pose comes
/// within its tolerance, and earlier waypoints are never revisited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Path {
    waypoints: Vec<Waypoint>,
    cursor: usize,
    /// Total length over all waypoints, meters
    pub total_length: f32,
}

impl Path {
    /// Create a path from waypoints.
    pub fn new(waypoints: Vec<Waypoint>) -> Self {
        let total_length = Self::calculate_length(&waypoints);
        Self {
            waypoints,
            cursor: 0,
            total_length,
        }
    }

    /// An empty, already-complete path.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    /// All waypoints, including consumed ones.
    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    /// Current cursor index.
    #[inline]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Restore a cursor position (persisted coverage resume). Clamped to
    /// the path length; the cursor still never moves backwards.
    pub fn restore_cursor(&mut self, cursor: usize) {
        self.cursor = self.cursor.max(cursor.min(self.waypoints.len()));
    }

    /// The waypoint the vehicle is currently heading for.
    pub fn current(&self) -> Option<&Waypoint> {
        self.waypoints.get(self.cursor)
    }

    /// Whether every waypoint has been consumed.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.cursor >= self.waypoints.len()
    }

    /// Advance the cursor past every waypoint the position has reached.
    ///
    /// Returns `true` if the cursor moved.
    pub fn advance(&mut self, position: &Point2D) -> bool {
        let start = self.cursor;
        while let Some(wp) = self.waypoints.get(self.cursor) {
            if position.distance(&wp.position()) <= wp.tolerance {
                self.cursor += 1;
            } else {
                break;
            }
        }
        self.cursor != start
    }

    /// Remaining length from the cursor to the end.
    pub fn remaining_length(&self) -> f32 {
        if self.cursor >= self.waypoints.len() {
            return 0.0;
        }
        Self::calculate_length(&self.waypoints[self.cursor..])
    }

    fn calculate_length(waypoints: &[Waypoint]) -> f32 {
        if waypoints.len() < 2 {
            return 0.0;
        }
        waypoints.windows(2).map(|w| w[0].distance_to(&w[1])).sum()
    }

    /// Largest spacing between consecutive waypoints, meters.
    pub fn max_step(&self) -> f32 {
        self.waypoints
            .windows(2)
            .map(|w| w[0].distance_to(&w[1]))
            .fold(0.0, f32::max)
    }
}
