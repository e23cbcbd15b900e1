//! Grid construction and route planning.
//!
//! Translates a mission (polygonal work area or a target point) into a
//! waypoint path over the occupancy grid: boustrophedon coverage for
//! mowing, A* with line-of-sight smoothing for point-to-point.

pub mod astar;
pub mod boundary;
pub mod coverage;
pub mod grid;
pub mod path;

pub use astar::AStarPlanner;
pub use boundary::{BoundaryMonitor, BoundaryStatus};
pub use coverage::CoveragePlanner;
pub use grid::{CellState, GridCoord, ObstacleUpdate, OccupancyGrid};
pub use path::{Path, Waypoint};

/// Reasons route planning can fail.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanningError {
    /// The boundary polygon has fewer than three vertices.
    EmptyPolygon,

    /// Start position is outside the grid.
    StartOutOfBounds,

    /// Goal position is outside the grid.
    GoalOutOfBounds,

    /// Goal cell is an obstacle; carries the closest free cell if one
    /// exists nearby.
    GoalInObstacle {
        suggestion: Option<crate::core::types::Point2D>,
    },

    /// No path found to the goal.
    NoPathFound,

    /// Search exceeded its iteration budget.
    MaxIterationsExceeded,
}

impl std::fmt::Display for PlanningError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanningError::EmptyPolygon => write!(f, "Boundary polygon is empty"),
            PlanningError::StartOutOfBounds => write!(f, "Start position is outside the map"),
            PlanningError::GoalOutOfBounds => write!(f, "Goal position is outside the map"),
            PlanningError::GoalInObstacle { suggestion } => match suggestion {
                Some(p) => write!(
                    f,
                    "Goal is blocked; closest free point is ({:.2}, {:.2})",
                    p.x, p.y
                ),
                None => write!(f, "Goal is blocked"),
            },
            PlanningError::NoPathFound => write!(f, "No path found to target"),
            PlanningError::MaxIterationsExceeded => write!(f, "Planning timeout"),
        }
    }
}

impl std::error::Error for PlanningError {}
