//! A* point-to-point planning with line-of-sight smoothing.
//!
//! Standard A* over the 8-connected grid with the Euclidean heuristic.
//! Free cells cost their step length, Inflated cells cost a configurable
//! multiple (discouraging wall-hugging), Obstacle cells are impassable.
//! Ties break toward the lower heuristic. After discovery the path is
//! smoothed by greedy line-of-sight pruning and re-subdivided to the
//! waypoint step.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use crate::core::types::Point2D;

use super::grid::{GridCoord, OccupancyGrid};
use super::path::{Path, Waypoint};
use super::PlanningError;

/// Configuration for the A* planner.
#[derive(Debug, Clone)]
pub struct AStarConfig {
    /// Maximum iterations before giving up
    pub max_iterations: usize,
    /// Cost multiplier for Inflated cells
    pub inflated_penalty: f32,
    /// Arrival tolerance stamped on waypoints, meters
    pub waypoint_tolerance: f32,
    /// Maximum spacing between consecutive waypoints, meters
    pub max_waypoint_step: f32,
    /// Search radius (cells) for the goal-in-obstacle suggestion
    pub suggestion_radius: i32,
}

impl Default for AStarConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100_000,
            inflated_penalty: 3.0,
            waypoint_tolerance: 0.2,
            max_waypoint_step: 0.5,
            suggestion_radius: 50,
        }
    }
}

/// Node in the open set.
#[derive(Clone)]
struct SearchNode {
    cell: GridCoord,
    f_score: f32,
    h_score: f32,
}

impl Eq for SearchNode {}

impl PartialEq for SearchNode {
    fn eq(&self, other: &Self) -> bool {
        self.cell == other.cell
    }
}

impl Ord for SearchNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap; ties break toward the lower
        // heuristic so the frontier nearest the goal pops first
        other
            .f_score
            .partial_cmp(&self.f_score)
            .unwrap_or(Ordering::Equal)
            .then(
                other
                    .h_score
                    .partial_cmp(&self.h_score)
                    .unwrap_or(Ordering::Equal),
            )
    }
}

impl PartialOrd for SearchNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A* path planner over the occupancy grid.
pub struct AStarPlanner {
    config: AStarConfig,
}

impl AStarPlanner {
    pub fn new(config: AStarConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(AStarConfig::default())
    }

    /// Plan a smoothed waypoint path from `start` to `goal` (world meters).
    pub fn plan(
        &self,
        grid: &OccupancyGrid,
        start: Point2D,
        goal: Point2D,
    ) -> Result<Path, PlanningError> {
        let cells = self.search_world(grid, start, goal)?;

        let raw: Vec<Waypoint> = cells
            .iter()
            .map(|&c| {
                let p = grid.cell_to_world(c);
                Waypoint::new(p.x, p.y, self.config.waypoint_tolerance)
            })
            .collect();

        let pruned = self.smooth(grid, &raw);
        Ok(Path::new(self.subdivide(&pruned)))
    }

    /// Raw A* cell search from world coordinates.
    pub fn search_world(
        &self,
        grid: &OccupancyGrid,
        start: Point2D,
        goal: Point2D,
    ) -> Result<Vec<GridCoord>, PlanningError> {
        let start_cell = grid
            .world_to_cell(&start)
            .ok_or(PlanningError::StartOutOfBounds)?;
        let goal_cell = grid
            .world_to_cell(&goal)
            .ok_or(PlanningError::GoalOutOfBounds)?;

        // A marginally off start (drift against the inflation band) is
        // recovered from the nearest traversable cell; a blocked goal is an
        // error carrying the closest-free suggestion for the orchestrator.
        let start_cell = if grid.is_traversable(start_cell) {
            start_cell
        } else {
            tracing::warn!("Plan start is not traversable, searching nearby");
            grid.find_nearest_free(start_cell, 10)
                .ok_or(PlanningError::NoPathFound)?
        };

        if !grid.is_traversable(goal_cell) {
            let suggestion = grid
                .find_nearest_free(goal_cell, self.config.suggestion_radius)
                .map(|c| grid.cell_to_world(c));
            return Err(PlanningError::GoalInObstacle { suggestion });
        }

        self.search(grid, start_cell, goal_cell)
    }

    /// A* between grid cells.
    pub fn search(
        &self,
        grid: &OccupancyGrid,
        start: GridCoord,
        goal: GridCoord,
    ) -> Result<Vec<GridCoord>, PlanningError> {
        if start == goal {
            return Ok(vec![start]);
        }

        let mut open_set = BinaryHeap::new();
        let mut came_from: HashMap<GridCoord, GridCoord> = HashMap::new();
        let mut g_score: HashMap<GridCoord, f32> = HashMap::new();

        g_score.insert(start, 0.0);
        open_set.push(SearchNode {
            cell: start,
            f_score: Self::heuristic(start, goal),
            h_score: Self::heuristic(start, goal),
        });

        let mut iterations = 0;

        while let Some(current) = open_set.pop() {
            iterations += 1;
            if iterations > self.config.max_iterations {
                return Err(PlanningError::MaxIterationsExceeded);
            }

            if current.cell == goal {
                return Ok(Self::reconstruct(&came_from, start, goal));
            }

            let current_g = *g_score.get(&current.cell).unwrap_or(&f32::INFINITY);

            for (neighbor, step) in self.neighbors(grid, current.cell) {
                let cell_cost = self.cell_cost(grid, neighbor);
                let tentative_g = current_g + step * cell_cost;

                if tentative_g < *g_score.get(&neighbor).unwrap_or(&f32::INFINITY) {
                    came_from.insert(neighbor, current.cell);
                    g_score.insert(neighbor, tentative_g);
                    let h = Self::heuristic(neighbor, goal);
                    open_set.push(SearchNode {
                        cell: neighbor,
                        f_score: tentative_g + h,
                        h_score: h,
                    });
                }
            }
        }

        Err(PlanningError::NoPathFound)
    }

    /// Greedy line-of-sight pruning.
    ///
    /// From each kept waypoint, jump to the farthest waypoint with a clear
    /// line of sight and discard everything between. Because each jump is
    /// maximal, re-running the prune reproduces the same jumps: the
    /// operation is idempotent.
    pub fn smooth(&self, grid: &OccupancyGrid, waypoints: &[Waypoint]) -> Vec<Waypoint> {
        if waypoints.len() <= 2 {
            return waypoints.to_vec();
        }

        let mut kept: Vec<Waypoint> = vec![waypoints[0]];
        let mut i = 0;
        while i < waypoints.len() - 1 {
            let from_cell = match grid.world_to_cell(&waypoints[i].position()) {
                Some(c) => c,
                None => break,
            };
            let mut next = i + 1;
            for j in ((i + 1)..waypoints.len()).rev() {
                let to_cell = match grid.world_to_cell(&waypoints[j].position()) {
                    Some(c) => c,
                    None => continue,
                };
                if grid.line_of_sight(from_cell, to_cell) {
                    next = j;
                    break;
                }
            }
            kept.push(waypoints[next]);
            i = next;
        }
        kept
    }

    /// Subdivide segments so no waypoint spacing exceeds the planner step.
    fn subdivide(&self, waypoints: &[Waypoint]) -> Vec<Waypoint> {
        if waypoints.is_empty() {
            return Vec::new();
        }
        let mut out: Vec<Waypoint> = vec![waypoints[0]];
        for pair in waypoints.windows(2) {
            let from = pair[0].position();
            let to = pair[1].position();
            let length = from.distance(&to);
            let steps = (length / self.config.max_waypoint_step).ceil().max(1.0) as usize;
            for k in 1..=steps {
                let t = k as f32 / steps as f32;
                out.push(Waypoint::new(
                    from.x + t * (to.x - from.x),
                    from.y + t * (to.y - from.y),
                    pair[1].tolerance,
                ));
            }
        }
        out
    }

    #[inline]
    fn heuristic(a: GridCoord, b: GridCoord) -> f32 {
        let dx = (b.x - a.x) as f32;
        let dy = (b.y - a.y) as f32;
        (dx * dx + dy * dy).sqrt()
    }

    #[inline]
    fn cell_cost(&self, grid: &OccupancyGrid, cell: GridCoord) -> f32 {
        match grid.get(cell) {
            Some(super::grid::CellState::Inflated) => self.config.inflated_penalty,
            _ => 1.0,
        }
    }

    /// Traversable neighbors with step lengths; diagonals require both
    /// adjacent cardinals free to prevent corner cutting.
    fn neighbors(&self, grid: &OccupancyGrid, cell: GridCoord) -> Vec<(GridCoord, f32)> {
        let mut result = Vec::with_capacity(8);

        for (dx, dy) in [(0, 1), (1, 0), (0, -1), (-1, 0)] {
            let n = GridCoord::new(cell.x + dx, cell.y + dy);
            if grid.is_traversable(n) {
                result.push((n, 1.0));
            }
        }

        let sqrt2 = std::f32::consts::SQRT_2;
        for (dx, dy) in [(1, 1), (1, -1), (-1, 1), (-1, -1)] {
            let n = GridCoord::new(cell.x + dx, cell.y + dy);
            if grid.is_traversable(n)
                && grid.is_traversable(GridCoord::new(cell.x + dx, cell.y))
                && grid.is_traversable(GridCoord::new(cell.x, cell.y + dy))
            {
                result.push((n, sqrt2));
            }
        }

        result
    }

    fn reconstruct(
        came_from: &HashMap<GridCoord, GridCoord>,
        start: GridCoord,
        goal: GridCoord,
    ) -> Vec<GridCoord> {
        let mut cells = vec![goal];
        let mut current = goal;
        while current != start {
            match came_from.get(&current) {
                Some(&prev) => {
                    cells.push(prev);
                    current = prev;
                }
                None => break,
            }
        }
        cells.reverse();
        cells
    }
}
