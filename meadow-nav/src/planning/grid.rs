//! Occupancy grid built from the boundary polygon.
//!
//! Cells are Free inside the work area, Obstacle outside it and wherever
//! obstacles have been learned, Inflated in the clearance band around
//! obstacles, and Unknown where nothing is known. Only the planner mutates
//! the grid: at boundary ingestion and when draining the obstacle-update
//! queue.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::config::InflationMetric;
use crate::core::types::Point2D;

use super::PlanningError;

/// Classification of one grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellState {
    Free,
    Obstacle,
    Unknown,
    /// Free space inside the clearance band around an obstacle
    Inflated,
}

impl CellState {
    /// Whether a planned path may pass through this cell.
    #[inline]
    pub fn is_traversable(&self) -> bool {
        matches!(self, CellState::Free | CellState::Inflated)
    }
}

/// Integer grid coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridCoord {
    pub x: i32,
    pub y: i32,
}

impl GridCoord {
    #[inline]
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// A learned obstacle posted to the planner's update queue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObstacleUpdate {
    /// Obstacle center in local-frame meters
    pub center: Point2D,
    /// Obstacle radius in meters
    pub radius: f32,
}

/// Finite 2D occupancy raster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OccupancyGrid {
    /// World position of the lower-left corner of cell (0, 0)
    origin: Point2D,
    /// Cell size in meters
    resolution: f32,
    width: usize,
    height: usize,
    /// Inflation radius in meters (≥ robot radius + safety padding)
    inflation_radius: f32,
    inflation_metric: InflationMetric,
    cells: Vec<CellState>,
}

impl OccupancyGrid {
    /// Build a grid from a closed boundary polygon in local-frame meters.
    ///
    /// The grid AABB encloses the polygon with `margin` on every side.
    /// Cells inside the polygon become Free, cells outside become Obstacle,
    /// and obstacles are inflated by `inflation_radius`, which callers
    /// compute as robot radius plus safety padding.
    pub fn from_polygon(
        polygon: &[Point2D],
        resolution: f32,
        margin: f32,
        inflation_radius: f32,
        inflation_metric: InflationMetric,
    ) -> Result<Self, PlanningError> {
        if polygon.len() < 3 {
            return Err(PlanningError::EmptyPolygon);
        }

        let mut min_x = f32::MAX;
        let mut min_y = f32::MAX;
        let mut max_x = f32::MIN;
        let mut max_y = f32::MIN;
        for p in polygon {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }

        let origin = Point2D::new(min_x - margin, min_y - margin);
        let width = (((max_x - min_x) + 2.0 * margin) / resolution).ceil() as usize;
        let height = (((max_y - min_y) + 2.0 * margin) / resolution).ceil() as usize;

        let mut grid = Self {
            origin,
            resolution,
            width,
            height,
            inflation_radius,
            inflation_metric,
            cells: vec![CellState::Obstacle; width * height],
        };

        grid.rasterize_interior(polygon);
        grid.inflate_all();

        Ok(grid)
    }

    /// An all-Free grid with explicit geometry. Used when a mission runs
    /// without a boundary polygon and by the planning tests.
    pub fn new_free(
        width: usize,
        height: usize,
        resolution: f32,
        origin: Point2D,
        inflation_radius: f32,
        inflation_metric: InflationMetric,
    ) -> Self {
        Self {
            origin,
            resolution,
            width,
            height,
            inflation_radius,
            inflation_metric,
            cells: vec![CellState::Free; width * height],
        }
    }

    /// Mark a rectangle of cells as Obstacle and re-inflate around them.
    pub fn mark_obstacle_cells(&mut self, cells: &[GridCoord]) {
        for &c in cells {
            self.set(c, CellState::Obstacle);
        }
        for &c in cells {
            self.inflate_around(c);
        }
    }

    /// Mark cells whose centers fall inside the polygon as Free (even-odd
    /// rule), leaving the outside as Obstacle.
    fn rasterize_interior(&mut self, polygon: &[Point2D]) {
        let mut crossings: Vec<f32> = Vec::with_capacity(polygon.len());

        for cy in 0..self.height {
            let yc = self.origin.y + (cy as f32 + 0.5) * self.resolution;

            crossings.clear();
            for i in 0..polygon.len() {
                let p1 = polygon[i];
                let p2 = polygon[(i + 1) % polygon.len()];
                if (p1.y > yc) != (p2.y > yc) {
                    let t = (yc - p1.y) / (p2.y - p1.y);
                    crossings.push(p1.x + t * (p2.x - p1.x));
                }
            }
            crossings.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

            for pair in crossings.chunks_exact(2) {
                let x_start = ((pair[0] - self.origin.x) / self.resolution - 0.5).ceil() as i32;
                let x_end = ((pair[1] - self.origin.x) / self.resolution - 0.5).floor() as i32;
                for cx in x_start.max(0)..=x_end.min(self.width as i32 - 1) {
                    self.cells[cy * self.width + cx as usize] = CellState::Free;
                }
            }
        }
    }

    /// Inflate every obstacle cell by the configured radius.
    fn inflate_all(&mut self) {
        let obstacles: Vec<GridCoord> = (0..self.height as i32)
            .flat_map(|y| (0..self.width as i32).map(move |x| GridCoord::new(x, y)))
            .filter(|&c| self.get(c) == Some(CellState::Obstacle))
            .collect();
        for c in obstacles {
            self.inflate_around(c);
        }
    }

    /// Mark Free cells within the inflation radius of `center` as Inflated.
    fn inflate_around(&mut self, center: GridCoord) {
        let r_cells = (self.inflation_radius / self.resolution).ceil() as i32;
        for dy in -r_cells..=r_cells {
            for dx in -r_cells..=r_cells {
                let within = match self.inflation_metric {
                    InflationMetric::Chebyshev => dx.abs().max(dy.abs()) <= r_cells,
                    InflationMetric::Euclidean => dx * dx + dy * dy <= r_cells * r_cells,
                };
                if !within {
                    continue;
                }
                let c = GridCoord::new(center.x + dx, center.y + dy);
                if self.get(c) == Some(CellState::Free) {
                    self.set(c, CellState::Inflated);
                }
            }
        }
    }

    /// Learn an obstacle: mark its disc as Obstacle and re-inflate locally.
    pub fn apply(&mut self, update: &ObstacleUpdate) {
        let r_cells = (update.radius / self.resolution).ceil() as i32;
        let center = self.world_to_cell_unchecked(&update.center);

        let mut marked = Vec::new();
        for dy in -r_cells..=r_cells {
            for dx in -r_cells..=r_cells {
                if dx * dx + dy * dy > r_cells * r_cells {
                    continue;
                }
                let c = GridCoord::new(center.x + dx, center.y + dy);
                if self.in_bounds(c) {
                    self.set(c, CellState::Obstacle);
                    marked.push(c);
                }
            }
        }
        for c in marked {
            self.inflate_around(c);
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn resolution(&self) -> f32 {
        self.resolution
    }

    #[inline]
    pub fn origin(&self) -> Point2D {
        self.origin
    }

    #[inline]
    pub fn in_bounds(&self, c: GridCoord) -> bool {
        c.x >= 0 && c.y >= 0 && (c.x as usize) < self.width && (c.y as usize) < self.height
    }

    /// Cell state, or `None` outside the grid.
    #[inline]
    pub fn get(&self, c: GridCoord) -> Option<CellState> {
        if self.in_bounds(c) {
            Some(self.cells[c.y as usize * self.width + c.x as usize])
        } else {
            None
        }
    }

    #[inline]
    pub(crate) fn set(&mut self, c: GridCoord, state: CellState) {
        if self.in_bounds(c) {
            self.cells[c.y as usize * self.width + c.x as usize] = state;
        }
    }

    /// Whether a cell may be planned through. Out-of-grid is not.
    #[inline]
    pub fn is_traversable(&self, c: GridCoord) -> bool {
        self.get(c).is_some_and(|s| s.is_traversable())
    }

    /// Convert world coordinates to a grid cell, or `None` outside.
    pub fn world_to_cell(&self, p: &Point2D) -> Option<GridCoord> {
        let c = self.world_to_cell_unchecked(p);
        self.in_bounds(c).then_some(c)
    }

    fn world_to_cell_unchecked(&self, p: &Point2D) -> GridCoord {
        GridCoord::new(
            ((p.x - self.origin.x) / self.resolution).floor() as i32,
            ((p.y - self.origin.y) / self.resolution).floor() as i32,
        )
    }

    /// World coordinates of a cell center.
    pub fn cell_to_world(&self, c: GridCoord) -> Point2D {
        Point2D::new(
            self.origin.x + (c.x as f32 + 0.5) * self.resolution,
            self.origin.y + (c.y as f32 + 0.5) * self.resolution,
        )
    }

    /// Find the traversable cell closest to `target` using BFS.
    ///
    /// Returns `None` if nothing traversable exists within `max_radius`
    /// cells.
    pub fn find_nearest_free(&self, target: GridCoord, max_radius: i32) -> Option<GridCoord> {
        if self.is_traversable(target) {
            return Some(target);
        }

        let mut visited = vec![false; self.width * self.height];
        let mut queue = VecDeque::new();
        if self.in_bounds(target) {
            visited[target.y as usize * self.width + target.x as usize] = true;
        }
        queue.push_back((target, 0i32));

        while let Some((c, dist)) = queue.pop_front() {
            if dist > max_radius {
                break;
            }
            if self.is_traversable(c) {
                return Some(c);
            }
            for (dx, dy) in [(0, 1), (1, 0), (0, -1), (-1, 0)] {
                let n = GridCoord::new(c.x + dx, c.y + dy);
                if self.in_bounds(n) {
                    let idx = n.y as usize * self.width + n.x as usize;
                    if !visited[idx] {
                        visited[idx] = true;
                        queue.push_back((n, dist + 1));
                    }
                }
            }
        }

        None
    }

    /// Check traversable line-of-sight between two cells (Bresenham).
    pub fn line_of_sight(&self, from: GridCoord, to: GridCoord) -> bool {
        let mut x0 = from.x;
        let mut y0 = from.y;
        let x1 = to.x;
        let y1 = to.y;

        let dx = (x1 - x0).abs();
        let dy = (y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx - dy;

        loop {
            if !self.is_traversable(GridCoord::new(x0, y0)) {
                return false;
            }
            if x0 == x1 && y0 == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 > -dy {
                err -= dy;
                x0 += sx;
            }
            if e2 < dx {
                err += dx;
                y0 += sy;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_polygon(side: f32) -> Vec<Point2D> {
        vec![
            Point2D::new(0.0, 0.0),
            Point2D::new(side, 0.0),
            Point2D::new(side, side),
            Point2D::new(0.0, side),
        ]
    }

    #[test]
    fn test_empty_polygon_rejected() {
        let result = OccupancyGrid::from_polygon(
            &[Point2D::new(0.0, 0.0)],
            0.1,
            0.5,
            0.2,
            InflationMetric::Euclidean,
        );
        assert_eq!(result.unwrap_err(), PlanningError::EmptyPolygon);
    }

    #[test]
    fn test_interior_free_exterior_obstacle() {
        let grid = OccupancyGrid::from_polygon(
            &square_polygon(5.0),
            0.1,
            1.0,
            0.3,
            InflationMetric::Euclidean,
        )
        .unwrap();

        let center = grid.world_to_cell(&Point2D::new(2.5, 2.5)).unwrap();
        assert_eq!(grid.get(center), Some(CellState::Free));

        let outside = grid.world_to_cell(&Point2D::new(-0.5, 2.5)).unwrap();
        assert_eq!(grid.get(outside), Some(CellState::Obstacle));
    }

    #[test]
    fn test_inflation_band_inside_boundary() {
        let grid = OccupancyGrid::from_polygon(
            &square_polygon(5.0),
            0.1,
            1.0,
            0.3,
            InflationMetric::Euclidean,
        )
        .unwrap();

        // Just inside the edge: inflated, not free
        let near_edge = grid.world_to_cell(&Point2D::new(0.15, 2.5)).unwrap();
        assert_eq!(grid.get(near_edge), Some(CellState::Inflated));

        // Deep interior stays free
        let interior = grid.world_to_cell(&Point2D::new(2.5, 2.5)).unwrap();
        assert_eq!(grid.get(interior), Some(CellState::Free));
    }

    #[test]
    fn test_chebyshev_inflation_covers_diagonal() {
        let grid = OccupancyGrid::from_polygon(
            &square_polygon(5.0),
            0.1,
            0.5,
            0.3,
            InflationMetric::Chebyshev,
        )
        .unwrap();

        // Chebyshev inflation reaches the full radius diagonally
        let corner_diag = grid.world_to_cell(&Point2D::new(0.25, 0.25)).unwrap();
        assert_eq!(grid.get(corner_diag), Some(CellState::Inflated));
    }

    #[test]
    fn test_obstacle_upsert_and_reinflation() {
        let mut grid = OccupancyGrid::from_polygon(
            &square_polygon(5.0),
            0.1,
            0.5,
            0.2,
            InflationMetric::Euclidean,
        )
        .unwrap();

        let update = ObstacleUpdate {
            center: Point2D::new(2.5, 2.5),
            radius: 0.2,
        };
        grid.apply(&update);

        let center = grid.world_to_cell(&Point2D::new(2.5, 2.5)).unwrap();
        assert_eq!(grid.get(center), Some(CellState::Obstacle));

        // The ring around it is inflated
        let ring = grid.world_to_cell(&Point2D::new(2.5, 2.85)).unwrap();
        assert_eq!(grid.get(ring), Some(CellState::Inflated));

        // Far away unaffected
        let far = grid.world_to_cell(&Point2D::new(1.0, 1.0)).unwrap();
        assert_eq!(grid.get(far), Some(CellState::Free));
    }

    #[test]
    fn test_cell_world_roundtrip() {
        let grid = OccupancyGrid::from_polygon(
            &square_polygon(5.0),
            0.1,
            0.5,
            0.2,
            InflationMetric::Euclidean,
        )
        .unwrap();

        let p = Point2D::new(1.23, 3.47);
        let c = grid.world_to_cell(&p).unwrap();
        let back = grid.cell_to_world(c);
        assert!(p.distance(&back) <= grid.resolution() * std::f32::consts::SQRT_2 / 2.0 + 1e-6);
    }

    #[test]
    fn test_find_nearest_free() {
        let grid = OccupancyGrid::from_polygon(
            &square_polygon(5.0),
            0.1,
            1.0,
            0.3,
            InflationMetric::Euclidean,
        )
        .unwrap();

        // A point outside the polygon suggests the nearest interior cell
        let blocked = grid.world_to_cell(&Point2D::new(-0.5, 2.5)).unwrap();
        let free = grid.find_nearest_free(blocked, 30).unwrap();
        assert!(grid.is_traversable(free));
    }

    #[test]
    fn test_line_of_sight_blocked_by_upsert() {
        let mut grid = OccupancyGrid::from_polygon(
            &square_polygon(5.0),
            0.1,
            0.5,
            0.2,
            InflationMetric::Euclidean,
        )
        .unwrap();

        let a = grid.world_to_cell(&Point2D::new(1.0, 2.5)).unwrap();
        let b = grid.world_to_cell(&Point2D::new(4.0, 2.5)).unwrap();
        assert!(grid.line_of_sight(a, b));

        grid.apply(&ObstacleUpdate {
            center: Point2D::new(2.5, 2.5),
            radius: 0.3,
        });
        assert!(!grid.line_of_sight(a, b));
    }
}
