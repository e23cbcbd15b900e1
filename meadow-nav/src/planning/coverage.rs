//! Boustrophedon coverage path generation.
//!
//! Strips are oriented along the polygon's major axis (PCA on the boundary
//! vertices), spaced by the effective cutting width (brush width minus
//! overlap), clipped to the polygon interior, and joined serpentine-style
//! with short connector segments.

use crate::core::math::normalize_angle;
use crate::core::types::Point2D;

use super::path::{Path, Waypoint};
use super::PlanningError;

/// Result of coverage planning.
#[derive(Debug, Clone)]
pub struct CoveragePlan {
    pub path: Path,
    /// Number of scanline strips generated
    pub strips: usize,
}

/// Boustrophedon coverage planner.
#[derive(Debug, Clone)]
pub struct CoveragePlanner {
    /// Effective strip spacing: brush width − overlap, meters
    pub strip_spacing: f32,
    /// Maximum spacing between consecutive waypoints, meters
    pub max_waypoint_step: f32,
    /// Arrival tolerance stamped on every waypoint, meters
    pub waypoint_tolerance: f32,
}

impl CoveragePlanner {
    /// Create a planner from the mowing parameters.
    pub fn new(brush_width: f32, overlap: f32, max_waypoint_step: f32, waypoint_tolerance: f32) -> Self {
        Self {
            strip_spacing: brush_width - overlap,
            max_waypoint_step,
            waypoint_tolerance,
        }
    }

    /// Generate the coverage path for a polygon in local-frame meters.
    pub fn plan(&self, polygon: &[Point2D]) -> Result<CoveragePlan, PlanningError> {
        if polygon.len() < 3 {
            return Err(PlanningError::EmptyPolygon);
        }

        let axis = Self::major_axis(polygon);
        let (sin_a, cos_a) = axis.sin_cos();

        // Rotate the polygon so the major axis lies along x
        let rotated: Vec<Point2D> = polygon
            .iter()
            .map(|p| Point2D::new(p.x * cos_a + p.y * sin_a, -p.x * sin_a + p.y * cos_a))
            .collect();

        let min_y = rotated.iter().map(|p| p.y).fold(f32::MAX, f32::min);
        let max_y = rotated.iter().map(|p| p.y).fold(f32::MIN, f32::max);

        let mut strips = 0usize;
        let mut waypoints: Vec<Waypoint> = Vec::new();
        let mut leftward = false;
        let mut last_end: Option<Point2D> = None;

        let mut y = min_y + self.strip_spacing / 2.0;
        while y < max_y {
            let mut segments = Self::scanline_segments(&rotated, y);
            if !segments.is_empty() {
                strips += 1;
                if leftward {
                    segments.reverse();
                }
                for seg in &segments {
                    let (start_x, end_x) = if leftward {
                        (seg.1, seg.0)
                    } else {
                        (seg.0, seg.1)
                    };
                    let start = Point2D::new(start_x, y);
                    let end = Point2D::new(end_x, y);

                    // Connector from the previous strip end
                    if let Some(prev) = last_end {
                        self.emit_segment(&mut waypoints, prev, start, None);
                    }
                    let heading = if leftward {
                        std::f32::consts::PI
                    } else {
                        0.0
                    };
                    self.emit_segment(&mut waypoints, start, end, Some(heading));
                    last_end = Some(end);
                }
                leftward = !leftward;
            }
            y += self.strip_spacing;
        }

        if waypoints.is_empty() {
            return Err(PlanningError::NoPathFound);
        }

        // Rotate waypoints back into the local frame
        let unrotated: Vec<Waypoint> = waypoints
            .into_iter()
            .map(|wp| {
                let x = wp.x * cos_a - wp.y * sin_a;
                let y = wp.x * sin_a + wp.y * cos_a;
                Waypoint {
                    x,
                    y,
                    heading: wp.heading.map(|h| normalize_angle(h + axis)),
                    tolerance: wp.tolerance,
                }
            })
            .collect();

        Ok(CoveragePlan {
            path: Path::new(unrotated),
            strips,
        })
    }

    /// Append waypoints from `from` (exclusive) to `to` (inclusive), spaced
    /// by at most `max_waypoint_step`.
    fn emit_segment(
        &self,
        waypoints: &mut Vec<Waypoint>,
        from: Point2D,
        to: Point2D,
        heading: Option<f32>,
    ) {
        let length = from.distance(&to);
        if length < 1e-6 {
            return;
        }
        let steps = (length / self.max_waypoint_step).ceil().max(1.0) as usize;
        for i in 1..=steps {
            let t = i as f32 / steps as f32;
            let x = from.x + t * (to.x - from.x);
            let y = from.y + t * (to.y - from.y);
            waypoints.push(Waypoint {
                x,
                y,
                heading,
                tolerance: self.waypoint_tolerance,
            });
        }
    }

    /// Principal axis angle of the boundary vertices (PCA).
    fn major_axis(polygon: &[Point2D]) -> f32 {
        let n = polygon.len() as f32;
        let mean_x = polygon.iter().map(|p| p.x).sum::<f32>() / n;
        let mean_y = polygon.iter().map(|p| p.y).sum::<f32>() / n;

        let mut sxx = 0.0;
        let mut syy = 0.0;
        let mut sxy = 0.0;
        for p in polygon {
            let dx = p.x - mean_x;
            let dy = p.y - mean_y;
            sxx += dx * dx;
            syy += dy * dy;
            sxy += dx * dy;
        }

        0.5 * (2.0 * sxy).atan2(sxx - syy)
    }

    /// Even-odd intersections of a horizontal scanline with the polygon,
    /// as sorted (x_start, x_end) segments.
    fn scanline_segments(polygon: &[Point2D], y: f32) -> Vec<(f32, f32)> {
        let mut crossings: Vec<f32> = Vec::new();
        for i in 0..polygon.len() {
            let p1 = polygon[i];
            let p2 = polygon[(i + 1) % polygon.len()];
            if (p1.y > y) != (p2.y > y) {
                let t = (y - p1.y) / (p2.y - p1.y);
                crossings.push(p1.x + t * (p2.x - p1.x));
            }
        }
        crossings.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        crossings
            .chunks_exact(2)
            .map(|pair| (pair[0], pair[1]))
            .filter(|(a, b)| b - a > 1e-4)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn rectangle(w: f32, h: f32) -> Vec<Point2D> {
        vec![
            Point2D::new(0.0, 0.0),
            Point2D::new(w, 0.0),
            Point2D::new(w, h),
            Point2D::new(0.0, h),
        ]
    }

    #[test]
    fn test_rectangle_strip_count_and_length() {
        // 10 m × 6 m, brush 0.25, overlap 0.1: spacing 0.15 → 40 strips,
        // ~400 m of strip travel plus connectors
        let planner = CoveragePlanner::new(0.25, 0.1, 0.5, 0.2);
        let plan = planner.plan(&rectangle(10.0, 6.0)).unwrap();

        assert_eq!(plan.strips, 40);

        let strip_length: f32 = 40.0 * 10.0;
        assert!(
            plan.path.total_length >= strip_length,
            "total {} below strip travel {}",
            plan.path.total_length,
            strip_length
        );
        // Connectors add at most spacing per strip transition
        assert!(plan.path.total_length < strip_length + 40.0 * 0.3 + 10.0);
    }

    #[test]
    fn test_waypoint_spacing_bounded() {
        let planner = CoveragePlanner::new(0.25, 0.1, 0.5, 0.2);
        let plan = planner.plan(&rectangle(10.0, 6.0)).unwrap();
        assert!(plan.path.max_step() <= 0.5 + 1e-4);
    }

    #[test]
    fn test_strips_run_along_major_axis() {
        let planner = CoveragePlanner::new(0.25, 0.1, 0.5, 0.2);
        let plan = planner.plan(&rectangle(10.0, 6.0)).unwrap();

        // Strip waypoints carry a heading along ±x (the 10 m axis)
        let headings: Vec<f32> = plan
            .path
            .waypoints()
            .iter()
            .filter_map(|wp| wp.heading)
            .collect();
        assert!(!headings.is_empty());
        for h in headings {
            let along_x = h.abs() < 1e-3 || (h.abs() - std::f32::consts::PI).abs() < 1e-3;
            assert!(along_x, "heading {} not along the major axis", h);
        }
    }

    #[test]
    fn test_rotated_rectangle_strips_follow_rotation() {
        // Rotate the same rectangle by 30°; strips should follow
        let angle = 30.0f32.to_radians();
        let (s, c) = angle.sin_cos();
        let polygon: Vec<Point2D> = rectangle(10.0, 6.0)
            .into_iter()
            .map(|p| Point2D::new(p.x * c - p.y * s, p.x * s + p.y * c))
            .collect();

        let planner = CoveragePlanner::new(0.25, 0.1, 0.5, 0.2);
        let plan = planner.plan(&polygon).unwrap();
        assert_eq!(plan.strips, 40);

        let first_heading = plan
            .path
            .waypoints()
            .iter()
            .find_map(|wp| wp.heading)
            .unwrap();
        let along_axis = (normalize_angle(first_heading - angle)).abs() < 1e-2
            || (normalize_angle(first_heading - angle).abs() - std::f32::consts::PI).abs() < 1e-2;
        assert!(along_axis, "heading {} vs axis {}", first_heading, angle);
    }

    #[test]
    fn test_coverage_density() {
        // Every interior point should be within brush_width/2 − overlap… of
        // some strip line; with spacing 0.15 the worst case across strips
        // is spacing/2 = 0.075
        let planner = CoveragePlanner::new(0.25, 0.1, 0.25, 0.2);
        let plan = planner.plan(&rectangle(4.0, 3.0)).unwrap();

        let mut y = 0.2f32;
        while y < 2.8 {
            let mut x = 0.2f32;
            while x < 3.8 {
                let probe = Point2D::new(x, y);
                let best = plan
                    .path
                    .waypoints()
                    .iter()
                    .map(|wp| probe.distance(&wp.position()))
                    .fold(f32::MAX, f32::min);
                assert!(
                    best <= 0.15,
                    "interior point ({}, {}) is {}m from the path",
                    x,
                    y,
                    best
                );
                x += 0.3;
            }
            y += 0.3;
        }
    }

    #[test]
    fn test_empty_polygon() {
        let planner = CoveragePlanner::new(0.25, 0.1, 0.5, 0.2);
        assert_eq!(
            planner.plan(&[]).unwrap_err(),
            PlanningError::EmptyPolygon
        );
    }

    #[test]
    fn test_serpentine_alternation() {
        let planner = CoveragePlanner::new(0.25, 0.1, 10.0, 0.2);
        let plan = planner.plan(&rectangle(2.0, 0.5)).unwrap();

        // With max_step larger than the strip, each strip contributes few
        // waypoints; successive strips must run in opposite directions
        let headings: Vec<f32> = plan
            .path
            .waypoints()
            .iter()
            .filter_map(|wp| wp.heading)
            .collect();
        let mut switches = 0;
        for pair in headings.windows(2) {
            if (pair[0] - pair[1]).abs() > 1.0 {
                switches += 1;
            }
        }
        assert!(switches >= plan.strips - 1);
    }
}
