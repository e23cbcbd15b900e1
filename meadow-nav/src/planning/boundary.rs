//! Geofence monitoring against the boundary polygon.
//!
//! The fused position is checked at a configured frequency. Drifting into
//! the warning band slows the vehicle down; leaving the polygon beyond the
//! hard deviation limit demands an immediate controlled return.

use crate::core::types::Point2D;

/// Geofence verdict for one position check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundaryStatus {
    /// Comfortably inside; `margin` is the distance to the boundary
    Safe { margin: f32 },
    /// Inside but within the warning band of the boundary
    Warning { margin: f32 },
    /// Outside the polygon but within the tolerated deviation
    Outside { deviation: f32 },
    /// Outside beyond the hard deviation limit
    Breach { deviation: f32 },
}

impl BoundaryStatus {
    /// Whether the position is inside the polygon.
    pub fn is_inside(&self) -> bool {
        matches!(self, BoundaryStatus::Safe { .. } | BoundaryStatus::Warning { .. })
    }
}

/// Boundary polygon monitor.
#[derive(Debug, Clone)]
pub struct BoundaryMonitor {
    polygon: Vec<Point2D>,
    buffer_distance: f32,
    warning_distance: f32,
    max_deviation: f32,
}

impl BoundaryMonitor {
    pub fn new(
        polygon: Vec<Point2D>,
        buffer_distance: f32,
        warning_distance: f32,
        max_deviation: f32,
    ) -> Self {
        Self {
            polygon,
            buffer_distance,
            warning_distance,
            max_deviation,
        }
    }

    /// Classify a position against the boundary.
    pub fn check(&self, position: &Point2D) -> BoundaryStatus {
        let distance = self.distance_to_boundary(position);
        if self.contains(position) {
            let warn_band = self.warning_distance.max(self.buffer_distance);
            if distance < warn_band {
                BoundaryStatus::Warning { margin: distance }
            } else {
                BoundaryStatus::Safe { margin: distance }
            }
        } else if distance <= self.max_deviation {
            BoundaryStatus::Outside {
                deviation: distance,
            }
        } else {
            BoundaryStatus::Breach {
                deviation: distance,
            }
        }
    }

    /// Even-odd point-in-polygon test.
    pub fn contains(&self, p: &Point2D) -> bool {
        let mut inside = false;
        let n = self.polygon.len();
        for i in 0..n {
            let a = self.polygon[i];
            let b = self.polygon[(i + 1) % n];
            if (a.y > p.y) != (b.y > p.y) {
                let t = (p.y - a.y) / (b.y - a.y);
                if p.x < a.x + t * (b.x - a.x) {
                    inside = !inside;
                }
            }
        }
        inside
    }

    /// Distance from a point to the nearest boundary edge.
    pub fn distance_to_boundary(&self, p: &Point2D) -> f32 {
        let n = self.polygon.len();
        let mut best = f32::MAX;
        for i in 0..n {
            let a = self.polygon[i];
            let b = self.polygon[(i + 1) % n];
            best = best.min(Self::point_segment_distance(p, &a, &b));
        }
        best
    }

    fn point_segment_distance(p: &Point2D, a: &Point2D, b: &Point2D) -> f32 {
        let abx = b.x - a.x;
        let aby = b.y - a.y;
        let len_sq = abx * abx + aby * aby;
        if len_sq < 1e-12 {
            return p.distance(a);
        }
        let t = (((p.x - a.x) * abx + (p.y - a.y) * aby) / len_sq).clamp(0.0, 1.0);
        let proj = Point2D::new(a.x + t * abx, a.y + t * aby);
        p.distance(&proj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn monitor() -> BoundaryMonitor {
        // 10 × 10 square, warn within 1 m of the edge, tolerate 0.3 m out
        BoundaryMonitor::new(
            vec![
                Point2D::new(0.0, 0.0),
                Point2D::new(10.0, 0.0),
                Point2D::new(10.0, 10.0),
                Point2D::new(0.0, 10.0),
            ],
            0.5,
            1.0,
            0.3,
        )
    }

    #[test]
    fn test_center_is_safe() {
        let status = monitor().check(&Point2D::new(5.0, 5.0));
        match status {
            BoundaryStatus::Safe { margin } => assert_relative_eq!(margin, 5.0),
            other => panic!("expected Safe, got {:?}", other),
        }
    }

    #[test]
    fn test_near_edge_warns() {
        let status = monitor().check(&Point2D::new(0.4, 5.0));
        assert!(matches!(status, BoundaryStatus::Warning { .. }));
        assert!(status.is_inside());
    }

    #[test]
    fn test_small_excursion_is_outside() {
        let status = monitor().check(&Point2D::new(-0.2, 5.0));
        match status {
            BoundaryStatus::Outside { deviation } => assert_relative_eq!(deviation, 0.2),
            other => panic!("expected Outside, got {:?}", other),
        }
    }

    #[test]
    fn test_large_excursion_is_breach() {
        let status = monitor().check(&Point2D::new(-2.0, 5.0));
        assert!(matches!(status, BoundaryStatus::Breach { .. }));
    }

    #[test]
    fn test_corner_distance() {
        let m = monitor();
        let d = m.distance_to_boundary(&Point2D::new(-3.0, -4.0));
        assert_relative_eq!(d, 5.0);
    }
}
