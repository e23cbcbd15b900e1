//! Fiducial marker detection and decoding.
//!
//! The pipeline per frame:
//!
//! 1. Tile-based adaptive threshold (min/max over a 3×3 tile
//!    neighborhood; low-contrast tiles produce no candidates).
//! 2. Connected dark regions with boundary extraction.
//! 3. Convex hull, reduced to a quadrilateral by smallest-triangle
//!    removal; perimeter-rate and squareness gates.
//! 4. Bit-grid sampling through a unit-square homography and
//!    rotation-invariant codeword matching against the configured family.
//! 5. Planar pose from the homography of the metric corners and the
//!    calibrated intrinsics: range, bearing and yaw offset in the robot
//!    frame.

use meadow_io::types::CameraFrame;

use crate::core::math::normalize_angle;

use super::homography::Homography;
use super::intrinsics::{CameraExtrinsics, CameraIntrinsics};
use super::FiducialDetection;

/// Threshold tile edge in pixels.
const TILE: usize = 16;

/// Minimum dark-region pixel count considered at all.
const MIN_REGION_AREA: usize = 24;

/// Fraction of border cells that must sample dark for a decode attempt.
const MIN_BORDER_FRACTION: f32 = 0.85;

/// Quad area must be at least this fraction of its hull's area.
const MIN_QUAD_FILL: f32 = 0.85;

/// Detector tuning and the marker family.
#[derive(Debug, Clone)]
pub struct DetectorParams {
    /// Data bits per marker side
    pub family_bits: u32,
    /// Family codewords; marker id is the index
    pub codewords: Vec<u64>,
    /// Maximum Hamming distance accepted
    pub max_hamming: u32,
    /// Marker side length, meters
    pub tag_size: f32,
    /// Quad perimeter bounds as fractions of the frame's larger dimension
    pub min_perimeter_rate: f32,
    pub max_perimeter_rate: f32,
    /// Detections below this confidence are dropped
    pub min_confidence: f32,
    /// Detections beyond this range are dropped, meters
    pub max_detection_distance: f32,
    /// Minimum tile-neighborhood contrast to classify pixels
    pub min_tile_contrast: u8,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            family_bits: 6,
            codewords: vec![0x0000000d5d628584],
            max_hamming: 2,
            tag_size: 0.08,
            min_perimeter_rate: 0.03,
            max_perimeter_rate: 4.0,
            min_confidence: 0.6,
            max_detection_distance: 3.0,
            min_tile_contrast: 20,
        }
    }
}

/// Classical fiducial detector.
pub struct FiducialDetector {
    params: DetectorParams,
    intrinsics: CameraIntrinsics,
    extrinsics: CameraExtrinsics,
}

impl FiducialDetector {
    pub fn new(
        params: DetectorParams,
        intrinsics: CameraIntrinsics,
        extrinsics: CameraExtrinsics,
    ) -> Self {
        Self {
            params,
            intrinsics,
            extrinsics,
        }
    }

    /// Detect and decode all family markers in a frame.
    pub fn detect(&self, frame: &CameraFrame) -> Vec<FiducialDetection> {
        let dark = self.threshold(frame);
        let regions = Self::segment(frame, &dark);

        let max_dim = frame.width.max(frame.height) as f32;
        let min_perimeter = self.params.min_perimeter_rate * max_dim;
        let max_perimeter = self.params.max_perimeter_rate * max_dim;

        let mut detections = Vec::new();
        for boundary in regions {
            let hull = convex_hull(&boundary);
            if hull.len() < 4 {
                continue;
            }

            let perimeter = polygon_perimeter(&hull);
            if perimeter < min_perimeter || perimeter > max_perimeter {
                continue;
            }

            let hull_area = polygon_area(&hull);
            let quad = reduce_to_quad(hull);
            if quad.len() != 4 {
                continue;
            }
            if polygon_area(&quad) < MIN_QUAD_FILL * hull_area {
                continue;
            }

            let corners = [quad[0], quad[1], quad[2], quad[3]];
            if let Some(det) = self.decode_quad(frame, &corners) {
                detections.push(det);
            }
        }

        detections
    }

    /// Per-pixel dark classification using 3×3 tile neighborhood min/max.
    fn threshold(&self, frame: &CameraFrame) -> Vec<bool> {
        let w = frame.width;
        let h = frame.height;
        let tiles_w = w.div_ceil(TILE);
        let tiles_h = h.div_ceil(TILE);

        let mut tile_min = vec![255u8; tiles_w * tiles_h];
        let mut tile_max = vec![0u8; tiles_w * tiles_h];

        for y in 0..h {
            let ty = y / TILE;
            for x in 0..w {
                let tx = x / TILE;
                let v = frame.pixels[y * w + x];
                let idx = ty * tiles_w + tx;
                tile_min[idx] = tile_min[idx].min(v);
                tile_max[idx] = tile_max[idx].max(v);
            }
        }

        // Expand min/max over the 3×3 tile neighborhood
        let mut nmin = vec![255u8; tiles_w * tiles_h];
        let mut nmax = vec![0u8; tiles_w * tiles_h];
        for ty in 0..tiles_h {
            for tx in 0..tiles_w {
                let mut lo = 255u8;
                let mut hi = 0u8;
                for dy in -1i32..=1 {
                    for dx in -1i32..=1 {
                        let ny = ty as i32 + dy;
                        let nx = tx as i32 + dx;
                        if ny >= 0 && nx >= 0 && (ny as usize) < tiles_h && (nx as usize) < tiles_w
                        {
                            let idx = ny as usize * tiles_w + nx as usize;
                            lo = lo.min(tile_min[idx]);
                            hi = hi.max(tile_max[idx]);
                        }
                    }
                }
                nmin[ty * tiles_w + tx] = lo;
                nmax[ty * tiles_w + tx] = hi;
            }
        }

        let mut dark = vec![false; w * h];
        for y in 0..h {
            let ty = y / TILE;
            for x in 0..w {
                let tx = x / TILE;
                let idx = ty * tiles_w + tx;
                let contrast = nmax[idx].saturating_sub(nmin[idx]);
                if contrast < self.params.min_tile_contrast {
                    continue;
                }
                let thr = (nmin[idx] as u16 + nmax[idx] as u16) / 2;
                if (frame.pixels[y * w + x] as u16) < thr {
                    dark[y * w + x] = true;
                }
            }
        }
        dark
    }

    /// Connected dark regions (4-connectivity); returns each region's
    /// boundary pixels.
    fn segment(frame: &CameraFrame, dark: &[bool]) -> Vec<Vec<(f32, f32)>> {
        let w = frame.width;
        let h = frame.height;
        let mut visited = vec![false; w * h];
        let mut regions = Vec::new();
        let mut stack = Vec::new();

        for start in 0..w * h {
            if !dark[start] || visited[start] {
                continue;
            }

            let mut boundary = Vec::new();
            let mut count = 0usize;
            visited[start] = true;
            stack.push(start);

            while let Some(idx) = stack.pop() {
                count += 1;
                let x = idx % w;
                let y = idx / w;

                let mut is_boundary = false;
                for (dx, dy) in [(0i32, 1i32), (1, 0), (0, -1), (-1, 0)] {
                    let nx = x as i32 + dx;
                    let ny = y as i32 + dy;
                    if nx < 0 || ny < 0 || nx >= w as i32 || ny >= h as i32 {
                        is_boundary = true;
                        continue;
                    }
                    let nidx = ny as usize * w + nx as usize;
                    if !dark[nidx] {
                        is_boundary = true;
                    } else if !visited[nidx] {
                        visited[nidx] = true;
                        stack.push(nidx);
                    }
                }
                if is_boundary {
                    boundary.push((x as f32, y as f32));
                }
            }

            if count >= MIN_REGION_AREA && count <= (w * h) / 4 {
                regions.push(boundary);
            }
        }

        regions
    }

    /// Sample the bit grid, match the family, recover pose.
    fn decode_quad(
        &self,
        frame: &CameraFrame,
        corners: &[(f32, f32); 4],
    ) -> Option<FiducialDetection> {
        let bits = self.params.family_bits as usize;
        let cells = bits + 2;

        let unit = [(0.0f32, 0.0f32), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)];
        let h = Homography::from_points(&unit, corners)?;

        // Sample every cell center
        let mut samples = vec![0u8; cells * cells];
        let mut lo = 255u8;
        let mut hi = 0u8;
        for r in 0..cells {
            for c in 0..cells {
                let u = (c as f32 + 0.5) / cells as f32;
                let v = (r as f32 + 0.5) / cells as f32;
                let (px, py) = h.apply(u, v);
                let value = frame.get(px.round() as usize, py.round() as usize);
                samples[r * cells + c] = value;
                lo = lo.min(value);
                hi = hi.max(value);
            }
        }
        if hi.saturating_sub(lo) < self.params.min_tile_contrast {
            return None;
        }
        let threshold = (lo as u16 + hi as u16) / 2;

        // The border ring must be dark
        let mut border_total = 0usize;
        let mut border_dark = 0usize;
        for r in 0..cells {
            for c in 0..cells {
                if r == 0 || c == 0 || r == cells - 1 || c == cells - 1 {
                    border_total += 1;
                    if (samples[r * cells + c] as u16) < threshold {
                        border_dark += 1;
                    }
                }
            }
        }
        if (border_dark as f32) < MIN_BORDER_FRACTION * border_total as f32 {
            return None;
        }

        // Inner bit matrix, row-major, 1 = white
        let mut matrix = vec![false; bits * bits];
        for r in 0..bits {
            for c in 0..bits {
                let v = samples[(r + 1) * cells + (c + 1)];
                matrix[r * bits + c] = (v as u16) >= threshold;
            }
        }

        // Try all four rotations against the family
        let mut best: Option<(u32, u32, usize)> = None; // (id, hamming, rotation)
        let mut m = matrix;
        for rotation in 0..4 {
            let code = matrix_to_code(&m, bits);
            for (id, &word) in self.params.codewords.iter().enumerate() {
                let hamming = (code ^ word).count_ones();
                if hamming <= self.params.max_hamming
                    && best.map_or(true, |(_, bh, _)| hamming < bh)
                {
                    best = Some((id as u32, hamming, rotation));
                }
            }
            m = rotate_matrix(&m, bits);
        }
        let (marker_id, hamming, rotation) = best?;

        // Geometry confidence from side-length uniformity
        let mut min_side = f32::MAX;
        let mut max_side = 0.0f32;
        for i in 0..4 {
            let (x0, y0) = corners[i];
            let (x1, y1) = corners[(i + 1) % 4];
            let side = (x1 - x0).hypot(y1 - y0);
            min_side = min_side.min(side);
            max_side = max_side.max(side);
        }
        let uniformity = (min_side / max_side).clamp(0.0, 1.0);
        let confidence = (1.0 - 0.15 * hamming as f32) * uniformity;
        if confidence < self.params.min_confidence {
            return None;
        }

        // Rotate the pixel corners so metric corners correspond to the
        // decoded orientation
        let mut ordered = *corners;
        ordered.rotate_left(rotation);

        let (range, bearing, yaw_offset) = self.pose_from_corners(&ordered)?;
        if range > self.params.max_detection_distance {
            return None;
        }

        let (range, bearing) = self.extrinsics.to_robot(range, bearing);

        Some(FiducialDetection {
            marker_id,
            range_m: range,
            bearing_rad: bearing,
            yaw_offset_rad: yaw_offset,
            confidence,
            frame_timestamp: frame.timestamp_monotonic,
            smoothed: false,
        })
    }

    /// Planar pose from the homography of the metric marker corners.
    fn pose_from_corners(&self, corners: &[(f32, f32); 4]) -> Option<(f32, f32, f32)> {
        let s = self.params.tag_size / 2.0;
        let metric = [(-s, -s), (s, -s), (s, s), (-s, s)];

        let undistorted = [
            self.intrinsics.undistort_pixel(corners[0].0, corners[0].1),
            self.intrinsics.undistort_pixel(corners[1].0, corners[1].1),
            self.intrinsics.undistort_pixel(corners[2].0, corners[2].1),
            self.intrinsics.undistort_pixel(corners[3].0, corners[3].1),
        ];

        let h = Homography::from_points(&metric, &undistorted)?;
        let hc = h.coefficients();

        // M = K⁻¹ · H gives [λr₁ λr₂ λt]
        let (fx, fy, cx, cy) = (
            self.intrinsics.fx,
            self.intrinsics.fy,
            self.intrinsics.cx,
            self.intrinsics.cy,
        );
        let mut m = [
            (hc[0] - cx * hc[6]) / fx,
            (hc[1] - cx * hc[7]) / fx,
            (hc[2] - cx * hc[8]) / fx,
            (hc[3] - cy * hc[6]) / fy,
            (hc[4] - cy * hc[7]) / fy,
            (hc[5] - cy * hc[8]) / fy,
            hc[6],
            hc[7],
            hc[8],
        ];

        // The marker is in front of the camera: t_z > 0
        if m[8] < 0.0 {
            for v in m.iter_mut() {
                *v = -*v;
            }
        }

        let n1 = (m[0] * m[0] + m[3] * m[3] + m[6] * m[6]).sqrt();
        let n2 = (m[1] * m[1] + m[4] * m[4] + m[7] * m[7]).sqrt();
        if n1 < 1e-9 || n2 < 1e-9 {
            return None;
        }
        let scale = 2.0 / (n1 + n2);

        let t = (m[2] * scale, m[5] * scale, m[8] * scale);
        let r1 = (m[0] / n1, m[3] / n1, m[6] / n1);
        let r2 = (m[1] / n2, m[4] / n2, m[7] / n2);

        // Marker normal r₃ = r₁ × r₂
        let r3 = (
            r1.1 * r2.2 - r1.2 * r2.1,
            r1.2 * r2.0 - r1.0 * r2.2,
            r1.0 * r2.1 - r1.1 * r2.0,
        );

        let range = (t.0 * t.0 + t.1 * t.1 + t.2 * t.2).sqrt();
        // Camera x is right; counter-clockwise positive bearing means left
        let bearing = (-t.0).atan2(t.2);
        // Marker axes follow the image (x right, y down), so a marker
        // facing the camera head-on has its normal along +z
        let yaw_offset = normalize_angle(r3.0.atan2(r3.2));

        Some((range, bearing, yaw_offset))
    }
}

/// Pack a bit matrix into a codeword, MSB first, row-major.
fn matrix_to_code(matrix: &[bool], bits: usize) -> u64 {
    let mut code = 0u64;
    for r in 0..bits {
        for c in 0..bits {
            code = (code << 1) | matrix[r * bits + c] as u64;
        }
    }
    code
}

/// Rotate a square bit matrix 90° clockwise.
fn rotate_matrix(matrix: &[bool], bits: usize) -> Vec<bool> {
    let mut out = vec![false; bits * bits];
    for r in 0..bits {
        for c in 0..bits {
            out[c * bits + (bits - 1 - r)] = matrix[r * bits + c];
        }
    }
    out
}

/// Andrew monotone chain convex hull; output is consistently oriented.
fn convex_hull(points: &[(f32, f32)]) -> Vec<(f32, f32)> {
    if points.len() < 3 {
        return points.to_vec();
    }
    let mut pts = points.to_vec();
    pts.sort_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
    });
    pts.dedup();

    let cross = |o: (f32, f32), a: (f32, f32), b: (f32, f32)| {
        (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
    };

    let mut lower: Vec<(f32, f32)> = Vec::new();
    for &p in &pts {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(p);
    }
    let mut upper: Vec<(f32, f32)> = Vec::new();
    for &p in pts.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(p);
    }
    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

fn polygon_perimeter(polygon: &[(f32, f32)]) -> f32 {
    let n = polygon.len();
    (0..n)
        .map(|i| {
            let a = polygon[i];
            let b = polygon[(i + 1) % n];
            (b.0 - a.0).hypot(b.1 - a.1)
        })
        .sum()
}

fn polygon_area(polygon: &[(f32, f32)]) -> f32 {
    let n = polygon.len();
    let mut area = 0.0;
    for i in 0..n {
        let a = polygon[i];
        let b = polygon[(i + 1) % n];
        area += a.0 * b.1 - b.0 * a.1;
    }
    (area / 2.0).abs()
}

/// Reduce a convex polygon to 4 vertices by repeatedly removing the vertex
/// whose neighbor triangle has the smallest area.
fn reduce_to_quad(mut hull: Vec<(f32, f32)>) -> Vec<(f32, f32)> {
    while hull.len() > 4 {
        let n = hull.len();
        let mut min_area = f32::MAX;
        let mut min_idx = 0;
        for i in 0..n {
            let a = hull[(i + n - 1) % n];
            let b = hull[i];
            let c = hull[(i + 1) % n];
            let area =
                ((b.0 - a.0) * (c.1 - a.1) - (c.0 - a.0) * (b.1 - a.1)).abs() / 2.0;
            if area < min_area {
                min_area = area;
                min_idx = i;
            }
        }
        hull.remove(min_idx);
    }
    hull
}
