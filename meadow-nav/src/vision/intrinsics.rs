//! Camera calibration data and point undistortion.

use crate::core::math::normalize_angle;

/// Pinhole intrinsics with a 5-element distortion vector.
///
/// The calibration contract: checkerboard reprojection error below half a
/// pixel, or downstream pose claims are not to be trusted.
#[derive(Debug, Clone, Copy)]
pub struct CameraIntrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
    /// (k1, k2, p1, p2, k3)
    pub distortion: [f32; 5],
}

impl CameraIntrinsics {
    /// Build from the configured 3×3 matrix and distortion vector.
    pub fn from_matrix(k: &[[f32; 3]; 3], distortion: &[f32; 5]) -> Self {
        Self {
            fx: k[0][0],
            fy: k[1][1],
            cx: k[0][2],
            cy: k[1][2],
            distortion: *distortion,
        }
    }

    /// Undistort a pixel to normalized image coordinates.
    ///
    /// Iterative inversion of the Brown-Conrady model; converges in a few
    /// rounds for moderate lens distortion.
    pub fn undistort(&self, px: f32, py: f32) -> (f32, f32) {
        let xd = (px - self.cx) / self.fx;
        let yd = (py - self.cy) / self.fy;

        let [k1, k2, p1, p2, k3] = self.distortion;

        let mut x = xd;
        let mut y = yd;
        for _ in 0..5 {
            let r2 = x * x + y * y;
            let radial = 1.0 + k1 * r2 + k2 * r2 * r2 + k3 * r2 * r2 * r2;
            let dx = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
            let dy = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
            x = (xd - dx) / radial;
            y = (yd - dy) / radial;
        }
        (x, y)
    }

    /// Undistorted pixel coordinates (re-projected through K).
    pub fn undistort_pixel(&self, px: f32, py: f32) -> (f32, f32) {
        let (x, y) = self.undistort(px, py);
        (x * self.fx + self.cx, y * self.fy + self.cy)
    }
}

/// Fixed camera-to-robot transform.
///
/// The onboard camera looks along the robot's forward axis; units with an
/// angled mount configure the yaw and the lever arm.
#[derive(Debug, Clone, Copy, Default)]
pub struct CameraExtrinsics {
    /// Camera yaw relative to the robot forward axis, radians
    pub yaw: f32,
    /// Camera position ahead of the robot center, meters
    pub forward_offset: f32,
}

impl CameraExtrinsics {
    /// Transform a camera-frame (range, bearing) observation into the
    /// robot frame.
    pub fn to_robot(&self, range: f32, bearing: f32) -> (f32, f32) {
        let cam_bearing = normalize_angle(bearing + self.yaw);
        // Shift by the lever arm along the robot's forward axis
        let x = range * cam_bearing.cos() + self.forward_offset;
        let y = range * cam_bearing.sin();
        (x.hypot(y), y.atan2(x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn pinhole() -> CameraIntrinsics {
        CameraIntrinsics::from_matrix(
            &[[640.0, 0.0, 320.0], [0.0, 640.0, 240.0], [0.0, 0.0, 1.0]],
            &[0.0; 5],
        )
    }

    #[test]
    fn test_no_distortion_is_identity() {
        let cam = pinhole();
        let (x, y) = cam.undistort_pixel(400.0, 200.0);
        assert_relative_eq!(x, 400.0, epsilon = 1e-3);
        assert_relative_eq!(y, 200.0, epsilon = 1e-3);
    }

    #[test]
    fn test_undistort_inverts_distortion() {
        let mut cam = pinhole();
        cam.distortion = [-0.2, 0.05, 0.0, 0.0, 0.0];

        // Distort a known normalized point, then undistort the pixel
        let (x0, y0) = (0.2f32, -0.1f32);
        let r2 = x0 * x0 + y0 * y0;
        let radial = 1.0 + cam.distortion[0] * r2 + cam.distortion[1] * r2 * r2;
        let px = (x0 * radial) * cam.fx + cam.cx;
        let py = (y0 * radial) * cam.fy + cam.cy;

        let (x, y) = cam.undistort(px, py);
        assert_relative_eq!(x, x0, epsilon = 1e-4);
        assert_relative_eq!(y, y0, epsilon = 1e-4);
    }

    #[test]
    fn test_extrinsics_identity() {
        let ext = CameraExtrinsics::default();
        let (range, bearing) = ext.to_robot(2.0, 0.3);
        assert_relative_eq!(range, 2.0, epsilon = 1e-5);
        assert_relative_eq!(bearing, 0.3, epsilon = 1e-5);
    }

    #[test]
    fn test_extrinsics_lever_arm() {
        let ext = CameraExtrinsics {
            yaw: 0.0,
            forward_offset: 0.2,
        };
        let (range, bearing) = ext.to_robot(1.0, 0.0);
        assert_relative_eq!(range, 1.2, epsilon = 1e-5);
        assert_relative_eq!(bearing, 0.0, epsilon = 1e-5);
    }
}
