//! IMU sample types

/// One inertial sample.
///
/// Angular rates follow the right-hand convention (z up, counter-clockwise
/// positive). Roll and pitch are the tilt angles the safety supervisor
/// watches; the localizer only consumes `gyro_z`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ImuSample {
    /// Angular rate about x (rad/s)
    pub gyro_x: f32,
    /// Angular rate about y (rad/s)
    pub gyro_y: f32,
    /// Angular rate about z, yaw rate (rad/s)
    pub gyro_z: f32,
    /// Linear acceleration x (m/s²)
    pub accel_x: f32,
    /// Linear acceleration y (m/s²)
    pub accel_y: f32,
    /// Linear acceleration z (m/s²)
    pub accel_z: f32,
    /// Roll angle (rad)
    pub roll: f32,
    /// Pitch angle (rad)
    pub pitch: f32,
    /// Monotonic timestamp of the sample (ns)
    pub timestamp_monotonic: u64,
}

impl ImuSample {
    /// Largest of |roll| and |pitch|, the tilt the supervisor limits.
    #[inline]
    pub fn tilt(&self) -> f32 {
        self.roll.abs().max(self.pitch.abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tilt_is_worst_axis() {
        let sample = ImuSample {
            roll: 0.1,
            pitch: -0.3,
            ..Default::default()
        };
        assert_eq!(sample.tilt(), 0.3);
    }
}
