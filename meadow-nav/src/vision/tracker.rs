//! Temporal smoothing of fiducial detections.
//!
//! A short ring buffer per marker id; when at least two recent detections
//! agree, the reported observation is the per-component median. Otherwise
//! the most recent raw detection is passed through flagged unsmoothed.
//! Stale entries are evicted.

use std::collections::HashMap;
use std::collections::VecDeque;

use super::FiducialDetection;

/// Agreement tolerance between detections, meters of range.
const AGREE_RANGE_M: f32 = 0.3;

/// Agreement tolerance between detections, radians of bearing.
const AGREE_BEARING_RAD: f32 = 0.2;

/// Ring-buffer smoother over the detection stream.
#[derive(Debug)]
pub struct DetectionTracker {
    /// Detections kept per marker
    history_len: usize,
    /// Entries older than this are evicted, seconds
    timeout: f32,
    history: HashMap<u32, VecDeque<FiducialDetection>>,
}

impl DetectionTracker {
    pub fn new(history_len: usize, timeout: f32) -> Self {
        Self {
            history_len: history_len.max(1),
            timeout,
            history: HashMap::new(),
        }
    }

    /// Ingest one frame's detections and return the smoothed view.
    pub fn update(
        &mut self,
        detections: &[FiducialDetection],
        now_ns: u64,
    ) -> Vec<FiducialDetection> {
        for det in detections {
            let ring = self.history.entry(det.marker_id).or_default();
            if ring.len() >= self.history_len {
                ring.pop_front();
            }
            ring.push_back(*det);
        }

        self.evict(now_ns);

        let mut out: Vec<FiducialDetection> = self
            .history
            .values()
            .filter_map(|ring| Self::smooth(ring))
            .collect();
        out.sort_by_key(|d| d.marker_id);
        out
    }

    /// The smoothed observation for one marker, if it is currently tracked.
    pub fn get(&self, marker_id: u32) -> Option<FiducialDetection> {
        self.history.get(&marker_id).and_then(Self::smooth)
    }

    /// Drop all state (e.g. when docking restarts).
    pub fn clear(&mut self) {
        self.history.clear();
    }

    fn evict(&mut self, now_ns: u64) {
        let timeout_ns = (self.timeout as f64 * 1e9) as u64;
        for ring in self.history.values_mut() {
            while let Some(front) = ring.front() {
                if now_ns.saturating_sub(front.frame_timestamp) > timeout_ns {
                    ring.pop_front();
                } else {
                    break;
                }
            }
        }
        self.history.retain(|_, ring| !ring.is_empty());
    }

    fn smooth(ring: &VecDeque<FiducialDetection>) -> Option<FiducialDetection> {
        let latest = *ring.back()?;

        // Detections that agree with the latest one
        let agreeing: Vec<&FiducialDetection> = ring
            .iter()
            .filter(|d| {
                (d.range_m - latest.range_m).abs() <= AGREE_RANGE_M
                    && (d.bearing_rad - latest.bearing_rad).abs() <= AGREE_BEARING_RAD
            })
            .collect();

        if agreeing.len() < 2 {
            return Some(FiducialDetection {
                smoothed: false,
                ..latest
            });
        }

        let range = median(agreeing.iter().map(|d| d.range_m));
        let bearing = median(agreeing.iter().map(|d| d.bearing_rad));
        let yaw = median(agreeing.iter().map(|d| d.yaw_offset_rad));
        let confidence = agreeing.iter().map(|d| d.confidence).fold(0.0, f32::max);

        Some(FiducialDetection {
            marker_id: latest.marker_id,
            range_m: range,
            bearing_rad: bearing,
            yaw_offset_rad: yaw,
            confidence,
            frame_timestamp: latest.frame_timestamp,
            smoothed: true,
        })
    }
}

fn median(values: impl Iterator<Item = f32>) -> f32 {
    let mut v: Vec<f32> = values.collect();
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = v.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        v[n / 2]
    } else {
        (v[n / 2 - 1] + v[n / 2]) / 2.0
    }
}
