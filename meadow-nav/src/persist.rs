//! Optional persisted state: coverage cursor and occupancy grid.
//!
//! Nothing here is required for correctness; a missing or unreadable
//! snapshot just means a fresh start. Writes go through a temp file and
//! rename so a crash mid-save cannot corrupt the previous snapshot.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{NavError, Result};
use crate::planning::OccupancyGrid;

/// State carried across runs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PersistedState {
    /// Coverage path cursor at the time of the snapshot
    pub coverage_cursor: usize,
    /// The learned occupancy grid, if one was built
    pub grid: Option<OccupancyGrid>,
}

impl PersistedState {
    /// Load a snapshot; a missing file yields the default.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| NavError::Persist(format!("read {}: {}", path.display(), e)))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save atomically (write temp, rename over).
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(self)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| NavError::Persist(format!("write {}: {}", tmp.display(), e)))?;
        std::fs::rename(&tmp, path)
            .map_err(|e| NavError::Persist(format!("rename {}: {}", path.display(), e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InflationMetric;
    use crate::core::types::Point2D;
    use crate::planning::{CellState, ObstacleUpdate};

    fn sample_grid() -> OccupancyGrid {
        let polygon = vec![
            Point2D::new(0.0, 0.0),
            Point2D::new(5.0, 0.0),
            Point2D::new(5.0, 5.0),
            Point2D::new(0.0, 5.0),
        ];
        let mut grid =
            OccupancyGrid::from_polygon(&polygon, 0.1, 0.5, 0.3, InflationMetric::Euclidean)
                .unwrap();
        grid.apply(&ObstacleUpdate {
            center: Point2D::new(2.5, 2.5),
            radius: 0.2,
        });
        grid
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let state = PersistedState {
            coverage_cursor: 123,
            grid: Some(sample_grid()),
        };
        state.save(&path).unwrap();

        let loaded = PersistedState::load(&path).unwrap();
        assert_eq!(loaded.coverage_cursor, 123);

        let grid = loaded.grid.unwrap();
        let original = sample_grid();
        assert_eq!(grid.width(), original.width());
        assert_eq!(grid.height(), original.height());
        assert_eq!(grid.resolution(), original.resolution());

        // The learned obstacle survives
        let c = grid.world_to_cell(&Point2D::new(2.5, 2.5)).unwrap();
        assert_eq!(grid.get(c), Some(CellState::Obstacle));
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let state = PersistedState::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(state.coverage_cursor, 0);
        assert!(state.grid.is_none());
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(PersistedState::load(&path).is_err());
    }
}
