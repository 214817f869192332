//! Sector Obstacle Detector.
//!
//! Crops a [`DepthFrame`] to a region of interest, splits it into three
//! equal-width vertical sectors and reduces each sector to a single robust
//! distance:
//!
//! ```text
//!            ROI (fractions of the frame)
//!   ┌──────────────┬──────────────┬──────────────┐
//!   │     left     │    center    │    right     │
//!   └──────────────┴──────────────┴──────────────┘
//!   blocked = percentile(valid samples) < safe_distance_m
//! ```
//!
//! A sector holding fewer than `min_samples` valid samples reports the
//! sentinel distance and is never blocked.
//!
//! # Example
//!
//! ```rust
//! use omnisense_perception::sector::{SectorConfig, SectorDetector};
//! use omnisense_types::{DepthFrame, SensorRole};
//!
//! let frame = DepthFrame::from_fn(90, 60, 0.001, |x, _| if x < 30 { 0.3 } else { 2.0 });
//! let detector = SectorDetector::new(SectorConfig::floor());
//! let report = detector.analyze("floor", SensorRole::Floor, &frame);
//! assert!(report.left.blocked);
//! assert!(!report.center.blocked);
//! ```

use omnisense_types::{DepthFrame, ObstacleReport, SectorReading, SensorId, SensorRole};
use serde::{Deserialize, Serialize};

/// Distance reported for a sector without enough evidence.
pub const SENTINEL_CLEAR_M: f32 = 10.0;

/// Region of interest as fractions of the frame (`0.0..=1.0`), measured
/// from the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Roi {
    pub top: f32,
    pub bottom: f32,
    pub left: f32,
    pub right: f32,
}

impl Default for Roi {
    fn default() -> Self {
        Self {
            top: 0.0,
            bottom: 1.0,
            left: 0.0,
            right: 1.0,
        }
    }
}

impl Roi {
    /// Pixel bounds `(x0, x1, y0, y1)`, half-open, clamped to the frame.
    fn pixel_bounds(&self, width: usize, height: usize) -> (usize, usize, usize, usize) {
        let scale = |frac: f32, len: usize| {
            ((frac.clamp(0.0, 1.0) * len as f32).round() as usize).min(len)
        };
        let (x0, x1) = (scale(self.left, width), scale(self.right, width));
        let (y0, y1) = (scale(self.top, height), scale(self.bottom, height));
        (x0, x1.max(x0), y0, y1.max(y0))
    }
}

/// Geometry and thresholds for one sensor instantiation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SectorConfig {
    pub roi: Roi,
    pub safe_distance_m: f32,
    pub min_valid_m: f32,
    pub max_valid_m: f32,
    pub min_samples: usize,
    /// Percentile of the valid samples used as the sector distance.
    pub percentile: f32,
    pub sentinel_m: f32,
}

impl Default for SectorConfig {
    fn default() -> Self {
        Self::floor()
    }
}

impl SectorConfig {
    /// Low, floor-facing sensor.  The bottom strip of the image always sees
    /// the floor itself and is cropped.
    pub fn floor() -> Self {
        Self {
            roi: Roi {
                top: 0.0,
                bottom: 0.85,
                left: 0.0,
                right: 1.0,
            },
            safe_distance_m: 0.5,
            min_valid_m: 0.1,
            max_valid_m: 10.0,
            min_samples: 50,
            percentile: 10.0,
            sentinel_m: SENTINEL_CLEAR_M,
        }
    }

    /// Elevated, forward-facing sensor looking at body height.
    pub fn body() -> Self {
        Self {
            roi: Roi {
                top: 0.3,
                bottom: 0.7,
                left: 0.0,
                right: 1.0,
            },
            safe_distance_m: 0.8,
            min_valid_m: 0.1,
            max_valid_m: 3.0,
            min_samples: 100,
            percentile: 10.0,
            sentinel_m: SENTINEL_CLEAR_M,
        }
    }

    pub fn for_role(role: SensorRole) -> Self {
        match role {
            SensorRole::Floor => Self::floor(),
            SensorRole::Body => Self::body(),
        }
    }
}

/// Stateless detector; one instance per sensor configuration.
#[derive(Debug, Clone)]
pub struct SectorDetector {
    config: SectorConfig,
}

impl SectorDetector {
    pub fn new(config: SectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SectorConfig {
        &self.config
    }

    /// Produce the obstacle report for one frame.
    pub fn analyze(&self, sensor: &str, role: SensorRole, frame: &DepthFrame) -> ObstacleReport {
        let (x0, x1, y0, y1) = self.config.roi.pixel_bounds(frame.width(), frame.height());
        let third = (x1 - x0) / 3;
        let bounds = [
            (x0, x0 + third),
            (x0 + third, x0 + 2 * third),
            (x0 + 2 * third, x1),
        ];
        let [left, center, right] =
            bounds.map(|(sx0, sx1)| self.sector_reading(frame, sx0, sx1, y0, y1));

        ObstacleReport {
            sensor: SensorId::from(sensor),
            role,
            left,
            center,
            right,
        }
    }

    fn sector_reading(
        &self,
        frame: &DepthFrame,
        x0: usize,
        x1: usize,
        y0: usize,
        y1: usize,
    ) -> SectorReading {
        let cfg = &self.config;
        let scale = frame.depth_scale();
        let mut valid: Vec<f32> = (y0..y1)
            .flat_map(|y| frame.row(y)[x0..x1].iter())
            .filter(|&&raw| raw != 0)
            .map(|&raw| raw as f32 * scale)
            .filter(|m| (cfg.min_valid_m..=cfg.max_valid_m).contains(m))
            .collect();

        let samples = valid.len();
        if samples == 0 || samples < cfg.min_samples {
            return SectorReading {
                blocked: false,
                distance_m: cfg.sentinel_m,
                samples,
            };
        }
        let distance_m = percentile(&mut valid, cfg.percentile);
        SectorReading {
            blocked: distance_m < cfg.safe_distance_m,
            distance_m,
            samples,
        }
    }
}

/// Nearest-rank percentile of a non-empty slice; reorders `values`.
pub fn percentile(values: &mut [f32], pct: f32) -> f32 {
    let rank = (pct.clamp(0.0, 100.0) / 100.0 * (values.len() - 1) as f32).floor() as usize;
    let (_, v, _) = values.select_nth_unstable_by(rank, f32::total_cmp);
    *v
}
