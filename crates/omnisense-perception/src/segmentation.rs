//! Depth-blob segmentation: the built-in detection source feeding the
//! tracker.
//!
//! Pixels whose depth falls inside `[min_depth_m, max_depth_m]` are grouped
//! into 4-connected components.  A component becomes a [`Detection`] when it
//! is large enough, its bounding box holds enough depth returns, those
//! returns agree with each other (low standard deviation) and the component
//! fills a reasonable share of its box.
//!
//! An external classifier can replace the segmenter by implementing
//! [`DetectionSource`].

use std::collections::VecDeque;

use omnisense_types::{BoundingBox, Detection, SensorFrame};
use serde::{Deserialize, Serialize};

/// Anything able to turn a frame into this cycle's detections.
pub trait DetectionSource: Send {
    fn detect(&mut self, sensor: &str, frame: &SensorFrame) -> Vec<Detection>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    pub min_depth_m: f32,
    pub max_depth_m: f32,
    /// Minimum component size in pixels.
    pub min_area_px: usize,
    /// Minimum count of positive depth returns inside the bounding box.
    pub min_valid_samples: usize,
    pub max_depth_std_m: f32,
    /// Minimum `area / (box width * box height)`.
    pub min_fill_ratio: f32,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            min_depth_m: 0.5,
            max_depth_m: 2.0,
            min_area_px: 5000,
            min_valid_samples: 100,
            max_depth_std_m: 0.3,
            min_fill_ratio: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Component {
    area: usize,
    x0: usize,
    y0: usize,
    x1: usize,
    y1: usize,
}

#[derive(Debug, Clone, Default)]
pub struct DepthBlobSegmenter {
    config: SegmentationConfig,
}

impl DepthBlobSegmenter {
    pub fn new(config: SegmentationConfig) -> Self {
        Self { config }
    }

    fn components(&self, frame: &SensorFrame) -> Vec<Component> {
        let depth = &frame.depth;
        let (w, h) = (depth.width(), depth.height());
        let cfg = &self.config;
        let in_band = |x: usize, y: usize| {
            let raw = depth.raw(x, y);
            let m = depth.metres(x, y);
            raw != 0 && m >= cfg.min_depth_m && m <= cfg.max_depth_m
        };

        let mut seen = vec![false; w * h];
        let mut out = Vec::new();
        let mut queue = VecDeque::new();
        for sy in 0..h {
            for sx in 0..w {
                if seen[sy * w + sx] || !in_band(sx, sy) {
                    continue;
                }
                seen[sy * w + sx] = true;
                queue.push_back((sx, sy));
                let mut c = Component {
                    area: 0,
                    x0: sx,
                    y0: sy,
                    x1: sx,
                    y1: sy,
                };
                while let Some((x, y)) = queue.pop_front() {
                    c.area += 1;
                    c.x0 = c.x0.min(x);
                    c.x1 = c.x1.max(x);
                    c.y0 = c.y0.min(y);
                    c.y1 = c.y1.max(y);
                    let neighbours = [
                        (x.wrapping_sub(1), y),
                        (x + 1, y),
                        (x, y.wrapping_sub(1)),
                        (x, y + 1),
                    ];
                    for (nx, ny) in neighbours {
                        if nx < w && ny < h && !seen[ny * w + nx] && in_band(nx, ny) {
                            seen[ny * w + nx] = true;
                            queue.push_back((nx, ny));
                        }
                    }
                }
                out.push(c);
            }
        }
        out
    }

    fn to_detection(&self, sensor: &str, frame: &SensorFrame, c: Component) -> Option<Detection> {
        let cfg = &self.config;
        if c.area < cfg.min_area_px {
            return None;
        }
        let (bw, bh) = (c.x1 - c.x0 + 1, c.y1 - c.y0 + 1);
        if (c.area as f32 / (bw * bh) as f32) < cfg.min_fill_ratio {
            return None;
        }

        let depth = &frame.depth;
        let mut samples: Vec<f32> = (c.y0..=c.y1)
            .flat_map(|y| (c.x0..=c.x1).map(move |x| (x, y)))
            .filter(|&(x, y)| depth.raw(x, y) != 0)
            .map(|(x, y)| depth.metres(x, y))
            .collect();
        if samples.len() < cfg.min_valid_samples.max(1) {
            return None;
        }
        let n = samples.len() as f32;
        let mean = samples.iter().sum::<f32>() / n;
        let std = (samples.iter().map(|d| (d - mean).powi(2)).sum::<f32>() / n).sqrt();
        if std > cfg.max_depth_std_m {
            return None;
        }
        let mid = samples.len() / 2;
        let (_, median, _) = samples.select_nth_unstable_by(mid, f32::total_cmp);
        let median = *median;

        let bbox = BoundingBox::new(c.x0 as f32, c.y0 as f32, bw as f32, bh as f32);
        let mut det = Detection::from_bbox(sensor, bbox, median);
        det.area_px = c.area as f32;
        det.position_3d = depth
            .intrinsics()
            .map(|k| k.deproject(det.centroid.x, det.centroid.y, median));
        Some(det)
    }
}

impl DetectionSource for DepthBlobSegmenter {
    fn detect(&mut self, sensor: &str, frame: &SensorFrame) -> Vec<Detection> {
        self.components(frame)
            .into_iter()
            .filter_map(|c| self.to_detection(sensor, frame, c))
            .collect()
    }
}
