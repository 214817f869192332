//! Object Tracker.
//!
//! Turns each cycle's detections into persistent identities.  Every call to
//! [`ObjectTracker::update`] runs four phases:
//!
//! 1. **Predict**: every live track's [`ConstantVelocityFilter`] advances
//!    one step.
//! 2. **Associate**: all `(track, detection)` pairs from the same sensor
//!    whose centroid distance is below `gate_px` are sorted by distance and
//!    accepted greedily, each side at most once.  Equal distances fall back
//!    to track id, then detection index.  This is a greedy approximation,
//!    not an optimal assignment.
//! 3. **Maintain**: matched tracks are corrected and smoothed; unmatched
//!    tracks age and are dropped once `missed_count > max_missed`;
//!    unmatched detections open new tracks.
//! 4. **Emit**: only tracks with `stability_count >= min_stability` are
//!    returned.
//!
//! Track ids come from a counter that only increases, so an id is never
//! handed out twice by the same tracker.
//!
//! # Example
//!
//! ```rust
//! use omnisense_perception::tracker::{ObjectTracker, TrackerConfig};
//! use omnisense_types::{BoundingBox, Detection};
//!
//! let mut tracker = ObjectTracker::new(TrackerConfig::default());
//! let det = Detection::from_bbox("body", BoundingBox::new(100.0, 80.0, 40.0, 60.0), 1.5);
//!
//! assert!(tracker.update(&[det.clone()]).is_empty()); // stability 1
//! assert!(tracker.update(&[det.clone()]).is_empty()); // stability 2
//! let visible = tracker.update(&[det]);               // stability 3
//! assert_eq!(visible.len(), 1);
//! ```

use std::collections::{BTreeMap, HashSet};

use omnisense_types::{
    BoundingBox, Detection, Point2, SensorId, TrackId, TrackedObjectView,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::kalman::{ConstantVelocityFilter, FilterNoise};

/// Association and lifecycle parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Maximum centroid distance (pixels) for a match.
    pub gate_px: f32,
    /// A track is removed once its missed count exceeds this.
    pub max_missed: u32,
    pub min_stability: u32,
    pub stability_cap: u32,
    /// Weight of the new box in the exponential smoothing.
    pub bbox_alpha: f32,
    /// Weight of the new depth in the exponential smoothing.
    pub depth_alpha: f32,
    pub noise: FilterNoise,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            gate_px: 120.0,
            max_missed: 10,
            min_stability: 3,
            stability_cap: 30,
            bbox_alpha: 0.7,
            depth_alpha: 0.7,
            noise: FilterNoise::default(),
        }
    }
}

/// A persistent tracked identity.  Only [`ObjectTracker`] mutates tracks.
#[derive(Debug, Clone)]
pub struct Track {
    id: TrackId,
    sensor: SensorId,
    filter: ConstantVelocityFilter,
    bbox: BoundingBox,
    depth_m: f32,
    position_3d: Option<[f32; 3]>,
    label: Option<String>,
    missed_count: u32,
    stability_count: u32,
}

impl Track {
    fn open(id: TrackId, det: &Detection, noise: FilterNoise) -> Self {
        Self {
            id,
            sensor: det.sensor.clone(),
            filter: ConstantVelocityFilter::new(det.centroid, noise),
            bbox: det.bbox,
            depth_m: det.depth_m,
            position_3d: det.position_3d,
            label: det.label.clone(),
            missed_count: 0,
            stability_count: 1,
        }
    }

    fn absorb(&mut self, det: &Detection, cfg: &TrackerConfig) {
        self.filter.update(det.centroid);
        self.bbox = self.bbox.blend(&det.bbox, cfg.bbox_alpha);
        self.depth_m = cfg.depth_alpha * det.depth_m + (1.0 - cfg.depth_alpha) * self.depth_m;
        if det.position_3d.is_some() {
            self.position_3d = det.position_3d;
        }
        if det.label.is_some() {
            self.label = det.label.clone();
        }
        self.missed_count = 0;
        self.stability_count = (self.stability_count + 1).min(cfg.stability_cap);
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn sensor(&self) -> &SensorId {
        &self.sensor
    }

    pub fn centroid(&self) -> Point2 {
        self.filter.position()
    }

    pub fn missed_count(&self) -> u32 {
        self.missed_count
    }

    pub fn stability_count(&self) -> u32 {
        self.stability_count
    }

    pub fn view(&self) -> TrackedObjectView {
        TrackedObjectView {
            id: self.id,
            sensor: self.sensor.clone(),
            bbox: self.bbox,
            centroid: self.filter.position(),
            velocity: self.filter.velocity(),
            depth_m: self.depth_m,
            position_3d: self.position_3d,
            missed_count: self.missed_count,
            stability_count: self.stability_count,
            label: self.label.clone(),
        }
    }
}

/// Id-indexed arena of live tracks.
#[derive(Debug, Clone)]
pub struct ObjectTracker {
    config: TrackerConfig,
    tracks: BTreeMap<TrackId, Track>,
    next_id: u64,
}

impl ObjectTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Every live track, stable or not, in id order.
    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Run one tracking cycle and return the visible tracks in id order.
    ///
    /// Empty input is valid: every track ages by one cycle.
    pub fn update(&mut self, detections: &[Detection]) -> Vec<TrackedObjectView> {
        let predicted: Vec<(TrackId, Point2)> = self
            .tracks
            .values_mut()
            .map(|t| (t.id, t.filter.predict()))
            .collect();

        let mut candidates: Vec<(f32, TrackId, usize)> = Vec::new();
        for (id, centre) in &predicted {
            let sensor = &self.tracks[id].sensor;
            for (j, det) in detections.iter().enumerate() {
                if &det.sensor != sensor {
                    continue;
                }
                let d = centre.distance(&det.centroid);
                if d < self.config.gate_px {
                    candidates.push((d, *id, j));
                }
            }
        }
        // Ascending distance; `sort_by` is stable so id/index order breaks ties.
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut matched_tracks: HashSet<TrackId> = HashSet::new();
        let mut matched_dets = vec![false; detections.len()];
        for (_, id, j) in candidates {
            if matched_tracks.contains(&id) || matched_dets[j] {
                continue;
            }
            matched_tracks.insert(id);
            matched_dets[j] = true;
            if let Some(track) = self.tracks.get_mut(&id) {
                track.absorb(&detections[j], &self.config);
            }
        }

        let max_missed = self.config.max_missed;
        self.tracks.retain(|id, track| {
            if matched_tracks.contains(id) {
                return true;
            }
            track.missed_count += 1;
            let keep = track.missed_count <= max_missed;
            if !keep {
                debug!(track = %id, sensor = %track.sensor, "track dropped");
            }
            keep
        });

        for (det, _) in detections.iter().zip(&matched_dets).filter(|(_, m)| !**m) {
            let id = TrackId(self.next_id);
            self.next_id += 1;
            debug!(track = %id, sensor = %det.sensor, "track opened");
            self.tracks.insert(id, Track::open(id, det, self.config.noise));
        }

        self.visible()
    }

    /// Tracks that have reached `min_stability`, in id order.
    pub fn visible(&self) -> Vec<TrackedObjectView> {
        self.tracks
            .values()
            .filter(|t| t.stability_count >= self.config.min_stability)
            .map(Track::view)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(sensor: &str, cx: f32, cy: f32) -> Detection {
        Detection::from_bbox(sensor, BoundingBox::new(cx - 20.0, cy - 20.0, 40.0, 40.0), 1.0)
    }

    #[test]
    fn stability_grows_to_cap_and_gates_emission() {
        let cfg = TrackerConfig {
            stability_cap: 5,
            ..TrackerConfig::default()
        };
        let mut tracker = ObjectTracker::new(cfg);
        let mut last = 0;
        for cycle in 1..=8u32 {
            let out = tracker.update(&[det("cam", 100.0, 100.0)]);
            let track = tracker.tracks().next().unwrap();
            assert!(track.stability_count() >= last);
            last = track.stability_count();
            assert_eq!(last, cycle.min(5));
            assert_eq!(out.len(), usize::from(cycle >= 3));
        }
    }

    #[test]
    fn track_removed_only_after_exceeding_max_missed() {
        let mut tracker = ObjectTracker::new(TrackerConfig::default());
        tracker.update(&[det("cam", 50.0, 50.0)]);
        for _ in 0..10 {
            tracker.update(&[]);
            assert_eq!(tracker.len(), 1);
        }
        assert_eq!(tracker.tracks().next().unwrap().missed_count(), 10);
        tracker.update(&[]);
        assert!(tracker.is_empty());
    }

    #[test]
    fn match_at_the_edge_resets_missed() {
        let mut tracker = ObjectTracker::new(TrackerConfig::default());
        tracker.update(&[det("cam", 50.0, 50.0)]);
        for _ in 0..9 {
            tracker.update(&[]);
        }
        assert_eq!(tracker.tracks().next().unwrap().missed_count(), 9);
        tracker.update(&[det("cam", 52.0, 50.0)]);
        let t = tracker.tracks().next().unwrap();
        assert_eq!(t.missed_count(), 0);
        assert_eq!(t.id(), TrackId(1));
        for _ in 0..10 {
            tracker.update(&[]);
        }
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn ids_strictly_increase_and_are_never_reused() {
        let cfg = TrackerConfig {
            max_missed: 0,
            ..TrackerConfig::default()
        };
        let mut tracker = ObjectTracker::new(cfg);
        let mut seen = Vec::new();
        for i in 0..5 {
            // Far apart every cycle: the old track dies, a new one opens.
            tracker.update(&[det("cam", 10.0 + 300.0 * i as f32, 10.0)]);
            seen.push(tracker.tracks().last().unwrap().id());
        }
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(seen.last(), Some(&TrackId(5)));
    }

    #[test]
    fn association_restricted_to_same_sensor() {
        let mut tracker = ObjectTracker::new(TrackerConfig::default());
        tracker.update(&[det("floor", 100.0, 100.0)]);
        tracker.update(&[det("body", 100.0, 100.0)]);
        assert_eq!(tracker.len(), 2);
        let sensors: Vec<_> = tracker.tracks().map(|t| t.sensor().clone()).collect();
        assert_eq!(sensors, vec!["floor".to_string(), "body".to_string()]);
    }

    #[test]
    fn greedy_prefers_the_closest_pair() {
        let mut tracker = ObjectTracker::new(TrackerConfig::default());
        tracker.update(&[det("cam", 100.0, 100.0), det("cam", 300.0, 100.0)]);
        // Listed in reverse order; each one is nearest to a different track.
        tracker.update(&[det("cam", 250.0, 100.0), det("cam", 160.0, 100.0)]);
        let ids: Vec<TrackId> = tracker.tracks().map(|t| t.id()).collect();
        assert_eq!(ids, vec![TrackId(1), TrackId(2)]);
        let t1 = tracker.get(TrackId(1)).unwrap();
        let t2 = tracker.get(TrackId(2)).unwrap();
        assert!(t2.centroid().x > 240.0 && t2.centroid().x < 260.0);
        assert!(t1.centroid().x > 150.0 && t1.centroid().x < 170.0);
    }

    #[test]
    fn contested_detection_goes_to_the_nearer_track() {
        let mut tracker = ObjectTracker::new(TrackerConfig::default());
        tracker.update(&[det("cam", 100.0, 100.0), det("cam", 300.0, 100.0)]);
        // 190 is 90 px from track 1 and 110 px from track 2; 200 ties at
        // 100 px. Track 1 takes 190 first, leaving 200 for track 2.
        tracker.update(&[det("cam", 200.0, 100.0), det("cam", 190.0, 100.0)]);
        assert_eq!(tracker.len(), 2);
        assert!(tracker.get(TrackId(1)).unwrap().centroid().x < 195.0);
        assert!(tracker.get(TrackId(2)).unwrap().centroid().x > 195.0);
    }

    #[test]
    fn detections_beyond_gate_open_new_tracks() {
        let mut tracker = ObjectTracker::new(TrackerConfig::default());
        tracker.update(&[det("cam", 0.0, 0.0)]);
        tracker.update(&[det("cam", 200.0, 0.0)]);
        assert_eq!(tracker.len(), 2);
        assert_eq!(tracker.get(TrackId(1)).unwrap().missed_count(), 1);
    }

    #[test]
    fn smoothing_weights_new_observation() {
        let mut tracker = ObjectTracker::new(TrackerConfig::default());
        let mut first = det("cam", 100.0, 100.0);
        first.depth_m = 2.0;
        tracker.update(&[first]);
        let mut second = det("cam", 110.0, 100.0);
        second.depth_m = 1.0;
        tracker.update(&[second]);

        let view = tracker.get(TrackId(1)).unwrap().view();
        assert!((view.depth_m - 1.3).abs() < 1e-5);
        assert!((view.bbox.x - 87.0).abs() < 1e-4);
    }

    #[test]
    fn empty_input_ages_without_panic() {
        let mut tracker = ObjectTracker::new(TrackerConfig::default());
        assert!(tracker.update(&[]).is_empty());
        tracker.update(&[det("cam", 1.0, 1.0)]);
        tracker.update(&[]);
        assert_eq!(tracker.get(TrackId(1)).unwrap().missed_count(), 1);
    }
}
