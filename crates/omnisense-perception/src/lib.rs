//! `omnisense-perception` – turns depth frames into obstacle evidence and
//! persistent object identities.
//!
//! Nothing in this crate performs I/O or holds a clock; every function is a
//! deterministic transformation of its inputs (plus the tracker's own state).
//!
//! # Modules
//!
//! - [`sector`] – [`SectorDetector`][sector::SectorDetector]: crops a depth
//!   frame to a region of interest and reports left/center/right blocked
//!   flags with robust distances.
//! - [`fusion`] – [`fuse_reports`][fusion::fuse_reports]: combines several
//!   obstacle reports per sector (logical OR, minimum distance).
//! - [`kalman`] – [`ConstantVelocityFilter`][kalman::ConstantVelocityFilter]:
//!   per-track position/velocity estimate in pixel space.
//! - [`tracker`] – [`ObjectTracker`][tracker::ObjectTracker]: greedy
//!   nearest-neighbour association with stability gating.
//! - [`segmentation`] – [`DepthBlobSegmenter`][segmentation::DepthBlobSegmenter]:
//!   the built-in [`DetectionSource`][segmentation::DetectionSource].

pub mod fusion;
pub mod kalman;
pub mod sector;
pub mod segmentation;
pub mod tracker;

pub use fusion::{FusedReport, FusedSector, fuse_reports};
pub use kalman::{ConstantVelocityFilter, FilterNoise};
pub use sector::{Roi, SectorConfig, SectorDetector};
pub use segmentation::{DepthBlobSegmenter, DetectionSource, SegmentationConfig};
pub use tracker::{ObjectTracker, TrackerConfig};
