//! `omnisense-types` – shared data model for the OmniSense stack.
//!
//! Every crate in the workspace speaks in these types: depth frames coming
//! out of the HAL, obstacle reports and tracked objects coming out of
//! perception, navigation decisions coming out of the runtime, and the
//! snapshot published to subscribers once per cycle.

pub mod command;
pub mod frame;
pub mod navigation;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use command::{OperatorCommand, command_schema};
pub use frame::{ColorFrame, DepthFrame, Intrinsics, SensorFrame};
pub use navigation::{
    Direction, MotorCommand, NavDiagnostics, NavState, NavigationDecision, SectorDistances,
    SensorMode, WheelSpeeds,
};

/// Stable identifier of a configured sensor instance, e.g. `"floor"`.
pub type SensorId = String;

/// Mounting role of a depth sensor, resolved once at connection time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorRole {
    /// Low, floor-facing sensor: obstacles are low objects in the path.
    Floor,
    /// Elevated, forward-facing sensor: obstacles are at body height.
    Body,
}

impl fmt::Display for SensorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorRole::Floor => f.write_str("floor"),
            SensorRole::Body => f.write_str("body"),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Obstacle reports
// ────────────────────────────────────────────────────────────────────────────

/// One of the three vertical slices of a region of interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sector {
    Left,
    Center,
    Right,
}

/// Result for a single sector.  `distance_m` is always populated; a sector
/// without enough evidence carries the sentinel distance and is not blocked.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SectorReading {
    pub blocked: bool,
    pub distance_m: f32,
    /// Number of valid samples the distance was computed from.
    pub samples: usize,
}

/// Per-sensor left/center/right obstacle result for one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObstacleReport {
    pub sensor: SensorId,
    pub role: SensorRole,
    pub left: SectorReading,
    pub center: SectorReading,
    pub right: SectorReading,
}

impl ObstacleReport {
    pub fn sector(&self, sector: Sector) -> &SectorReading {
        match sector {
            Sector::Left => &self.left,
            Sector::Center => &self.center,
            Sector::Right => &self.right,
        }
    }

    pub fn any_blocked(&self) -> bool {
        self.left.blocked || self.center.blocked || self.right.blocked
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Detections and tracks
// ────────────────────────────────────────────────────────────────────────────

/// A pixel-space point.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f32,
    pub y: f32,
}

impl Point2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point2) -> f32 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Axis-aligned pixel box, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn center(&self) -> Point2 {
        Point2::new(self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    pub fn area(&self) -> f32 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    /// Exponential blend: `alpha * new + (1 - alpha) * self`.
    pub fn blend(&self, new: &BoundingBox, alpha: f32) -> BoundingBox {
        let mix = |old: f32, new: f32| alpha * new + (1.0 - alpha) * old;
        BoundingBox {
            x: mix(self.x, new.x),
            y: mix(self.y, new.y),
            w: mix(self.w, new.w),
            h: mix(self.h, new.h),
        }
    }
}

/// One detected object in one frame of one sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub sensor: SensorId,
    pub bbox: BoundingBox,
    pub centroid: Point2,
    /// Robust depth estimate in metres.
    pub depth_m: f32,
    pub area_px: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_3d: Option<[f32; 3]>,
    /// Class name when produced by an external classifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl Detection {
    /// Convenience constructor; the centroid is the box centre.
    pub fn from_bbox(sensor: impl Into<SensorId>, bbox: BoundingBox, depth_m: f32) -> Self {
        Self {
            sensor: sensor.into(),
            centroid: bbox.center(),
            area_px: bbox.area(),
            bbox,
            depth_m,
            position_3d: None,
            label: None,
            confidence: None,
        }
    }
}

/// Unique, monotonically increasing track identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(pub u64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Read-only projection of a stable track handed to consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedObjectView {
    pub id: TrackId,
    pub sensor: SensorId,
    pub bbox: BoundingBox,
    /// Filtered centroid.
    pub centroid: Point2,
    /// Filtered velocity in pixels per cycle.
    pub velocity: Point2,
    pub depth_m: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_3d: Option<[f32; 3]>,
    pub missed_count: u32,
    pub stability_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

// ────────────────────────────────────────────────────────────────────────────
// Snapshot
// ────────────────────────────────────────────────────────────────────────────

/// Loop mode flags published with every snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModeFlags {
    pub autonomous: bool,
    pub actuator_connected: bool,
    /// `true` when the last command applied to the actuator was not a stop.
    pub robot_moving: bool,
}

/// Immutable per-cycle state published to every subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub cycle: u64,
    /// Processing time of the cycle, excluding the cadence sleep.
    pub cycle_time_ms: f64,
    pub obstacle_reports: BTreeMap<SensorId, ObstacleReport>,
    pub tracked_objects: Vec<TrackedObjectView>,
    pub navigation_decision: NavigationDecision,
    pub mode: ModeFlags,
}

// ────────────────────────────────────────────────────────────────────────────
// Bus events
// ────────────────────────────────────────────────────────────────────────────

/// Envelope for everything routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"omnisense-runtime::fusion_loop"`
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    Snapshot(Box<Snapshot>),
    /// Operational alert: watchdog safe-stop, actuator failure, ...
    Alert { component: String, message: String },
    /// Motor controller link state, published after every connect attempt.
    SerialStatus { connected: bool, port: Option<String> },
    /// Operating mode, published after every mode or base-speed change.
    AutonomousStatus { enabled: bool, speed: u32 },
    /// Reply to [`OperatorCommand::ListPorts`].
    PortsList { ports: Vec<String> },
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Every failure in the stack is locally recoverable; none of these abort the
/// fusion loop.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OmniError {
    #[error("Sensor '{sensor}' unavailable: {reason}")]
    SensorUnavailable { sensor: SensorId, reason: String },

    #[error("Actuator not connected")]
    ActuatorDisconnected,

    #[error("Actuator write failed: {0}")]
    ActuatorWrite(String),

    #[error("Malformed command: {0}")]
    MalformedCommand(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}
