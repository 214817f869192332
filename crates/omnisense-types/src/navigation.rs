//! Motion vocabulary shared by the navigator, the HAL and the operator
//! command protocol.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{OmniError, SensorId};

/// Motion direction of the tri-omni base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Forward,
    Backward,
    Left,
    Right,
    /// In-place clockwise rotation.
    #[serde(alias = "rotate_right")]
    Rotate,
    Stop,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Direction::Forward => "forward",
            Direction::Backward => "backward",
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Rotate => "rotate",
            Direction::Stop => "stop",
        };
        f.write_str(s)
    }
}

impl FromStr for Direction {
    type Err = OmniError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forward" | "fwd" => Ok(Direction::Forward),
            "backward" | "back" => Ok(Direction::Backward),
            "left" => Ok(Direction::Left),
            "right" => Ok(Direction::Right),
            "rotate" | "rotate_right" => Ok(Direction::Rotate),
            "stop" => Ok(Direction::Stop),
            other => Err(OmniError::MalformedCommand(format!(
                "unknown direction '{other}'"
            ))),
        }
    }
}

/// The navigator's automaton state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavState {
    #[default]
    Moving,
    Rotating,
}

/// Which sensor roles contributed to a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorMode {
    None,
    FloorOnly,
    BodyOnly,
    Both,
}

/// Resolved per-sector distances in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SectorDistances {
    pub left: f32,
    pub center: f32,
    pub right: f32,
}

/// Observability payload attached to every non-trivial decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavDiagnostics {
    pub mode: SensorMode,
    /// Sensors whose reports were fused, in input order.
    pub sensors: Vec<SensorId>,
    /// Automaton state when the decision was taken.
    pub state: NavState,
    pub distances: SectorDistances,
    pub free_path_counter: u32,
    /// `true` when the decision was forced to STOP by the sensor watchdog.
    #[serde(default)]
    pub safe_stop: bool,
}

/// The navigator's output for one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationDecision {
    pub direction: Direction,
    pub speed: u32,
    /// `None` only for the "no sensor data" stop.
    pub diagnostics: Option<NavDiagnostics>,
}

impl NavigationDecision {
    /// `STOP, speed = 0` with empty diagnostics.
    pub fn stop() -> Self {
        Self {
            direction: Direction::Stop,
            speed: 0,
            diagnostics: None,
        }
    }

    pub fn is_stop(&self) -> bool {
        self.direction == Direction::Stop
    }
}

/// Signed per-wheel values for the three omni wheels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct WheelSpeeds {
    pub m1: i32,
    pub m2: i32,
    pub m3: i32,
}

impl WheelSpeeds {
    pub fn is_zero(&self) -> bool {
        self.m1 == 0 && self.m2 == 0 && self.m3 == 0
    }
}

/// A command accepted by an `Actuator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotorCommand {
    Drive { direction: Direction, speed: u32 },
    Raw(WheelSpeeds),
}

impl MotorCommand {
    pub fn stop() -> Self {
        MotorCommand::Drive {
            direction: Direction::Stop,
            speed: 0,
        }
    }

    /// `true` when the command leaves the base stationary.
    pub fn is_stop(&self) -> bool {
        match self {
            MotorCommand::Drive { direction, speed } => {
                *direction == Direction::Stop || *speed == 0
            }
            MotorCommand::Raw(w) => w.is_zero(),
        }
    }
}

impl From<&NavigationDecision> for MotorCommand {
    fn from(d: &NavigationDecision) -> Self {
        MotorCommand::Drive {
            direction: d.direction,
            speed: d.speed,
        }
    }
}
