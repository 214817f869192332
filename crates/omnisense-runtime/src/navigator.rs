//! Navigation State Machine.
//!
//! Holds the only long-lived control state of the robot and converts the
//! cycle's obstacle reports into one [`NavigationDecision`].
//!
//! ```text
//!              free path reaches bound / STOP
//!   ┌────────┐ ───────────────────────────────▶ ┌──────────┐
//!   │ MOVING │                                  │ ROTATING │  ROTATE × rotation_steps
//!   └────────┘ ◀─────────────────────────────── └──────────┘
//!                   steps done / STOP
//! ```
//!
//! In MOVING, with `near`, `side` and `side_clear` thresholds:
//!
//! | Situation | Decision | Speed factor |
//! |---|---|---|
//! | center blocked, best side > side_clear | turn to best side (right on tie) | `turn_factor` |
//! | center blocked, no side clear | BACKWARD | `backward_factor` |
//! | left closer than `side` | RIGHT | `side_turn_factor` |
//! | right closer than `side` | LEFT | `side_turn_factor` |
//! | nothing blocked | FORWARD | `forward_factor` |
//!
//! The side rows compare fused distances only; a sensor's own `blocked` flag
//! uses its stricter safe distance and would pre-empt the looser `side`
//! threshold. Left is checked first, so two close sides turn RIGHT.
//!
//! Every speed is `base_speed × factor`, truncated to an integer.
//!
//! # Example
//!
//! ```rust
//! use omnisense_runtime::navigator::{Navigator, NavigatorConfig};
//! use omnisense_types::Direction;
//!
//! let mut nav = Navigator::new(NavigatorConfig::default());
//! // No report at all: stop.
//! assert_eq!(nav.decide(&[]).direction, Direction::Stop);
//! ```

use omnisense_perception::fusion::{FusedReport, fuse_reports};
use omnisense_types::{
    Direction, NavDiagnostics, NavState, NavigationDecision, ObstacleReport,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigatorConfig {
    pub base_speed: u32,
    /// Center distance below which the path ahead counts as blocked.
    pub near_threshold_m: f32,
    /// Side distance below which a side counts as blocked.
    pub side_threshold_m: f32,
    /// Minimum clearance for a side to be chosen as escape route.
    pub side_clear_m: f32,
    pub turn_factor: f32,
    pub backward_factor: f32,
    pub side_turn_factor: f32,
    pub forward_factor: f32,
    pub rotate_factor: f32,
    /// Consecutive clear cycles before a forced re-scan rotation.
    pub free_path_bound: u32,
    pub rotation_steps: u32,
}

impl Default for NavigatorConfig {
    fn default() -> Self {
        Self {
            base_speed: 100,
            near_threshold_m: 0.8,
            side_threshold_m: 0.6,
            side_clear_m: 0.8,
            turn_factor: 0.7,
            backward_factor: 0.6,
            side_turn_factor: 0.6,
            forward_factor: 0.8,
            rotate_factor: 0.6,
            free_path_bound: 8,
            rotation_steps: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Navigator {
    config: NavigatorConfig,
    state: NavState,
    free_path_counter: u32,
    rotation_counter: u32,
}

impl Navigator {
    pub fn new(config: NavigatorConfig) -> Self {
        Self {
            config,
            state: NavState::Moving,
            free_path_counter: 0,
            rotation_counter: 0,
        }
    }

    pub fn config(&self) -> &NavigatorConfig {
        &self.config
    }

    pub fn state(&self) -> NavState {
        self.state
    }

    pub fn free_path_counter(&self) -> u32 {
        self.free_path_counter
    }

    pub fn base_speed(&self) -> u32 {
        self.config.base_speed
    }

    pub fn set_base_speed(&mut self, speed: u32) {
        self.config.base_speed = speed;
    }

    /// Back to MOVING with cleared counters.
    pub fn reset(&mut self) {
        self.state = NavState::Moving;
        self.free_path_counter = 0;
        self.rotation_counter = 0;
    }

    fn speed(&self, factor: f32) -> u32 {
        (self.config.base_speed as f32 * factor.max(0.0)) as u32
    }

    /// One decision per cycle.
    pub fn decide(&mut self, reports: &[ObstacleReport]) -> NavigationDecision {
        let Some(fused) = fuse_reports(reports) else {
            return NavigationDecision::stop();
        };
        let entry_state = self.state;

        let (direction, speed) = match self.state {
            NavState::Rotating => self.rotate_step(),
            NavState::Moving => self.moving_step(&fused),
        };
        debug!(
            ?entry_state,
            ?direction,
            speed,
            free_path = self.free_path_counter,
            "navigation decision"
        );

        NavigationDecision {
            direction,
            speed,
            diagnostics: Some(NavDiagnostics {
                mode: fused.mode,
                distances: fused.distances(),
                sensors: fused.sensors,
                state: entry_state,
                free_path_counter: self.free_path_counter,
                safe_stop: false,
            }),
        }
    }

    fn rotate_step(&mut self) -> (Direction, u32) {
        self.rotation_counter += 1;
        if self.rotation_counter <= self.config.rotation_steps {
            return (Direction::Rotate, self.speed(self.config.rotate_factor));
        }
        self.rotation_counter = 0;
        self.free_path_counter = 0;
        self.state = NavState::Moving;
        (Direction::Stop, 0)
    }

    fn moving_step(&mut self, fused: &FusedReport) -> (Direction, u32) {
        let cfg = self.config;
        let left = fused.left.distance_m;
        let right = fused.right.distance_m;

        let center_blocked =
            fused.center.blocked || fused.center.distance_m < cfg.near_threshold_m;

        if center_blocked {
            self.free_path_counter = 0;
            return if right >= left && right > cfg.side_clear_m {
                (Direction::Right, self.speed(cfg.turn_factor))
            } else if left > cfg.side_clear_m {
                (Direction::Left, self.speed(cfg.turn_factor))
            } else {
                (Direction::Backward, self.speed(cfg.backward_factor))
            };
        }

        let side_turn = if left < cfg.side_threshold_m {
            Some(Direction::Right)
        } else if right < cfg.side_threshold_m {
            Some(Direction::Left)
        } else {
            None
        };
        if let Some(direction) = side_turn {
            self.free_path_counter = 0;
            return (direction, self.speed(cfg.side_turn_factor));
        }

        self.free_path_counter += 1;
        if self.free_path_counter >= cfg.free_path_bound {
            self.state = NavState::Rotating;
            self.rotation_counter = 0;
            return (Direction::Stop, 0);
        }
        (Direction::Forward, self.speed(cfg.forward_factor))
    }
}
