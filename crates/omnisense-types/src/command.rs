//! Operator commands: the only way outside clients influence the loop.
//!
//! Commands mutate the navigator's base speed and the loop's
//! manual/autonomous flag; they never touch tracker state.

use schemars::JsonSchema;
use schemars::schema::RootSchema;
use serde::{Deserialize, Serialize};

use crate::navigation::{Direction, WheelSpeeds};

/// Speed used by a manual `move` that does not name one.
pub const DEFAULT_MANUAL_SPEED: u32 = 150;

fn default_manual_speed() -> u32 {
    DEFAULT_MANUAL_SPEED
}

/// A command sent by the operator console or a bridge client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperatorCommand {
    /// Enable or disable autonomous navigation, optionally setting the base
    /// speed at the same time.
    SetAutonomous {
        enabled: bool,
        #[serde(default)]
        speed: Option<u32>,
    },
    /// Change the navigator's base speed.
    SetAutonomousSpeed { speed: u32 },
    /// Manual drive in a named direction.
    Move {
        direction: Direction,
        #[serde(default = "default_manual_speed")]
        speed: u32,
    },
    /// Manual drive with raw wheel values.
    MoveRaw { m1: i32, m2: i32, m3: i32 },
    /// (Re)connect the motor controller on `port`.
    ConnectSerial { port: String },
    /// Ask for the serial ports a controller could be attached to.  Answered
    /// with a `ports_list` status event.
    ListPorts,
}

impl OperatorCommand {
    /// Wheel values of a `MoveRaw` command.
    pub fn raw_wheels(&self) -> Option<WheelSpeeds> {
        match self {
            OperatorCommand::MoveRaw { m1, m2, m3 } => Some(WheelSpeeds {
                m1: *m1,
                m2: *m2,
                m3: *m3,
            }),
            _ => None,
        }
    }
}

/// JSON Schema describing [`OperatorCommand`], for client authors.
pub fn command_schema() -> RootSchema {
    schemars::schema_for!(OperatorCommand)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_defaults_speed() {
        let cmd: OperatorCommand =
            serde_json::from_str(r#"{"type":"move","direction":"left"}"#).unwrap();
        assert_eq!(
            cmd,
            OperatorCommand::Move {
                direction: Direction::Left,
                speed: DEFAULT_MANUAL_SPEED
            }
        );
    }

    #[test]
    fn set_autonomous_speed_is_optional() {
        let cmd: OperatorCommand =
            serde_json::from_str(r#"{"type":"set_autonomous","enabled":true}"#).unwrap();
        assert_eq!(
            cmd,
            OperatorCommand::SetAutonomous {
                enabled: true,
                speed: None
            }
        );
    }

    #[test]
    fn list_ports_has_no_fields() {
        let cmd: OperatorCommand = serde_json::from_str(r#"{"type":"list_ports"}"#).unwrap();
        assert_eq!(cmd, OperatorCommand::ListPorts);
    }

    #[test]
    fn negative_speed_is_rejected_by_the_decoder() {
        let res: Result<OperatorCommand, _> =
            serde_json::from_str(r#"{"type":"set_autonomous_speed","speed":-5}"#);
        assert!(res.is_err());
    }

    #[test]
    fn raw_wheels_only_for_move_raw() {
        let raw = OperatorCommand::MoveRaw { m1: 1, m2: -2, m3: 3 };
        assert_eq!(raw.raw_wheels(), Some(WheelSpeeds { m1: 1, m2: -2, m3: 3 }));
        assert_eq!(
            OperatorCommand::SetAutonomousSpeed { speed: 10 }.raw_wheels(),
            None
        );
    }

    #[test]
    fn schema_names_every_command_type() {
        let json = serde_json::to_string(&command_schema()).unwrap();
        for tag in ["set_autonomous", "move_raw", "connect_serial", "list_ports"] {
            assert!(json.contains(tag), "schema is missing {tag}");
        }
    }
}
