//! Tri-omni wheel mixing and the motor controller's text line protocol.
//!
//! The controller expects one ASCII line per command: `"m1,m2,m3\n"` with
//! signed integer wheel values.

use omnisense_types::{Direction, MotorCommand, WheelSpeeds};

/// Wheel values for driving in `direction` at `speed`.
pub fn mix(direction: Direction, speed: u32) -> WheelSpeeds {
    let s = speed.min(i32::MAX as u32) as i32;
    let (m1, m2, m3) = match direction {
        Direction::Forward => (0, -s, s),
        Direction::Backward => (0, s, -s),
        Direction::Left => (s, -s, s),
        Direction::Right => (-s, -s, s),
        Direction::Rotate => (-s, -s, -s),
        Direction::Stop => (0, 0, 0),
    };
    WheelSpeeds { m1, m2, m3 }
}

/// Resolve any [`MotorCommand`] to wheel values.
pub fn wheels_for(command: &MotorCommand) -> WheelSpeeds {
    match command {
        MotorCommand::Drive { direction, speed } => mix(*direction, *speed),
        MotorCommand::Raw(wheels) => *wheels,
    }
}

/// Encode wheel values as one protocol line.
pub fn encode_line(wheels: &WheelSpeeds) -> String {
    format!("{},{},{}\n", wheels.m1, wheels.m2, wheels.m3)
}
