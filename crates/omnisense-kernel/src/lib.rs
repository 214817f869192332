//! `omnisense-kernel` – safety layer.
//!
//! Neither module here decides where the robot goes; they decide when the
//! robot must not trust its inputs.
//!
//! # Modules
//!
//! - [`watchdog`] – [`SensorWatchdog`][watchdog::SensorWatchdog]: counts
//!   consecutive read failures per sensor and trips once a sensor has failed
//!   too often in a row, so the fusion loop can force a safe STOP.
//! - [`command_gate`] – [`CommandGate`][command_gate::CommandGate]: a rule
//!   engine every [`OperatorCommand`][omnisense_types::OperatorCommand]
//!   passes through before it may mutate loop state.

pub mod command_gate;
pub mod watchdog;

pub use command_gate::{CommandGate, PortRule, RawWheelLimitRule, Rule, SpeedLimitRule};
pub use watchdog::SensorWatchdog;
