//! [`CommandGate`] – validation of operator commands.
//!
//! Every [`OperatorCommand`] is passed through [`CommandGate::verify`] before
//! it is applied.  Registered [`Rule`]s are evaluated in order; the first
//! violation returns [`OmniError::MalformedCommand`] and the command must be
//! dropped without touching any state.
//!
//! Built-in rules:
//! - [`SpeedLimitRule`] – speeds above `max_speed`.
//! - [`RawWheelLimitRule`] – raw wheel values outside `±max_abs`.
//! - [`PortRule`] – `connect_serial` with a blank port.
//!
//! # Example
//!
//! ```
//! use omnisense_kernel::CommandGate;
//! use omnisense_types::{Direction, OperatorCommand};
//!
//! let gate = CommandGate::with_defaults(255);
//!
//! let ok = OperatorCommand::Move { direction: Direction::Left, speed: 150 };
//! assert!(gate.verify(&ok).is_ok());
//!
//! let fast = OperatorCommand::SetAutonomousSpeed { speed: 900 };
//! assert!(gate.verify(&fast).is_err());
//! ```

use omnisense_types::{OmniError, OperatorCommand};
use tracing::warn;

// ────────────────────────────────────────────────────────────────────────────
// Rule trait
// ────────────────────────────────────────────────────────────────────────────

/// A single constraint an operator command must satisfy.
pub trait Rule: Send + Sync {
    /// Name used in rejection messages.
    fn name(&self) -> &str;

    fn check(&self, command: &OperatorCommand) -> Result<(), OmniError>;
}

// ────────────────────────────────────────────────────────────────────────────
// CommandGate
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct CommandGate {
    rules: Vec<Box<dyn Rule>>,
}

impl CommandGate {
    /// A gate with no rules: everything passes.
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard rule set with a single speed ceiling.
    pub fn with_defaults(max_speed: u32) -> Self {
        let mut gate = Self::new();
        gate.add_rule(Box::new(SpeedLimitRule { max_speed }));
        gate.add_rule(Box::new(RawWheelLimitRule {
            max_abs: i32::try_from(max_speed).unwrap_or(i32::MAX),
        }));
        gate.add_rule(Box::new(PortRule));
        gate
    }

    /// Rules are evaluated in insertion order.
    pub fn add_rule(&mut self, rule: Box<dyn Rule>) {
        self.rules.push(rule);
    }

    pub fn verify(&self, command: &OperatorCommand) -> Result<(), OmniError> {
        for rule in &self.rules {
            if let Err(err) = rule.check(command) {
                warn!(rule = rule.name(), error = %err, "operator command rejected");
                return Err(err);
            }
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Built-in rules
// ────────────────────────────────────────────────────────────────────────────

pub struct SpeedLimitRule {
    pub max_speed: u32,
}

impl Rule for SpeedLimitRule {
    fn name(&self) -> &str {
        "speed_limit"
    }

    fn check(&self, command: &OperatorCommand) -> Result<(), OmniError> {
        let speed = match command {
            OperatorCommand::SetAutonomous { speed, .. } => *speed,
            OperatorCommand::SetAutonomousSpeed { speed } => Some(*speed),
            OperatorCommand::Move { speed, .. } => Some(*speed),
            _ => None,
        };
        match speed {
            Some(s) if s > self.max_speed => Err(OmniError::MalformedCommand(format!(
                "speed {s} exceeds limit {}",
                self.max_speed
            ))),
            _ => Ok(()),
        }
    }
}

pub struct RawWheelLimitRule {
    pub max_abs: i32,
}

impl Rule for RawWheelLimitRule {
    fn name(&self) -> &str {
        "raw_wheel_limit"
    }

    fn check(&self, command: &OperatorCommand) -> Result<(), OmniError> {
        let Some(w) = command.raw_wheels() else {
            return Ok(());
        };
        for (name, v) in [("m1", w.m1), ("m2", w.m2), ("m3", w.m3)] {
            if v.unsigned_abs() > self.max_abs.unsigned_abs() {
                return Err(OmniError::MalformedCommand(format!(
                    "{name} = {v} outside ±{}",
                    self.max_abs
                )));
            }
        }
        Ok(())
    }
}

pub struct PortRule;

impl Rule for PortRule {
    fn name(&self) -> &str {
        "port"
    }

    fn check(&self, command: &OperatorCommand) -> Result<(), OmniError> {
        match command {
            OperatorCommand::ConnectSerial { port } if port.trim().is_empty() => Err(
                OmniError::MalformedCommand("connect_serial requires a port".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omnisense_types::Direction;

    fn gate() -> CommandGate {
        CommandGate::with_defaults(255)
    }

    #[test]
    fn empty_gate_allows_everything() {
        let cmd = OperatorCommand::SetAutonomousSpeed { speed: 10_000 };
        assert!(CommandGate::new().verify(&cmd).is_ok());
    }

    #[test]
    fn speed_limit_applies_to_every_speed_field() {
        let g = gate();
        assert!(g
            .verify(&OperatorCommand::SetAutonomous { enabled: true, speed: Some(256) })
            .is_err());
        assert!(g
            .verify(&OperatorCommand::SetAutonomous { enabled: true, speed: None })
            .is_ok());
        assert!(g
            .verify(&OperatorCommand::Move { direction: Direction::Forward, speed: 255 })
            .is_ok());
        assert!(matches!(
            g.verify(&OperatorCommand::Move { direction: Direction::Forward, speed: 300 }),
            Err(OmniError::MalformedCommand(_))
        ));
    }

    #[test]
    fn raw_wheels_bounded_both_ways() {
        let g = gate();
        assert!(g.verify(&OperatorCommand::MoveRaw { m1: -255, m2: 0, m3: 255 }).is_ok());
        let err = g
            .verify(&OperatorCommand::MoveRaw { m1: 0, m2: -256, m3: 0 })
            .unwrap_err();
        assert!(err.to_string().contains("m2"));
    }

    #[test]
    fn blank_port_rejected() {
        let g = gate();
        assert!(g
            .verify(&OperatorCommand::ConnectSerial { port: "  ".to_string() })
            .is_err());
        assert!(g
            .verify(&OperatorCommand::ConnectSerial { port: "/dev/ttyUSB0".to_string() })
            .is_ok());
    }

    #[test]
    fn custom_rule_runs_after_builtins() {
        struct NoBackward;
        impl Rule for NoBackward {
            fn name(&self) -> &str {
                "no_backward"
            }
            fn check(&self, command: &OperatorCommand) -> Result<(), OmniError> {
                match command {
                    OperatorCommand::Move { direction: Direction::Backward, .. } => Err(
                        OmniError::MalformedCommand("backward disabled".to_string()),
                    ),
                    _ => Ok(()),
                }
            }
        }
        let mut g = gate();
        g.add_rule(Box::new(NoBackward));
        let err = g
            .verify(&OperatorCommand::Move { direction: Direction::Backward, speed: 10 })
            .unwrap_err();
        assert!(err.to_string().contains("backward disabled"));
    }
}
