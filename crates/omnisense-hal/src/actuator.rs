//! Generic `Actuator` trait for the motor controller.

use async_trait::async_trait;
use omnisense_types::{MotorCommand, OmniError};

/// The motor controller driving the omni base.
///
/// Exactly one command is in flight at a time: the loop owns the actuator
/// mutably and awaits each [`send`][Actuator::send] before issuing the next.
#[async_trait]
pub trait Actuator: Send {
    /// `true` while a controller is attached.
    fn is_connected(&self) -> bool;

    /// Attach (or re-attach) the controller on `port`.
    ///
    /// # Errors
    ///
    /// Returns [`OmniError::ActuatorWrite`] when the port cannot be opened.
    fn connect(&mut self, port: &str) -> Result<(), OmniError>;

    /// Port of the attached controller, if any.
    fn port(&self) -> Option<String> {
        None
    }

    /// Ports a controller could be attached to.  Drivers without discovery
    /// report none.
    ///
    /// # Errors
    ///
    /// Returns [`OmniError::ActuatorWrite`] when enumeration itself fails.
    fn available_ports(&self) -> Result<Vec<String>, OmniError> {
        Ok(Vec::new())
    }

    /// Issue one motor command.
    ///
    /// # Errors
    ///
    /// Returns [`OmniError::ActuatorDisconnected`] when nothing is attached
    /// (a no-op, not a panic) and [`OmniError::ActuatorWrite`] when the write
    /// itself fails.
    async fn send(&mut self, command: MotorCommand) -> Result<(), OmniError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use omnisense_types::Direction;

    /// Minimal in-process actuator used only for tests.
    struct MockActuator {
        connected: bool,
        last: Option<MotorCommand>,
    }

    #[async_trait]
    impl Actuator for MockActuator {
        fn is_connected(&self) -> bool {
            self.connected
        }

        fn connect(&mut self, _port: &str) -> Result<(), OmniError> {
            self.connected = true;
            Ok(())
        }

        async fn send(&mut self, command: MotorCommand) -> Result<(), OmniError> {
            if !self.connected {
                return Err(OmniError::ActuatorDisconnected);
            }
            self.last = Some(command);
            Ok(())
        }
    }

    #[tokio::test]
    async fn unconnected_send_fails_without_panicking() {
        let mut act = MockActuator {
            connected: false,
            last: None,
        };
        assert_eq!(
            act.send(MotorCommand::stop()).await,
            Err(OmniError::ActuatorDisconnected)
        );
        act.connect("/dev/null").unwrap();
        let cmd = MotorCommand::Drive {
            direction: Direction::Left,
            speed: 60,
        };
        act.send(cmd).await.unwrap();
        assert_eq!(act.last, Some(cmd));
    }

    #[test]
    fn discovery_defaults_to_nothing() {
        let act = MockActuator {
            connected: true,
            last: None,
        };
        assert_eq!(act.port(), None);
        assert_eq!(act.available_ports(), Ok(Vec::new()));
    }
}
