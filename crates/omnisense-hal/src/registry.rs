//! [`HardwareRegistry`] – owns every connected device.
//!
//! The registry is built once at startup (from configuration or from
//! [`SimRegistry`][crate::sim::SimRegistry]) and handed to the fusion loop,
//! which is then the only code touching the devices.

use omnisense_types::{SensorId, SensorRole};
use tracing::info;

use crate::actuator::Actuator;
use crate::sensor::DepthSensor;

/// Connected sensors (in registration order) and the optional actuator.
#[derive(Default)]
pub struct HardwareRegistry {
    sensors: Vec<Box<dyn DepthSensor>>,
    actuator: Option<Box<dyn Actuator>>,
}

impl HardwareRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sensor.  A previously registered sensor with the same id is
    /// replaced in place, keeping its position in the read order.
    pub fn register_sensor(&mut self, sensor: Box<dyn DepthSensor>) {
        info!(sensor = %sensor.id(), role = %sensor.role(), "sensor registered");
        match self.sensors.iter().position(|s| s.id() == sensor.id()) {
            Some(i) => self.sensors[i] = sensor,
            None => self.sensors.push(sensor),
        }
    }

    /// Install the motor controller, replacing any previous one.
    pub fn set_actuator(&mut self, actuator: Box<dyn Actuator>) {
        self.actuator = Some(actuator);
    }

    pub fn sensors_mut(&mut self) -> &mut [Box<dyn DepthSensor>] {
        &mut self.sensors
    }

    /// `(id, role)` of every registered sensor in read order.
    pub fn sensor_roles(&self) -> Vec<(SensorId, SensorRole)> {
        self.sensors
            .iter()
            .map(|s| (s.id().clone(), s.role()))
            .collect()
    }

    pub fn actuator_mut(&mut self) -> Option<&mut Box<dyn Actuator>> {
        self.actuator.as_mut()
    }

    /// `true` when an actuator is installed and reports itself connected.
    pub fn actuator_connected(&self) -> bool {
        self.actuator.as_ref().is_some_and(|a| a.is_connected())
    }
}
