//! `omnisense-hal` – Hardware Abstraction Layer.
//!
//! The fusion loop never talks to a device SDK or a serial port directly.  It
//! talks to the two collaborator traits defined here, so drivers can be
//! swapped (or simulated) without touching perception or navigation.
//!
//! # Modules
//!
//! - [`sensor`] – [`DepthSensor`][sensor::DepthSensor]: a depth (optionally
//!   colour+depth) device delivering one frame per cycle.
//! - [`actuator`] – [`Actuator`][actuator::Actuator]: the motor controller.
//! - [`classify`] – pure sensor-role classification from device identity.
//! - [`mixer`] – tri-omni wheel mixing and the text line protocol.
//! - [`serial`] – [`SerialLineActuator`][serial::SerialLineActuator]: writes
//!   wheel commands to a serial port from a dedicated writer thread.
//! - [`registry`] – [`HardwareRegistry`][registry::HardwareRegistry]: owns the
//!   connected sensors and the actuator.
//! - [`sim`] – in-process simulation drivers for tests and headless runs.

pub mod actuator;
pub mod classify;
pub mod mixer;
pub mod registry;
pub mod sensor;
pub mod serial;
pub mod sim;

pub use actuator::Actuator;
pub use classify::{DeviceInfo, assign_roles, classify_device};
pub use registry::HardwareRegistry;
pub use sensor::DepthSensor;
