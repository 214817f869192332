//! Sensor-role classification.
//!
//! Device discovery happens outside the core; what arrives here is the
//! identity a discovery pass reported for each device.  Classification is a
//! pure function so it can be tested without hardware attached.

use omnisense_types::SensorRole;
use tracing::{debug, warn};

/// Model tag of the solid-state LiDAR mounted under the chassis.
const FLOOR_MODEL_TAG: &str = "L515";
/// Model tag of the stereo depth camera mounted on top.
const BODY_MODEL_TAG: &str = "D435";

/// Identity of one enumerated depth device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub serial: String,
    pub product_line: String,
}

/// Map a device identity to its mounting role.
///
/// Returns `None` for devices that match neither model.
pub fn classify_device(name: &str, product_line: &str) -> Option<SensorRole> {
    let matches = |tag: &str| name.contains(tag) || product_line.contains(tag);
    if matches(FLOOR_MODEL_TAG) {
        Some(SensorRole::Floor)
    } else if matches(BODY_MODEL_TAG) {
        Some(SensorRole::Body)
    } else {
        None
    }
}

/// Assign a role to each device in `devices`.
///
/// The first device classified into a role takes it; later devices of the
/// same role and unclassified devices are skipped.  Returns `(serial, role)`
/// pairs in discovery order.
pub fn assign_roles(devices: &[DeviceInfo]) -> Vec<(String, SensorRole)> {
    let mut assigned: Vec<(String, SensorRole)> = Vec::new();
    for dev in devices {
        match classify_device(&dev.name, &dev.product_line) {
            Some(role) if assigned.iter().any(|(_, r)| *r == role) => {
                warn!(serial = %dev.serial, %role, "role already assigned; ignoring device");
            }
            Some(role) => {
                debug!(serial = %dev.serial, %role, "device classified");
                assigned.push((dev.serial.clone(), role));
            }
            None => {
                debug!(name = %dev.name, serial = %dev.serial, "unclassified depth device");
            }
        }
    }
    assigned
}
