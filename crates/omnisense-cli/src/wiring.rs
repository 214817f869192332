//! Builds the hardware registry and the fusion loop from a [`Config`].

use std::sync::Arc;

use omnisense_hal::sim::{SimActuator, SimDepthSensor, SimScene};
use omnisense_hal::serial::SerialLineActuator;
use omnisense_hal::{Actuator, DeviceInfo, HardwareRegistry, assign_roles, classify_device};
use omnisense_middleware::EventBus;
use omnisense_perception::DepthBlobSegmenter;
use omnisense_runtime::FusionLoop;
use omnisense_types::OmniError;
use tracing::{info, warn};

use crate::config::{ActuatorDriver, Config, SensorDriver};

/// Instantiate every configured sensor and the actuator.
///
/// Sensors identified only by `device` get their role from the device model;
/// when two devices of one model are configured the first keeps the role and
/// the later one is skipped.  A serial actuator whose port cannot be opened
/// is kept, disconnected, so a later `connect_serial` command can attach it.
pub fn build_hardware(cfg: &Config) -> Result<HardwareRegistry, OmniError> {
    let mut registry = HardwareRegistry::new();

    let discovered: Vec<DeviceInfo> = cfg
        .sensors
        .iter()
        .filter(|s| s.role.is_none())
        .filter_map(|s| {
            s.device.as_ref().map(|device| DeviceInfo {
                name: device.clone(),
                serial: s.id.clone(),
                product_line: device.clone(),
            })
        })
        .collect();
    let discovered_roles = assign_roles(&discovered);

    for sensor in &cfg.sensors {
        let assigned = discovered_roles.iter().find(|(id, _)| *id == sensor.id);
        let known_model = sensor
            .device
            .as_deref()
            .is_some_and(|d| classify_device(d, d).is_some());
        let role = match (sensor.role, assigned) {
            (Some(role), _) => role,
            (None, Some((_, role))) => *role,
            (None, None) if known_model => {
                warn!(sensor = %sensor.id, "role already taken by an earlier device; skipped");
                continue;
            }
            (None, None) => sensor.resolved_role()?,
        };
        match sensor.driver {
            SensorDriver::Sim => {
                let scene = sensor
                    .scene
                    .map(|s| SimScene::sectors(s.left_m, s.center_m, s.right_m))
                    .unwrap_or_else(SimScene::open);
                let driver = SimDepthSensor::new(sensor.id.clone(), role, scene);
                registry.register_sensor(Box::new(driver));
            }
        }
        info!(sensor = %sensor.id, %role, driver = ?sensor.driver, "sensor registered");
    }

    let actuator: Box<dyn Actuator> = match cfg.actuator.driver {
        ActuatorDriver::Sim => Box::new(SimActuator::connected()),
        ActuatorDriver::Serial => {
            let mut serial = SerialLineActuator::new().with_baud_rate(cfg.actuator.baud_rate);
            if let Some(port) = cfg.actuator.port.as_deref() {
                if let Err(e) = serial.connect(port) {
                    warn!(port, error = %e, "motor controller not attached at startup");
                }
            }
            Box::new(serial)
        }
    };
    registry.set_actuator(actuator);
    Ok(registry)
}

/// Assemble a [`FusionLoop`] over freshly built hardware.
pub fn build_loop(cfg: &Config, bus: Arc<EventBus>) -> Result<FusionLoop, OmniError> {
    let hardware = build_hardware(cfg)?;
    let mut fusion = FusionLoop::new(cfg.fusion.clone(), hardware, bus)
        .with_navigator(cfg.navigator)
        .with_tracker(cfg.tracker)
        .with_detection_source(Box::new(DepthBlobSegmenter::new(cfg.segmentation)));
    for sensor in &cfg.sensors {
        if let Some(detector) = sensor.detector {
            fusion = fusion.with_detector(&sensor.id, detector);
        }
    }
    Ok(fusion)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SceneConfig, SensorConfig};
    use omnisense_perception::SectorConfig;
    use omnisense_types::{Direction, SensorRole};

    #[test]
    fn default_config_wires_two_sensors_and_a_connected_actuator() {
        let registry = build_hardware(&Config::default()).unwrap();
        let roles = registry.sensor_roles();
        assert_eq!(
            roles,
            vec![
                ("floor".to_string(), SensorRole::Floor),
                ("body".to_string(), SensorRole::Body)
            ]
        );
        assert!(registry.actuator_connected());
    }

    #[test]
    fn serial_actuator_without_port_starts_detached() {
        let mut cfg = Config::default();
        cfg.actuator.driver = ActuatorDriver::Serial;
        let registry = build_hardware(&cfg).unwrap();
        assert!(!registry.actuator_connected());
    }

    #[test]
    fn unresolvable_sensor_role_fails_the_build() {
        let mut cfg = Config::default();
        cfg.sensors.push(SensorConfig {
            role: None,
            device: Some("unknown".to_string()),
            ..SensorConfig::sim("extra", SensorRole::Body)
        });
        assert!(matches!(build_hardware(&cfg), Err(OmniError::Config(_))));
    }

    #[test]
    fn second_device_of_one_model_is_skipped() {
        let mut cfg = Config::default();
        let camera = |id: &str| SensorConfig {
            role: None,
            device: Some("Intel RealSense D435".to_string()),
            ..SensorConfig::sim(id, SensorRole::Body)
        };
        cfg.sensors = vec![camera("cam-a"), camera("cam-b")];
        let registry = build_hardware(&cfg).unwrap();
        assert_eq!(
            registry.sensor_roles(),
            vec![("cam-a".to_string(), SensorRole::Body)]
        );
    }

    #[tokio::test]
    async fn configured_scene_and_detector_drive_the_loop() {
        let mut cfg = Config::default();
        cfg.fusion.autonomous = true;
        cfg.sensors = vec![SensorConfig {
            scene: Some(SceneConfig {
                left_m: 3.0,
                center_m: 0.9,
                right_m: 3.0,
            }),
            detector: Some(SectorConfig {
                safe_distance_m: 1.0,
                ..SectorConfig::floor()
            }),
            ..SensorConfig::sim("floor", SensorRole::Floor)
        }];

        let mut fusion = build_loop(&cfg, Arc::new(EventBus::default())).unwrap();
        let snap = fusion.run_cycle().await;
        assert!(snap.obstacle_reports["floor"].center.blocked);
        assert_eq!(snap.navigation_decision.direction, Direction::Right);
    }
}
