//! In-process simulation drivers for tests and headless runs.
//!
//! [`SimRegistry`] builds a [`HardwareRegistry`] whose slots are backed by
//! drivers that render synthetic depth scenes and record motor commands.
//! Each driver hands out a cloneable handle so a test can script failures
//! or inspect commands after the driver has been moved into the registry.
//!
//! # Example
//!
//! ```rust
//! use omnisense_hal::sim::{SimRegistry, SimScene};
//! use omnisense_types::SensorRole;
//!
//! let (registry, handles) = SimRegistry::builder()
//!     .with_sensor("floor", SensorRole::Floor, SimScene::sectors(0.3, 2.0, 1.5))
//!     .with_actuator()
//!     .build();
//!
//! assert!(registry.actuator_connected());
//! assert!(handles.sensor("floor").is_some());
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use omnisense_types::{
    BoundingBox, DepthFrame, Intrinsics, MotorCommand, OmniError, Point2, SensorFrame, SensorId,
    SensorRole,
};

use crate::actuator::Actuator;
use crate::registry::HardwareRegistry;
use crate::sensor::DepthSensor;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ────────────────────────────────────────────────────────────────────────────
// Scene
// ────────────────────────────────────────────────────────────────────────────

/// A box-shaped object floating in front of the sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct SimObject {
    pub bbox: BoundingBox,
    pub depth_m: f32,
    /// Pixels moved per rendered frame.
    pub velocity: Point2,
}

/// Synthetic scene: a constant background distance per sector, plus
/// moving objects drawn on top.
#[derive(Debug, Clone, PartialEq)]
pub struct SimScene {
    pub width: usize,
    pub height: usize,
    pub depth_scale: f32,
    pub left_m: f32,
    pub center_m: f32,
    pub right_m: f32,
    pub objects: Vec<SimObject>,
}

impl SimScene {
    /// 5 m of clearance everywhere, 160×120 pixels.
    pub fn open() -> Self {
        Self::sectors(5.0, 5.0, 5.0)
    }

    /// Background distance per third of the image.
    pub fn sectors(left_m: f32, center_m: f32, right_m: f32) -> Self {
        Self {
            width: 160,
            height: 120,
            depth_scale: 0.001,
            left_m,
            center_m,
            right_m,
            objects: Vec::new(),
        }
    }

    pub fn with_size(mut self, width: usize, height: usize) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_object(mut self, object: SimObject) -> Self {
        self.objects.push(object);
        self
    }

    /// Render the current scene into a depth frame.
    pub fn render(&self) -> DepthFrame {
        let third = self.width / 3;
        let frame = DepthFrame::from_fn(self.width, self.height, self.depth_scale, |x, y| {
            let (fx, fy) = (x as f32, y as f32);
            let hit = self.objects.iter().find(|o| {
                let b = &o.bbox;
                fx >= b.x && fx < b.x + b.w && fy >= b.y && fy < b.y + b.h
            });
            match hit {
                Some(o) => o.depth_m,
                None if x < third => self.left_m,
                None if x < 2 * third => self.center_m,
                None => self.right_m,
            }
        });
        frame.with_intrinsics(Intrinsics {
            fx: self.width as f32,
            fy: self.width as f32,
            ppx: self.width as f32 / 2.0,
            ppy: self.height as f32 / 2.0,
        })
    }

    /// Advance every object by its velocity.
    pub fn step(&mut self) {
        for o in &mut self.objects {
            o.bbox.x += o.velocity.x;
            o.bbox.y += o.velocity.y;
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated sensor
// ────────────────────────────────────────────────────────────────────────────

/// One scripted read outcome.  Scripted reads are consumed before the scene
/// is rendered again.
#[derive(Debug, Clone)]
pub enum SimRead {
    Frame(SensorFrame),
    /// The device had no new frame.
    Absent,
    /// The device reported an error.
    Fail(String),
    /// The device never answers; only the caller's timeout ends the read.
    Hang,
}

#[derive(Debug)]
struct SimSensorState {
    scene: SimScene,
    script: VecDeque<SimRead>,
    reads: u64,
}

/// Depth sensor rendering a [`SimScene`] on every read.
pub struct SimDepthSensor {
    id: SensorId,
    role: SensorRole,
    state: Arc<Mutex<SimSensorState>>,
}

impl SimDepthSensor {
    pub fn new(id: impl Into<SensorId>, role: SensorRole, scene: SimScene) -> Self {
        Self {
            id: id.into(),
            role,
            state: Arc::new(Mutex::new(SimSensorState {
                scene,
                script: VecDeque::new(),
                reads: 0,
            })),
        }
    }

    pub fn handle(&self) -> SimSensorHandle {
        SimSensorHandle {
            state: Arc::clone(&self.state),
        }
    }
}

#[async_trait]
impl DepthSensor for SimDepthSensor {
    fn id(&self) -> &SensorId {
        &self.id
    }

    fn role(&self) -> SensorRole {
        self.role
    }

    async fn read_frame(&mut self) -> Result<Option<SensorFrame>, OmniError> {
        let outcome = {
            let mut state = lock(&self.state);
            state.reads += 1;
            match state.script.pop_front() {
                Some(read) => read,
                None => {
                    let frame = state.scene.render();
                    state.scene.step();
                    SimRead::Frame(frame.into())
                }
            }
        };
        match outcome {
            SimRead::Frame(frame) => Ok(Some(frame)),
            SimRead::Absent => Ok(None),
            SimRead::Fail(reason) => Err(OmniError::SensorUnavailable {
                sensor: self.id.clone(),
                reason,
            }),
            SimRead::Hang => std::future::pending().await,
        }
    }
}

/// Shared control over a [`SimDepthSensor`] after it has been registered.
#[derive(Clone)]
pub struct SimSensorHandle {
    state: Arc<Mutex<SimSensorState>>,
}

impl SimSensorHandle {
    pub fn set_scene(&self, scene: SimScene) {
        lock(&self.state).scene = scene;
    }

    pub fn push(&self, read: SimRead) {
        lock(&self.state).script.push_back(read);
    }

    /// Script `n` consecutive failing reads.
    pub fn fail_next(&self, n: usize) {
        let mut state = lock(&self.state);
        for _ in 0..n {
            state.script.push_back(SimRead::Fail("simulated fault".to_string()));
        }
    }

    /// Number of reads issued so far.
    pub fn reads(&self) -> u64 {
        lock(&self.state).reads
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated actuator
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct SimActuatorState {
    port: Option<String>,
    available: Vec<String>,
    sent: Vec<MotorCommand>,
    fail_next: u32,
    hang_next: u32,
}

/// Motor controller that records every accepted command.
pub struct SimActuator {
    state: Arc<Mutex<SimActuatorState>>,
}

impl SimActuator {
    /// An actuator already attached to port `"sim"`.
    pub fn connected() -> Self {
        let act = Self::disconnected();
        lock(&act.state).port = Some("sim".to_string());
        act
    }

    pub fn disconnected() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimActuatorState::default())),
        }
    }

    pub fn handle(&self) -> SimActuatorHandle {
        SimActuatorHandle {
            state: Arc::clone(&self.state),
        }
    }
}

#[async_trait]
impl Actuator for SimActuator {
    fn is_connected(&self) -> bool {
        lock(&self.state).port.is_some()
    }

    fn connect(&mut self, port: &str) -> Result<(), OmniError> {
        if port.is_empty() {
            return Err(OmniError::ActuatorWrite("empty port".to_string()));
        }
        lock(&self.state).port = Some(port.to_string());
        Ok(())
    }

    fn port(&self) -> Option<String> {
        lock(&self.state).port.clone()
    }

    fn available_ports(&self) -> Result<Vec<String>, OmniError> {
        Ok(lock(&self.state).available.clone())
    }

    async fn send(&mut self, command: MotorCommand) -> Result<(), OmniError> {
        let hang = {
            let mut state = lock(&self.state);
            if state.port.is_none() {
                return Err(OmniError::ActuatorDisconnected);
            }
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(OmniError::ActuatorWrite("simulated write fault".to_string()));
            }
            if state.hang_next > 0 {
                state.hang_next -= 1;
                true
            } else {
                state.sent.push(command);
                false
            }
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

/// Shared view of a [`SimActuator`]'s command log.
#[derive(Clone)]
pub struct SimActuatorHandle {
    state: Arc<Mutex<SimActuatorState>>,
}

impl SimActuatorHandle {
    pub fn sent(&self) -> Vec<MotorCommand> {
        lock(&self.state).sent.clone()
    }

    pub fn last(&self) -> Option<MotorCommand> {
        lock(&self.state).sent.last().copied()
    }

    pub fn port(&self) -> Option<String> {
        lock(&self.state).port.clone()
    }

    /// Make the next `n` writes fail.
    pub fn fail_next(&self, n: u32) {
        lock(&self.state).fail_next = n;
    }

    /// Make the next `n` writes never complete.
    pub fn hang_next(&self, n: u32) {
        lock(&self.state).hang_next = n;
    }

    /// Ports reported by discovery.
    pub fn set_available_ports(&self, ports: &[&str]) {
        lock(&self.state).available = ports.iter().map(|p| p.to_string()).collect();
    }

    pub fn disconnect(&self) {
        lock(&self.state).port = None;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimRegistry builder
// ────────────────────────────────────────────────────────────────────────────

/// Handles to every simulated driver built by [`SimRegistry`].
#[derive(Clone, Default)]
pub struct SimHandles {
    sensors: HashMap<SensorId, SimSensorHandle>,
    actuator: Option<SimActuatorHandle>,
}

impl SimHandles {
    pub fn sensor(&self, id: &str) -> Option<&SimSensorHandle> {
        self.sensors.get(id)
    }

    pub fn actuator(&self) -> Option<&SimActuatorHandle> {
        self.actuator.as_ref()
    }
}

/// Builder for a [`HardwareRegistry`] populated with simulation drivers.
#[derive(Default)]
pub struct SimRegistry {
    sensors: Vec<SimDepthSensor>,
    actuator: Option<SimActuator>,
}

impl SimRegistry {
    pub fn builder() -> Self {
        Self::default()
    }

    pub fn with_sensor(mut self, id: &str, role: SensorRole, scene: SimScene) -> Self {
        self.sensors.push(SimDepthSensor::new(id, role, scene));
        self
    }

    /// Add a connected actuator.
    pub fn with_actuator(mut self) -> Self {
        self.actuator = Some(SimActuator::connected());
        self
    }

    /// Add an actuator that waits for a `connect` call.
    pub fn with_disconnected_actuator(mut self) -> Self {
        self.actuator = Some(SimActuator::disconnected());
        self
    }

    pub fn build(self) -> (HardwareRegistry, SimHandles) {
        let mut registry = HardwareRegistry::new();
        let mut handles = SimHandles::default();
        for sensor in self.sensors {
            handles.sensors.insert(sensor.id.clone(), sensor.handle());
            registry.register_sensor(Box::new(sensor));
        }
        if let Some(actuator) = self.actuator {
            handles.actuator = Some(actuator.handle());
            registry.set_actuator(Box::new(actuator));
        }
        (registry, handles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omnisense_types::Direction;
    use std::time::Duration;

    #[test]
    fn scene_renders_sector_backgrounds() {
        let frame = SimScene::sectors(0.3, 2.0, 1.5).render();
        assert!((frame.metres(5, 10) - 0.3).abs() < 1e-3);
        assert!((frame.metres(80, 10) - 2.0).abs() < 1e-3);
        assert!((frame.metres(150, 10) - 1.5).abs() < 1e-3);
        assert!(frame.intrinsics().is_some());
    }

    #[test]
    fn objects_move_between_renders() {
        let mut scene = SimScene::open().with_object(SimObject {
            bbox: BoundingBox::new(10.0, 10.0, 20.0, 20.0),
            depth_m: 1.0,
            velocity: Point2::new(5.0, 0.0),
        });
        assert!((scene.render().metres(12, 15) - 1.0).abs() < 1e-3);
        scene.step();
        let frame = scene.render();
        assert!((frame.metres(12, 15) - 5.0).abs() < 1e-3);
        assert!((frame.metres(32, 15) - 1.0).abs() < 1e-3);
    }

    #[tokio::test]
    async fn scripted_reads_take_priority() {
        let mut sensor = SimDepthSensor::new("body", SensorRole::Body, SimScene::open());
        let handle = sensor.handle();
        handle.push(SimRead::Absent);
        handle.fail_next(1);

        assert!(sensor.read_frame().await.unwrap().is_none());
        assert!(matches!(
            sensor.read_frame().await,
            Err(OmniError::SensorUnavailable { .. })
        ));
        assert!(sensor.read_frame().await.unwrap().is_some());
        assert_eq!(handle.reads(), 3);
    }

    #[tokio::test]
    async fn hanging_read_is_cut_by_timeout() {
        let mut sensor = SimDepthSensor::new("floor", SensorRole::Floor, SimScene::open());
        sensor.handle().push(SimRead::Hang);
        let res = tokio::time::timeout(Duration::from_millis(10), sensor.read_frame()).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn actuator_records_and_fails_on_demand() {
        let mut act = SimActuator::connected();
        let handle = act.handle();
        handle.fail_next(1);

        let cmd = MotorCommand::Drive {
            direction: Direction::Forward,
            speed: 80,
        };
        assert!(matches!(act.send(cmd).await, Err(OmniError::ActuatorWrite(_))));
        act.send(cmd).await.unwrap();
        assert_eq!(handle.sent(), vec![cmd]);

        handle.disconnect();
        assert_eq!(act.send(cmd).await, Err(OmniError::ActuatorDisconnected));
    }

    #[tokio::test]
    async fn actuator_hangs_and_reports_ports_on_demand() {
        let mut act = SimActuator::connected();
        let handle = act.handle();
        handle.hang_next(1);
        handle.set_available_ports(&["/dev/ttyACM0", "/dev/ttyUSB0"]);

        let res =
            tokio::time::timeout(Duration::from_millis(10), act.send(MotorCommand::stop())).await;
        assert!(res.is_err());
        assert!(handle.sent().is_empty());
        act.send(MotorCommand::stop()).await.unwrap();
        assert_eq!(handle.sent().len(), 1);

        assert_eq!(act.port().as_deref(), Some("sim"));
        assert_eq!(
            act.available_ports().unwrap(),
            vec!["/dev/ttyACM0".to_string(), "/dev/ttyUSB0".to_string()]
        );
    }

    #[test]
    fn builder_wires_handles() {
        let (registry, handles) = SimRegistry::builder()
            .with_sensor("floor", SensorRole::Floor, SimScene::open())
            .with_sensor("body", SensorRole::Body, SimScene::open())
            .with_disconnected_actuator()
            .build();
        assert_eq!(registry.sensor_roles().len(), 2);
        assert!(!registry.actuator_connected());
        assert!(handles.sensor("body").is_some());
        assert!(handles.actuator().unwrap().port().is_none());
    }
}
