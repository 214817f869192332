//! [`FusionLoop`] – the fixed-cadence fusion and broadcast cycle.
//!
//! Each cycle:
//!
//! 1. **Commands** – drain the operator command channel; every command
//!    passes the [`CommandGate`] first.
//! 2. **Read** – pull one frame from every sensor concurrently, each bounded
//!    by `read_timeout_ms`.  A timeout, an absent frame or a driver error
//!    leaves that sensor out of the cycle and feeds the [`SensorWatchdog`].
//! 3. **Detect** – run the sensor's [`SectorDetector`] on each frame.
//! 4. **Track** – run the [`DetectionSource`] on the tracking sensors'
//!    frames and hand the result to the [`ObjectTracker`].
//! 5. **Decide** – run the [`Navigator`].  A tripped watchdog replaces the
//!    decision with a safe STOP.
//! 6. **Act** – autonomous mode forwards the decision; manual mode forwards
//!    the pending manual command, if any.
//! 7. **Publish** – push an immutable [`Snapshot`] onto the [`EventBus`].
//!
//! [`FusionLoop::run`] repeats the cycle, sleeping `cadence - elapsed` but
//! never less than `min_sleep_ms`, until the shutdown flag is raised.  It
//! then issues one final STOP.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::sync::atomic::AtomicBool;
//! use omnisense_hal::sim::{SimRegistry, SimScene};
//! use omnisense_middleware::EventBus;
//! use omnisense_runtime::fusion_loop::{FusionLoop, LoopConfig};
//! use omnisense_types::SensorRole;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (hardware, _handles) = SimRegistry::builder()
//!         .with_sensor("floor", SensorRole::Floor, SimScene::open())
//!         .with_actuator()
//!         .build();
//!     let bus = Arc::new(EventBus::default());
//!     let fusion = FusionLoop::new(LoopConfig::default(), hardware, bus);
//!     let shutdown = Arc::new(AtomicBool::new(false));
//!     fusion.run(shutdown).await;
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::future::join_all;
use omnisense_hal::HardwareRegistry;
use omnisense_kernel::{CommandGate, SensorWatchdog};
use omnisense_middleware::EventBus;
use omnisense_perception::sector::SENTINEL_CLEAR_M;
use omnisense_perception::{
    DepthBlobSegmenter, DetectionSource, ObjectTracker, SectorConfig, SectorDetector,
    SegmentationConfig, TrackerConfig,
};
use omnisense_types::{
    Detection, EventPayload, ModeFlags, MotorCommand, NavDiagnostics, NavigationDecision,
    ObstacleReport, OmniError, OperatorCommand, SectorDistances, SensorFrame, SensorId,
    SensorMode, SensorRole, Snapshot,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::navigator::{Navigator, NavigatorConfig};

const SOURCE: &str = "omnisense-runtime::fusion_loop";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// The `[loop]` section of the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Target cycle period.
    pub cadence_ms: u64,
    /// Lower bound on the sleep between cycles.
    pub min_sleep_ms: u64,
    /// Bound on each sensor read.
    pub read_timeout_ms: u64,
    /// Bound on each actuator write.
    pub actuator_timeout_ms: u64,
    /// Consecutive read failures a sensor may accumulate before a safe STOP.
    pub failure_threshold: u32,
    /// Ceiling enforced on every operator speed and raw wheel value.
    pub max_speed: u32,
    /// Sensors whose frames feed the object tracker.  Empty means every
    /// body-role sensor.
    pub tracking_sensors: Vec<SensorId>,
    /// Capacity of the operator command channel.
    pub command_queue: usize,
    /// Start in autonomous mode.
    pub autonomous: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            cadence_ms: 100,
            min_sleep_ms: 50,
            read_timeout_ms: 50,
            actuator_timeout_ms: 100,
            failure_threshold: 5,
            max_speed: 255,
            tracking_sensors: Vec::new(),
            command_queue: 32,
            autonomous: false,
        }
    }
}

impl LoopConfig {
    /// Sleep after a cycle that took `elapsed`.
    pub fn sleep_after(&self, elapsed: Duration) -> Duration {
        Duration::from_millis(self.cadence_ms)
            .saturating_sub(elapsed)
            .max(Duration::from_millis(self.min_sleep_ms))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// FusionLoop
// ─────────────────────────────────────────────────────────────────────────────

pub struct FusionLoop {
    config: LoopConfig,
    hardware: HardwareRegistry,
    detectors: HashMap<SensorId, SectorDetector>,
    detection_source: Box<dyn DetectionSource>,
    tracker: ObjectTracker,
    navigator: Navigator,
    watchdog: SensorWatchdog,
    gate: CommandGate,
    bus: Arc<EventBus>,
    commands_tx: mpsc::Sender<OperatorCommand>,
    commands_rx: mpsc::Receiver<OperatorCommand>,
    autonomous: bool,
    pending_manual: Option<MotorCommand>,
    robot_moving: bool,
    cycle: u64,
}

impl FusionLoop {
    /// Build a loop over `hardware` with default perception and navigation
    /// parameters.  Every registered sensor gets the detector preset of its
    /// role until [`with_detector`](Self::with_detector) overrides it.
    pub fn new(config: LoopConfig, hardware: HardwareRegistry, bus: Arc<EventBus>) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(config.command_queue.max(1));
        let mut watchdog = SensorWatchdog::new(config.failure_threshold);
        let mut detectors = HashMap::new();
        for (id, role) in hardware.sensor_roles() {
            watchdog.register(&id);
            detectors.insert(id, SectorDetector::new(SectorConfig::for_role(role)));
        }
        Self {
            gate: CommandGate::with_defaults(config.max_speed),
            autonomous: config.autonomous,
            config,
            hardware,
            detectors,
            detection_source: Box::new(DepthBlobSegmenter::new(SegmentationConfig::default())),
            tracker: ObjectTracker::new(TrackerConfig::default()),
            navigator: Navigator::new(NavigatorConfig::default()),
            watchdog,
            bus,
            commands_tx,
            commands_rx,
            pending_manual: None,
            robot_moving: false,
            cycle: 0,
        }
    }

    pub fn with_navigator(mut self, config: NavigatorConfig) -> Self {
        self.navigator = Navigator::new(config);
        self
    }

    pub fn with_tracker(mut self, config: TrackerConfig) -> Self {
        self.tracker = ObjectTracker::new(config);
        self
    }

    pub fn with_detector(mut self, sensor: &str, config: SectorConfig) -> Self {
        self.detectors.insert(sensor.to_string(), SectorDetector::new(config));
        self
    }

    pub fn with_detection_source(mut self, source: Box<dyn DetectionSource>) -> Self {
        self.detection_source = source;
        self
    }

    /// A handle for submitting operator commands from other tasks.
    pub fn command_sender(&self) -> mpsc::Sender<OperatorCommand> {
        self.commands_tx.clone()
    }

    pub fn is_autonomous(&self) -> bool {
        self.autonomous
    }

    pub fn navigator(&self) -> &Navigator {
        &self.navigator
    }

    pub fn tracker(&self) -> &ObjectTracker {
        &self.tracker
    }

    pub fn cycles(&self) -> u64 {
        self.cycle
    }

    /// Cycle until `shutdown` is raised, then send a final STOP.  Returns the
    /// number of completed cycles.
    pub async fn run(mut self, shutdown: Arc<AtomicBool>) -> u64 {
        info!(
            cadence_ms = self.config.cadence_ms,
            sensors = self.detectors.len(),
            autonomous = self.autonomous,
            "fusion loop started"
        );
        while !shutdown.load(Ordering::Acquire) {
            let started = Instant::now();
            self.run_cycle().await;
            tokio::time::sleep(self.config.sleep_after(started.elapsed())).await;
        }

        if self.hardware.actuator_connected() {
            match self.send_to_actuator(MotorCommand::stop()).await {
                Ok(()) => info!("final stop sent"),
                Err(e) => warn!(error = %e, "final stop failed"),
            }
        }
        info!(cycles = self.cycle, "fusion loop stopped");
        self.cycle
    }

    /// Run exactly one cycle and return the published snapshot.
    pub async fn run_cycle(&mut self) -> Snapshot {
        self.cycle += 1;
        let span = info_span!("fusion_cycle", cycle = self.cycle);
        self.cycle_inner().instrument(span).await
    }

    async fn cycle_inner(&mut self) -> Snapshot {
        let started = Instant::now();

        // ── 1. Commands ──────────────────────────────────────────────────────
        while let Ok(command) = self.commands_rx.try_recv() {
            self.apply_command(command).await;
        }

        // ── 2. Read ──────────────────────────────────────────────────────────
        let (frames, tripped) = self.read_sensors().await;

        // ── 3. Detect ────────────────────────────────────────────────────────
        let mut reports: Vec<ObstacleReport> = Vec::with_capacity(frames.len());
        for (id, role, frame) in &frames {
            let detector = self
                .detectors
                .entry(id.clone())
                .or_insert_with(|| SectorDetector::new(SectorConfig::for_role(*role)));
            reports.push(detector.analyze(id, *role, &frame.depth));
        }

        // ── 4. Track ─────────────────────────────────────────────────────────
        let mut detections: Vec<Detection> = Vec::new();
        for (id, role, frame) in &frames {
            if self.is_tracking_sensor(id, *role) {
                detections.extend(self.detection_source.detect(id, frame));
            }
        }
        let tracked_objects = self.tracker.update(&detections);

        // ── 5. Decide ────────────────────────────────────────────────────────
        let mut decision = self.navigator.decide(&reports);
        if !tripped.is_empty() {
            decision = self.safe_stop(decision);
            let message = format!("safe stop: repeated read failures on {}", tripped.join(", "));
            warn!(sensors = ?tripped, "{message}");
            self.bus.publish_alert(SOURCE, "watchdog", message);
        }

        // ── 6. Act ───────────────────────────────────────────────────────────
        let command = if !tripped.is_empty() {
            Some(MotorCommand::stop())
        } else if self.autonomous {
            Some(MotorCommand::from(&decision))
        } else {
            self.pending_manual.take()
        };
        if let Some(command) = command {
            if let Err(e) = self.send_to_actuator(command).await {
                debug!(error = %e, ?command, "command not applied");
            }
        }

        // ── 7. Publish ───────────────────────────────────────────────────────
        let snapshot = Snapshot {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            cycle: self.cycle,
            cycle_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            obstacle_reports: reports
                .into_iter()
                .map(|r| (r.sensor.clone(), r))
                .collect::<BTreeMap<_, _>>(),
            tracked_objects,
            navigation_decision: decision,
            mode: ModeFlags {
                autonomous: self.autonomous,
                actuator_connected: self.hardware.actuator_connected(),
                robot_moving: self.robot_moving,
            },
        };
        let receivers = self.bus.publish_snapshot(SOURCE, snapshot.clone());
        debug!(
            receivers,
            direction = ?snapshot.navigation_decision.direction,
            tracks = snapshot.tracked_objects.len(),
            cycle_time_ms = snapshot.cycle_time_ms,
            "cycle complete"
        );
        snapshot
    }

    // ── helpers ──────────────────────────────────────────────────────────────

    /// Read every sensor concurrently.  Returns the frames that arrived and
    /// the sensors whose failure streak just tripped the watchdog.
    async fn read_sensors(&mut self) -> (Vec<(SensorId, SensorRole, SensorFrame)>, Vec<SensorId>) {
        let timeout = Duration::from_millis(self.config.read_timeout_ms);
        let reads = self.hardware.sensors_mut().iter_mut().map(|sensor| async move {
            let id = sensor.id().clone();
            let role = sensor.role();
            let outcome = match tokio::time::timeout(timeout, sensor.read_frame()).await {
                Ok(Ok(Some(frame))) => Ok(frame),
                Ok(Ok(None)) => Err(OmniError::SensorUnavailable {
                    sensor: id.clone(),
                    reason: "no frame".to_string(),
                }),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(OmniError::SensorUnavailable {
                    sensor: id.clone(),
                    reason: format!("read timed out after {timeout:?}"),
                }),
            };
            (id, role, outcome)
        });

        let mut frames = Vec::new();
        let mut tripped = Vec::new();
        for (id, role, outcome) in join_all(reads).await {
            match outcome {
                Ok(frame) => {
                    self.watchdog.record_success(&id);
                    frames.push((id, role, frame));
                }
                Err(e) => {
                    if self.watchdog.record_failure(&id) {
                        tripped.push(id);
                    } else {
                        let streak = self.watchdog.failures(&id);
                        debug!(sensor = %id, error = %e, streak, "sensor read failed");
                    }
                }
            }
        }
        (frames, tripped)
    }

    fn is_tracking_sensor(&self, id: &SensorId, role: SensorRole) -> bool {
        if self.config.tracking_sensors.is_empty() {
            role == SensorRole::Body
        } else {
            self.config.tracking_sensors.contains(id)
        }
    }

    fn safe_stop(&self, decision: NavigationDecision) -> NavigationDecision {
        let diagnostics = match decision.diagnostics {
            Some(d) => NavDiagnostics { safe_stop: true, ..d },
            None => NavDiagnostics {
                mode: SensorMode::None,
                sensors: Vec::new(),
                state: self.navigator.state(),
                distances: SectorDistances {
                    left: SENTINEL_CLEAR_M,
                    center: SENTINEL_CLEAR_M,
                    right: SENTINEL_CLEAR_M,
                },
                free_path_counter: self.navigator.free_path_counter(),
                safe_stop: true,
            },
        };
        NavigationDecision {
            diagnostics: Some(diagnostics),
            ..NavigationDecision::stop()
        }
    }

    async fn apply_command(&mut self, command: OperatorCommand) {
        if self.gate.verify(&command).is_err() {
            return;
        }
        match command {
            OperatorCommand::SetAutonomous { enabled, speed } => {
                if let Some(speed) = speed {
                    self.navigator.set_base_speed(speed);
                }
                let was = self.autonomous;
                self.autonomous = enabled;
                self.pending_manual = None;
                info!(enabled, base_speed = self.navigator.base_speed(), "autonomous mode set");
                if was && !enabled {
                    if let Err(e) = self.send_to_actuator(MotorCommand::stop()).await {
                        debug!(error = %e, "stop on leaving autonomous mode not applied");
                    }
                }
                self.publish_mode();
            }
            OperatorCommand::SetAutonomousSpeed { speed } => {
                self.navigator.set_base_speed(speed);
                info!(speed, "autonomous base speed set");
                self.publish_mode();
            }
            OperatorCommand::Move { direction, speed } => {
                self.queue_manual(MotorCommand::Drive { direction, speed });
            }
            cmd @ OperatorCommand::MoveRaw { .. } => {
                if let Some(wheels) = cmd.raw_wheels() {
                    self.queue_manual(MotorCommand::Raw(wheels));
                }
            }
            OperatorCommand::ConnectSerial { port } => {
                let (connected, attached) = match self.hardware.actuator_mut() {
                    Some(actuator) => {
                        match actuator.connect(&port) {
                            Ok(()) => info!(%port, "actuator connected"),
                            Err(e) => {
                                warn!(%port, error = %e, "actuator connect failed");
                                self.bus.publish_alert(SOURCE, "actuator", e.to_string());
                            }
                        }
                        (actuator.is_connected(), actuator.port())
                    }
                    None => {
                        warn!(%port, "no actuator configured");
                        (false, None)
                    }
                };
                let status = EventPayload::SerialStatus {
                    connected,
                    port: attached,
                };
                self.bus.publish_status(SOURCE, status);
            }
            OperatorCommand::ListPorts => {
                let listed = self
                    .hardware
                    .actuator_mut()
                    .map_or(Ok(Vec::new()), |a| a.available_ports());
                match listed {
                    Ok(ports) => {
                        debug!(count = ports.len(), "serial ports listed");
                        self.bus.publish_status(SOURCE, EventPayload::PortsList { ports });
                    }
                    Err(e) => {
                        warn!(error = %e, "port discovery failed");
                        self.bus.publish_alert(SOURCE, "actuator", e.to_string());
                    }
                }
            }
        }
    }

    fn publish_mode(&self) {
        let status = EventPayload::AutonomousStatus {
            enabled: self.autonomous,
            speed: self.navigator.base_speed(),
        };
        self.bus.publish_status(SOURCE, status);
    }

    fn queue_manual(&mut self, command: MotorCommand) {
        if self.autonomous {
            info!(?command, "manual command ignored in autonomous mode");
        } else {
            self.pending_manual = Some(command);
        }
    }

    /// Forward one command, bounded by `actuator_timeout_ms`.
    async fn send_to_actuator(&mut self, command: MotorCommand) -> Result<(), OmniError> {
        let timeout = Duration::from_millis(self.config.actuator_timeout_ms);
        let actuator = match self.hardware.actuator_mut() {
            Some(a) if a.is_connected() => a,
            _ => return Err(OmniError::ActuatorDisconnected),
        };
        let result = match tokio::time::timeout(timeout, actuator.send(command)).await {
            Ok(r) => r,
            Err(_) => Err(OmniError::ActuatorWrite(format!("write timed out after {timeout:?}"))),
        };
        match &result {
            Ok(()) => self.robot_moving = !command.is_stop(),
            Err(e) => {
                warn!(error = %e, ?command, "actuator write failed");
                self.bus.publish_alert(SOURCE, "actuator", e.to_string());
            }
        }
        result
    }
}
