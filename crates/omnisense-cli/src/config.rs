//! Configuration vault – reads/writes `~/.omnisense/config.toml`.
//!
//! Every section and field is optional; anything missing takes its default.

use std::fs;
use std::path::{Path, PathBuf};

use omnisense_hal::classify_device;
use omnisense_hal::serial::DEFAULT_BAUD_RATE;
use omnisense_middleware::ws_bridge::DEFAULT_PORT;
use omnisense_perception::{SectorConfig, SegmentationConfig, TrackerConfig};
use omnisense_runtime::{LoggingConfig, LoopConfig, NavigatorConfig};
use omnisense_types::{OmniError, SensorId, SensorRole};
use serde::{Deserialize, Serialize};

/// Persisted operator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "loop")]
    pub fusion: LoopConfig,
    pub navigator: NavigatorConfig,
    pub tracker: TrackerConfig,
    pub segmentation: SegmentationConfig,
    pub actuator: ActuatorConfig,
    pub bridge: BridgeConfig,
    pub logging: LoggingConfig,
    pub sensors: Vec<SensorConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fusion: LoopConfig::default(),
            navigator: NavigatorConfig::default(),
            tracker: TrackerConfig::default(),
            segmentation: SegmentationConfig::default(),
            actuator: ActuatorConfig::default(),
            bridge: BridgeConfig::default(),
            logging: LoggingConfig::default(),
            sensors: vec![
                SensorConfig::sim("floor", SensorRole::Floor),
                SensorConfig::sim("body", SensorRole::Body),
            ],
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorDriver {
    /// Synthetic scene rendered in-process.
    #[default]
    Sim,
}

/// Background distances of a simulated sensor's scene.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub left_m: f32,
    pub center_m: f32,
    pub right_m: f32,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            left_m: 5.0,
            center_m: 5.0,
            right_m: 5.0,
        }
    }
}

/// One `[[sensors]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    pub id: SensorId,
    /// Explicit mounting role.  When absent the role is derived from `device`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<SensorRole>,
    /// Device name or product line reported by discovery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default)]
    pub driver: SensorDriver,
    /// Detector geometry; the role preset applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detector: Option<SectorConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene: Option<SceneConfig>,
}

impl SensorConfig {
    pub fn sim(id: &str, role: SensorRole) -> Self {
        Self {
            id: id.to_string(),
            role: Some(role),
            device: None,
            driver: SensorDriver::Sim,
            detector: None,
            scene: None,
        }
    }

    /// Mounting role, explicit or classified from the device identity.
    pub fn resolved_role(&self) -> Result<SensorRole, OmniError> {
        if let Some(role) = self.role {
            return Ok(role);
        }
        self.device
            .as_deref()
            .and_then(|device| classify_device(device, device))
            .ok_or_else(|| {
                OmniError::Config(format!(
                    "sensor '{}' needs a role or a recognised device",
                    self.id
                ))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorDriver {
    /// Text-line protocol over a character device.
    Serial,
    /// In-process recorder.
    #[default]
    Sim,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorConfig {
    pub driver: ActuatorDriver,
    /// Device node connected at startup; `/connect` can attach one later.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    /// Line speed of the serial controller.
    pub baud_rate: u32,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            driver: ActuatorDriver::default(),
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: DEFAULT_PORT,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Load / save
// ─────────────────────────────────────────────────────────────────────────────

/// Return the path to `~/.omnisense/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".omnisense").join("config.toml")
}

/// Load `~/.omnisense/config.toml`, or build one with `fallback` when the
/// file does not exist, then apply environment overrides to the result.
///
/// `fallback` sees the configuration before any override, so a wizard that
/// saves what it builds never persists environment values.
pub fn load_or_else(fallback: impl FnOnce() -> Config) -> Result<Config, OmniError> {
    load_or_else_from(&config_path(), fallback)
}

pub(crate) fn load_or_else_from(
    path: &Path,
    fallback: impl FnOnce() -> Config,
) -> Result<Config, OmniError> {
    let mut cfg = match load_from(path)? {
        Some(cfg) => cfg,
        None => fallback(),
    };
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, OmniError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| OmniError::Config(format!("failed to read {}: {e}", path.display())))?;
    toml::from_str(&raw)
        .map(Some)
        .map_err(|e| OmniError::Config(format!("failed to parse config: {e}")))
}

/// Apply `OMNISENSE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `OMNISENSE_BASE_SPEED` | `navigator.base_speed` |
/// | `OMNISENSE_SERIAL_PORT` | `actuator.port` (switches to the serial driver) |
/// | `OMNISENSE_BRIDGE_PORT` | `bridge.port` |
/// | `OMNISENSE_CADENCE_MS` | `loop.cadence_ms` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("OMNISENSE_BASE_SPEED")
        && let Ok(speed) = v.parse::<u32>()
    {
        cfg.navigator.base_speed = speed;
    }
    if let Ok(v) = std::env::var("OMNISENSE_SERIAL_PORT")
        && !v.trim().is_empty()
    {
        cfg.actuator.driver = ActuatorDriver::Serial;
        cfg.actuator.port = Some(v);
    }
    if let Ok(v) = std::env::var("OMNISENSE_BRIDGE_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.bridge.port = port;
    }
    if let Ok(v) = std::env::var("OMNISENSE_CADENCE_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.fusion.cadence_ms = ms;
    }
}

/// Save the config to disk, creating `~/.omnisense/` if necessary.
pub fn save(cfg: &Config) -> Result<(), OmniError> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), OmniError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| OmniError::Config(format!("failed to create config directory: {e}")))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(|e| {
                OmniError::Config(format!("failed to set config directory permissions: {e}"))
            })?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| OmniError::Serialization(format!("failed to serialize config: {e}")))?;
    let write_err =
        |e: std::io::Error| OmniError::Config(format!("failed to write {}: {e}", path.display()));
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use omnisense_runtime::LogFormat;

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        save_to(&Config::default(), &path).expect("save");

        let file_mode =
            std::fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .expect("dir metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        let cfg = Config::default();
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.fusion.cadence_ms, 100);
        assert_eq!(loaded.bridge.port, DEFAULT_PORT);
        assert_eq!(loaded.sensors.len(), 2);
        assert_eq!(loaded.sensors[0].role, Some(SensorRole::Floor));
        assert_eq!(loaded.actuator.driver, ActuatorDriver::Sim);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[loop]
cadence_ms = 200

[navigator]
base_speed = 140

[logging]
format = "json"

[[sensors]]
id = "front"
device = "Intel RealSense D435"

[sensors.detector]
safe_distance_m = 1.2
"#,
        )
        .unwrap();

        let cfg = load_from(&path).unwrap().unwrap();
        assert_eq!(cfg.fusion.cadence_ms, 200);
        assert_eq!(cfg.fusion.min_sleep_ms, 50);
        assert_eq!(cfg.navigator.base_speed, 140);
        assert_eq!(cfg.navigator.rotation_steps, 3);
        assert_eq!(cfg.logging.format, LogFormat::Json);
        assert_eq!(cfg.actuator.baud_rate, 9600);
        assert_eq!(cfg.sensors.len(), 1);

        let front = &cfg.sensors[0];
        assert_eq!(front.resolved_role().unwrap(), SensorRole::Body);
        let detector = front.detector.unwrap();
        assert_eq!(detector.safe_distance_m, 1.2);
        assert_eq!(detector.min_samples, SectorConfig::default().min_samples);
    }

    #[test]
    fn unknown_device_without_role_is_a_config_error() {
        let sensor = SensorConfig {
            device: Some("webcam".to_string()),
            role: None,
            ..SensorConfig::sim("x", SensorRole::Floor)
        };
        assert!(matches!(sensor.resolved_role(), Err(OmniError::Config(_))));
    }

    #[test]
    fn config_path_points_to_omnisense_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".omnisense"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[loop\ncadence_ms = ").unwrap();
        assert!(matches!(load_from(&path), Err(OmniError::Config(_))));
    }

    // Each override test uses its own variable, so they can run in parallel.

    #[test]
    fn apply_env_overrides_changes_base_speed() {
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("OMNISENSE_BASE_SPEED", "180") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.navigator.base_speed, 180);
        unsafe { std::env::remove_var("OMNISENSE_BASE_SPEED") };
    }

    #[test]
    fn serial_port_override_applies_without_a_config_file() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("OMNISENSE_SERIAL_PORT", "/dev/ttyUSB0") };
        let mut fallback_saw = None;
        let cfg = load_or_else_from(&path, || {
            let cfg = Config::default();
            fallback_saw = Some(cfg.actuator.clone());
            cfg
        })
        .expect("load");
        unsafe { std::env::remove_var("OMNISENSE_SERIAL_PORT") };

        assert_eq!(cfg.actuator.driver, ActuatorDriver::Serial);
        assert_eq!(cfg.actuator.port.as_deref(), Some("/dev/ttyUSB0"));
        // The fallback itself is built before overrides.
        assert_eq!(fallback_saw, Some(ActuatorConfig::default()));
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_port() {
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("OMNISENSE_BRIDGE_PORT", "not-a-port") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.bridge.port, DEFAULT_PORT);
        unsafe { std::env::remove_var("OMNISENSE_BRIDGE_PORT") };
    }

    #[test]
    fn cadence_override_applies_over_a_config_file() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[loop]\ncadence_ms = 120\n").unwrap();
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("OMNISENSE_CADENCE_MS", "250") };
        let cfg = load_or_else_from(&path, || panic!("file exists")).expect("load");
        unsafe { std::env::remove_var("OMNISENSE_CADENCE_MS") };
        assert_eq!(cfg.fusion.cadence_ms, 250);
    }
}
