// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Configuration file handling.
//!
//! Persists port wiring, the selected profile, per-port custom curves and
//! the hardware calibration to TOML.
//! Default path: `/etc/lianli-fan/config.toml`

use crate::curve::{BuiltInProfile, CurvePoint};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Default config file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/lianli-fan/config.toml";

/// Default daemon socket path.
pub const DEFAULT_SOCKET_PATH: &str = "/run/lianli-fan.sock";

/// Default control period in milliseconds.
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 100;

/// Default budget for one temperature read in milliseconds.
pub const DEFAULT_SENSOR_TIMEOUT_MS: u64 = 1000;

/// Default temperature sampling period in milliseconds.
pub const DEFAULT_SENSOR_INTERVAL_MS: u64 = 500;

/// Proc directory created by the kernel driver.
pub const DEFAULT_PROC_ROOT: &str = "/proc/Lian_li_SL_INFINITY";

/// Chip passed to the `sensors` tool.
pub const DEFAULT_SENSORS_CHIP: &str = "k10temp-pci-00c3";

/// Number of fan ports on the SL Infinity hub.
pub const HUB_PORT_COUNT: u8 = 4;

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Built-in profile used by ports without a custom curve.
    #[serde(default)]
    pub profile: BuiltInProfile,

    /// Daemon settings.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Hardware-specific speed calibration.
    #[serde(default)]
    pub calibration: Calibration,

    /// Hub ports under control.
    #[serde(default = "default_ports")]
    pub ports: Vec<PortConfig>,
}

/// Daemon-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaemonConfig {
    /// Control period, in milliseconds.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Path for the Unix domain socket.
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Time allowed for one temperature read before it counts as unavailable.
    #[serde(default = "default_sensor_timeout")]
    pub sensor_timeout_ms: u64,

    /// How often the temperature is sampled; ticks in between reuse it.
    #[serde(default = "default_sensor_interval")]
    pub sensor_interval_ms: u64,

    /// Which device backend to drive.
    #[serde(default)]
    pub backend: Backend,

    /// Root of the kernel driver's proc tree.
    #[serde(default = "default_proc_root")]
    pub proc_root: String,

    /// Chip name for the `sensors` tool. Empty disables that method.
    #[serde(default = "default_sensors_chip")]
    pub sensors_chip: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            socket_path: DEFAULT_SOCKET_PATH.to_string(),
            sensor_timeout_ms: DEFAULT_SENSOR_TIMEOUT_MS,
            sensor_interval_ms: DEFAULT_SENSOR_INTERVAL_MS,
            backend: Backend::default(),
            proc_root: DEFAULT_PROC_ROOT.to_string(),
            sensors_chip: DEFAULT_SENSORS_CHIP.to_string(),
        }
    }
}

/// Device backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Kernel driver if loaded, else raw HID, else fail.
    #[default]
    Auto,
    /// Kernel driver proc files.
    Procfs,
    /// hidraw feature reports.
    Hid,
    /// Compute targets without touching hardware.
    Simulated,
}

/// Fan frame size; bounds the reachable RPM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FanSize {
    #[default]
    #[serde(rename = "120mm")]
    Mm120,
    #[serde(rename = "140mm")]
    Mm140,
}

/// One hub port.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortConfig {
    /// Port number, 1-4.
    pub id: u8,

    /// Whether a fan array is plugged in. Unconnected ports are never driven.
    #[serde(default = "default_true")]
    pub connected: bool,

    #[serde(default)]
    pub fan_size: FanSize,

    /// Operator curve overriding the profile, as (temp_c, rpm) points.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_curve: Option<Vec<CurvePoint>>,
}

impl PortConfig {
    pub fn new(id: u8) -> Self {
        Self {
            id,
            connected: true,
            fan_size: FanSize::default(),
            custom_curve: None,
        }
    }
}

/// Empirical speed calibration of the hub and fans.
///
/// Duty percent maps linearly onto `0..=max_rpm`. Speeds strictly between
/// `idle_rpm` and `min_operating_rpm` stall the fans and are raised to
/// `min_operating_rpm`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Calibration {
    #[serde(default = "default_max_rpm_120")]
    pub max_rpm_120mm: u32,

    #[serde(default = "default_max_rpm_140")]
    pub max_rpm_140mm: u32,

    #[serde(default = "default_idle_rpm")]
    pub idle_rpm: u32,

    #[serde(default = "default_min_operating_rpm")]
    pub min_operating_rpm: u32,

    /// Smallest change in commanded RPM that triggers a device write.
    #[serde(default = "default_write_threshold")]
    pub write_threshold_rpm: u32,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            max_rpm_120mm: default_max_rpm_120(),
            max_rpm_140mm: default_max_rpm_140(),
            idle_rpm: default_idle_rpm(),
            min_operating_rpm: default_min_operating_rpm(),
            write_threshold_rpm: default_write_threshold(),
        }
    }
}

impl Calibration {
    pub fn max_rpm(&self, size: FanSize) -> u32 {
        match size {
            FanSize::Mm120 => self.max_rpm_120mm,
            FanSize::Mm140 => self.max_rpm_140mm,
        }
    }

    /// Speed actually sent to the device for a commanded speed.
    pub fn device_rpm(&self, rpm: u32, max_rpm: u32) -> u32 {
        let rpm = if rpm > self.idle_rpm && rpm < self.min_operating_rpm {
            self.min_operating_rpm
        } else {
            rpm
        };
        rpm.min(max_rpm)
    }

    /// Duty percent (0-100) for a device speed.
    pub fn duty_percent(&self, rpm: u32, max_rpm: u32) -> u8 {
        if max_rpm == 0 {
            return 0;
        }
        let pct = (f64::from(rpm) / f64::from(max_rpm) * 100.0).round();
        pct.clamp(0.0, 100.0) as u8
    }

    /// Speed represented by a duty percent.
    pub fn rpm_for_duty(&self, duty: u8, max_rpm: u32) -> u32 {
        let duty = u32::from(duty.min(100));
        (f64::from(duty) / 100.0 * f64::from(max_rpm)).round() as u32
    }
}

impl Config {
    /// Whether moving from `self` to `next` changes anything the running
    /// controller fixed at startup. Profile and curve edits apply live.
    pub fn requires_restart(&self, next: &Config) -> bool {
        let wiring = |c: &Config| -> Vec<(u8, bool, FanSize)> {
            c.ports
                .iter()
                .map(|p| (p.id, p.connected, p.fan_size))
                .collect()
        };
        wiring(self) != wiring(next)
            || self.calibration != next.calibration
            || self.daemon != next.daemon
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profile: BuiltInProfile::default(),
            daemon: DaemonConfig::default(),
            calibration: Calibration::default(),
            ports: default_ports(),
        }
    }
}

// ---------------------------------------------------------------------------
// Load / Save
// ---------------------------------------------------------------------------

/// Load config from a TOML file, or return the default if the file doesn't exist.
pub fn load_config(path: &Path) -> io::Result<Config> {
    if !path.exists() {
        log::info!("No config file at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    let contents = fs::read_to_string(path)?;
    let config = parse_config(&contents)?;

    log::info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Parse config from TOML text.
pub fn parse_config(contents: &str) -> io::Result<Config> {
    toml::from_str(contents).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Failed to parse config: {e}"),
        )
    })
}

/// Save config to a TOML file, creating parent directories if needed.
pub fn save_config(path: &Path, config: &Config) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let contents = toml::to_string_pretty(config).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Failed to serialize config: {e}"),
        )
    })?;

    fs::write(path, contents)?;
    log::info!("Saved config to {}", path.display());
    Ok(())
}

/// Resolve the config file path from CLI arg or default.
pub fn resolve_config_path(cli_path: Option<&str>) -> PathBuf {
    cli_path
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn default_ports() -> Vec<PortConfig> {
    (1..=HUB_PORT_COUNT).map(PortConfig::new).collect()
}

fn default_tick_interval() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}

fn default_socket_path() -> String {
    DEFAULT_SOCKET_PATH.to_string()
}

fn default_sensor_timeout() -> u64 {
    DEFAULT_SENSOR_TIMEOUT_MS
}

fn default_sensor_interval() -> u64 {
    DEFAULT_SENSOR_INTERVAL_MS
}

fn default_proc_root() -> String {
    DEFAULT_PROC_ROOT.to_string()
}

fn default_sensors_chip() -> String {
    DEFAULT_SENSORS_CHIP.to_string()
}

fn default_max_rpm_120() -> u32 {
    2100
}

fn default_max_rpm_140() -> u32 {
    1600
}

fn default_idle_rpm() -> u32 {
    120
}

fn default_min_operating_rpm() -> u32 {
    840
}

fn default_write_threshold() -> u32 {
    10
}

fn default_true() -> bool {
    true
}
