// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Device backends that accept a duty percent per port.

use crate::config::{Backend, DaemonConfig, HUB_PORT_COUNT};
use crate::error::SinkError;
use crate::hid::{self, HidSink};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Which backend is driving the fans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Procfs,
    Hid,
    Simulated,
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SinkKind::Procfs => "procfs",
            SinkKind::Hid => "hid",
            SinkKind::Simulated => "simulated",
        })
    }
}

/// Writes fan duty to the hub. Implementations must tolerate being called
/// every control tick; failures are expected to be transient.
pub trait DeviceSink: Send {
    fn kind(&self) -> SinkKind;

    /// Set `port` (1-based) to `duty_percent` (0-100).
    fn write(&mut self, port: u8, duty_percent: u8) -> Result<(), SinkError>;
}

// ---------------------------------------------------------------------------
// Kernel driver proc files
// ---------------------------------------------------------------------------

/// Backend for the kernel driver's `<root>/Port_<n>/fan_speed` files.
#[derive(Debug, Clone)]
pub struct ProcFsSink {
    root: PathBuf,
}

impl ProcFsSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The sink if the driver's proc directory is present.
    pub fn probe(root: &Path) -> Option<Self> {
        root.is_dir().then(|| Self::new(root))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn speed_path(&self, port: u8) -> Result<PathBuf, SinkError> {
        if port == 0 || port > HUB_PORT_COUNT {
            return Err(SinkError::InvalidPort(port));
        }
        Ok(self.root.join(format!("Port_{port}")).join("fan_speed"))
    }

    /// Last duty written to `port`, as reported by the driver.
    pub fn read_duty(&self, port: u8) -> io::Result<u8> {
        let path = self
            .speed_path(port)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        let contents = fs::read_to_string(path)?;
        contents.trim().parse().map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Bad fan_speed value {:?}: {e}", contents.trim()),
            )
        })
    }
}

impl DeviceSink for ProcFsSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Procfs
    }

    fn write(&mut self, port: u8, duty_percent: u8) -> Result<(), SinkError> {
        let path = self.speed_path(port)?;
        fs::write(&path, format!("{}", duty_percent.min(100)))
            .map_err(|source| SinkError::Write { port, source })
    }
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

/// Backend that drives nothing and remembers what it was asked to do.
#[derive(Debug, Clone, Default)]
pub struct SimulatedSink {
    duties: BTreeMap<u8, u8>,
    writes: u64,
}

impl SimulatedSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_duty(&self, port: u8) -> Option<u8> {
        self.duties.get(&port).copied()
    }

    pub fn writes(&self) -> u64 {
        self.writes
    }
}

impl DeviceSink for SimulatedSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Simulated
    }

    fn write(&mut self, port: u8, duty_percent: u8) -> Result<(), SinkError> {
        if port == 0 || port > HUB_PORT_COUNT {
            return Err(SinkError::InvalidPort(port));
        }
        log::debug!("[simulated] port {port} -> {duty_percent}%");
        self.duties.insert(port, duty_percent.min(100));
        self.writes += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Backend selection
// ---------------------------------------------------------------------------

/// Open the backend named in the daemon config.
///
/// `auto` prefers the kernel driver, then raw HID, and fails with
/// [`SinkError::DeviceNotFound`] if neither is present. Simulation is
/// never chosen implicitly.
pub fn open_backend(daemon: &DaemonConfig) -> Result<Box<dyn DeviceSink>, SinkError> {
    let proc_root = Path::new(&daemon.proc_root);

    match daemon.backend {
        Backend::Simulated => {
            log::warn!("Running in SIMULATED mode: fan speeds are computed but not written");
            Ok(Box::new(SimulatedSink::new()))
        }
        Backend::Procfs => {
            let sink = ProcFsSink::probe(proc_root).ok_or(SinkError::DeviceNotFound)?;
            log::info!("Using kernel driver at {}", proc_root.display());
            Ok(Box::new(sink))
        }
        Backend::Hid => Ok(Box::new(HidSink::discover()?)),
        Backend::Auto => {
            if let Some(sink) = ProcFsSink::probe(proc_root) {
                log::info!("Using kernel driver at {}", proc_root.display());
                return Ok(Box::new(sink));
            }
            log::info!(
                "Kernel driver not loaded ({} missing), looking for the hub over hidraw",
                proc_root.display()
            );
            match hid::find_hub() {
                Some(path) => Ok(Box::new(HidSink::open(&path)?)),
                None => Err(SinkError::DeviceNotFound),
            }
        }
    }
}
