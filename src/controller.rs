// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Closed-loop fan speed controller.
//!
//! One tick reads the temperature once, then runs every port through
//! filter -> plan -> slew -> write gate -> device write, in ascending port
//! order. Ports share nothing but the reading; a fault on one port never
//! stops the others.

use crate::config::{Calibration, FanSize, HUB_PORT_COUNT, PortConfig};
use crate::curve::BuiltInProfile;
use crate::error::ControllerError;
use crate::filter::{FilterOutput, FilterState, tick_dt};
use crate::planner::{self, Plan};
use crate::sensor::TemperatureSource;
use crate::sink::{DeviceSink, SinkKind};
use crate::slew::ActuationState;
use crate::store::{CurveStore, CurveTable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Published state
// ---------------------------------------------------------------------------

/// What happened to a port on its most recent tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickOutcome {
    /// Not ticked yet, or no temperature has ever been read.
    Idle,
    /// Port is configured as not connected.
    Disconnected,
    /// Change passed the write gate and the device accepted it.
    Written,
    /// Change too small to be worth a write.
    Skipped,
    /// The device rejected the write; previous state kept.
    WriteFailed,
}

/// Observable state of one port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortStatus {
    pub port: u8,
    pub connected: bool,
    pub fan_size: FanSize,
    pub max_rpm: u32,
    /// Name of the curve used on the last tick
    pub curve: String,
    pub custom_curve: bool,
    pub filtered_temp_c: Option<f64>,
    pub heating_rate: f64,
    /// Planner output before slew limiting
    pub target_rpm: u32,
    /// Slew-limited speed computed on the last tick
    pub commanded_rpm: u32,
    /// Last duty the device accepted
    pub duty_percent: Option<u8>,
    /// Speed implied by `duty_percent`
    pub device_rpm: u32,
    /// Set while writes to this port are failing
    pub degraded: bool,
    pub write_failures: u64,
    pub last_outcome: TickOutcome,
}

/// Everything an observer needs after a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerSnapshot {
    pub mode: SinkKind,
    pub profile: BuiltInProfile,
    /// Reading used on the last tick (possibly a reused one)
    pub temperature_c: Option<f64>,
    pub sensor_available: bool,
    pub ticks: u64,
    pub ports: Vec<PortStatus>,
}

// ---------------------------------------------------------------------------
// Per-port state
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct PortControl {
    id: u8,
    connected: bool,
    fan_size: FanSize,
    max_rpm: u32,
    filter: FilterState,
    actuation: ActuationState,
    last_tick: Option<Instant>,
    last_filter: Option<FilterOutput>,
    last_plan: Option<Plan>,
    commanded_rpm: u32,
    duty_percent: Option<u8>,
    curve_name: String,
    custom_curve: bool,
    curve_fallback: bool,
    degraded: bool,
    write_failures: u64,
    last_outcome: TickOutcome,
}

impl PortControl {
    fn new(config: &PortConfig, calibration: &Calibration) -> Self {
        Self {
            id: config.id,
            connected: config.connected,
            fan_size: config.fan_size,
            max_rpm: calibration.max_rpm(config.fan_size),
            filter: FilterState::new(),
            actuation: ActuationState::default(),
            last_tick: None,
            last_filter: None,
            last_plan: None,
            commanded_rpm: 0,
            duty_percent: None,
            curve_name: String::new(),
            custom_curve: false,
            curve_fallback: false,
            degraded: false,
            write_failures: 0,
            last_outcome: TickOutcome::Idle,
        }
    }

    fn tick(
        &mut self,
        now: Instant,
        reading: Option<f64>,
        curves: &CurveTable,
        calibration: &Calibration,
        sink: &mut dyn DeviceSink,
    ) {
        if !self.connected {
            self.last_outcome = TickOutcome::Disconnected;
            return;
        }
        let Some(raw_c) = reading else {
            self.last_outcome = TickOutcome::Idle;
            return;
        };

        let dt = tick_dt(self.last_tick.map(|t| now.saturating_duration_since(t)));

        // Work on copies; state is committed once the pipeline has run.
        let mut filter = self.filter.clone();
        let filtered = filter.update(raw_c, dt);
        let (plan, curve_name, custom_curve) = self.plan(curves, filtered);
        let commanded = self.actuation.limit(plan.target_rpm, dt, filtered.filtered_c);

        self.filter = filter;
        self.last_tick = Some(now);
        self.last_filter = Some(filtered);
        self.last_plan = Some(plan);
        self.commanded_rpm = commanded;
        self.curve_name = curve_name;
        self.custom_curve = custom_curve;

        if !self
            .actuation
            .should_write(commanded, calibration.write_threshold_rpm)
        {
            self.last_outcome = TickOutcome::Skipped;
            return;
        }

        let device_rpm = calibration.device_rpm(commanded, self.max_rpm);
        let duty = calibration.duty_percent(device_rpm, self.max_rpm);

        match sink.write(self.id, duty) {
            Ok(()) => {
                log::debug!(
                    "Port {}: T={:.2}C dT/dt={:.3}C/s heating={} base={} target={} -> rpm={} ({}%)",
                    self.id,
                    filtered.filtered_c,
                    filtered.heating_rate,
                    plan.heating,
                    plan.base_rpm,
                    plan.target_rpm,
                    commanded,
                    duty
                );
                if self.degraded {
                    log::info!("Port {}: writes recovered", self.id);
                }
                self.actuation.record_write(commanded);
                self.duty_percent = Some(duty);
                self.degraded = false;
                self.last_outcome = TickOutcome::Written;
            }
            Err(e) => {
                if !self.degraded {
                    log::warn!("Port {}: {e}; marking port degraded", self.id);
                }
                self.degraded = true;
                self.write_failures += 1;
                self.last_outcome = TickOutcome::WriteFailed;
            }
        }
    }

    /// Plan on the port's curve, falling back to the profile default when
    /// the curve cannot be evaluated.
    fn plan(&mut self, curves: &CurveTable, filtered: FilterOutput) -> (Plan, String, bool) {
        let profile = curves.resolve(self.id);
        let curve = profile.curve();

        match planner::plan(&curve, filtered.filtered_c, filtered.heating_rate, self.max_rpm) {
            Ok(plan) => {
                self.curve_fallback = false;
                return (plan, curve.name.clone(), profile.is_custom());
            }
            Err(e) => {
                if !self.curve_fallback {
                    log::warn!(
                        "Port {}: curve '{}' unusable ({e}), using {} profile",
                        self.id,
                        curve.name,
                        curves.profile()
                    );
                }
                self.curve_fallback = true;
            }
        }

        let fallback = curves.profile().curve();
        match planner::plan(&fallback, filtered.filtered_c, filtered.heating_rate, self.max_rpm) {
            Ok(plan) => (plan, fallback.name.clone(), false),
            Err(e) => {
                log::error!("Port {}: profile curve unusable ({e}), running at full speed", self.id);
                let plan = Plan {
                    heating: false,
                    base_rpm: self.max_rpm,
                    feed_forward_rpm: 0,
                    boost_rpm: 0,
                    target_rpm: self.max_rpm,
                };
                (plan, fallback.name.clone(), false)
            }
        }
    }

    fn status(&self, calibration: &Calibration) -> PortStatus {
        PortStatus {
            port: self.id,
            connected: self.connected,
            fan_size: self.fan_size,
            max_rpm: self.max_rpm,
            curve: self.curve_name.clone(),
            custom_curve: self.custom_curve,
            filtered_temp_c: self.last_filter.map(|f| f.filtered_c),
            heating_rate: self.last_filter.map_or(0.0, |f| f.heating_rate),
            target_rpm: self.last_plan.map_or(0, |p| p.target_rpm),
            commanded_rpm: self.commanded_rpm,
            duty_percent: self.duty_percent,
            device_rpm: self
                .duty_percent
                .map_or(0, |d| calibration.rpm_for_duty(d, self.max_rpm)),
            degraded: self.degraded,
            write_failures: self.write_failures,
            last_outcome: self.last_outcome,
        }
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Owns all per-port control state, the temperature source and the device.
pub struct FanSpeedController {
    ports: Vec<PortControl>,
    curves: Arc<CurveStore>,
    calibration: Calibration,
    source: Box<dyn TemperatureSource>,
    sink: Box<dyn DeviceSink>,
    last_reading: Option<f64>,
    sensor_available: bool,
    ticks: u64,
}

impl FanSpeedController {
    /// Build a controller for `ports`. Fails on an empty, duplicated or
    /// out-of-range port list.
    pub fn new(
        ports: &[PortConfig],
        calibration: Calibration,
        curves: Arc<CurveStore>,
        source: Box<dyn TemperatureSource>,
        sink: Box<dyn DeviceSink>,
    ) -> Result<Self, ControllerError> {
        if ports.is_empty() {
            return Err(ControllerError::NoPorts);
        }
        let mut seen = BTreeSet::new();
        for port in ports {
            if port.id == 0 || port.id > HUB_PORT_COUNT {
                return Err(ControllerError::PortOutOfRange {
                    port: port.id,
                    max: HUB_PORT_COUNT,
                });
            }
            if !seen.insert(port.id) {
                return Err(ControllerError::DuplicatePort(port.id));
            }
        }

        let mut ports: Vec<PortControl> = ports
            .iter()
            .map(|p| PortControl::new(p, &calibration))
            .collect();
        ports.sort_by_key(|p| p.id);

        let connected = ports.iter().filter(|p| p.connected).count();
        log::info!(
            "Controlling {} port(s) ({connected} connected) via {} backend",
            ports.len(),
            sink.kind()
        );
        if sink.kind() == SinkKind::Simulated {
            log::warn!("Simulated mode: targets are computed but no fan is driven");
        }

        Ok(Self {
            ports,
            curves,
            calibration,
            source,
            sink,
            last_reading: None,
            sensor_available: true,
            ticks: 0,
        })
    }

    pub fn mode(&self) -> SinkKind {
        self.sink.kind()
    }

    pub fn curves(&self) -> &Arc<CurveStore> {
        &self.curves
    }

    /// Run one control step for every port.
    pub fn tick(&mut self, now: Instant) {
        self.ticks += 1;
        let reading = self.read_temperature();
        let curves = self.curves.snapshot();

        let Self {
            ports,
            calibration,
            sink,
            ..
        } = self;
        for port in ports.iter_mut() {
            port.tick(now, reading, &curves, calibration, sink.as_mut());
        }
    }

    /// Tick every `interval` until `stop` is set, handing each snapshot to
    /// `publish`. The flag is checked between ticks.
    pub fn run(
        &mut self,
        interval: Duration,
        stop: &AtomicBool,
        mut publish: impl FnMut(ControllerSnapshot),
    ) {
        log::info!("Fan control loop started ({interval:?} period)");
        let mut next = Instant::now();

        while !stop.load(Ordering::Relaxed) {
            self.tick(Instant::now());
            publish(self.snapshot());

            next += interval;
            let now = Instant::now();
            if next > now {
                thread::sleep(next - now);
            } else {
                // overran the period; don't try to catch up
                next = now;
            }
        }

        log::info!("Fan control loop stopped after {} tick(s)", self.ticks);
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            mode: self.sink.kind(),
            profile: self.curves.snapshot().profile(),
            temperature_c: self.last_reading,
            sensor_available: self.sensor_available,
            ticks: self.ticks,
            ports: self
                .ports
                .iter()
                .map(|p| p.status(&self.calibration))
                .collect(),
        }
    }

    /// Latest reading, or the last known one if the source has none.
    fn read_temperature(&mut self) -> Option<f64> {
        match self.source.read() {
            Some(temp) => {
                if !self.sensor_available {
                    log::info!("Temperature sensor available again ({temp:.1}C)");
                }
                self.sensor_available = true;
                self.last_reading = Some(temp);
            }
            None => {
                if self.sensor_available {
                    match self.last_reading {
                        Some(t) => log::warn!("Temperature unavailable, holding last reading {t:.1}C"),
                        None => log::warn!("Temperature unavailable and no previous reading"),
                    }
                }
                self.sensor_available = false;
            }
        }
        self.last_reading
    }
}
