// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Slew-rate limiting and write gating for the actuated fan speed.

/// Upward slew rate in RPM/s.
pub const UP_RATE: f64 = 1500.0;
/// Downward slew rate in RPM/s.
pub const DOWN_RATE: f64 = 200.0;
/// Upward slew rate above [`HOT_THRESHOLD_C`].
pub const HOT_UP_RATE: f64 = 2000.0;
/// Downward slew rate above [`HOT_THRESHOLD_C`].
pub const HOT_DOWN_RATE: f64 = 300.0;
/// Filtered temperature above which the faster rates apply.
pub const HOT_THRESHOLD_C: f64 = 65.0;

/// Slew rates in RPM/s for a given filtered temperature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlewRates {
    pub up: f64,
    pub down: f64,
}

impl SlewRates {
    pub fn for_temperature(filtered_c: f64) -> Self {
        if filtered_c > HOT_THRESHOLD_C {
            Self {
                up: HOT_UP_RATE,
                down: HOT_DOWN_RATE,
            }
        } else {
            Self {
                up: UP_RATE,
                down: DOWN_RATE,
            }
        }
    }
}

/// Largest change allowed in one tick, at least 1 RPM.
pub fn max_step(rate: f64, dt_s: f64) -> u32 {
    ((rate * dt_s).round().max(0.0) as u32).max(1)
}

/// Actuation memory for one port.
///
/// `last_commanded_rpm` is the speed last accepted by the device; it starts
/// at 0 and only moves when a write succeeds. `written` stays false until
/// the first successful write, so a port commanded to 0 RPM is not a cold
/// start forever.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActuationState {
    pub last_commanded_rpm: u32,
    pub written: bool,
}

impl ActuationState {
    /// Step from the last commanded speed towards `target_rpm`.
    pub fn limit(&self, target_rpm: u32, dt_s: f64, filtered_c: f64) -> u32 {
        let last = self.last_commanded_rpm;
        let rates = SlewRates::for_temperature(filtered_c);

        if target_rpm > last {
            target_rpm.min(last.saturating_add(max_step(rates.up, dt_s)))
        } else if target_rpm < last {
            target_rpm.max(last.saturating_sub(max_step(rates.down, dt_s)))
        } else {
            last
        }
    }

    /// Whether `commanded_rpm` differs enough from the last commanded speed
    /// to be worth a device write. A port that was never driven always writes.
    pub fn should_write(&self, commanded_rpm: u32, threshold_rpm: u32) -> bool {
        !self.written || commanded_rpm.abs_diff(self.last_commanded_rpm) >= threshold_rpm
    }

    /// Record a speed the device accepted.
    pub fn record_write(&mut self, commanded_rpm: u32) {
        self.last_commanded_rpm = commanded_rpm;
        self.written = true;
    }
}
