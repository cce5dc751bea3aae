// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Per-port temperature filter.
//!
//! Smooths the raw sensor reading with an asymmetric exponential filter
//! (fast when heating, slower when cooling) and keeps a short history of
//! filtered values to estimate the heating rate.

use std::collections::VecDeque;
use std::time::Duration;

/// Smoothing factor when the reading is at or above the filtered value.
pub const HEATING_ALPHA: f64 = 0.95;

/// Smoothing factor when the reading is below the filtered value.
pub const COOLING_ALPHA: f64 = 0.60;

/// Time span covered by the derivative history, in seconds.
pub const HISTORY_SPAN_S: f64 = 0.3;

/// Smallest tick length the filter and slew limiter will use, in seconds.
pub const MIN_DT_S: f64 = 0.1;

/// Upper bound of the reported heating rate, in C/s.
pub const MAX_HEATING_RATE: f64 = 10.0;

/// Output of one filter step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterOutput {
    /// Filtered temperature in C
    pub filtered_c: f64,
    /// Heating rate in C/s, never negative
    pub heating_rate: f64,
}

/// Filter memory for one port. Created when the controller starts.
#[derive(Debug, Clone, Default)]
pub struct FilterState {
    filtered_c: Option<f64>,
    history: VecDeque<f64>,
}

impl FilterState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filtered temperature after the last update, if any.
    pub fn filtered_c(&self) -> Option<f64> {
        self.filtered_c
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Feed one raw reading taken `dt_s` seconds after the previous one.
    ///
    /// The first reading seeds the filter directly.
    pub fn update(&mut self, raw_c: f64, dt_s: f64) -> FilterOutput {
        let dt = clamp_dt(dt_s);

        let filtered = match self.filtered_c {
            None => raw_c,
            Some(prev) => {
                let alpha = if raw_c >= prev {
                    HEATING_ALPHA
                } else {
                    COOLING_ALPHA
                };
                prev + alpha * (raw_c - prev)
            }
        };
        self.filtered_c = Some(filtered);

        let window = history_window(dt);
        self.history.push_back(filtered);
        while self.history.len() > window {
            self.history.pop_front();
        }

        let heating_rate = match (self.history.front(), self.history.back()) {
            (Some(oldest), Some(newest)) if self.history.len() >= 2 => {
                let span = (dt * (self.history.len() - 1) as f64).max(MIN_DT_S);
                ((newest - oldest) / span).clamp(0.0, MAX_HEATING_RATE)
            }
            _ => 0.0,
        };

        FilterOutput {
            filtered_c: filtered,
            heating_rate,
        }
    }
}

/// Seconds elapsed between two ticks, or the default on the first tick.
pub fn tick_dt(elapsed: Option<Duration>) -> f64 {
    clamp_dt(elapsed.map_or(MIN_DT_S, |d| d.as_secs_f64()))
}

/// Number of filtered samples kept for the derivative at a given tick length.
pub fn history_window(dt_s: f64) -> usize {
    ((HISTORY_SPAN_S / clamp_dt(dt_s)).round() as usize).max(2)
}

fn clamp_dt(dt_s: f64) -> f64 {
    if dt_s.is_finite() {
        dt_s.max(MIN_DT_S)
    } else {
        MIN_DT_S
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticks_to_settle(from: f64, to: f64) -> usize {
        let mut f = FilterState::new();
        f.update(from, 0.1);
        let tolerance = to.abs() * 0.05;
        for n in 1..100 {
            let out = f.update(to, 0.1);
            if (out.filtered_c - to).abs() <= tolerance {
                return n;
            }
        }
        panic!("filter never settled from {from} to {to}");
    }

    #[test]
    fn test_first_reading_seeds_filter() {
        let mut f = FilterState::new();
        let out = f.update(42.0, 0.1);
        assert_eq!(out.filtered_c, 42.0);
        assert_eq!(out.heating_rate, 0.0);
        assert_eq!(f.filtered_c(), Some(42.0));
    }

    #[test]
    fn test_heating_settles_faster_than_cooling() {
        let up = ticks_to_settle(20.0, 80.0);
        let down = ticks_to_settle(80.0, 20.0);
        assert_eq!(up, 1);
        assert!(up < down, "heating {up} ticks, cooling {down} ticks");
    }

    #[test]
    fn test_asymmetric_alpha() {
        let mut f = FilterState::new();
        f.update(50.0, 0.1);
        let up = f.update(60.0, 0.1);
        assert!((up.filtered_c - 59.5).abs() < 1e-9);

        let mut f = FilterState::new();
        f.update(50.0, 0.1);
        let down = f.update(40.0, 0.1);
        assert!((down.filtered_c - 44.0).abs() < 1e-9);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut f = FilterState::new();
        for i in 0..20 {
            f.update(30.0 + f64::from(i), 0.1);
        }
        assert_eq!(f.history_len(), 3);

        let mut slow = FilterState::new();
        for _ in 0..10 {
            slow.update(30.0, 1.0);
        }
        assert_eq!(slow.history_len(), 2);
    }

    #[test]
    fn test_history_window_sizes() {
        assert_eq!(history_window(0.1), 3);
        assert_eq!(history_window(0.05), 3);
        assert_eq!(history_window(0.15), 2);
        assert_eq!(history_window(2.0), 2);
    }

    #[test]
    fn test_cooling_reports_zero_rate() {
        let mut f = FilterState::new();
        f.update(70.0, 0.1);
        let out = f.update(40.0, 0.1);
        assert_eq!(out.heating_rate, 0.0);
    }

    #[test]
    fn test_rate_is_clamped() {
        let mut f = FilterState::new();
        f.update(30.0, 0.1);
        let out = f.update(70.0, 0.1);
        assert_eq!(out.heating_rate, MAX_HEATING_RATE);
    }

    #[test]
    fn test_slow_ramp_rate() {
        let mut f = FilterState::new();
        let mut out = f.update(40.0, 1.0);
        for i in 1..=10 {
            out = f.update(40.0 + f64::from(i) * 0.5, 1.0);
        }
        // Filter lags a 0.5C/s ramp by a constant offset, so the rate converges.
        assert!((out.heating_rate - 0.5).abs() < 0.01, "{}", out.heating_rate);
    }

    #[test]
    fn test_dt_is_clamped() {
        assert_eq!(tick_dt(None), MIN_DT_S);
        assert_eq!(tick_dt(Some(Duration::from_millis(5))), MIN_DT_S);
        assert_eq!(tick_dt(Some(Duration::from_millis(250))), 0.25);

        let mut f = FilterState::new();
        f.update(30.0, 0.0);
        let out = f.update(31.0, 0.0);
        // dt forced to 0.1s: (30.95 - 30.0) / 0.1
        assert!((out.heating_rate - 9.5).abs() < 1e-9);
    }
}
