// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Desired fan speed from the curve plus heating-rate feed-forward.
//!
//! The curve alone follows the filtered temperature, which lags real
//! spikes. While the temperature is rising the planner looks ahead along
//! the curve and adds a term proportional to the heating rate.

use crate::curve::FanCurve;
use crate::error::CurveError;

/// Heating rate above which the port counts as heating, in C/s.
pub const HEATING_THRESHOLD: f64 = 0.02;

/// How far ahead the predicted temperature looks, in seconds.
pub const LOOKAHEAD_S: f64 = 10.0;

/// Feed-forward gain in RPM per C/s.
pub const FEED_FORWARD_GAIN: f64 = 800.0;

/// Heating rate that triggers the extra boost, in C/s.
pub const FAST_HEATING_RATE: f64 = 0.3;

/// Extra RPM added while heating fast.
pub const FAST_HEATING_BOOST_RPM: u32 = 400;

/// Breakdown of one planning step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    pub heating: bool,
    /// Curve RPM (with look-ahead while heating)
    pub base_rpm: u32,
    pub feed_forward_rpm: u32,
    pub boost_rpm: u32,
    /// Sum of the above, clamped to `0..=max_rpm`
    pub target_rpm: u32,
}

/// Plan a target RPM for one port.
///
/// Fails only if the curve cannot be evaluated; the caller falls back to
/// the profile default.
pub fn plan(
    curve: &FanCurve,
    filtered_c: f64,
    heating_rate: f64,
    max_rpm: u32,
) -> Result<Plan, CurveError> {
    let heating = heating_rate > HEATING_THRESHOLD;

    let base_now = curve.evaluate(filtered_c.round())?;
    let base_rpm = if heating {
        let predicted = curve.evaluate((filtered_c + heating_rate * LOOKAHEAD_S).round())?;
        base_now.max(predicted)
    } else {
        base_now
    };

    let feed_forward_rpm = if heating {
        (heating_rate * FEED_FORWARD_GAIN).round().max(0.0) as u32
    } else {
        0
    };
    let boost_rpm = if heating && heating_rate > FAST_HEATING_RATE {
        FAST_HEATING_BOOST_RPM
    } else {
        0
    };

    let target_rpm = base_rpm
        .saturating_add(feed_forward_rpm)
        .saturating_add(boost_rpm)
        .min(max_rpm);

    Ok(Plan {
        heating,
        base_rpm,
        feed_forward_rpm,
        boost_rpm,
        target_rpm,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::{BuiltInProfile, CurvePoint};

    #[test]
    fn test_steady_state_is_curve_only() {
        let curve = BuiltInProfile::Quiet.curve();
        let p = plan(&curve, 45.2, 0.0, 2100).unwrap();
        assert!(!p.heating);
        assert_eq!(p.base_rpm, 840);
        assert_eq!(p.feed_forward_rpm, 0);
        assert_eq!(p.boost_rpm, 0);
        assert_eq!(p.target_rpm, 840);
    }

    #[test]
    fn test_small_rate_is_not_heating() {
        let curve = BuiltInProfile::Quiet.curve();
        let p = plan(&curve, 45.0, 0.02, 2100).unwrap();
        assert!(!p.heating);
        assert_eq!(p.target_rpm, 840);
    }

    #[test]
    fn test_slow_heating_uses_lookahead_and_feed_forward() {
        let curve = BuiltInProfile::Quiet.curve();
        // 45C rising at 0.25C/s: look-ahead to 47.5 -> round 48 -> 871.5 -> 871
        let p = plan(&curve, 45.0, 0.25, 2100).unwrap();
        assert!(p.heating);
        assert_eq!(p.base_rpm, 871);
        assert_eq!(p.feed_forward_rpm, 200);
        assert_eq!(p.boost_rpm, 0);
        assert_eq!(p.target_rpm, 1071);
    }

    #[test]
    fn test_fast_heating_adds_boost() {
        let curve = BuiltInProfile::Quiet.curve();
        let p = plan(&curve, 40.0, 0.5, 2100).unwrap();
        assert_eq!(p.feed_forward_rpm, 400);
        assert_eq!(p.boost_rpm, FAST_HEATING_BOOST_RPM);
        // look-ahead to 45C
        assert_eq!(p.base_rpm, 840);
        assert_eq!(p.target_rpm, 1640);
    }

    #[test]
    fn test_target_clamped_to_fan_max() {
        let curve = BuiltInProfile::Quiet.curve();
        let p = plan(&curve, 70.0, 10.0, 2100).unwrap();
        assert_eq!(p.target_rpm, 2100);
        let p = plan(&curve, 70.0, 10.0, 1600).unwrap();
        assert_eq!(p.target_rpm, 1600);
    }

    #[test]
    fn test_lookahead_never_lowers_base_on_falling_curve() {
        let curve = FanCurve::new(
            "falling",
            vec![CurvePoint::new(0, 1500), CurvePoint::new(100, 500)],
        );
        let p = plan(&curve, 50.0, 1.0, 2100).unwrap();
        assert_eq!(p.base_rpm, 1000);
    }

    #[test]
    fn test_invalid_curve_propagates() {
        let curve = FanCurve::new("empty", Vec::new());
        assert_eq!(
            plan(&curve, 50.0, 0.0, 2100),
            Err(CurveError::TooFewPoints(0))
        );
    }
}
