// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Fan curve definitions and interpolation.
//!
//! A curve maps a temperature reading to a target fan speed in RPM.
//! Points are linearly interpolated; temperatures outside the recorded
//! domain clamp to the nearest endpoint.

use crate::error::CurveError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

/// Lowest temperature a curve is evaluated at.
pub const CURVE_MIN_TEMP_C: u8 = 0;

/// Highest temperature a curve is evaluated at.
pub const CURVE_MAX_TEMP_C: u8 = 100;

/// A single point on a fan curve.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CurvePoint {
    /// Temperature in degrees Celsius (0-100)
    pub temp_c: u8,
    /// Target fan speed in RPM
    pub rpm: u32,
}

impl CurvePoint {
    pub const fn new(temp_c: u8, rpm: u32) -> Self {
        Self { temp_c, rpm }
    }
}

/// A named fan curve with an ordered list of temperature-to-RPM points.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FanCurve {
    /// Display name for this curve
    pub name: String,
    /// Points sorted by ascending temperature.
    /// Must have at least 2 points.
    pub points: Vec<CurvePoint>,
}

impl FanCurve {
    /// Create a new fan curve. Points are sorted by temperature automatically.
    pub fn new(name: impl Into<String>, mut points: Vec<CurvePoint>) -> Self {
        points.sort_by_key(|p| p.temp_c);
        Self {
            name: name.into(),
            points,
        }
    }

    /// Target RPM for a temperature.
    ///
    /// The temperature is clamped to 0-100C first. Below the first point the
    /// first point's RPM is returned, above the last point the last point's
    /// RPM; in between the bracketing pair is linearly interpolated.
    ///
    /// Fails only when the curve has fewer than two points.
    pub fn evaluate(&self, temp_c: f64) -> Result<u32, CurveError> {
        if self.points.len() < 2 {
            return Err(CurveError::TooFewPoints(self.points.len()));
        }

        let temp_c = if temp_c.is_nan() {
            f64::from(CURVE_MIN_TEMP_C)
        } else {
            temp_c.clamp(f64::from(CURVE_MIN_TEMP_C), f64::from(CURVE_MAX_TEMP_C))
        };

        let first = self.points[0];
        let last = self.points[self.points.len() - 1];
        if temp_c <= f64::from(first.temp_c) {
            return Ok(first.rpm);
        }
        if temp_c >= f64::from(last.temp_c) {
            return Ok(last.rpm);
        }

        for window in self.points.windows(2) {
            let lo = window[0];
            let hi = window[1];
            let (lo_t, hi_t) = (f64::from(lo.temp_c), f64::from(hi.temp_c));

            if temp_c >= lo_t && temp_c <= hi_t {
                let span = hi_t - lo_t;
                if span == 0.0 {
                    return Ok(lo.rpm);
                }
                let frac = (temp_c - lo_t) / span;
                let rpm = f64::from(lo.rpm) + frac * (f64::from(hi.rpm) - f64::from(lo.rpm));
                return Ok(rpm.max(0.0) as u32);
            }
        }

        Ok(last.rpm)
    }

    /// Check the curve can be installed: at least 2 points, strictly
    /// increasing temperatures, all within 0-100C.
    pub fn validate(&self) -> Result<(), CurveError> {
        if self.points.len() < 2 {
            return Err(CurveError::TooFewPoints(self.points.len()));
        }
        for (index, p) in self.points.iter().enumerate() {
            if p.temp_c > CURVE_MAX_TEMP_C {
                return Err(CurveError::TemperatureOutOfRange {
                    index,
                    temp_c: p.temp_c,
                });
            }
            if index > 0 && p.temp_c <= self.points[index - 1].temp_c {
                return Err(CurveError::NotIncreasing { index });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Built-in profiles
// ---------------------------------------------------------------------------

/// The built-in profile table shipped with the hub software.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuiltInProfile {
    #[default]
    Quiet,
    Standard,
    HighSpeed,
    FullSpeed,
}

impl BuiltInProfile {
    pub const ALL: [BuiltInProfile; 4] = [
        BuiltInProfile::Quiet,
        BuiltInProfile::Standard,
        BuiltInProfile::HighSpeed,
        BuiltInProfile::FullSpeed,
    ];

    pub fn label(self) -> &'static str {
        match self {
            BuiltInProfile::Quiet => "Quiet",
            BuiltInProfile::Standard => "Standard",
            BuiltInProfile::HighSpeed => "High Speed",
            BuiltInProfile::FullSpeed => "Full Speed",
        }
    }

    /// The profile's default curve. Shared, never mutated.
    pub fn curve(self) -> Arc<FanCurve> {
        match self {
            BuiltInProfile::Quiet => QUIET.clone(),
            BuiltInProfile::Standard => STANDARD.clone(),
            BuiltInProfile::HighSpeed => HIGH_SPEED.clone(),
            BuiltInProfile::FullSpeed => FULL_SPEED.clone(),
        }
    }
}

impl fmt::Display for BuiltInProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for BuiltInProfile {
    type Err = String;

    /// Accepts the kebab-case config name or the display label, any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace([' ', '_'], "-");
        Self::ALL
            .into_iter()
            .find(|p| p.label().to_ascii_lowercase().replace(' ', "-") == wanted)
            .ok_or_else(|| {
                format!("unknown profile '{s}' (expected quiet, standard, high-speed or full-speed)")
            })
    }
}

fn builtin(name: &str, points: &[(u8, u32)]) -> Arc<FanCurve> {
    Arc::new(FanCurve::new(
        name,
        points.iter().map(|&(t, r)| CurvePoint::new(t, r)).collect(),
    ))
}

static QUIET: LazyLock<Arc<FanCurve>> = LazyLock::new(|| {
    builtin(
        "Quiet",
        &[(0, 120), (25, 420), (45, 840), (65, 1050), (80, 1680), (90, 2100), (100, 2100)],
    )
});

static STANDARD: LazyLock<Arc<FanCurve>> = LazyLock::new(|| {
    builtin(
        "Standard",
        &[(0, 120), (25, 420), (40, 1050), (55, 1260), (70, 1680), (90, 2100), (100, 2100)],
    )
});

static HIGH_SPEED: LazyLock<Arc<FanCurve>> = LazyLock::new(|| {
    builtin(
        "High Speed",
        &[(0, 120), (25, 910), (35, 1140), (50, 1470), (70, 1800), (85, 2100), (100, 2100)],
    )
});

static FULL_SPEED: LazyLock<Arc<FanCurve>> = LazyLock::new(|| {
    builtin(
        "Full Speed",
        &[(0, 120), (25, 2100), (40, 2100), (55, 2100), (70, 2100), (90, 2100), (100, 2100)],
    )
});

/// How a port's curve is chosen: a built-in profile or an operator curve.
#[derive(Debug, Clone, PartialEq)]
pub enum Profile {
    BuiltIn(BuiltInProfile),
    Custom(Arc<FanCurve>),
}

impl Profile {
    pub fn curve(&self) -> Arc<FanCurve> {
        match self {
            Profile::BuiltIn(id) => id.curve(),
            Profile::Custom(curve) => curve.clone(),
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, Profile::Custom(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_point(lo: (u8, u32), hi: (u8, u32)) -> FanCurve {
        FanCurve::new(
            "test",
            vec![CurvePoint::new(lo.0, lo.1), CurvePoint::new(hi.0, hi.1)],
        )
    }

    #[test]
    fn test_quiet_reproduces_control_points() {
        let curve = BuiltInProfile::Quiet.curve();
        for p in &curve.points {
            assert_eq!(curve.evaluate(f64::from(p.temp_c)).unwrap(), p.rpm);
        }
        assert_eq!(curve.evaluate(45.0).unwrap(), 840);
    }

    #[test]
    fn test_every_builtin_reproduces_its_points() {
        for profile in BuiltInProfile::ALL {
            let curve = profile.curve();
            assert!(curve.validate().is_ok(), "{profile} invalid");
            for p in &curve.points {
                assert_eq!(curve.evaluate(f64::from(p.temp_c)).unwrap(), p.rpm);
            }
        }
    }

    #[test]
    fn test_interpolation_midpoint() {
        let curve = two_point((0, 0), (100, 2000));
        assert_eq!(curve.evaluate(50.0).unwrap(), 1000);
        // Quiet between 65C (1050) and 80C (1680)
        assert_eq!(BuiltInProfile::Quiet.curve().evaluate(70.0).unwrap(), 1260);
    }

    #[test]
    fn test_clamps_outside_recorded_domain() {
        let curve = two_point((30, 500), (70, 1500));
        assert_eq!(curve.evaluate(10.0).unwrap(), 500);
        assert_eq!(curve.evaluate(95.0).unwrap(), 1500);
        assert_eq!(curve.evaluate(-40.0).unwrap(), 500);
        assert_eq!(curve.evaluate(250.0).unwrap(), 1500);
        assert_eq!(curve.evaluate(f64::NAN).unwrap(), 500);
    }

    #[test]
    fn test_monotonic_on_non_decreasing_curve() {
        let curve = BuiltInProfile::HighSpeed.curve();
        let mut prev = 0;
        for tenth in 0..=1000 {
            let rpm = curve.evaluate(f64::from(tenth) / 10.0).unwrap();
            assert!(rpm >= prev, "dropped at {}C", f64::from(tenth) / 10.0);
            prev = rpm;
        }
    }

    #[test]
    fn test_descending_segment_interpolates() {
        let curve = FanCurve::new(
            "dip",
            vec![
                CurvePoint::new(0, 1000),
                CurvePoint::new(50, 500),
                CurvePoint::new(100, 1500),
            ],
        );
        assert_eq!(curve.evaluate(25.0).unwrap(), 750);
        assert_eq!(curve.evaluate(75.0).unwrap(), 1000);
    }

    #[test]
    fn test_too_few_points_is_an_error() {
        let curve = FanCurve::new("bad", vec![CurvePoint::new(50, 800)]);
        assert_eq!(curve.evaluate(50.0), Err(CurveError::TooFewPoints(1)));
        assert_eq!(curve.validate(), Err(CurveError::TooFewPoints(1)));
    }

    #[test]
    fn test_validation_rejects_duplicates_and_range() {
        let dup = FanCurve::new(
            "dup",
            vec![CurvePoint::new(40, 800), CurvePoint::new(40, 900)],
        );
        assert_eq!(dup.validate(), Err(CurveError::NotIncreasing { index: 1 }));

        let hot = two_point((20, 400), (120, 2100));
        assert_eq!(
            hot.validate(),
            Err(CurveError::TemperatureOutOfRange {
                index: 1,
                temp_c: 120
            })
        );
    }

    #[test]
    fn test_new_sorts_points() {
        let curve = FanCurve::new(
            "unsorted",
            vec![CurvePoint::new(80, 2000), CurvePoint::new(20, 400)],
        );
        assert_eq!(curve.points[0].temp_c, 20);
        assert!(curve.validate().is_ok());
    }

    #[test]
    fn test_profile_names_parse() {
        assert_eq!("quiet".parse::<BuiltInProfile>(), Ok(BuiltInProfile::Quiet));
        assert_eq!("High Speed".parse::<BuiltInProfile>(), Ok(BuiltInProfile::HighSpeed));
        assert_eq!("full-speed".parse::<BuiltInProfile>(), Ok(BuiltInProfile::FullSpeed));
        assert_eq!("full_speed".parse::<BuiltInProfile>(), Ok(BuiltInProfile::FullSpeed));
        assert!("turbo".parse::<BuiltInProfile>().is_err());
    }

    #[test]
    fn test_profile_resolves_curve() {
        let custom = Arc::new(two_point((0, 300), (100, 900)));
        assert!(Profile::Custom(custom.clone()).is_custom());
        assert_eq!(Profile::Custom(custom.clone()).curve(), custom);
        assert_eq!(
            Profile::BuiltIn(BuiltInProfile::Standard).curve().name,
            "Standard"
        );
    }
}
