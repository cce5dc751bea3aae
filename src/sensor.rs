// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! CPU temperature sources.
//!
//! The system source tries, in order, the `sensors` tool, the hwmon sysfs
//! tree and the thermal zones; the first method that yields a reading wins.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const HWMON_ROOT: &str = "/sys/class/hwmon";
const THERMAL_ROOT: &str = "/sys/class/thermal";

/// hwmon driver names that report CPU temperatures.
const CPU_HWMON_NAMES: [&str; 5] = ["coretemp", "k10temp", "zenpower", "asus", "acpi"];

/// hwmon readings at or above this are treated as bogus.
const MAX_PLAUSIBLE_C: f64 = 200.0;

/// How often a running `sensors` child is polled for exit.
const CHILD_POLL: Duration = Duration::from_millis(10);

/// Anything that can report the current temperature in C.
///
/// `None` means no reading this time; the controller keeps the last one.
pub trait TemperatureSource: Send {
    fn read(&mut self) -> Option<f64>;
}

/// Reads the CPU temperature from the running system.
#[derive(Debug, Clone)]
pub struct SystemTemperatureSource {
    sensors_chip: Option<String>,
    timeout: Duration,
    hwmon_root: PathBuf,
    thermal_root: PathBuf,
}

impl SystemTemperatureSource {
    /// `sensors_chip` of `None` skips the `sensors` tool. `timeout` bounds
    /// the tool's runtime.
    pub fn new(sensors_chip: Option<String>, timeout: Duration) -> Self {
        Self {
            sensors_chip,
            timeout,
            hwmon_root: PathBuf::from(HWMON_ROOT),
            thermal_root: PathBuf::from(THERMAL_ROOT),
        }
    }

    /// Read sysfs from other roots.
    pub fn with_roots(mut self, hwmon_root: impl Into<PathBuf>, thermal_root: impl Into<PathBuf>) -> Self {
        self.hwmon_root = hwmon_root.into();
        self.thermal_root = thermal_root.into();
        self
    }

    fn read_sensors_tool(&self) -> Option<f64> {
        let chip = self.sensors_chip.as_deref()?;
        let output = run_with_timeout(Command::new("sensors").arg(chip), self.timeout)?;
        parse_tctl(&output)
    }
}

impl TemperatureSource for SystemTemperatureSource {
    fn read(&mut self) -> Option<f64> {
        self.read_sensors_tool()
            .filter(|t| *t > 0.0)
            .or_else(|| read_hwmon_cpu_max(&self.hwmon_root))
            .or_else(|| read_thermal_zone_max(&self.thermal_root))
    }
}

// ---------------------------------------------------------------------------
// Sampling cadence
// ---------------------------------------------------------------------------

/// Reads `inner` at most once per `interval` and hands out the cached
/// result in between, so a slow source is not run on every control tick.
#[derive(Debug, Clone)]
pub struct SampledSource<S> {
    inner: S,
    interval: Duration,
    last_sample: Option<Instant>,
    cached: Option<f64>,
}

impl<S: TemperatureSource> SampledSource<S> {
    pub fn new(inner: S, interval: Duration) -> Self {
        Self {
            inner,
            interval,
            last_sample: None,
            cached: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn read_at(&mut self, now: Instant) -> Option<f64> {
        let due = self
            .last_sample
            .is_none_or(|t| now.saturating_duration_since(t) >= self.interval);
        if due {
            self.cached = self.inner.read();
            self.last_sample = Some(now);
        }
        self.cached
    }
}

impl<S: TemperatureSource> TemperatureSource for SampledSource<S> {
    fn read(&mut self) -> Option<f64> {
        self.read_at(Instant::now())
    }
}

// ---------------------------------------------------------------------------
// sensors tool
// ---------------------------------------------------------------------------

/// Extract the `Tctl:` reading from `sensors` output.
pub fn parse_tctl(output: &str) -> Option<f64> {
    output.lines().find_map(|line| {
        let rest = line.trim_start().strip_prefix("Tctl:")?;
        let value: String = rest
            .trim_start()
            .trim_start_matches('+')
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
            .collect();
        value.parse().ok()
    })
}

/// Run a command, returning its stdout if it exits successfully in time.
/// A child still running at the deadline is killed.
fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> Option<String> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| log::debug!("Could not run {cmd:?}: {e}"))
        .ok()?;

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                if !status.success() {
                    return None;
                }
                let mut out = String::new();
                child.stdout.take()?.read_to_string(&mut out).ok()?;
                return Some(out);
            }
            Ok(None) if Instant::now() >= deadline => {
                log::debug!("{cmd:?} timed out after {timeout:?}, killing it");
                let _ = child.kill();
                let _ = child.wait();
                return None;
            }
            Ok(None) => thread::sleep(CHILD_POLL),
            Err(e) => {
                log::debug!("Failed waiting for {cmd:?}: {e}");
                return None;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// sysfs
// ---------------------------------------------------------------------------

/// Hottest `temp*_input` of the CPU hwmon devices under `root`.
pub fn read_hwmon_cpu_max(root: &Path) -> Option<f64> {
    let mut hottest: Option<f64> = None;

    for entry in fs::read_dir(root).ok()?.flatten() {
        let hwmon_dir = entry.path();
        let name = read_trimmed(&hwmon_dir.join("name")).unwrap_or_default();
        if !CPU_HWMON_NAMES.iter().any(|n| name.contains(n)) {
            continue;
        }

        let Ok(files) = fs::read_dir(&hwmon_dir) else {
            continue;
        };
        for file in files.flatten() {
            let file_name = file.file_name().to_string_lossy().to_string();
            if !(file_name.starts_with("temp") && file_name.ends_with("_input")) {
                continue;
            }
            let Some(temp) = read_millidegrees(&file.path()) else {
                continue;
            };
            if temp > 0.0 && temp < MAX_PLAUSIBLE_C {
                hottest = Some(hottest.map_or(temp, |h| h.max(temp)));
            }
        }
    }

    hottest
}

/// Hottest `thermal_zone*/temp` under `root`.
pub fn read_thermal_zone_max(root: &Path) -> Option<f64> {
    fs::read_dir(root)
        .ok()?
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().starts_with("thermal_zone"))
        .filter_map(|e| read_millidegrees(&e.path().join("temp")))
        .filter(|t| *t > 0.0)
        .reduce(f64::max)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_millidegrees(path: &Path) -> Option<f64> {
    read_trimmed(path)
        .and_then(|s| s.parse::<i64>().ok())
        .map(|millic| millic as f64 / 1000.0)
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, contents: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn source(hwmon: &TempDir, thermal: &TempDir) -> SystemTemperatureSource {
        SystemTemperatureSource::new(None, Duration::from_millis(100))
            .with_roots(hwmon.path(), thermal.path())
    }

    #[test]
    fn test_parse_tctl() {
        let out = "k10temp-pci-00c3\nAdapter: PCI adapter\nTctl:         +45.2°C  \nTccd1:        +40.0°C\n";
        assert_eq!(parse_tctl(out), Some(45.2));
        assert_eq!(parse_tctl("Tccd1: +40.0°C"), None);
        assert_eq!(parse_tctl(""), None);
    }

    #[test]
    fn test_hwmon_takes_hottest_cpu_sensor() {
        let hwmon = TempDir::new().unwrap();
        let thermal = TempDir::new().unwrap();
        write(hwmon.path(), "hwmon0/name", "nvme\n");
        write(hwmon.path(), "hwmon0/temp1_input", "90000\n");
        write(hwmon.path(), "hwmon1/name", "k10temp\n");
        write(hwmon.path(), "hwmon1/temp1_input", "51250\n");
        write(hwmon.path(), "hwmon1/temp3_input", "48000\n");
        write(hwmon.path(), "hwmon1/temp2_label", "Tccd1\n");
        write(hwmon.path(), "hwmon2/name", "coretemp\n");
        write(hwmon.path(), "hwmon2/temp1_input", "250000\n");
        write(thermal.path(), "thermal_zone0/temp", "70000\n");

        assert_eq!(source(&hwmon, &thermal).read(), Some(51.25));
    }

    #[test]
    fn test_falls_back_to_thermal_zones() {
        let hwmon = TempDir::new().unwrap();
        let thermal = TempDir::new().unwrap();
        write(hwmon.path(), "hwmon0/name", "nvme\n");
        write(hwmon.path(), "hwmon0/temp1_input", "40000\n");
        write(thermal.path(), "thermal_zone0/temp", "38000\n");
        write(thermal.path(), "thermal_zone1/temp", "42500\n");
        write(thermal.path(), "cooling_device0/temp", "99000\n");

        assert_eq!(source(&hwmon, &thermal).read(), Some(42.5));
    }

    #[test]
    fn test_nothing_readable_is_none() {
        let hwmon = TempDir::new().unwrap();
        let thermal = TempDir::new().unwrap();
        write(thermal.path(), "thermal_zone0/temp", "garbage");
        assert_eq!(source(&hwmon, &thermal).read(), None);

        let missing = SystemTemperatureSource::new(None, Duration::from_millis(100))
            .with_roots("/nonexistent/hwmon", "/nonexistent/thermal");
        assert_eq!(missing.clone().read(), None);
    }

    #[test]
    fn test_missing_sensors_tool_falls_through() {
        let hwmon = TempDir::new().unwrap();
        let thermal = TempDir::new().unwrap();
        write(thermal.path(), "thermal_zone0/temp", "55000\n");
        let mut src = SystemTemperatureSource::new(
            Some("definitely-not-a-chip".to_string()),
            Duration::from_millis(200),
        )
        .with_roots(hwmon.path(), thermal.path());
        assert_eq!(src.read(), Some(55.0));
    }

    /// Counts reads and reports whatever it was last set to.
    struct Counting {
        reads: usize,
        value: Option<f64>,
    }

    impl TemperatureSource for Counting {
        fn read(&mut self) -> Option<f64> {
            self.reads += 1;
            self.value
        }
    }

    #[test]
    fn test_sampled_source_reuses_cached_value() {
        let mut src = SampledSource::new(
            Counting {
                reads: 0,
                value: Some(50.0),
            },
            Duration::from_millis(500),
        );
        let t0 = Instant::now();

        // 10Hz ticks for one second: sampled at 0ms and 500ms only
        for i in 0..10 {
            assert_eq!(src.read_at(t0 + Duration::from_millis(100) * i), Some(50.0));
        }
        assert_eq!(src.inner.reads, 2);

        src.inner.value = Some(61.5);
        assert_eq!(src.read_at(t0 + Duration::from_millis(950)), Some(50.0));
        assert_eq!(src.read_at(t0 + Duration::from_millis(1000)), Some(61.5));
        assert_eq!(src.inner.reads, 3);
    }

    #[test]
    fn test_sampled_source_caches_failures_too() {
        let mut src = SampledSource::new(Counting { reads: 0, value: None }, Duration::from_secs(1));
        let t0 = Instant::now();
        assert_eq!(src.read_at(t0), None);
        src.inner.value = Some(40.0);
        assert_eq!(src.read_at(t0 + Duration::from_millis(300)), None);
        assert_eq!(src.read_at(t0 + Duration::from_secs(1)), Some(40.0));
        assert_eq!(src.inner.reads, 2);
    }

    #[test]
    fn test_command_timeout_kills_child() {
        let start = Instant::now();
        let out = run_with_timeout(Command::new("sleep").arg("5"), Duration::from_millis(100));
        assert_eq!(out, None);
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
