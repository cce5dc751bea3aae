// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Raw HID access to the SL Infinity hub.
//!
//! Finds the hub's hidraw node by USB vendor/product id and sets fan duty
//! with a 7-byte feature report (report id 0xE0).

use crate::config::HUB_PORT_COUNT;
use crate::error::SinkError;
use crate::sink::{DeviceSink, SinkKind};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Lian Li USB vendor id.
pub const VENDOR_ID: u16 = 0x0CF2;

/// UNI HUB SL Infinity product id.
pub const PRODUCT_ID: u16 = 0xA102;

/// Report id / transaction prefix of every hub command.
pub const REPORT_ID: u8 = 0xE0;

/// Command byte for port 1's fan speed; ports 2-4 follow.
pub const FAN_SPEED_COMMAND: u8 = 0x20;

/// Length of the fan speed feature report.
pub const FAN_SPEED_REPORT_LEN: usize = 7;

const HIDRAW_CLASS_ROOT: &str = "/sys/class/hidraw";
const DEV_ROOT: &str = "/dev";

/// Parent levels searched above `hidrawN/device` for the USB ids.
const MAX_PARENT_WALK: usize = 6;

// HIDIOCSFEATURE(len) = _IOC(_IOC_WRITE | _IOC_READ, 'H', 0x06, len)
nix::ioctl_readwrite_buf!(hidiocsfeature, b'H', 0x06, u8);

/// Feature report setting `port` (1-4) to `duty` percent.
pub fn fan_speed_report(port: u8, duty: u8) -> Result<[u8; FAN_SPEED_REPORT_LEN], SinkError> {
    if port == 0 || port > HUB_PORT_COUNT {
        return Err(SinkError::InvalidPort(port));
    }
    Ok([
        REPORT_ID,
        FAN_SPEED_COMMAND + (port - 1),
        0x00,
        duty.min(100),
        0x00,
        0x00,
        0x00,
    ])
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Path of the first hidraw node belonging to the hub, if any.
pub fn find_hub() -> Option<PathBuf> {
    find_hidraw(Path::new(HIDRAW_CLASS_ROOT), Path::new(DEV_ROOT))
}

/// Scan `class_root/hidrawN/device` and its parents for the hub's USB ids
/// and return `dev_root/hidrawN` for the first match.
pub fn find_hidraw(class_root: &Path, dev_root: &Path) -> Option<PathBuf> {
    let mut nodes: Vec<String> = fs::read_dir(class_root)
        .ok()?
        .flatten()
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|n| n.starts_with("hidraw"))
        .collect();
    nodes.sort_by_key(|n| n["hidraw".len()..].parse::<u32>().unwrap_or(u32::MAX));

    nodes.into_iter().find_map(|node| {
        let mut dir = class_root.join(&node).join("device");
        for _ in 0..MAX_PARENT_WALK {
            if let (Some(vid), Some(pid)) = (
                read_hex_id(&dir.join("idVendor")),
                read_hex_id(&dir.join("idProduct")),
            ) {
                if vid == VENDOR_ID && pid == PRODUCT_ID {
                    return Some(dev_root.join(&node));
                }
            }
            dir.push("..");
        }
        None
    })
}

fn read_hex_id(path: &Path) -> Option<u16> {
    let s = fs::read_to_string(path).ok()?;
    u16::from_str_radix(s.trim(), 16).ok()
}

// ---------------------------------------------------------------------------
// Device handle
// ---------------------------------------------------------------------------

/// An open hidraw node.
#[derive(Debug)]
pub struct HidHandle {
    file: File,
}

impl HidHandle {
    pub fn open(path: &Path) -> Result<Self, SinkError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| SinkError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self { file })
    }

    /// Send a feature report. The first byte is the report id.
    pub fn send_feature_report(&self, report: &mut [u8]) -> io::Result<()> {
        // SAFETY: the fd is owned by `self.file` and stays open for the call;
        // the kernel reads at most `report.len()` bytes from the buffer.
        unsafe { hidiocsfeature(self.file.as_raw_fd(), report) }
            .map(|_| ())
            .map_err(io::Error::from)
    }
}

/// Fan speed backend over raw HID.
///
/// The handle sits behind a mutex so other users of the same hub (the
/// lighting side) can share it without interleaving reports.
#[derive(Debug, Clone)]
pub struct HidSink {
    path: PathBuf,
    handle: Arc<Mutex<HidHandle>>,
}

impl HidSink {
    pub fn open(path: &Path) -> Result<Self, SinkError> {
        let handle = HidHandle::open(path)?;
        log::info!("Opened SL Infinity hub at {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            handle: Arc::new(Mutex::new(handle)),
        })
    }

    /// Find and open the hub.
    pub fn discover() -> Result<Self, SinkError> {
        let path = find_hub().ok_or(SinkError::DeviceNotFound)?;
        Self::open(&path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The serialized handle, for sharing with other hub commands.
    pub fn shared_handle(&self) -> Arc<Mutex<HidHandle>> {
        self.handle.clone()
    }
}

impl DeviceSink for HidSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Hid
    }

    fn write(&mut self, port: u8, duty_percent: u8) -> Result<(), SinkError> {
        let mut report = fan_speed_report(port, duty_percent)?;
        let handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        handle
            .send_feature_report(&mut report)
            .map_err(|source| SinkError::Write { port, source })
    }
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

    #[test]
    fn test_fan_speed_report_layout() {
        assert_eq!(
            fan_speed_report(1, 40).unwrap(),
            [0xE0, 0x20, 0x00, 40, 0x00, 0x00, 0x00]
        );
        assert_eq!(fan_speed_report(4, 100).unwrap()[1], 0x23);
        assert_eq!(fan_speed_report(2, 250).unwrap()[3], 100);
    }

    #[test]
    fn test_fan_speed_report_rejects_bad_port() {
        assert!(matches!(fan_speed_report(0, 50), Err(SinkError::InvalidPort(0))));
        assert!(matches!(fan_speed_report(5, 50), Err(SinkError::InvalidPort(5))));
    }

    #[test]
    fn test_finds_hub_by_ids_in_parent() {
        let sys = TempDir::new().unwrap();
        // some other HID device
        write(sys.path(), "hidraw0/device/idVendor", "046d\n");
        write(sys.path(), "hidraw0/device/idProduct", "c52b\n");
        // the hub reports its ids one level above the interface
        write(sys.path(), "hidraw3/device/uevent", "");
        write(sys.path(), "hidraw3/idVendor", "0cf2\n");
        write(sys.path(), "hidraw3/idProduct", "A102\n");

        assert_eq!(
            find_hidraw(sys.path(), Path::new("/dev")),
            Some(PathBuf::from("/dev/hidraw3"))
        );
    }

    #[test]
    fn test_no_hub_found() {
        let sys = TempDir::new().unwrap();
        write(sys.path(), "hidraw0/device/idVendor", "046d\n");
        write(sys.path(), "hidraw0/device/idProduct", "c52b\n");
        assert_eq!(find_hidraw(sys.path(), Path::new("/dev")), None);
        assert_eq!(find_hidraw(Path::new("/nonexistent"), Path::new("/dev")), None);
    }

    #[test]
    fn test_open_missing_node_fails() {
        let err = HidSink::open(Path::new("/nonexistent/hidraw9")).unwrap_err();
        assert!(matches!(err, SinkError::Open { .. }));
    }
}
