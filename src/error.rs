// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Error types shared by the controller, curve store and device backends.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A curve that cannot be evaluated or accepted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CurveError {
    /// Fewer than two control points.
    #[error("curve must have at least 2 points (got {0})")]
    TooFewPoints(usize),

    /// Temperatures are not strictly increasing.
    #[error("curve temperatures must be strictly increasing (point {index})")]
    NotIncreasing { index: usize },

    /// A control point lies outside 0..=100 C.
    #[error("curve point {index} has temperature {temp_c}C outside 0-100C")]
    TemperatureOutOfRange { index: usize, temp_c: u8 },
}

/// A failure talking to the fan hub.
#[derive(Debug, Error)]
pub enum SinkError {
    /// No hub was found by any backend.
    #[error("no Lian Li SL Infinity hub found")]
    DeviceNotFound,

    /// Port number outside the hub's range.
    #[error("invalid port {0}")]
    InvalidPort(u8),

    /// A transient write failure (busy, unplugged, permission).
    #[error("write to port {port} failed: {source}")]
    Write {
        port: u8,
        #[source]
        source: io::Error,
    },

    /// The device node could not be opened.
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Configuration problems detected while building the controller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    #[error("no fan ports configured")]
    NoPorts,

    #[error("port {0} is configured more than once")]
    DuplicatePort(u8),

    #[error("port {port} is out of range (must be 1-{max})")]
    PortOutOfRange { port: u8, max: u8 },
}
