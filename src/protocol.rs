// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Client-daemon protocol over Unix domain sockets.
//!
//! Messages are newline-delimited JSON. The client sends a [`Request`]
//! and the daemon replies with a [`Response`].

use crate::controller::ControllerSnapshot;
use crate::curve::{BuiltInProfile, CurvePoint, FanCurve};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Requests (client -> daemon)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Latest controller snapshot.
    #[serde(rename = "get_status")]
    GetStatus,

    /// Select the built-in profile used by ports without a custom curve.
    #[serde(rename = "set_profile")]
    SetProfile { profile: BuiltInProfile },

    /// Curve currently in effect on a port.
    #[serde(rename = "get_curve")]
    GetCurve { port: u8 },

    /// Install a custom curve on a port.
    #[serde(rename = "set_curve")]
    SetCurve { port: u8, points: Vec<CurvePoint> },

    /// Return a port to the selected profile.
    #[serde(rename = "clear_curve")]
    ClearCurve { port: u8 },

    /// Copy a port's curve to every configured port.
    #[serde(rename = "apply_to_all")]
    ApplyToAll { port: u8 },

    /// Drop all custom curves.
    #[serde(rename = "reset_curves")]
    ResetCurves,

    /// Save current configuration to disk.
    #[serde(rename = "save_config")]
    SaveConfig,

    /// Reload configuration from disk.
    #[serde(rename = "reload_config")]
    ReloadConfig,
}

// ---------------------------------------------------------------------------
// Responses (daemon -> client)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    /// Controller state after the most recent tick.
    #[serde(rename = "status")]
    Status { status: ControllerSnapshot },

    /// A port's effective curve.
    #[serde(rename = "curve")]
    Curve {
        port: u8,
        custom: bool,
        curve: FanCurve,
    },

    /// Operation succeeded.
    #[serde(rename = "ok")]
    Ok { message: String },

    /// Operation failed.
    #[serde(rename = "error")]
    Error { message: String },
}

// ---------------------------------------------------------------------------
// Serialization helpers
// ---------------------------------------------------------------------------

/// Encode a message as a newline-delimited JSON string.
pub fn encode<T: Serialize>(msg: &T) -> Result<String, serde_json::Error> {
    let mut s = serde_json::to_string(msg)?;
    s.push('\n');
    Ok(s)
}

/// Decode a message from a JSON string (newline-trimmed).
pub fn decode<'a, T: Deserialize<'a>>(s: &'a str) -> Result<T, serde_json::Error> {
    serde_json::from_str(s.trim())
}
