// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Closed-loop fan speed control for the Lian Li UNI HUB SL Infinity.
//!
//! [`controller::FanSpeedController`] reads the CPU temperature once per
//! tick and drives every hub port through a per-port filter, a curve plus
//! feed-forward planner, a slew limiter and a write gate. Curves are edited
//! through [`store::CurveStore`] while the loop runs. The `lianli-fand`
//! binary serves the [`protocol`] on a Unix socket; `lianli-fanctl` is its
//! command-line client.

pub mod config;
pub mod controller;
pub mod curve;
pub mod error;
pub mod filter;
pub mod hid;
pub mod planner;
pub mod protocol;
pub mod sensor;
pub mod sink;
pub mod slew;
pub mod store;
