// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! lianli-fanctl: command-line client that talks to lianli-fand over its
//! Unix domain socket.

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use lianli_fan_control::config;
use lianli_fan_control::controller::{ControllerSnapshot, TickOutcome};
use lianli_fan_control::curve::{BuiltInProfile, CurvePoint};
use lianli_fan_control::protocol::{self, Request, Response};
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::time::Duration;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "lianli-fanctl", about = "Control the Lian Li SL Infinity fan daemon")]
struct Cli {
    /// Path to the daemon socket.
    #[arg(short, long, default_value = config::DEFAULT_SOCKET_PATH)]
    socket: String,

    /// Print raw JSON responses.
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show temperature and per-port fan state.
    Status,

    /// Select the built-in profile (quiet, standard, high-speed, full-speed).
    Profile { profile: BuiltInProfile },

    /// Show or edit a port's curve.
    #[command(subcommand)]
    Curve(CurveCommand),

    /// Copy a port's curve to every port.
    ApplyAll { port: u8 },

    /// Drop all custom curves.
    Reset,

    /// Persist profile and curves to the daemon's config file.
    Save,

    /// Re-read the daemon's config file.
    Reload,
}

#[derive(Subcommand, Debug)]
enum CurveCommand {
    /// Print the curve in effect on a port.
    Show { port: u8 },

    /// Install a custom curve, e.g. `curve set 1 30:600 60:1200 80:2100`.
    Set {
        port: u8,
        #[arg(value_parser = parse_point, num_args = 2.., required = true)]
        points: Vec<CurvePoint>,
    },

    /// Return a port to the selected profile.
    Clear { port: u8 },
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

struct Connection {
    stream: UnixStream,
    reader: BufReader<UnixStream>,
}

impl Connection {
    fn connect(path: &str) -> io::Result<Self> {
        let stream = UnixStream::connect(path)?;
        stream.set_read_timeout(Some(Duration::from_secs(2)))?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self { stream, reader })
    }

    fn send_request(&mut self, req: &Request) -> io::Result<Response> {
        let encoded = protocol::encode(req).map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("Encode error: {e}"))
        })?;
        self.stream.write_all(encoded.as_bytes())?;
        self.stream.flush()?;

        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "daemon closed the connection",
            ));
        }
        protocol::decode(&line).map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("Decode error: {e}"))
        })
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let request = match cli.command {
        Command::Status => Request::GetStatus,
        Command::Profile { profile } => Request::SetProfile { profile },
        Command::Curve(CurveCommand::Show { port }) => Request::GetCurve { port },
        Command::Curve(CurveCommand::Set { port, points }) => Request::SetCurve { port, points },
        Command::Curve(CurveCommand::Clear { port }) => Request::ClearCurve { port },
        Command::ApplyAll { port } => Request::ApplyToAll { port },
        Command::Reset => Request::ResetCurves,
        Command::Save => Request::SaveConfig,
        Command::Reload => Request::ReloadConfig,
    };

    let mut conn = Connection::connect(&cli.socket)
        .with_context(|| format!("Could not connect to daemon at {}", cli.socket))?;
    log::debug!("Connected to daemon at {}", cli.socket);
    let response = conn.send_request(&request)?;

    if cli.json {
        print!("{}", protocol::encode(&response)?);
        return Ok(());
    }

    match response {
        Response::Status { status } => print_status(&status),
        Response::Curve {
            port,
            custom,
            curve,
        } => {
            let kind = if custom { "custom" } else { "profile" };
            println!("Port {port}: {} ({kind})", curve.name);
            for p in &curve.points {
                println!("  {:>3}C  {:>5} RPM", p.temp_c, p.rpm);
            }
        }
        Response::Ok { message } => println!("{message}"),
        Response::Error { message } => bail!("{message}"),
    }
    Ok(())
}

fn print_status(status: &ControllerSnapshot) {
    let temp = match status.temperature_c {
        Some(t) if status.sensor_available => format!("{t:.1}C"),
        Some(t) => format!("{t:.1}C (stale)"),
        None => "unavailable".to_string(),
    };
    println!(
        "Mode: {}   Profile: {}   CPU: {temp}   Ticks: {}",
        status.mode, status.profile, status.ticks
    );
    println!(
        "{:<5} {:<6} {:<16} {:>7} {:>8} {:>7} {:>9} {:>5}  {}",
        "PORT", "SIZE", "CURVE", "TEMP", "RATE", "TARGET", "COMMANDED", "DUTY", "STATE"
    );

    for port in &status.ports {
        if !port.connected {
            println!("{:<5} (not connected)", port.port);
            continue;
        }
        let size = match port.fan_size {
            config::FanSize::Mm120 => "120mm",
            config::FanSize::Mm140 => "140mm",
        };
        let temp = port
            .filtered_temp_c
            .map_or_else(|| "-".to_string(), |t| format!("{t:.1}C"));
        let duty = port
            .duty_percent
            .map_or_else(|| "-".to_string(), |d| format!("{d}%"));
        let state = if port.degraded {
            format!("DEGRADED ({} failures)", port.write_failures)
        } else {
            outcome_label(port.last_outcome).to_string()
        };
        println!(
            "{:<5} {:<6} {:<16} {:>7} {:>8.3} {:>7} {:>9} {:>5}  {}",
            port.port,
            size,
            port.curve,
            temp,
            port.heating_rate,
            port.target_rpm,
            port.commanded_rpm,
            duty,
            state
        );
    }
}

fn outcome_label(outcome: TickOutcome) -> &'static str {
    match outcome {
        TickOutcome::Idle => "waiting",
        TickOutcome::Disconnected => "disconnected",
        TickOutcome::Written => "written",
        TickOutcome::Skipped => "steady",
        TickOutcome::WriteFailed => "write failed",
    }
}

/// Parse `TEMP:RPM`.
fn parse_point(s: &str) -> Result<CurvePoint, String> {
    let (temp, rpm) = s
        .split_once(':')
        .ok_or_else(|| format!("expected TEMP:RPM, got '{s}'"))?;
    let temp_c = temp
        .trim()
        .trim_end_matches(['C', 'c'])
        .parse::<u8>()
        .map_err(|e| format!("bad temperature '{temp}': {e}"))?;
    let rpm = rpm
        .trim()
        .parse::<u32>()
        .map_err(|e| format!("bad RPM '{rpm}': {e}"))?;
    Ok(CurvePoint::new(temp_c, rpm))
}
