// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! lianli-fand: system service that runs the closed-loop fan controller
//! for the SL Infinity hub and accepts commands from clients over a Unix
//! domain socket.

use anyhow::Context;
use clap::Parser;
use lianli_fan_control::config::{self, Backend, Config};
use lianli_fan_control::controller::{ControllerSnapshot, FanSpeedController};
use lianli_fan_control::protocol::{self, Request, Response};
use lianli_fan_control::sensor::{SampledSource, SystemTemperatureSource};
use lianli_fan_control::sink;
use lianli_fan_control::store::{CurveStore, CurveTable};
use signal_hook::consts::{SIGINT, SIGTERM};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Mutex, watch};
use tokio::time::{self, Duration};

/// How often the accept loop checks for shutdown.
const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "lianli-fand", about = "Lian Li SL Infinity fan control daemon")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: String,

    /// Override the socket path.
    #[arg(short, long)]
    socket: Option<String>,

    /// Compute fan speeds without driving any hardware.
    #[arg(long)]
    simulate: bool,
}

// ---------------------------------------------------------------------------
// Shared daemon state
// ---------------------------------------------------------------------------

struct DaemonState {
    config: Config,
    config_path: PathBuf,
    /// Ports the running controller drives.
    ports: Vec<u8>,
    curves: Arc<CurveStore>,
    status: watch::Receiver<ControllerSnapshot>,
}

type SharedState = Arc<Mutex<DaemonState>>;

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config_path = config::resolve_config_path(Some(&cli.config));
    let mut cfg = config::load_config(&config_path)
        .with_context(|| format!("Could not load config from {}", config_path.display()))?;
    if cli.simulate {
        cfg.daemon.backend = Backend::Simulated;
    }

    let socket_path = cli
        .socket
        .clone()
        .unwrap_or_else(|| cfg.daemon.socket_path.clone());

    if cfg.daemon.backend != Backend::Simulated && !nix::unistd::geteuid().is_root() {
        log::warn!("Not running as root; device writes will probably fail");
    }

    // Hardware
    let device = sink::open_backend(&cfg.daemon).context(
        "No fan hub available (load the kernel driver, check hidraw permissions, or pass --simulate)",
    )?;
    let sensors_chip = Some(cfg.daemon.sensors_chip.clone()).filter(|c| !c.is_empty());
    let source = SampledSource::new(
        SystemTemperatureSource::new(
            sensors_chip,
            Duration::from_millis(cfg.daemon.sensor_timeout_ms),
        ),
        Duration::from_millis(cfg.daemon.sensor_interval_ms),
    );

    let curves = Arc::new(CurveStore::new(CurveTable::from_config(&cfg)));
    let mut controller = FanSpeedController::new(
        &cfg.ports,
        cfg.calibration.clone(),
        curves.clone(),
        Box::new(source),
        device,
    )?;
    log::info!(
        "Profile {}, control period {}ms, temperature sampled every {}ms",
        cfg.profile,
        cfg.daemon.tick_interval_ms,
        cfg.daemon.sensor_interval_ms
    );

    let (status_tx, status_rx) = watch::channel(controller.snapshot());

    let stop = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGTERM, stop.clone())?;
    signal_hook::flag::register(SIGINT, stop.clone())?;

    // Control loop
    let interval = Duration::from_millis(cfg.daemon.tick_interval_ms.max(1));
    let stop_for_control = stop.clone();
    let control = thread::Builder::new()
        .name("fan-control".to_string())
        .spawn(move || {
            controller.run(interval, &stop_for_control, |snapshot| {
                status_tx.send_replace(snapshot);
            });
        })?;

    let state: SharedState = Arc::new(Mutex::new(DaemonState {
        ports: cfg.ports.iter().map(|p| p.id).collect(),
        config: cfg,
        config_path,
        curves,
        status: status_rx,
    }));

    // Clean up old socket file
    let _ = std::fs::remove_file(&socket_path);
    let listener = UnixListener::bind(&socket_path)
        .with_context(|| format!("Could not bind {socket_path}"))?;

    // Make socket accessible to non-root users
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o666);
        std::fs::set_permissions(&socket_path, perms)?;
    }

    log::info!("Listening on {socket_path}");

    // Accept client connections
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let state_clone = state.clone();
                        tokio::spawn(handle_client(stream, state_clone));
                    }
                    Err(e) => {
                        log::error!("Failed to accept connection: {e}");
                    }
                }
            }
            _ = wait_for_shutdown(&stop, &control) => {
                log::info!("Daemon shutting down");
                break;
            }
        }
    }

    stop.store(true, Ordering::Relaxed);
    let joined = control.join();

    // Cleanup socket
    let _ = std::fs::remove_file(&socket_path);

    joined.map_err(|_| anyhow::anyhow!("fan control thread panicked"))
}

/// Resolves once a signal set `stop` or the control thread ended.
async fn wait_for_shutdown(stop: &AtomicBool, control: &JoinHandle<()>) {
    let mut poll = time::interval(SHUTDOWN_POLL);
    loop {
        poll.tick().await;
        if stop.load(Ordering::Relaxed) {
            log::info!("Received shutdown signal");
            return;
        }
        if control.is_finished() {
            log::error!("Fan control thread exited unexpectedly");
            return;
        }
    }
}

// ---------------------------------------------------------------------------
// Client connection handler
// ---------------------------------------------------------------------------

async fn handle_client(stream: UnixStream, state: SharedState) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let response = match protocol::decode::<Request>(&line) {
            Ok(req) => process_request(req, &state).await,
            Err(e) => Response::Error {
                message: format!("Invalid request: {e}"),
            },
        };

        let encoded = match protocol::encode(&response) {
            Ok(s) => s,
            Err(e) => {
                log::error!("Failed to encode response: {e}");
                continue;
            }
        };

        if writer.write_all(encoded.as_bytes()).await.is_err() {
            break; // Client disconnected
        }
    }
}

async fn process_request(req: Request, state: &SharedState) -> Response {
    let mut st = state.lock().await;

    match req {
        Request::GetStatus => Response::Status {
            status: st.status.borrow().clone(),
        },

        Request::SetProfile { profile } => {
            st.curves.select_profile(profile);
            st.config.profile = profile;
            log::info!("Profile set to {profile}");
            Response::Ok {
                message: format!("Profile set to {profile}"),
            }
        }

        Request::GetCurve { port } => {
            if let Err(resp) = check_port(&st, port) {
                return resp;
            }
            let profile = st.curves.snapshot().resolve(port);
            Response::Curve {
                port,
                custom: profile.is_custom(),
                curve: (*profile.curve()).clone(),
            }
        }

        Request::SetCurve { port, points } => {
            if let Err(resp) = check_port(&st, port) {
                return resp;
            }
            match st.curves.set_custom(port, points) {
                Ok(()) => {
                    log::info!("Port {port}: custom curve installed");
                    Response::Ok {
                        message: format!("Custom curve set on port {port}"),
                    }
                }
                Err(e) => Response::Error {
                    message: format!("Invalid curve: {e}"),
                },
            }
        }

        Request::ClearCurve { port } => {
            if let Err(resp) = check_port(&st, port) {
                return resp;
            }
            if st.curves.clear_custom(port) {
                Response::Ok {
                    message: format!("Port {port} returned to the {} profile", st.config.profile),
                }
            } else {
                Response::Ok {
                    message: format!("Port {port} has no custom curve"),
                }
            }
        }

        Request::ApplyToAll { port } => {
            if let Err(resp) = check_port(&st, port) {
                return resp;
            }
            st.curves.apply_to_all(port, &st.ports);
            log::info!("Copied port {port} curve to all ports");
            Response::Ok {
                message: format!("Port {port} curve applied to {} port(s)", st.ports.len()),
            }
        }

        Request::ResetCurves => {
            st.curves.reset();
            log::info!("All custom curves cleared");
            Response::Ok {
                message: "All ports returned to the selected profile".to_string(),
            }
        }

        Request::SaveConfig => {
            let mut cfg = st.config.clone();
            st.curves.snapshot().write_to(&mut cfg);
            let path = st.config_path.clone();
            let to_save = cfg.clone();
            match tokio::task::spawn_blocking(move || config::save_config(&path, &to_save)).await {
                Ok(Ok(())) => {
                    st.config = cfg;
                    Response::Ok {
                        message: format!("Config saved to {}", st.config_path.display()),
                    }
                }
                Ok(Err(e)) => Response::Error {
                    message: format!("Failed to save config: {e}"),
                },
                Err(e) => Response::Error {
                    message: format!("Config save task failed: {e}"),
                },
            }
        }

        Request::ReloadConfig => {
            let path = st.config_path.clone();
            match tokio::task::spawn_blocking(move || config::load_config(&path)).await {
                Ok(Ok(cfg)) => {
                    st.curves.replace(CurveTable::from_config(&cfg));
                    let restart = st.config.requires_restart(&cfg);
                    st.config = cfg;
                    if restart {
                        log::warn!("Port, calibration or daemon changes take effect after a restart");
                        Response::Ok {
                            message: "Curves reloaded; restart the daemon to apply other changes"
                                .to_string(),
                        }
                    } else {
                        Response::Ok {
                            message: "Config reloaded".to_string(),
                        }
                    }
                }
                Ok(Err(e)) => Response::Error {
                    message: format!("Failed to reload config: {e}"),
                },
                Err(e) => Response::Error {
                    message: format!("Config reload task failed: {e}"),
                },
            }
        }
    }
}

fn check_port(st: &DaemonState, port: u8) -> Result<(), Response> {
    if st.ports.contains(&port) {
        Ok(())
    } else {
        Err(Response::Error {
            message: format!("Unknown port: {port}"),
        })
    }
}
