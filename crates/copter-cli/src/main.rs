mod clocks;
mod signals;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use copter_camera::{Camera, CameraConfig, GstCamera};
use copter_fc::autodetect::{autodetect_fc, resolve_address};
use copter_fc::mav::FcLink;
use copter_fc::watchdog::{run_watchdog, WatchdogConfig};
use copter_fc::{MavRuntime, MavlinkConfig};
use copter_proto::params;
use copter_supervisor::shutdown::GRACE_DELAY;
use copter_supervisor::{run_exit_action, ConfigSnapshot, Supervisor, SystemPower};

const EVENT_QUEUE: usize = 32;

#[derive(Debug, Parser)]
#[command(name = "copter", version, about = "Companion-computer supervisor for a multirotor")]
struct Cli {
    #[arg(long, default_value = params::DEFAULT_PARAMS_FILE)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Supervise the vehicle until a reboot/shutdown request or a signal.
    Run,
    /// Validate the system parameters and print what would be used.
    Doctor,
    Fc { #[command(subcommand)] cmd: FcCmd },
}

#[derive(Debug, Subcommand)]
enum FcCmd {
    /// Probe serial ports/bauds for autopilot heartbeats.
    Autodetect,
}

fn init_logging(log_file: Option<&str>) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match log_file {
        Some(path) => {
            let f = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file {}", path))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(f))
                .init();
        }
        None => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    Ok(())
}

/// A reader blocked on a silent vehicle link must not hold up process exit.
const RUNTIME_SHUTDOWN: Duration = Duration::from_secs(1);

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;
    let res = runtime.block_on(async_main());
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN);
    res
}

async fn async_main() -> Result<()> {
    let cli = Cli::parse();
    let root = params::load(&cli.config)?;

    let log_file = match cli.cmd {
        Command::Run => params::str_param(&root, "log_params.LOG_FILE"),
        _ => None,
    };
    init_logging(log_file.as_deref())?;

    match cli.cmd {
        Command::Run => run(&root).await?,
        Command::Doctor => doctor(&root)?,
        Command::Fc { cmd } => fc_cmd(&root, cmd).await?,
    }
    Ok(())
}

fn doctor(root: &Value) -> Result<()> {
    info!("doctor: starting");

    let snap = ConfigSnapshot::from_params(root);
    copter_supervisor::doctor::check_failsafe(&snap)?;
    copter_fc::doctor::check_modes(snap.failsafe_sequence.steps().iter().map(|s| s.mode.as_str()))?;

    let camera = CameraConfig::from_params(root);
    match &camera {
        Ok(cam) => {
            if let Err(e) = copter_camera::doctor::check_camera(cam) {
                warn!("camera will be disabled: {:#}", e);
            }
        }
        Err(e) => warn!("camera will be disabled: {:#}", e),
    }

    let mav = MavlinkConfig::from_params(root);
    copter_fc::doctor::check_mavlink(&mav)?;

    let report = serde_json::json!({
        "supervisor": snap,
        "camera": camera.ok(),
        "mavlink": mav,
        "watchdog": WatchdogConfig::from_params(root),
        "hmi_device": params::str_param(root, "hmi_params.DEVICE"),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    info!("doctor: OK");
    Ok(())
}

async fn fc_cmd(root: &Value, cmd: FcCmd) -> Result<()> {
    match cmd {
        FcCmd::Autodetect => {
            let fc = MavlinkConfig::from_params(root);
            let res = tokio::task::spawn_blocking(move || {
                autodetect_fc(&fc.candidate_devs, &fc.candidate_bauds, fc.heartbeat_timeout, fc.ids)
            })
            .await??;
            match res.chosen {
                Some((dev, baud)) => println!("CHOSEN: {} @ {}", dev, baud),
                None => println!("CHOSEN: none"),
            }
            for p in res.probes {
                println!("probe dev={} baud={} hb={} {}ms note={}", p.dev, p.baud, p.hb_seen, p.elapsed_ms, p.note);
            }
            Ok(())
        }
    }
}

/// A camera that cannot be set up stays disabled for the process lifetime.
fn init_camera(root: &Value) -> Option<Arc<dyn Camera>> {
    let camera = CameraConfig::from_params(root).and_then(GstCamera::new);
    match camera {
        Ok(cam) => {
            info!("camera: added");
            Some(Arc::new(cam))
        }
        Err(e) => {
            warn!("error adding camera: {:#}. camera disabled", e);
            None
        }
    }
}

async fn run(root: &Value) -> Result<()> {
    info!("run: starting");

    if params::bool_param(root, "system_params.INIT_CLOCKS", false) {
        clocks::init_system_clocks().await;
    }

    let snapshot = ConfigSnapshot::from_params(root);
    let camera = init_camera(root);

    let mav = MavlinkConfig::from_params(root);
    let ids = mav.ids;
    let peer_timeout = mav.peer_timeout;
    let address = tokio::task::spawn_blocking(move || resolve_address(&mav)).await??;
    let link = FcLink::open(&address, ids).context("FC open")?;
    info!("FC: link open on {}", address);

    let hmi_device = params::str_param(root, "hmi_params.DEVICE").map(PathBuf::from);
    let runtime = Arc::new(MavRuntime::new(link, hmi_device, peer_timeout));

    let token = CancellationToken::new();
    let (tx, rx) = mpsc::channel(EVENT_QUEUE);
    runtime.spawn(tx.clone(), token.clone())?;
    if let Some(wd) = WatchdogConfig::from_params(root) {
        tokio::spawn(run_watchdog(wd, tx.clone(), token.clone()));
    }
    drop(tx);

    let supervisor = Arc::new(Supervisor::new(snapshot, runtime, camera, token.clone()));
    let exits = supervisor.exit_actions();

    let sig_token = token.clone();
    tokio::spawn(async move {
        match signals::wait_for_shutdown_signal().await {
            Ok(()) => {
                info!("termination signal received");
                sig_token.cancel();
            }
            Err(e) => warn!("signal handler unavailable: {}", e),
        }
    });

    supervisor.run(rx).await;

    if let Some(kind) = exits.registered() {
        run_exit_action(kind, GRACE_DELAY, Arc::new(SystemPower)).await?;
    }
    info!("run: exit");
    Ok(())
}
