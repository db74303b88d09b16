use anyhow::{Context, Result};
use copter_proto::{Event, VehicleRuntime};
use mavlink::common::{MavCmd, MavMessage, MavModeFlag, COMMAND_LONG_DATA};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::mav::{is_autopilot_heartbeat, is_gcs_heartbeat, FcLink};
use crate::modes;
use crate::state::VehicleStatus;

/// Autopilot heartbeat silence after which the vehicle counts as disconnected.
const VEHICLE_TIMEOUT: Duration = Duration::from_secs(3);
const TICK: Duration = Duration::from_secs(1);

/// `MAV_CMD_PREFLIGHT_REBOOT_SHUTDOWN` param2 (companion computer) values.
const COMPANION_REBOOT: f32 = 1.0;
const COMPANION_SHUTDOWN: f32 = 2.0;

/// Vehicle runtime over a MAVLink link.
///
/// - reader (blocking pool): heartbeats, flight mode, GCS presence, commands -> events
/// - ticker task: companion heartbeat at 1 Hz, presence expiry
pub struct MavRuntime {
    link: Arc<FcLink>,
    status: Arc<Mutex<VehicleStatus>>,
    hmi_device: Option<PathBuf>,
}

impl MavRuntime {
    pub fn new(link: FcLink, hmi_device: Option<PathBuf>, peer_timeout: Duration) -> Self {
        Self {
            link: Arc::new(link),
            status: Arc::new(Mutex::new(VehicleStatus::new(VEHICLE_TIMEOUT, peer_timeout))),
            hmi_device,
        }
    }

    fn status(&self) -> MutexGuard<'_, VehicleStatus> {
        lock(&self.status)
    }

    pub fn snapshot(&self) -> VehicleStatus {
        self.status().clone()
    }

    /// Start delivering events. The reader sits on the blocking pool since
    /// `recv` blocks on the link; it exits after the next message once cancelled.
    pub fn spawn(&self, events: mpsc::Sender<Event>, token: CancellationToken) -> Result<()> {
        let link = self.link.clone();
        let status = self.status.clone();
        let tx = events.clone();
        let reader_token = token.clone();
        tokio::task::spawn_blocking(move || reader_loop(&link, &status, &tx, &reader_token));

        let link = self.link.clone();
        let status = self.status.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(TICK);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tick.tick() => {}
                }
                if let Err(e) = link.send_heartbeat() {
                    debug!("FC: companion heartbeat failed: {:#}", e);
                }
                let now = Instant::now();
                let mut st = lock(&status);
                if st.vehicle.expire(now) {
                    warn!("FC: autopilot heartbeat lost");
                }
                if st.peer.expire(now) {
                    info!("FC: ground station heartbeat lost");
                    drop(st);
                    deliver(&events, Event::PeerDisconnected);
                }
            }
        });
        Ok(())
    }
}

fn lock(status: &Mutex<VehicleStatus>) -> MutexGuard<'_, VehicleStatus> {
    status.lock().unwrap_or_else(|e| e.into_inner())
}

fn deliver(events: &mpsc::Sender<Event>, ev: Event) -> bool {
    match events.try_send(ev) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(ev)) => {
            warn!("event queue full, dropping {}", ev);
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

fn reader_loop(
    link: &FcLink,
    status: &Mutex<VehicleStatus>,
    events: &mpsc::Sender<Event>,
    token: &CancellationToken,
) {
    let ids = link.ids();
    while !token.is_cancelled() {
        let (hdr, msg) = match link.recv() {
            Ok(m) => m,
            Err(e) => {
                debug!("FC: {:#}", e);
                std::thread::sleep(Duration::from_millis(10));
                continue;
            }
        };

        let ev = match &msg {
            MavMessage::HEARTBEAT(hb) if is_autopilot_heartbeat(hb) && hdr.system_id == ids.target_sys => {
                let mut st = lock(status);
                if st.vehicle.seen(Instant::now()) {
                    info!("FC: autopilot heartbeat from sys {}", hdr.system_id);
                }
                let mode = modes::mode_name(hb.custom_mode)
                    .map(String::from)
                    .unwrap_or_else(|| format!("MODE({})", hb.custom_mode));
                if st.mode.as_deref() != Some(mode.as_str()) {
                    info!("FC: flight mode {}", mode);
                    st.mode = Some(mode);
                }
                st.armed = hb.base_mode.contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED);
                None
            }
            MavMessage::HEARTBEAT(hb) if is_gcs_heartbeat(hb) => {
                let rising = lock(status).peer.seen(Instant::now());
                if rising {
                    info!("FC: ground station connected (sys {})", hdr.system_id);
                }
                rising.then_some(Event::PeerConnected)
            }
            MavMessage::COMMAND_LONG(cmd) if addressed_to_us(cmd, ids.sys_id, ids.comp_id) => {
                command_event(cmd)
            }
            _ => None,
        };

        if let Some(ev) = ev {
            if !deliver(events, ev) {
                break;
            }
        }
    }
    debug!("FC: reader stopped");
}

fn addressed_to_us(cmd: &COMMAND_LONG_DATA, sys_id: u8, comp_id: u8) -> bool {
    (cmd.target_system == 0 || cmd.target_system == sys_id)
        && (cmd.target_component == 0 || cmd.target_component == comp_id)
}

pub fn command_event(cmd: &COMMAND_LONG_DATA) -> Option<Event> {
    match cmd.command {
        MavCmd::MAV_CMD_PREFLIGHT_REBOOT_SHUTDOWN => {
            if cmd.param2 == COMPANION_REBOOT {
                Some(Event::RebootRequested)
            } else if cmd.param2 == COMPANION_SHUTDOWN {
                Some(Event::ShutdownRequested)
            } else {
                None
            }
        }
        MavCmd::MAV_CMD_DO_DIGICAM_CONTROL => Some(Event::RecTriggerToggle),
        _ => None,
    }
}

impl VehicleRuntime for MavRuntime {
    fn is_vehicle_connected(&self) -> bool {
        self.status().vehicle.is_present()
    }

    fn is_hmi_device_connected(&self) -> bool {
        self.hmi_device.as_ref().map(|p| p.exists()).unwrap_or(false)
    }

    fn vehicle_mode(&self) -> Option<String> {
        self.status().mode.clone()
    }

    fn set_vehicle_mode(&self, mode: &str) -> Result<()> {
        let n = modes::mode_number(mode).with_context(|| format!("unknown flight mode {}", mode))?;
        self.link.cmd_set_mode(n)
    }
}
