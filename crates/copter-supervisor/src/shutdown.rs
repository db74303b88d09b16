use anyhow::{Context, Result};
use copter_proto::ExitKind;
use std::io::Write;
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::camera::CameraController;
use crate::failsafe::FailsafeSequencer;

/// Lets the log sinks flush before the OS goes down.
pub const GRACE_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct ExitSlots {
    reboot: bool,
    shutdown: bool,
    first: Option<ExitKind>,
}

/// One-shot registration of the OS action to run once the supervisor has stopped.
#[derive(Debug, Default)]
pub struct ExitActions {
    slots: Mutex<ExitSlots>,
}

impl ExitActions {
    /// True only for the first registration of `kind`.
    pub fn register(&self, kind: ExitKind) -> bool {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let flag = match kind {
            ExitKind::Reboot => &mut slots.reboot,
            ExitKind::Shutdown => &mut slots.shutdown,
        };
        if std::mem::replace(flag, true) {
            return false;
        }
        slots.first.get_or_insert(kind);
        true
    }

    /// The action to execute: the first one registered.
    pub fn registered(&self) -> Option<ExitKind> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).first
    }
}

/// OS power actions.
pub trait PowerControl: Send + Sync {
    fn diagnostic(&self, kind: ExitKind, message: &str);
    fn execute(&self, kind: ExitKind) -> Result<()>;
}

/// `reboot` / `shutdown -h now`, with a kernel log line.
pub struct SystemPower;

impl PowerControl for SystemPower {
    fn diagnostic(&self, _kind: ExitKind, message: &str) {
        // kmsg survives the journal being torn down
        let res = std::fs::OpenOptions::new()
            .write(true)
            .open("/dev/kmsg")
            .and_then(|mut f| writeln!(f, "copter: {}", message));
        if let Err(e) = res {
            warn!("kmsg write failed: {}", e);
        }
    }

    fn execute(&self, kind: ExitKind) -> Result<()> {
        let mut cmd = match kind {
            ExitKind::Reboot => Command::new("reboot"),
            ExitKind::Shutdown => {
                let mut c = Command::new("shutdown");
                c.args(["-h", "now"]);
                c
            }
        };
        let status = cmd.status().with_context(|| format!("run {} command", kind))?;
        anyhow::ensure!(status.success(), "{} command failed: {}", kind, status);
        Ok(())
    }
}

pub async fn run_exit_action(kind: ExitKind, grace: Duration, power: Arc<dyn PowerControl>) -> Result<()> {
    let message = match kind {
        ExitKind::Reboot => "Rebooting...",
        ExitKind::Shutdown => "System shutting down...",
    };
    info!("{}", message);
    power.diagnostic(kind, message);

    tokio::time::sleep(grace).await;
    tokio::task::spawn_blocking(move || power.execute(kind))
        .await
        .context("exit action task")?
}

/// Stops everything once per reboot/shutdown kind and leaves the action
/// registered for the process to run on its way out.
pub struct ShutdownCoordinator {
    exits: Arc<ExitActions>,
    camera: Arc<CameraController>,
    failsafe: Arc<FailsafeSequencer>,
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new(
        exits: Arc<ExitActions>,
        camera: Arc<CameraController>,
        failsafe: Arc<FailsafeSequencer>,
        token: CancellationToken,
    ) -> Self {
        Self { exits, camera, failsafe, token }
    }

    pub async fn on_exit_request(&self, kind: ExitKind) {
        if !self.exits.register(kind) {
            info!("system {} already requested", kind);
            return;
        }
        info!("system {} requested. stopping threads", kind);

        if let Err(e) = self.camera.stop().await {
            error!("camera stop failed during {}: {:#}", kind, e);
        }
        self.failsafe.cancel();
        self.token.cancel();
    }
}
