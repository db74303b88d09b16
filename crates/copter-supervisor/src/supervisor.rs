use anyhow::Result;
use copter_camera::Camera;
use copter_proto::{Event, VehicleRuntime};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::camera::CameraController;
use crate::config::ConfigSnapshot;
use crate::failsafe::FailsafeSequencer;
use crate::shutdown::{ExitActions, ShutdownCoordinator};
use crate::state::{SharedState, SupervisorState};

pub const CONNECT_POLL: Duration = Duration::from_millis(2500);
const WORKER_QUEUE: usize = 4;

/// Root of the companion-computer supervisor.
pub struct Supervisor {
    config: Arc<ConfigSnapshot>,
    state: Arc<SharedState>,
    runtime: Arc<dyn VehicleRuntime>,
    camera: Arc<CameraController>,
    failsafe: Arc<FailsafeSequencer>,
    shutdown: ShutdownCoordinator,
    exits: Arc<ExitActions>,
    token: CancellationToken,
}

impl Supervisor {
    pub fn new(
        config: ConfigSnapshot,
        runtime: Arc<dyn VehicleRuntime>,
        camera: Option<Arc<dyn Camera>>,
        token: CancellationToken,
    ) -> Self {
        let state = Arc::new(SharedState::new(config.camera_auto_start, config.failsafe_enabled));
        let camera = Arc::new(CameraController::new(camera, config.camera_start_timeout, token.clone()));
        let failsafe = Arc::new(FailsafeSequencer::new(
            config.failsafe_sequence.clone(),
            state.clone(),
            runtime.clone(),
            token.clone(),
        ));
        let exits = Arc::new(ExitActions::default());
        let shutdown = ShutdownCoordinator::new(exits.clone(), camera.clone(), failsafe.clone(), token.clone());

        Self { config: Arc::new(config), state, runtime, camera, failsafe, shutdown, exits, token }
    }

    pub fn exit_actions(&self) -> Arc<ExitActions> {
        self.exits.clone()
    }

    pub fn state(&self) -> SupervisorState {
        self.state.snapshot()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    fn observe_vehicle(&self) -> bool {
        let connected = self.runtime.is_vehicle_connected();
        let hmi = self.runtime.is_hmi_device_connected();
        self.state.observe_vehicle(connected, hmi, self.runtime.vehicle_mode());
        hmi
    }

    /// Handles one event. Errors are reported to the caller, which logs them.
    pub async fn handle(&self, ev: Event) -> Result<()> {
        debug!("event: {}", ev);
        match ev {
            Event::VehicleReady => {
                let hmi = self.observe_vehicle();
                info!("vehicle ready (hmi={})", hmi);
                self.camera.on_vehicle_ready(hmi, self.config.camera_auto_start).await
            }
            Event::PeerConnected => {
                if !self.state.set_peer_connected(true) {
                    info!("peer connected");
                }
                let hmi = self.observe_vehicle();
                self.camera.on_peer_connected(hmi).await
            }
            Event::PeerDisconnected => {
                if self.state.set_peer_connected(false) {
                    info!("peer disconnected");
                }
                self.camera.on_peer_disconnected().await
            }
            Event::NetworkDisconnected => {
                info!("network disconnected");
                // the sequencer runs on its own task
                let _ = self.failsafe.on_network_disconnected();
                self.camera.on_network_disconnected().await
            }
            Event::NetworkReconnected => {
                info!("network reconnected");
                self.failsafe.on_network_reconnected();
                Ok(())
            }
            Event::RecTriggerToggle => self.camera.on_rec_trigger_toggle().await,
            Event::RebootRequested | Event::ShutdownRequested => {
                if let Some(kind) = ev.exit_kind() {
                    self.shutdown.on_exit_request(kind).await;
                }
                Ok(())
            }
        }
    }

    /// Polls until the vehicle is connected. False if cancelled first.
    pub async fn wait_for_vehicle(&self) -> bool {
        loop {
            if self.runtime.is_vehicle_connected() {
                info!("vehicle connected");
                return true;
            }
            tokio::select! {
                _ = self.token.cancelled() => return false,
                _ = tokio::time::sleep(CONNECT_POLL) => {}
            }
        }
    }

    /// Routes events until cancelled. One worker per event kind: events of
    /// one kind run in order, different kinds run concurrently.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<Event>) {
        let mut workers = JoinSet::new();
        let mut queues: HashMap<Event, mpsc::Sender<Event>> = HashMap::new();

        for kind in Event::ALL {
            let (tx, mut rx) = mpsc::channel::<Event>(WORKER_QUEUE);
            queues.insert(kind, tx);
            let sup = self.clone();
            workers.spawn(async move {
                while let Some(ev) = rx.recv().await {
                    if sup.token.is_cancelled() {
                        break;
                    }
                    if let Err(e) = sup.handle(ev).await {
                        warn!("{} handler failed: {:#}", ev, e);
                    }
                }
            });
        }

        // startup barrier
        let sup = self.clone();
        let ready_tx = queues[&Event::VehicleReady].clone();
        workers.spawn(async move {
            if sup.wait_for_vehicle().await {
                let _ = ready_tx.send(Event::VehicleReady).await;
            }
        });

        loop {
            let ev = tokio::select! {
                _ = self.token.cancelled() => break,
                ev = events.recv() => ev,
            };
            let Some(ev) = ev else {
                warn!("event source closed");
                self.token.cancel();
                break;
            };
            if let Err(mpsc::error::TrySendError::Full(ev)) = queues[&ev].try_send(ev) {
                warn!("{} handler busy, event dropped", ev);
            }
        }

        info!("supervisor stopping");
        self.failsafe.cancel();
        drop(queues);
        while let Some(res) = workers.join_next().await {
            if let Err(e) = res {
                warn!("supervisor worker failed: {}", e);
            }
        }
        // no-op when a reboot/shutdown request already stopped it
        if let Err(e) = self.camera.stop().await {
            warn!("camera stop failed: {:#}", e);
        }
        info!("supervisor stopped");
    }
}
