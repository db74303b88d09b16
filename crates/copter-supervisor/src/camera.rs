use anyhow::{Context, Result};
use copter_camera::Camera;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const START_POLL: Duration = Duration::from_millis(2500);
/// Wait after the camera reports started before streaming.
pub const SETTLE_DELAY: Duration = Duration::from_secs(7);
/// Upper bound for a single camera call.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Drives the camera from supervisor events. Every state check and the
/// action that depends on it run under one gate, so overlapping events
/// cannot issue a duplicate start or stop.
///
/// Once [`CameraController::stop`] has run the camera is never started again.
/// Without a camera every operation is a no-op.
pub struct CameraController {
    camera: Option<Arc<dyn Camera>>,
    gate: Mutex<()>,
    /// Written under `gate`.
    closed: AtomicBool,
    start_timeout: Duration,
    token: CancellationToken,
}

impl CameraController {
    pub fn new(camera: Option<Arc<dyn Camera>>, start_timeout: Duration, token: CancellationToken) -> Self {
        Self { camera, gate: Mutex::new(()), closed: AtomicBool::new(false), start_timeout, token }
    }

    pub fn is_present(&self) -> bool {
        self.camera.is_some()
    }

    /// Camera calls are blocking; run them off the async workers with a bound.
    async fn call<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Camera) -> Result<T> + Send + 'static,
    {
        let cam = self.camera.clone().context("no camera")?;
        let task = tokio::task::spawn_blocking(move || f(cam.as_ref()));
        match tokio::time::timeout(CALL_TIMEOUT, task).await {
            Ok(joined) => joined.with_context(|| format!("camera {} panicked", op))?,
            Err(_) => anyhow::bail!("camera {} timed out after {:?}", op, CALL_TIMEOUT),
        }
    }

    /// Checked after taking the gate by every path that starts the camera.
    fn closed(&self, what: &str) -> bool {
        let closed = self.closed.load(Ordering::Acquire) || self.token.is_cancelled();
        if closed {
            info!("camera: shutting down, ignoring {}", what);
        }
        closed
    }

    async fn started(&self) -> bool {
        self.call("is_started", |c| Ok(c.is_started())).await.unwrap_or_else(|e| {
            warn!("camera: {:#}", e);
            false
        })
    }

    /// Sleeps unless the process is shutting down; false when interrupted.
    async fn pause(&self, d: Duration) -> bool {
        tokio::select! {
            _ = self.token.cancelled() => false,
            _ = tokio::time::sleep(d) => true,
        }
    }

    pub async fn on_vehicle_ready(&self, hmi_connected: bool, auto_start: bool) -> Result<()> {
        if !self.is_present() {
            return Ok(());
        }
        if hmi_connected {
            info!("camera: HMI device connected, auto-start suppressed");
            return Ok(());
        }
        if !auto_start {
            info!("camera: auto-start disabled");
            return Ok(());
        }

        let _gate = self.gate.lock().await;
        if self.closed("vehicle ready") || self.started().await {
            return Ok(());
        }
        info!("camera: starting");
        self.call("start", |c| c.start()).await
    }

    pub async fn on_peer_connected(&self, hmi_connected: bool) -> Result<()> {
        if !self.is_present() {
            return Ok(());
        }

        let already_started = {
            let _gate = self.gate.lock().await;
            if self.closed("peer connected") {
                return Ok(());
            }
            if self.started().await {
                true
            } else if hmi_connected {
                info!("camera: peer connected, starting");
                self.call("start", |c| c.start()).await?;
                false
            } else {
                info!("camera: peer connected, camera not started");
                return Ok(());
            }
        };

        if !already_started {
            self.wait_started().await?;
            if !self.pause(SETTLE_DELAY).await {
                return Ok(());
            }
        }

        let _gate = self.gate.lock().await;
        if self.closed("start streaming") {
            return Ok(());
        }
        info!("camera: start streaming");
        self.call("start_streaming", |c| c.start_streaming()).await
    }

    async fn wait_started(&self) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.start_timeout;
        loop {
            if self.started().await {
                return Ok(());
            }
            if tokio::time::Instant::now() + START_POLL > deadline {
                anyhow::bail!("camera did not report started within {:?}", self.start_timeout);
            }
            if !self.pause(START_POLL).await {
                anyhow::bail!("shutdown while waiting for camera start");
            }
        }
    }

    pub async fn on_peer_disconnected(&self) -> Result<()> {
        self.stop_streaming("peer disconnected").await
    }

    /// Streaming is dropped on link loss regardless of the failsafe.
    pub async fn on_network_disconnected(&self) -> Result<()> {
        self.stop_streaming("network disconnected").await
    }

    async fn stop_streaming(&self, why: &str) -> Result<()> {
        if !self.is_present() {
            return Ok(());
        }
        let _gate = self.gate.lock().await;
        if !self.started().await {
            return Ok(());
        }
        info!("camera: {}, stop streaming", why);
        self.call("stop_streaming", |c| c.stop_streaming()).await
    }

    /// Starts a stopped camera (no recording this time); otherwise toggles recording.
    pub async fn on_rec_trigger_toggle(&self) -> Result<()> {
        if !self.is_present() {
            return Ok(());
        }
        let _gate = self.gate.lock().await;
        if self.closed("record trigger") {
            return Ok(());
        }
        if !self.started().await {
            info!("camera: record trigger, starting camera");
            return self.call("start", |c| c.start()).await;
        }
        if self.call("is_recording", |c| Ok(c.is_recording())).await? {
            info!("camera: stop recording");
            self.call("stop_recording", |c| c.stop_recording()).await
        } else {
            info!("camera: start recording");
            self.call("start_recording", |c| c.start_recording()).await
        }
    }

    /// Stops a started camera for good. Bounded by [`CALL_TIMEOUT`] per call.
    pub async fn stop(&self) -> Result<()> {
        if !self.is_present() {
            return Ok(());
        }
        let _gate = self.gate.lock().await;
        self.closed.store(true, Ordering::Release);
        if !self.started().await {
            return Ok(());
        }
        info!("camera: stopping");
        self.call("stop", |c| c.stop()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{assert_elapsed, FakeCamera};
    use tokio::time::Instant;

    fn controller(cam: &Arc<FakeCamera>) -> CameraController {
        let cam: Arc<dyn Camera> = cam.clone();
        CameraController::new(Some(cam), Duration::from_secs(20), CancellationToken::new())
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_starts_reach_the_camera_once() {
        let cam = FakeCamera::new();
        let ctl = controller(&cam);

        let (a, b) = tokio::join!(ctl.on_vehicle_ready(false, true), ctl.on_rec_trigger_toggle());
        a.unwrap();
        b.unwrap();
        // the second caller sees the camera started and toggles recording
        assert_eq!(cam.calls(), vec!["start", "start_recording"]);
        assert!(cam.is_recording());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_wins_over_queued_starts() {
        let cam = FakeCamera::started();
        let ctl = controller(&cam);

        let (a, b, c) = tokio::join!(ctl.stop(), ctl.on_rec_trigger_toggle(), ctl.on_vehicle_ready(false, true));
        a.unwrap();
        b.unwrap();
        c.unwrap();
        assert_eq!(cam.calls(), vec!["stop"]);

        ctl.on_peer_connected(true).await.unwrap();
        ctl.on_rec_trigger_toggle().await.unwrap();
        assert_eq!(cam.calls(), vec!["stop"]);
        assert!(!cam.is_started());
    }

    #[tokio::test(start_paused = true)]
    async fn rec_trigger_starts_camera_without_recording() {
        let cam = FakeCamera::new();
        let ctl = controller(&cam);

        ctl.on_rec_trigger_toggle().await.unwrap();
        assert_eq!(cam.calls(), vec!["start"]);
        assert!(!cam.is_recording());

        ctl.on_rec_trigger_toggle().await.unwrap();
        assert!(cam.is_recording());
        ctl.on_rec_trigger_toggle().await.unwrap();
        assert!(!cam.is_recording());
        assert_eq!(cam.calls(), vec!["start", "start_recording", "stop_recording"]);
    }

    #[tokio::test(start_paused = true)]
    async fn peer_bounce_restreams_without_restarting() {
        let cam = FakeCamera::started();
        let ctl = controller(&cam);

        ctl.on_peer_disconnected().await.unwrap();
        ctl.on_peer_connected(false).await.unwrap();
        assert_eq!(cam.calls(), vec!["stop_streaming", "start_streaming"]);
    }

    #[tokio::test(start_paused = true)]
    async fn peer_connect_with_hmi_waits_then_settles() {
        let cam = FakeCamera::new();
        cam.state.lock().unwrap().warmup_polls = 2;
        let ctl = controller(&cam);

        let t0 = Instant::now();
        ctl.on_peer_connected(true).await.unwrap();
        // two polls at 2.5s, then the settle delay
        assert_elapsed(t0, 12);
        assert_eq!(cam.calls(), vec!["start", "start_streaming"]);
    }

    #[tokio::test(start_paused = true)]
    async fn peer_connect_gives_up_on_a_camera_that_never_starts() {
        let cam = FakeCamera::new();
        cam.state.lock().unwrap().never_starts = true;
        let ctl = controller(&cam);

        let t0 = Instant::now();
        assert!(ctl.on_peer_connected(true).await.is_err());
        assert!(t0.elapsed() <= Duration::from_secs(20));
        assert_eq!(cam.calls(), vec!["start"]);
    }

    #[tokio::test(start_paused = true)]
    async fn peer_connect_without_hmi_leaves_stopped_camera_alone() {
        let cam = FakeCamera::new();
        let ctl = controller(&cam);
        ctl.on_peer_connected(false).await.unwrap();
        assert!(cam.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn vehicle_ready_respects_hmi_and_auto_start() {
        let cam = FakeCamera::new();
        let ctl = controller(&cam);
        ctl.on_vehicle_ready(true, true).await.unwrap();
        ctl.on_vehicle_ready(false, false).await.unwrap();
        assert!(cam.calls().is_empty());
        ctl.on_vehicle_ready(false, true).await.unwrap();
        assert_eq!(cam.calls(), vec!["start"]);
    }

    #[tokio::test(start_paused = true)]
    async fn network_loss_only_touches_streaming() {
        let cam = FakeCamera::started();
        cam.state.lock().unwrap().recording = true;
        let ctl = controller(&cam);
        ctl.on_network_disconnected().await.unwrap();
        assert_eq!(cam.calls(), vec!["stop_streaming"]);
        assert!(cam.is_recording());

        let stopped = FakeCamera::new();
        controller(&stopped).on_network_disconnected().await.unwrap();
        assert!(stopped.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn absent_camera_is_inert() {
        let ctl = CameraController::new(None, Duration::from_secs(5), CancellationToken::new());
        assert!(!ctl.is_present());
        ctl.on_vehicle_ready(false, true).await.unwrap();
        ctl.on_peer_connected(true).await.unwrap();
        ctl.on_peer_disconnected().await.unwrap();
        ctl.on_rec_trigger_toggle().await.unwrap();
        ctl.stop().await.unwrap();
    }
}
