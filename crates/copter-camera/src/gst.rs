use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::{Camera, CameraConfig};

const QUIT_GRACE: Duration = Duration::from_secs(3);

#[derive(Default)]
struct GstState {
    child: Option<Child>,
    recording: bool,
    streaming: bool,
}

/// Camera backed by the GStreamer launcher process.
///
/// - `start` spawns `binary`, its stdout/stderr appended to the camera log
/// - recording/streaming are toggled by writing control lines to its stdin:
///   `record start|stop`, `stream start|stop`, `quit`
pub struct GstCamera {
    cfg: CameraConfig,
    state: Mutex<GstState>,
}

impl GstCamera {
    pub fn new(cfg: CameraConfig) -> Result<Self> {
        anyhow::ensure!(Path::new(&cfg.binary).exists(), "camera binary missing: {}", cfg.binary);
        // fail early if the log sink is unusable
        open_log(&cfg.log_file)?;
        Ok(Self { cfg, state: Mutex::new(GstState::default()) })
    }

    fn state(&self) -> MutexGuard<'_, GstState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn send(&self, st: &mut GstState, line: &str) -> Result<()> {
        let child = st.child.as_mut().context("camera not started")?;
        let stdin = child.stdin.as_mut().context("camera control pipe closed")?;
        debug!("camera: -> {}", line);
        writeln!(stdin, "{}", line).context("write camera control")?;
        stdin.flush().context("flush camera control")?;
        Ok(())
    }
}

fn open_log(path: &str) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open camera log {}", path))
}

fn alive(child: &mut Child) -> bool {
    matches!(child.try_wait(), Ok(None))
}

impl Camera for GstCamera {
    fn start(&self) -> Result<()> {
        let mut st = self.state();
        if let Some(child) = st.child.as_mut() {
            if alive(child) {
                return Ok(());
            }
            warn!("camera: pipeline exited unexpectedly, restarting");
        }

        let log = open_log(&self.cfg.log_file)?;
        let log_err = log.try_clone().context("clone camera log handle")?;
        let child = Command::new(&self.cfg.binary)
            .stdin(Stdio::piped())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .spawn()
            .with_context(|| format!("spawn {}", self.cfg.binary))?;

        info!("camera: pipeline started (pid {})", child.id());
        *st = GstState { child: Some(child), recording: false, streaming: false };
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        let mut st = self.state();
        if st.child.is_none() {
            return Ok(());
        }
        if let Err(e) = self.send(&mut st, "quit") {
            warn!("camera: quit request failed: {:#}", e);
        }

        let Some(mut child) = st.child.take() else { return Ok(()) };
        st.recording = false;
        st.streaming = false;
        // EOF on the control pipe also ends the pipeline
        drop(child.stdin.take());

        let t0 = Instant::now();
        while t0.elapsed() < QUIT_GRACE {
            if child.try_wait().context("wait camera pipeline")?.is_some() {
                info!("camera: pipeline stopped");
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        warn!("camera: pipeline ignored quit, killing");
        child.kill().context("kill camera pipeline")?;
        child.wait().context("reap camera pipeline")?;
        Ok(())
    }

    fn start_recording(&self) -> Result<()> {
        let mut st = self.state();
        if st.recording {
            return Ok(());
        }
        self.send(&mut st, "record start")?;
        st.recording = true;
        Ok(())
    }

    fn stop_recording(&self) -> Result<()> {
        let mut st = self.state();
        if !st.recording {
            return Ok(());
        }
        self.send(&mut st, "record stop")?;
        st.recording = false;
        Ok(())
    }

    fn start_streaming(&self) -> Result<()> {
        let mut st = self.state();
        if st.streaming {
            return Ok(());
        }
        self.send(&mut st, "stream start")?;
        st.streaming = true;
        Ok(())
    }

    fn stop_streaming(&self) -> Result<()> {
        let mut st = self.state();
        if !st.streaming {
            return Ok(());
        }
        self.send(&mut st, "stream stop")?;
        st.streaming = false;
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.state().child.as_mut().map(alive).unwrap_or(false)
    }

    fn is_recording(&self) -> bool {
        let mut st = self.state();
        let started = st.child.as_mut().map(alive).unwrap_or(false);
        started && st.recording
    }
}
