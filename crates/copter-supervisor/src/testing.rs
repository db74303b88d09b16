use anyhow::Result;
use copter_camera::Camera;
use copter_proto::{ExitKind, VehicleRuntime};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::shutdown::PowerControl;

#[derive(Debug, Default)]
pub struct FakeCameraState {
    pub started: bool,
    pub recording: bool,
    pub streaming: bool,
    /// `is_started` reports false this many more times after `start`.
    pub warmup_polls: u32,
    pub never_starts: bool,
    pub calls: Vec<&'static str>,
}

#[derive(Debug, Default)]
pub struct FakeCamera {
    pub state: Mutex<FakeCameraState>,
}

impl FakeCamera {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn started() -> Arc<Self> {
        let cam = Self::default();
        cam.state.lock().unwrap().started = true;
        Arc::new(cam)
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| **c == call).count()
    }
}

impl Camera for FakeCamera {
    fn start(&self) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        st.calls.push("start");
        anyhow::ensure!(!st.started, "camera started twice");
        if !st.never_starts {
            st.started = true;
        }
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        st.calls.push("stop");
        st.started = false;
        st.recording = false;
        st.streaming = false;
        Ok(())
    }

    fn start_recording(&self) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        st.calls.push("start_recording");
        st.recording = true;
        Ok(())
    }

    fn stop_recording(&self) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        st.calls.push("stop_recording");
        st.recording = false;
        Ok(())
    }

    fn start_streaming(&self) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        st.calls.push("start_streaming");
        st.streaming = true;
        Ok(())
    }

    fn stop_streaming(&self) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        st.calls.push("stop_streaming");
        st.streaming = false;
        Ok(())
    }

    fn is_started(&self) -> bool {
        let mut st = self.state.lock().unwrap();
        if st.started && st.warmup_polls > 0 {
            st.warmup_polls -= 1;
            return false;
        }
        st.started
    }

    fn is_recording(&self) -> bool {
        self.state.lock().unwrap().recording
    }
}

#[derive(Debug, Default)]
pub struct FakeRuntimeState {
    pub connected: bool,
    pub hmi: bool,
    pub mode: Option<String>,
    pub applied: Vec<String>,
}

#[derive(Debug, Default)]
pub struct FakeRuntime {
    pub state: Mutex<FakeRuntimeState>,
}

impl FakeRuntime {
    pub fn connected(mode: &str) -> Arc<Self> {
        let rt = Self::default();
        {
            let mut st = rt.state.lock().unwrap();
            st.connected = true;
            st.mode = Some(mode.to_string());
        }
        Arc::new(rt)
    }

    pub fn applied(&self) -> Vec<String> {
        self.state.lock().unwrap().applied.clone()
    }

    pub fn set_hmi(&self, hmi: bool) {
        self.state.lock().unwrap().hmi = hmi;
    }

    pub fn set_connected(&self, connected: bool) {
        self.state.lock().unwrap().connected = connected;
    }
}

impl VehicleRuntime for FakeRuntime {
    fn is_vehicle_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    fn is_hmi_device_connected(&self) -> bool {
        self.state.lock().unwrap().hmi
    }

    fn vehicle_mode(&self) -> Option<String> {
        self.state.lock().unwrap().mode.clone()
    }

    fn set_vehicle_mode(&self, mode: &str) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        st.applied.push(mode.to_string());
        st.mode = Some(mode.to_string());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FakePower {
    pub diagnostics: Mutex<Vec<String>>,
    pub executed: Mutex<Vec<ExitKind>>,
}

impl PowerControl for FakePower {
    fn diagnostic(&self, _kind: ExitKind, message: &str) {
        self.diagnostics.lock().unwrap().push(message.to_string());
    }

    fn execute(&self, kind: ExitKind) -> Result<()> {
        self.executed.lock().unwrap().push(kind);
        Ok(())
    }
}

/// Paused-clock tests: `t0` to now lies within `[secs, secs + 1)`.
pub fn assert_elapsed(t0: Instant, secs: u64) {
    let e = t0.elapsed();
    assert!(e >= Duration::from_secs(secs) && e < Duration::from_secs(secs + 1), "elapsed {:?}", e);
}
