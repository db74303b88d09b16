use serde::Serialize;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SupervisorState {
    pub vehicle_connected: bool,
    pub hmi_connected: bool,
    pub peer_connected: bool,
    pub camera_auto_start: bool,
    pub failsafe_enabled: bool,
    pub failsafe_running: bool,
    pub failsafe_cancel_requested: bool,
    pub current_vehicle_mode: Option<String>,
}

/// Why a failsafe run was or was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailsafeAdmission {
    Started,
    Disabled,
    AtFinalMode,
    AlreadyRunning,
}

/// The single synchronisation point for supervisor flags. Every
/// check-then-act happens inside one critical section.
#[derive(Debug, Default)]
pub struct SharedState {
    inner: Mutex<SupervisorState>,
}

impl SharedState {
    pub fn new(camera_auto_start: bool, failsafe_enabled: bool) -> Self {
        Self {
            inner: Mutex::new(SupervisorState {
                camera_auto_start,
                failsafe_enabled,
                ..SupervisorState::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SupervisorState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> SupervisorState {
        self.lock().clone()
    }

    pub fn observe_vehicle(&self, connected: bool, hmi_connected: bool, mode: Option<String>) {
        let mut st = self.lock();
        st.vehicle_connected = connected;
        st.hmi_connected = hmi_connected;
        if mode.is_some() {
            st.current_vehicle_mode = mode;
        }
    }

    /// Returns the previous value.
    pub fn set_peer_connected(&self, connected: bool) -> bool {
        std::mem::replace(&mut self.lock().peer_connected, connected)
    }

    pub fn try_begin_failsafe(&self, current_mode: Option<String>, final_mode: &str) -> FailsafeAdmission {
        let mut st = self.lock();
        if current_mode.is_some() {
            st.current_vehicle_mode = current_mode;
        }
        if !st.failsafe_enabled {
            return FailsafeAdmission::Disabled;
        }
        if st.current_vehicle_mode.as_deref() == Some(final_mode) {
            return FailsafeAdmission::AtFinalMode;
        }
        if st.failsafe_running {
            return FailsafeAdmission::AlreadyRunning;
        }
        st.failsafe_running = true;
        st.failsafe_cancel_requested = false;
        FailsafeAdmission::Started
    }

    /// Returns true when a running sequence was asked to stop.
    pub fn request_failsafe_cancel(&self) -> bool {
        let mut st = self.lock();
        if st.failsafe_running {
            st.failsafe_cancel_requested = true;
        }
        st.failsafe_running
    }

    pub fn failsafe_cancel_requested(&self) -> bool {
        self.lock().failsafe_cancel_requested
    }

    pub fn record_mode(&self, mode: &str) {
        self.lock().current_vehicle_mode = Some(mode.to_string());
    }

    pub fn finish_failsafe(&self) {
        let mut st = self.lock();
        st.failsafe_running = false;
        st.failsafe_cancel_requested = false;
    }
}
