pub mod doctor;
pub mod gst;

use anyhow::Result;
use serde::Serialize;

pub use gst::GstCamera;

pub const DEFAULT_CAMERA_BINARY: &str = "/usr/local/bin/gst-start-camera";

/// Capability set of the onboard camera. Every operation may fail; callers
/// decide whether a failure matters.
///
/// Streaming and recording are independent sub-states of a started camera.
pub trait Camera: Send + Sync {
    fn start(&self) -> Result<()>;
    fn stop(&self) -> Result<()>;
    fn start_recording(&self) -> Result<()>;
    fn stop_recording(&self) -> Result<()>;
    fn start_streaming(&self) -> Result<()>;
    fn stop_streaming(&self) -> Result<()>;
    fn is_started(&self) -> bool;
    fn is_recording(&self) -> bool;
}

#[derive(Debug, Clone, Serialize)]
pub struct CameraConfig {
    /// Launcher for the capture pipeline; receives control lines on stdin.
    pub binary: String,
    /// Camera process output is appended here.
    pub log_file: String,
}

impl CameraConfig {
    /// `camera_params.LOG_FILE` is mandatory: without it there is no camera.
    pub fn from_params(root: &serde_json::Value) -> Result<Self> {
        let log_file = copter_proto::params::str_param(root, "camera_params.LOG_FILE")
            .ok_or_else(|| anyhow::anyhow!("camera_params.LOG_FILE missing"))?;
        let binary = copter_proto::params::str_param(root, "camera_params.BINARY")
            .unwrap_or_else(|| DEFAULT_CAMERA_BINARY.to_string());
        Ok(Self { binary, log_file })
    }
}
