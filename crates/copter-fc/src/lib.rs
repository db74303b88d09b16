pub mod autodetect;
pub mod doctor;
pub mod mav;
pub mod modes;
pub mod runtime;
pub mod state;
pub mod watchdog;

use copter_proto::params;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

pub use runtime::MavRuntime;

/// MAVLink ids. 191 is MAV_COMP_ID_ONBOARD_COMPUTER.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MavIds {
    pub sys_id: u8,
    pub comp_id: u8,
    /// Autopilot side; 1/1 is the ArduPilot default.
    pub target_sys: u8,
    pub target_comp: u8,
}

impl Default for MavIds {
    fn default() -> Self {
        Self { sys_id: 1, comp_id: 191, target_sys: 1, target_comp: 1 }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MavlinkConfig {
    /// mavlink address (`serial:/dev/ttyTHS1:921600`, `udpin:0.0.0.0:14550`, ...).
    /// `None` means autodetect a serial port.
    pub connection: Option<String>,
    pub candidate_devs: Vec<String>,
    pub candidate_bauds: Vec<u32>,
    pub heartbeat_timeout: Duration,
    pub ids: MavIds,
    /// GCS heartbeat silence after which the peer counts as gone.
    pub peer_timeout: Duration,
}

impl MavlinkConfig {
    pub fn from_params(root: &Value) -> Self {
        let candidate_devs = params::array_param(root, "mavlink_params.CANDIDATE_DEVS")
            .map(|items| items.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_else(autodetect::default_candidate_devs);
        let candidate_bauds = params::array_param(root, "mavlink_params.CANDIDATE_BAUDS")
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_u64().and_then(|b| u32::try_from(b).ok()))
                    .collect()
            })
            .unwrap_or_else(autodetect::default_candidate_bauds);

        let defaults = MavIds::default();
        let id = |key: &str, default: u8| {
            u8::try_from(params::u64_param(root, key, default as u64)).unwrap_or(default)
        };

        Self {
            connection: params::str_param(root, "mavlink_params.CONNECTION"),
            candidate_devs,
            candidate_bauds,
            heartbeat_timeout: Duration::from_millis(params::u64_param(
                root,
                "mavlink_params.HEARTBEAT_TIMEOUT_MS",
                1500,
            )),
            ids: MavIds {
                sys_id: id("mavlink_params.SYS_ID", defaults.sys_id),
                comp_id: id("mavlink_params.COMP_ID", defaults.comp_id),
                target_sys: id("mavlink_params.TARGET_SYS", defaults.target_sys),
                target_comp: id("mavlink_params.TARGET_COMP", defaults.target_comp),
            },
            peer_timeout: Duration::from_secs(
                params::u64_param(root, "network_watchdog_params.PEER_TIMEOUT_S", 5).max(1),
            ),
        }
    }
}
