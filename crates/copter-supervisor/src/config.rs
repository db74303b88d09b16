use anyhow::{Context, Result};
use copter_proto::params;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

/// One failsafe stage: switch to `mode` once `timeout_s` has elapsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModeStep {
    pub mode: String,
    pub timeout_s: i64,
}

/// Ordered failsafe stages, parsed from a flat `[mode, timeout, mode, timeout, ...]` list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FailsafeSequence {
    steps: Vec<ModeStep>,
    final_mode: Option<String>,
}

impl FailsafeSequence {
    pub fn parse(items: &[Value]) -> Result<Self> {
        anyhow::ensure!(items.len() % 2 == 0, "odd number of entries ({})", items.len());

        let steps = items
            .chunks_exact(2)
            .enumerate()
            .map(|(i, pair)| {
                let mode = pair[0]
                    .as_str()
                    .with_context(|| format!("entry {}: mode name must be a string", 2 * i))?;
                let timeout_s = pair[1]
                    .as_i64()
                    .with_context(|| format!("entry {}: timeout must be an integer", 2 * i + 1))?;
                Ok(ModeStep { mode: mode.to_string(), timeout_s })
            })
            .collect::<Result<Vec<_>>>()?;

        // The mode before the last one is where a renewed disconnect stops
        // re-triggering; the last entry is the terminal hold.
        let final_mode = steps.len().checked_sub(2).map(|i| steps[i].mode.clone());
        Ok(Self { steps, final_mode })
    }

    pub fn steps(&self) -> &[ModeStep] {
        &self.steps
    }

    pub fn final_mode(&self) -> Option<&str> {
        self.final_mode.as_deref()
    }

    /// Runnable only with a final mode, i.e. at least two stages.
    pub fn is_runnable(&self) -> bool {
        self.final_mode.is_some()
    }
}

pub const DEFAULT_CAMERA_START_TIMEOUT: Duration = Duration::from_secs(60);

/// Read-only view of the startup configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSnapshot {
    pub camera_auto_start: bool,
    pub failsafe_enabled: bool,
    pub failsafe_sequence: FailsafeSequence,
    pub camera_log_file: Option<String>,
    pub log_file: Option<String>,
    /// Bound on waiting for a peer-triggered camera start.
    pub camera_start_timeout: Duration,
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        Self {
            camera_auto_start: false,
            failsafe_enabled: false,
            failsafe_sequence: FailsafeSequence::default(),
            camera_log_file: None,
            log_file: None,
            camera_start_timeout: DEFAULT_CAMERA_START_TIMEOUT,
        }
    }
}

impl ConfigSnapshot {
    pub fn from_params(root: &Value) -> Self {
        let failsafe_enabled =
            params::bool_param(root, "network_watchdog_params.NETWORK_FAILSAFE_ENABLED", false);

        let failsafe_sequence =
            match params::array_param(root, "network_watchdog_params.NETWORK_FAILSAFE_MODES_SEQUENCE") {
                None => FailsafeSequence::default(),
                Some(items) => FailsafeSequence::parse(items).unwrap_or_else(|e| {
                    warn!("failsafe mode sequence ignored: {:#}", e);
                    FailsafeSequence::default()
                }),
            };
        if failsafe_enabled && !failsafe_sequence.is_runnable() {
            warn!("network failsafe enabled but the mode sequence has fewer than two stages; failsafe inert");
        }

        Self {
            camera_auto_start: params::bool_param(root, "camera_params.CAMERA_AUTOSTART", false),
            failsafe_enabled,
            failsafe_sequence,
            camera_log_file: params::str_param(root, "camera_params.LOG_FILE"),
            log_file: params::str_param(root, "log_params.LOG_FILE"),
            camera_start_timeout: Duration::from_secs(params::u64_param(
                root,
                "camera_params.START_TIMEOUT_S",
                DEFAULT_CAMERA_START_TIMEOUT.as_secs(),
            )),
        }
    }
}
