use anyhow::Result;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::mav::{is_autopilot_heartbeat, serial_address, FcLink};
use crate::MavIds;

#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub dev: String,
    pub baud: u32,
    pub hb_seen: bool,
    pub elapsed_ms: u64,
    pub note: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AutodetectResult {
    pub chosen: Option<(String, u32)>,
    pub probes: Vec<ProbeResult>,
}

pub fn default_candidate_devs() -> Vec<String> {
    vec![
        "/dev/ttyTHS1".into(),
        "/dev/ttyTHS0".into(),
        "/dev/ttyUSB0".into(),
        "/dev/ttyUSB1".into(),
        "/dev/ttyACM0".into(),
        "/dev/ttyACM1".into(),
    ]
}

pub fn default_candidate_bauds() -> Vec<u32> {
    vec![921600, 57600, 115200, 230400]
}

/// Probe candidate serial ports/bauds and pick the first one that yields an
/// autopilot HEARTBEAT. Blocking.
pub fn autodetect_fc(
    candidate_devs: &[String],
    candidate_bauds: &[u32],
    heartbeat_timeout: Duration,
    ids: MavIds,
) -> Result<AutodetectResult> {
    let mut probes = Vec::new();

    for dev in candidate_devs {
        for &baud in candidate_bauds {
            let start = Instant::now();
            let mut hb_seen = false;

            let note = match FcLink::open(&serial_address(dev, baud), ids) {
                Ok(link) => {
                    while start.elapsed() < heartbeat_timeout {
                        match link.recv() {
                            Ok((_, mavlink::common::MavMessage::HEARTBEAT(hb)))
                                if is_autopilot_heartbeat(&hb) =>
                            {
                                hb_seen = true;
                                break;
                            }
                            Ok(_) => {}
                            Err(_) => std::thread::sleep(Duration::from_millis(25)),
                        }
                    }
                    if hb_seen { "heartbeat".to_string() } else { "no heartbeat".to_string() }
                }
                Err(e) => {
                    warn!("fc autodetect probe failed dev={} baud={} err={:#}", dev, baud, e);
                    format!("open/connect failed: {:#}", e)
                }
            };

            probes.push(ProbeResult {
                dev: dev.clone(),
                baud,
                hb_seen,
                elapsed_ms: start.elapsed().as_millis() as u64,
                note,
            });

            if hb_seen {
                info!("fc autodetect: OK {} @ {}", dev, baud);
                return Ok(AutodetectResult { chosen: Some((dev.clone(), baud)), probes });
            }
        }
    }

    Ok(AutodetectResult { chosen: None, probes })
}

/// Address to connect to: the configured one, or the autodetected serial port.
pub fn resolve_address(cfg: &crate::MavlinkConfig) -> Result<String> {
    if let Some(addr) = &cfg.connection {
        return Ok(addr.clone());
    }
    let res = autodetect_fc(&cfg.candidate_devs, &cfg.candidate_bauds, cfg.heartbeat_timeout, cfg.ids)?;
    match res.chosen {
        Some((dev, baud)) => Ok(serial_address(&dev, baud)),
        None => anyhow::bail!("fc autodetect failed: no heartbeat found"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_candidates_chooses_nothing() {
        let res = autodetect_fc(&[], &default_candidate_bauds(), Duration::from_millis(10), MavIds::default())
            .unwrap();
        assert!(res.chosen.is_none());
        assert!(res.probes.is_empty());
    }

    #[test]
    fn unopenable_device_is_recorded() {
        let devs = vec!["/dev/copter-does-not-exist".to_string()];
        let res = autodetect_fc(&devs, &[57600], Duration::from_millis(10), MavIds::default()).unwrap();
        assert!(res.chosen.is_none());
        assert_eq!(res.probes.len(), 1);
        assert!(!res.probes[0].hb_seen);
        assert!(res.probes[0].note.starts_with("open/connect failed"));
    }
}
