use anyhow::Result;

use crate::{mav, modes, MavlinkConfig};

pub fn check_mavlink(cfg: &MavlinkConfig) -> Result<()> {
    match &cfg.connection {
        Some(addr) if addr.starts_with("serial:") => {
            anyhow::ensure!(mav::parse_serial(addr).is_some(), "mavlink_params.CONNECTION should be serial:<dev>:<baud>");
        }
        Some(addr) => {
            anyhow::ensure!(addr.contains(':'), "mavlink_params.CONNECTION invalid: {}", addr);
        }
        None => {
            anyhow::ensure!(!cfg.candidate_devs.is_empty(), "mavlink_params.CANDIDATE_DEVS empty");
            anyhow::ensure!(!cfg.candidate_bauds.is_empty(), "mavlink_params.CANDIDATE_BAUDS empty");
        }
    }
    anyhow::ensure!(cfg.ids.sys_id > 0, "mavlink_params.SYS_ID must be > 0");
    Ok(())
}

pub fn check_modes<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<()> {
    for name in names {
        anyhow::ensure!(modes::mode_number(name).is_some(), "unknown ArduCopter mode {}", name);
    }
    Ok(())
}
