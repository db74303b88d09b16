use anyhow::Result;

use crate::config::ConfigSnapshot;

pub fn check_failsafe(snap: &ConfigSnapshot) -> Result<()> {
    if !snap.failsafe_enabled {
        return Ok(());
    }
    let seq = &snap.failsafe_sequence;
    anyhow::ensure!(
        seq.is_runnable(),
        "network failsafe enabled but NETWORK_FAILSAFE_MODES_SEQUENCE needs >= 2 (mode, timeout) pairs"
    );
    for step in seq.steps() {
        anyhow::ensure!(step.timeout_s >= 0, "failsafe stage {} has a negative timeout", step.mode);
    }
    Ok(())
}
