use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::{error, info};

/// Pin CPU/GPU/EMC clocks at their static maximum and log the result.
/// Failures are logged; the supervisor runs either way.
pub async fn init_system_clocks() {
    info!("Setting up static max frequency to CPU, GPU and EMC clocks...");
    match pin_clocks().await {
        Ok(lines) => {
            for line in lines {
                info!("\t{}", line);
            }
        }
        Err(e) => error!("Error configuring system clocks ({:#})", e),
    }
}

async fn pin_clocks() -> Result<Vec<String>> {
    let out = Command::new("jetson_clocks").output().await.context("run jetson_clocks")?;
    let err = String::from_utf8_lossy(&out.stderr);
    anyhow::ensure!(out.status.success() && err.trim().is_empty(), "{}", err.trim());

    let out = Command::new("jetson_clocks")
        .arg("--show")
        .output()
        .await
        .context("run jetson_clocks --show")?;
    Ok(non_empty_lines(&String::from_utf8_lossy(&out.stdout)))
}

fn non_empty_lines(s: &str) -> Vec<String> {
    s.lines().filter(|l| !l.trim().is_empty()).map(String::from).collect()
}
