use anyhow::Result;
use std::path::Path;

use crate::CameraConfig;

pub fn check_camera(cfg: &CameraConfig) -> Result<()> {
    let bin = Path::new(&cfg.binary);
    anyhow::ensure!(bin.is_file(), "camera_params.BINARY not found: {}", cfg.binary);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(bin)?.permissions().mode();
        anyhow::ensure!(mode & 0o111 != 0, "camera binary not executable: {}", cfg.binary);
    }
    if let Some(dir) = Path::new(&cfg.log_file).parent() {
        anyhow::ensure!(
            dir.as_os_str().is_empty() || dir.is_dir(),
            "camera log directory missing: {}",
            dir.display()
        );
    }
    Ok(())
}
