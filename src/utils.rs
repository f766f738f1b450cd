//! XDG directory helpers
//!
//! # Directory Structure
//!
//! - Data: `~/.local/share/vpnfw/` - Configuration (`config.json`)
//! - State: `~/.local/state/vpnfw/` - Audit log and the optional log file
//!
//! When running as root these resolve under root's home, which is where the
//! operator binary normally runs.

use directories::ProjectDirs;
use std::path::PathBuf;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("net", "vpnfw", "vpnfw")
}

pub fn get_data_dir() -> Option<PathBuf> {
    project_dirs().map(|pd| pd.data_dir().to_path_buf())
}

pub fn get_state_dir() -> Option<PathBuf> {
    project_dirs().and_then(|pd| pd.state_dir().map(std::path::Path::to_path_buf))
}

/// Creates the data and state directories with mode 0700
pub fn ensure_dirs() -> std::io::Result<()> {
    use std::fs::DirBuilder;
    use std::os::unix::fs::DirBuilderExt;

    let mut builder = DirBuilder::new();
    builder.mode(0o700);
    builder.recursive(true);

    if let Some(dir) = get_data_dir() {
        builder.create(dir)?;
    }
    if let Some(dir) = get_state_dir() {
        builder.create(dir)?;
    }
    Ok(())
}
