//! Checks that must pass before any host state is touched.

use crate::error::{RescueError, Result};
use log::debug;
use rustix::process::geteuid;
use std::path::Path;

/// Tools the recovery run shells out to
pub const RECOVER_TOOLS: &[&str] = &["zpool", "zfs", "mount", "umount", "mountpoint", "chroot"];

/// Tools the keystore unlock shells out to
pub const UNLOCK_TOOLS: &[&str] = &["zpool", "zfs", "mount", "umount", "mountpoint", "cryptsetup"];

/// Fail unless running with effective uid 0
pub fn ensure_root() -> Result<()> {
    let euid = geteuid();
    if !euid.is_root() {
        return Err(RescueError::Prerequisite(format!(
            "must run as root (effective uid is {})",
            euid.as_raw()
        )));
    }
    Ok(())
}

/// Fail if any of `tools` is not on PATH
pub fn ensure_tools(tools: &[&str]) -> Result<()> {
    let missing: Vec<&str> = tools
        .iter()
        .copied()
        .filter(|tool| match which::which(tool) {
            Ok(path) => {
                debug!("found {} at {}", tool, path.display());
                false
            }
            Err(_) => true,
        })
        .collect();

    if !missing.is_empty() {
        return Err(RescueError::Prerequisite(format!(
            "missing required commands: {}",
            missing.join(", ")
        )));
    }
    Ok(())
}

/// Fail unless `path` is an existing regular file
pub fn ensure_key_file(path: &Path) -> Result<()> {
    if !path.is_file() {
        return Err(RescueError::Prerequisite(format!("key file not found: {}", path.display())));
    }
    Ok(())
}
