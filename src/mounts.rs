//! Plain (non-ZFS) mount handling: block devices, bind mounts, teardown.

use crate::command::{CommandRunner, CommandRunnerExt, CommandSpec};
use crate::error::Result;
use std::path::Path;

/// Mount operations on the host
pub struct Mounts<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> Mounts<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    /// True if `path` is currently a mount point
    pub fn is_mountpoint(&self, path: &Path) -> Result<bool> {
        self.runner.probe(&CommandSpec::new("mountpoint").args([
            "-q".to_string(),
            path.display().to_string(),
        ]))
    }

    /// Mount a block device on `target`
    pub fn mount_device(&self, device: &str, target: &Path) -> Result<()> {
        self.runner.run_mandatory(
            &CommandSpec::new("mount").args([device.to_string(), target.display().to_string()]),
        )?;
        Ok(())
    }

    /// Recursively bind `source` onto `target` and make it a slave mount
    pub fn rbind_slave(&self, source: &Path, target: &Path) -> Result<()> {
        let target = target.display().to_string();
        self.runner.run_mandatory(&CommandSpec::new("mount").args([
            "--rbind".to_string(),
            source.display().to_string(),
            target.clone(),
        ]))?;
        self.runner
            .run_mandatory(&CommandSpec::new("mount").args(["--make-rslave".to_string(), target]))?;
        Ok(())
    }

    /// `umount -R <path>`
    pub fn unmount_command(path: &Path) -> CommandSpec {
        CommandSpec::new("umount").args(["-R".to_string(), path.display().to_string()])
    }

    /// Recursively unmount everything at and below `path`
    pub fn unmount_recursive(&self, path: &Path) -> Result<()> {
        self.runner.run_mandatory(&Self::unmount_command(path))?;
        Ok(())
    }
}
