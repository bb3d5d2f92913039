//! LUKS keystore handling via `cryptsetup`.

use crate::command::{CommandRunner, CommandRunnerExt, CommandSpec};
use crate::error::Result;
use std::path::{Path, PathBuf};

/// Device-mapper operations for the keystore volume
pub struct Cryptsetup<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> Cryptsetup<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    /// `/dev/mapper/<name>`
    pub fn mapper_path(name: &str) -> PathBuf {
        PathBuf::from("/dev/mapper").join(name)
    }

    /// True if a mapping with this name is active
    pub fn is_open(&self, name: &str) -> Result<bool> {
        self.runner.probe(&CommandSpec::new("cryptsetup").args(["status", name]))
    }

    /// Open `device` as `name`; the passphrase is read from the terminal
    pub fn open(&self, device: &Path, name: &str) -> Result<()> {
        self.runner.run_mandatory(
            &CommandSpec::new("cryptsetup")
                .args(["open".to_string(), device.display().to_string(), name.to_string()])
                .interactive(),
        )?;
        Ok(())
    }

    pub fn close_command(name: &str) -> CommandSpec {
        CommandSpec::new("cryptsetup").args(["close", name])
    }
}
