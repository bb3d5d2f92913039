//! Typed surface over the `zpool` and `zfs` command-line tools.
//!
//! Only scripted output modes are used (`-H -o ...`): one record per line,
//! tab-separated fields. Anything else is reported as `MalformedOutput`.

use crate::command::{CommandRunner, CommandRunnerExt, CommandSpec};
use crate::error::{RescueError, Result};
use serde::Serialize;
use std::path::Path;

/// Encryption key state of a dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Available,
    Unavailable,
    /// Dataset is not encrypted (`-`)
    None,
}

impl KeyStatus {
    fn parse(command: &str, value: &str) -> Result<Self> {
        match value {
            "available" => Ok(KeyStatus::Available),
            "unavailable" => Ok(KeyStatus::Unavailable),
            "-" => Ok(KeyStatus::None),
            other => Err(RescueError::MalformedOutput {
                command: command.to_string(),
                detail: format!("unknown keystatus '{}'", other),
            }),
        }
    }
}

/// Parse one name per line, rejecting lines with more than one field
pub fn parse_names(command: &str, stdout: &str) -> Result<Vec<String>> {
    stdout
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            if line.contains('\t') {
                Err(RescueError::MalformedOutput {
                    command: command.to_string(),
                    detail: format!("expected a single name, got '{}'", line),
                })
            } else {
                Ok(line.to_string())
            }
        })
        .collect()
}

/// Parse the output of a single-property `-H -o value` query
pub fn parse_single_value(command: &str, stdout: &str) -> Result<String> {
    let mut lines = stdout.lines().filter(|line| !line.trim().is_empty());
    let malformed = |detail: String| RescueError::MalformedOutput {
        command: command.to_string(),
        detail,
    };

    let value = lines.next().ok_or_else(|| malformed("empty output".to_string()))?;
    if lines.next().is_some() {
        return Err(malformed("expected exactly one line".to_string()));
    }
    if value.contains('\t') {
        return Err(malformed(format!("expected one field, got '{}'", value)));
    }
    Ok(value.trim().to_string())
}

/// Pool names from the human-readable `zpool import` listing
pub fn parse_importable(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| line.trim().strip_prefix("pool:"))
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

/// Pool and dataset operations
pub struct Zfs<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> Zfs<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    /// Pools currently in the import table
    pub fn imported_pools(&self) -> Result<Vec<String>> {
        let cmd = CommandSpec::new("zpool").args(["list", "-H", "-o", "name"]);
        let output = self.runner.run_mandatory(&cmd)?;
        parse_names(&cmd.to_string(), &output.stdout)
    }

    /// Pools visible on attached devices but not yet imported.
    ///
    /// `zpool import` exits non-zero when nothing is importable, which is
    /// reported as an empty list.
    pub fn importable_pools(&self) -> Result<Vec<String>> {
        let output = self.runner.run(&CommandSpec::new("zpool").arg("import"))?;
        if !output.success() {
            return Ok(Vec::new());
        }
        Ok(parse_importable(&output.stdout))
    }

    pub fn is_imported(&self, pool: &str) -> Result<bool> {
        Ok(self.imported_pools()?.iter().any(|name| name == pool))
    }

    /// Force-import without mounting any dataset
    pub fn import(&self, pool: &str) -> Result<()> {
        self.runner
            .run_mandatory(&CommandSpec::new("zpool").args(["import", "-f", "-N", pool]))?;
        Ok(())
    }

    pub fn export_command(pool: &str) -> CommandSpec {
        CommandSpec::new("zpool").args(["export", pool])
    }

    /// Read one property value of a dataset
    pub fn get(&self, dataset: &str, property: &str) -> Result<String> {
        let cmd = CommandSpec::new("zfs").args(["get", "-H", "-o", "value", property, dataset]);
        let output = self.runner.run_mandatory(&cmd)?;
        parse_single_value(&cmd.to_string(), &output.stdout)
    }

    pub fn keystatus(&self, dataset: &str) -> Result<KeyStatus> {
        let value = self.get(dataset, "keystatus")?;
        KeyStatus::parse(&format!("zfs get keystatus {}", dataset), &value)
    }

    /// Load a dataset key, from a file or from the terminal
    pub fn load_key(&self, dataset: &str, key_file: Option<&Path>) -> Result<()> {
        let cmd = match key_file {
            Some(path) => CommandSpec::new("zfs").args([
                "load-key".to_string(),
                "-L".to_string(),
                format!("file://{}", path.display()),
                dataset.to_string(),
            ]),
            None => CommandSpec::new("zfs").args(["load-key", dataset]).interactive(),
        };
        self.runner.run_mandatory(&cmd)?;
        Ok(())
    }

    /// The pool's `bootfs` property, `None` when unset
    pub fn bootfs(&self, pool: &str) -> Result<Option<String>> {
        let cmd = CommandSpec::new("zpool").args(["get", "-H", "-o", "value", "bootfs", pool]);
        let output = self.runner.run_mandatory(&cmd)?;
        if output.stdout.trim().is_empty() {
            return Ok(None);
        }
        let value = parse_single_value(&cmd.to_string(), &output.stdout)?;
        if value == "-" { Ok(None) } else { Ok(Some(value)) }
    }

    /// Non-snapshot filesystems of a pool, pool root included
    pub fn filesystems(&self, pool: &str) -> Result<Vec<String>> {
        let cmd = CommandSpec::new("zfs").args(["list", "-H", "-o", "name", "-t", "filesystem", "-r", pool]);
        let output = self.runner.run_mandatory(&cmd)?;
        parse_names(&cmd.to_string(), &output.stdout)
    }

    pub fn mountpoint(&self, dataset: &str) -> Result<String> {
        self.get(dataset, "mountpoint")
    }

    pub fn set_mountpoint(&self, dataset: &str, mountpoint: &Path) -> Result<()> {
        self.runner.run_mandatory(&CommandSpec::new("zfs").args([
            "set".to_string(),
            format!("mountpoint={}", mountpoint.display()),
            dataset.to_string(),
        ]))?;
        Ok(())
    }

    pub fn is_mounted(&self, dataset: &str) -> Result<bool> {
        Ok(self.get(dataset, "mounted")? == "yes")
    }

    pub fn mount(&self, dataset: &str) -> Result<()> {
        self.runner.run_mandatory(&CommandSpec::new("zfs").args(["mount", dataset]))?;
        Ok(())
    }
}
