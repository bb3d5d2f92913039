//! Runner that executes commands on the live host

use super::{CommandOutput, CommandRunner, CommandSpec};
use crate::error::{RescueError, Result};
use log::debug;
use std::process::{Command, Stdio};

/// Executes commands with `std::process::Command`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput> {
        debug!("exec: {}", cmd);

        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args);
        for (key, value) in &cmd.env {
            command.env(key, value);
        }

        let spawn_err = |source| RescueError::Spawn {
            command: cmd.to_string(),
            source,
        };

        if cmd.interactive {
            // Passphrase prompts need the terminal; nothing is captured.
            let status = command
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .status()
                .map_err(spawn_err)?;
            debug!("exit: {:?} ({})", status.code(), cmd);
            return Ok(CommandOutput {
                code: status.code(),
                stdout: String::new(),
                stderr: String::new(),
            });
        }

        let output = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(spawn_err)?;

        debug!("exit: {:?} ({})", output.status.code(), cmd);
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
