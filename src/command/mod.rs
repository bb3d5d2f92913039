//! Command execution layer
//!
//! This module provides:
//! - `CommandSpec`, a typed command line (program, argv, env, stdio mode)
//! - `CommandOutput`, the structured result of one execution
//! - `CommandRunner` trait for executing commands against the host
//! - `CommandRunnerExt` with mandatory / lenient / probe execution policies
//! - `SystemRunner` (std::process) and `MockRunner` (scripted) implementations

use crate::error::{RescueError, Result};
use log::warn;
use std::fmt;

pub mod mock;
pub mod system;

pub use mock::MockRunner;
pub use system::SystemRunner;

/// A single external command invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program name or path
    pub program: String,
    /// Argument vector (without the program)
    pub args: Vec<String>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
    /// Inherit the terminal instead of capturing output (passphrase prompts)
    pub interactive: bool,
}

impl CommandSpec {
    /// Create a new command for the given program
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            interactive: false,
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add an environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Run with the terminal attached
    pub fn interactive(mut self) -> Self {
        self.interactive = true;
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Exit status and captured output of a command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (None if killed by a signal)
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Successful exit with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed exit with the given code and stderr
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// True when the command exited with status 0
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Executes commands against the host.
///
/// Implementations return `Ok` for any command that ran, whatever its exit
/// status; `Err` is reserved for commands that could not be started.
pub trait CommandRunner {
    fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput>;
}

/// Execution policies layered over any runner
pub trait CommandRunnerExt: CommandRunner {
    /// Run a command whose failure must abort the caller
    fn run_mandatory(&self, cmd: &CommandSpec) -> Result<CommandOutput> {
        let output = self.run(cmd)?;
        if output.success() {
            Ok(output)
        } else {
            Err(RescueError::CommandFailed {
                command: cmd.to_string(),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    /// Run a command whose failure is only a warning.
    ///
    /// The error is logged here; callers record it and carry on.
    fn run_lenient(&self, cmd: &CommandSpec) -> Result<CommandOutput> {
        let result = self.run_mandatory(cmd);
        if let Err(e) = &result {
            warn!("non-fatal command failure: {}", e);
        }
        result
    }

    /// Run a yes/no probe (`mountpoint -q`, `test -e`); exit status is the answer
    fn probe(&self, cmd: &CommandSpec) -> Result<bool> {
        Ok(self.run(cmd)?.success())
    }
}

impl<T: CommandRunner + ?Sized> CommandRunnerExt for T {}
