//! Scripted runner for tests
//!
//! Responses are matched by command-line prefix; the most recently added
//! matching rule wins. Unmatched commands succeed with empty output.

use super::{CommandOutput, CommandRunner, CommandSpec};
use crate::error::Result;
use std::cell::RefCell;

/// Runner that records every call and replays canned responses
#[derive(Debug, Default)]
pub struct MockRunner {
    rules: RefCell<Vec<(String, CommandOutput)>>,
    calls: RefCell<Vec<String>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with `output` to any command line starting with `prefix`
    pub fn respond(&self, prefix: impl Into<String>, output: CommandOutput) -> &Self {
        self.rules.borrow_mut().push((prefix.into(), output));
        self
    }

    /// Reply with successful `stdout` to commands starting with `prefix`
    pub fn stdout(&self, prefix: impl Into<String>, stdout: impl Into<String>) -> &Self {
        self.respond(prefix, CommandOutput::ok(stdout))
    }

    /// Fail commands starting with `prefix`
    pub fn fail(&self, prefix: impl Into<String>, code: i32, stderr: impl Into<String>) -> &Self {
        self.respond(prefix, CommandOutput::failed(code, stderr))
    }

    /// Every command line executed so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    /// Number of executed command lines starting with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.calls.borrow().iter().filter(|c| c.starts_with(prefix)).count()
    }
}

impl CommandRunner for MockRunner {
    fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput> {
        let line = cmd.to_string();
        self.calls.borrow_mut().push(line.clone());

        let rules = self.rules.borrow();
        let output = rules
            .iter()
            .rev()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_else(|| CommandOutput::ok(""));
        Ok(output)
    }
}
