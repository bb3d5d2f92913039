//! State shared by the steps of one recovery run.

use super::context::{Journal, RecoveryContext};
use crate::command::CommandRunner;
use crate::config::Config;
use crate::error::{RescueError, Result};
use crate::output::Console;
use crate::registry::RegistryGuard;
use crate::resolver::{Overrides, PoolSelection, Prompter};
use log::{info, warn};
use std::path::PathBuf;

/// Collaborators plus the progressively filled-in run state
pub struct Session<'a> {
    pub runner: &'a dyn CommandRunner,
    pub prompter: &'a dyn Prompter,
    pub console: &'a Console,
    pub config: &'a Config,
    pub overrides: Overrides,
    /// Key file given on the command line
    pub key_file: Option<PathBuf>,
    pub registry: RegistryGuard<'a>,
    pub selection: Option<PoolSelection>,
    pub context: Option<RecoveryContext>,
    pub journal: Journal,
}

impl<'a> Session<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        prompter: &'a dyn Prompter,
        console: &'a Console,
        config: &'a Config,
        overrides: Overrides,
        key_file: Option<PathBuf>,
    ) -> Self {
        Self {
            runner,
            prompter,
            console,
            config,
            overrides,
            key_file,
            registry: RegistryGuard::new(runner),
            selection: None,
            context: None,
            journal: Journal::default(),
        }
    }

    /// The resolved pool selection
    pub fn selection(&self) -> Result<PoolSelection> {
        self.selection
            .clone()
            .ok_or_else(|| RescueError::NotFound("pool selection has not been resolved".to_string()))
    }

    /// The identified recovery context
    pub fn context(&self) -> Result<RecoveryContext> {
        self.context
            .clone()
            .ok_or_else(|| RescueError::NotFound("datasets have not been identified".to_string()))
    }

    /// Record work that was already done
    pub fn notice(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.console.notice(&message);
        self.journal.notices.push(message);
    }

    /// Record a tolerated failure
    pub fn warning(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.console.warn(&message);
        self.journal.warnings.push(message);
    }
}
