//! Interactive resolver: fills in pool names, the EFI partition and the
//! datasets to repair, from environment overrides or operator prompts.
//!
//! Each missing field is asked for exactly once. Empty answers are rejected
//! rather than re-prompted.

use crate::command::CommandRunner;
use crate::error::{RescueError, Result};
use crate::output::Console;
use crate::zfs::Zfs;
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Input, Select};
use serde::Serialize;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::PathBuf;

pub const ENV_ROOT_POOL: &str = "ROOT_POOL";
pub const ENV_BOOT_POOL: &str = "BOOT_POOL";
pub const ENV_EFI_PART: &str = "EFI_PART";
pub const ENV_ROOT_DATASET: &str = "ROOT_DATASET";
pub const ENV_BOOT_DATASET: &str = "BOOT_DATASET";

/// Values supplied up front for non-interactive runs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub root_pool: Option<String>,
    pub boot_pool: Option<String>,
    pub efi_partition: Option<String>,
    pub root_dataset: Option<String>,
    pub boot_dataset: Option<String>,
}

impl Overrides {
    /// Read overrides from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through an arbitrary lookup; blank values count as unset
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Self {
            root_pool: get(ENV_ROOT_POOL),
            boot_pool: get(ENV_BOOT_POOL),
            efi_partition: get(ENV_EFI_PART),
            root_dataset: get(ENV_ROOT_DATASET),
            boot_dataset: get(ENV_BOOT_DATASET),
        }
    }

    /// True when no pool-level prompt is needed
    pub fn is_complete(&self) -> bool {
        self.root_pool.is_some() && self.boot_pool.is_some() && self.efi_partition.is_some()
    }
}

/// Pools and partitions the recovery works on
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolSelection {
    pub root_pool: String,
    pub boot_pool: String,
    pub efi_partition: String,
    pub key_file: Option<PathBuf>,
}

/// Source of operator answers
pub trait Prompter {
    /// Free-text answer
    fn input(&self, prompt: &str) -> Result<String>;

    /// Index into `items`
    fn select(&self, prompt: &str, items: &[String]) -> Result<usize>;
}

/// Terminal prompts via dialoguer
pub struct DialoguerPrompter {
    theme: ColorfulTheme,
}

impl DialoguerPrompter {
    pub fn new() -> Self {
        Self {
            theme: ColorfulTheme::default(),
        }
    }
}

impl Default for DialoguerPrompter {
    fn default() -> Self {
        Self::new()
    }
}

impl Prompter for DialoguerPrompter {
    fn input(&self, prompt: &str) -> Result<String> {
        let answer = Input::<String>::with_theme(&self.theme)
            .with_prompt(prompt)
            .allow_empty(true)
            .interact_text()?;
        Ok(answer)
    }

    fn select(&self, prompt: &str, items: &[String]) -> Result<usize> {
        let index = Select::with_theme(&self.theme)
            .with_prompt(prompt)
            .items(items)
            .default(0)
            .interact()?;
        Ok(index)
    }
}

/// A canned answer for `ScriptedPrompter`
#[derive(Debug, Clone)]
pub enum Answer {
    Text(String),
    Choice(usize),
}

/// Replays canned answers and records every prompt shown
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: RefCell<VecDeque<Answer>>,
    asked: RefCell<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(self, answer: impl Into<String>) -> Self {
        self.answers.borrow_mut().push_back(Answer::Text(answer.into()));
        self
    }

    pub fn choice(self, index: usize) -> Self {
        self.answers.borrow_mut().push_back(Answer::Choice(index));
        self
    }

    /// Prompts shown so far
    pub fn asked(&self) -> Vec<String> {
        self.asked.borrow().clone()
    }

    fn next(&self, prompt: &str) -> Result<Answer> {
        self.asked.borrow_mut().push(prompt.to_string());
        self.answers
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| RescueError::Prompt(format!("no answer scripted for '{}'", prompt)))
    }
}

impl Prompter for ScriptedPrompter {
    fn input(&self, prompt: &str) -> Result<String> {
        match self.next(prompt)? {
            Answer::Text(text) => Ok(text),
            Answer::Choice(_) => Err(RescueError::Prompt(format!("expected text for '{}'", prompt))),
        }
    }

    fn select(&self, prompt: &str, items: &[String]) -> Result<usize> {
        match self.next(prompt)? {
            Answer::Choice(index) if index < items.len() => Ok(index),
            Answer::Choice(index) => Err(RescueError::Prompt(format!("choice {} out of range", index))),
            Answer::Text(_) => Err(RescueError::Prompt(format!("expected a choice for '{}'", prompt))),
        }
    }
}

/// Gathers missing parameters from the operator
pub struct Resolver<'a> {
    zfs: Zfs<'a>,
    prompter: &'a dyn Prompter,
    console: &'a Console,
}

impl<'a> Resolver<'a> {
    pub fn new(runner: &'a dyn CommandRunner, prompter: &'a dyn Prompter, console: &'a Console) -> Self {
        Self {
            zfs: Zfs::new(runner),
            prompter,
            console,
        }
    }

    /// Build the pool selection, prompting only for fields not overridden
    pub fn resolve_selection(&self, overrides: &Overrides, key_file: Option<PathBuf>) -> Result<PoolSelection> {
        if overrides.root_pool.is_none() || overrides.boot_pool.is_none() {
            self.show_pools()?;
        }

        let root_pool = match &overrides.root_pool {
            Some(pool) => pool.clone(),
            None => self.ask("Root pool name (e.g. rpool)")?,
        };
        let boot_pool = match &overrides.boot_pool {
            Some(pool) => pool.clone(),
            None => self.ask("Boot pool name (e.g. bpool)")?,
        };
        let efi_partition = match &overrides.efi_partition {
            Some(part) => part.clone(),
            None => {
                self.console
                    .hint("Identify the EFI system partition with `lsblk -o NAME,SIZE,FSTYPE,PARTTYPENAME` or `blkid`.");
                self.ask("EFI partition (e.g. /dev/nvme0n1p1)")?
            }
        };

        Ok(PoolSelection {
            root_pool,
            boot_pool,
            efi_partition,
            key_file,
        })
    }

    /// The pool whose keystore is to be unlocked
    pub fn resolve_root_pool(&self, explicit: Option<String>, overrides: &Overrides) -> Result<String> {
        if let Some(pool) = explicit.or_else(|| overrides.root_pool.clone()) {
            return Ok(pool);
        }
        self.show_pools()?;
        self.ask("Root pool name (e.g. rpool)")
    }

    /// Have the operator pick one of `candidates` for `role`
    pub fn choose_dataset(&self, pool: &str, role: &str, candidates: &[String]) -> Result<String> {
        if candidates.is_empty() {
            return Err(RescueError::NotFound(format!("no filesystems in pool {}", pool)));
        }
        self.console
            .hint(&format!("Pool {} has no bootfs property; choose the {} dataset.", pool, role));
        let index = self
            .prompter
            .select(&format!("{} dataset in {}", role, pool), candidates)?;
        candidates
            .get(index)
            .cloned()
            .ok_or_else(|| RescueError::InvalidInput(format!("selection {} out of range", index)))
    }

    fn ask(&self, prompt: &str) -> Result<String> {
        let answer = self.prompter.input(prompt)?.trim().to_string();
        if answer.is_empty() {
            return Err(RescueError::InvalidInput(format!("{} must not be empty", prompt)));
        }
        Ok(answer)
    }

    /// Print the visible pools; fails when there are none
    fn show_pools(&self) -> Result<()> {
        let imported = self.zfs.imported_pools()?;
        let importable = self.zfs.importable_pools()?;
        if imported.is_empty() && importable.is_empty() {
            return Err(RescueError::Prerequisite("no ZFS pools found".to_string()));
        }

        self.console.hint("Pools visible on this system:");
        for pool in &imported {
            self.console.hint(&format!("  {} (imported)", pool));
        }
        for pool in &importable {
            self.console.hint(&format!("  {}", pool));
        }
        Ok(())
    }
}
