//! Resource registry driving rollback.
//!
//! Every external resource a run acquires (an imported pool, an opened
//! mapper device, a mount) is recorded here in acquisition order. On failure
//! the registry compensates them in reverse order, best effort, exactly once.

use crate::command::{CommandRunner, CommandRunnerExt, CommandSpec};
use crate::crypt::Cryptsetup;
use crate::error::Result;
use crate::mounts::Mounts;
use crate::zfs::Zfs;
use log::{info, warn};
use serde::Serialize;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::path::Path;

/// What kind of host state a resource is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    MapperDevice,
    MountPoint,
    ImportedPool,
}

/// One acquired piece of host state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resource {
    pub kind: ResourceKind,
    /// Mapper name, mount path, or pool name
    pub identifier: String,
    /// Cleared once the resource has been compensated
    pub acquired: bool,
}

impl Resource {
    fn new(kind: ResourceKind, identifier: impl Into<String>) -> Self {
        Self {
            kind,
            identifier: identifier.into(),
            acquired: false,
        }
    }

    pub fn mapper(name: impl Into<String>) -> Self {
        Self::new(ResourceKind::MapperDevice, name)
    }

    pub fn mount(path: &Path) -> Self {
        Self::new(ResourceKind::MountPoint, path.display().to_string())
    }

    pub fn pool(name: impl Into<String>) -> Self {
        Self::new(ResourceKind::ImportedPool, name)
    }

    /// The command that undoes this resource's acquisition
    pub fn compensation(&self) -> CommandSpec {
        match self.kind {
            ResourceKind::MapperDevice => Cryptsetup::close_command(&self.identifier),
            ResourceKind::MountPoint => Mounts::unmount_command(Path::new(&self.identifier)),
            ResourceKind::ImportedPool => Zfs::export_command(&self.identifier),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ResourceKind::MapperDevice => "mapper",
            ResourceKind::MountPoint => "mount",
            ResourceKind::ImportedPool => "pool",
        };
        write!(f, "{} {}", kind, self.identifier)
    }
}

/// Outcome of compensating one resource
#[derive(Debug, Clone, Serialize)]
pub struct Compensation {
    pub resource: Resource,
    /// Failure message, if the compensation command failed
    pub error: Option<String>,
}

/// Result of a full rollback pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct RollbackReport {
    /// Compensations in the order they ran (reverse acquisition order)
    pub compensations: Vec<Compensation>,
}

impl RollbackReport {
    /// True when every compensation succeeded
    pub fn is_clean(&self) -> bool {
        self.compensations.iter().all(|c| c.error.is_none())
    }

    pub fn failures(&self) -> impl Iterator<Item = &Compensation> {
        self.compensations.iter().filter(|c| c.error.is_some())
    }
}

/// Ordered record of acquired resources
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    acquired: Vec<Resource>,
    rolled_back: bool,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action`; register `resource` only if it succeeds
    pub fn acquire<F>(&mut self, resource: Resource, action: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        action()?;
        self.record(resource);
        Ok(())
    }

    /// Register a resource whose acquisition already succeeded
    pub fn record(&mut self, mut resource: Resource) {
        info!("acquired {}", resource);
        resource.acquired = true;
        self.acquired.push(resource);
    }

    /// Resources currently held, oldest first
    pub fn acquired(&self) -> &[Resource] {
        &self.acquired
    }

    pub fn is_empty(&self) -> bool {
        self.acquired.is_empty()
    }

    pub fn is_rolled_back(&self) -> bool {
        self.rolled_back
    }

    /// Compensate every held resource, newest first.
    ///
    /// Compensation failures are logged and reported, never returned as
    /// errors. Only the first call does anything.
    pub fn rollback_all(&mut self, runner: &dyn CommandRunner) -> RollbackReport {
        let mut report = RollbackReport::default();
        if self.rolled_back {
            return report;
        }
        self.rolled_back = true;

        while let Some(mut resource) = self.acquired.pop() {
            let error = match runner.run_mandatory(&resource.compensation()) {
                Ok(_) => {
                    info!("released {}", resource);
                    None
                }
                Err(e) => {
                    warn!("failed to release {}: {}", resource, e);
                    Some(e.to_string())
                }
            };
            resource.acquired = false;
            report.compensations.push(Compensation { resource, error });
        }
        report
    }

    /// Forget every resource without compensating it
    pub fn release(&mut self) -> Vec<Resource> {
        std::mem::take(&mut self.acquired)
    }
}

/// Owns a registry for the length of a run and rolls it back on drop.
///
/// Call `disarm` once the run has succeeded (and the caller has taken over or
/// intentionally kept the resources).
pub struct RegistryGuard<'a> {
    registry: ResourceRegistry,
    runner: &'a dyn CommandRunner,
    armed: bool,
}

impl<'a> RegistryGuard<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self {
            registry: ResourceRegistry::new(),
            runner,
            armed: true,
        }
    }

    /// Roll back now; later drops are no-ops
    pub fn rollback(&mut self) -> RollbackReport {
        self.registry.rollback_all(self.runner)
    }

    /// Stop the guard from rolling back, returning whatever is still held
    pub fn disarm(&mut self) -> Vec<Resource> {
        self.armed = false;
        self.registry.release()
    }
}

impl Deref for RegistryGuard<'_> {
    type Target = ResourceRegistry;

    fn deref(&self) -> &Self::Target {
        &self.registry
    }
}

impl DerefMut for RegistryGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.registry
    }
}

impl Drop for RegistryGuard<'_> {
    fn drop(&mut self) {
        if self.armed && !self.registry.is_empty() && !self.registry.is_rolled_back() {
            warn!("run ended with {} resources held, rolling back", self.registry.acquired().len());
            self.registry.rollback_all(self.runner);
        }
    }
}
