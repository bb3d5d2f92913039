//! The recovery steps, in execution order.
//!
//! Each step checks the host before acting so that re-running it after a
//! partial run is a no-op, and registers whatever it acquires so a later
//! failure can undo it. Repair is the exception: it is neither checked nor
//! idempotent, and any failure in it is fatal.

use super::context::{OriginalMountpoint, RecoveryContext, distinct_pools};
use super::repair::render_script;
use super::session::Session;
use super::state::RecoveryState;
use crate::command::{CommandRunnerExt, CommandSpec};
use crate::crypt::Cryptsetup;
use crate::error::{RescueError, Result};
use crate::mounts::Mounts;
use crate::registry::{Resource, ResourceKind};
use crate::resolver::Resolver;
use crate::zfs::{KeyStatus, Zfs};
use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};

/// One stage of the recovery sequence
pub trait Step {
    /// Short machine name used in reports
    fn name(&self) -> &'static str;

    /// Human-readable progress title
    fn title(&self) -> &'static str;

    /// State entered when the step succeeds
    fn target(&self) -> RecoveryState;

    fn run(&self, session: &mut Session<'_>) -> Result<()>;
}

/// The full sequence, Init through CleanedUp
pub fn recovery_steps() -> Vec<Box<dyn Step>> {
    vec![
        Box::new(SelectPools),
        Box::new(ImportPools),
        Box::new(UnlockRoot),
        Box::new(IdentifyDatasets),
        Box::new(MountTarget),
        Box::new(RepairBoot),
        Box::new(Cleanup),
    ]
}

/// Resolve pool names and the EFI partition
pub struct SelectPools;

impl Step for SelectPools {
    fn name(&self) -> &'static str {
        "select"
    }

    fn title(&self) -> &'static str {
        "Selecting pools"
    }

    fn target(&self) -> RecoveryState {
        RecoveryState::PoolsSelected
    }

    fn run(&self, session: &mut Session<'_>) -> Result<()> {
        let resolver = Resolver::new(session.runner, session.prompter, session.console);
        let selection = resolver.resolve_selection(&session.overrides, session.key_file.clone())?;
        session.console.ok(&format!(
            "root pool {}, boot pool {}, EFI partition {}",
            selection.root_pool, selection.boot_pool, selection.efi_partition
        ));
        session.selection = Some(selection);
        Ok(())
    }
}

/// Import root and boot pools that are not already imported
pub struct ImportPools;

impl Step for ImportPools {
    fn name(&self) -> &'static str {
        "import"
    }

    fn title(&self) -> &'static str {
        "Importing pools"
    }

    fn target(&self) -> RecoveryState {
        RecoveryState::PoolsImported
    }

    fn run(&self, session: &mut Session<'_>) -> Result<()> {
        let selection = session.selection()?;
        let zfs = Zfs::new(session.runner);
        let imported = zfs.imported_pools()?;

        for pool in distinct_pools(&selection.root_pool, &selection.boot_pool) {
            if imported.iter().any(|name| name == pool) {
                session.notice(format!("pool {} is already imported", pool));
                continue;
            }
            session.registry.acquire(Resource::pool(pool), || zfs.import(pool))?;
            session.console.ok(&format!("imported {}", pool));
        }
        Ok(())
    }
}

/// Make the root pool's encryption key available
pub struct UnlockRoot;

impl Step for UnlockRoot {
    fn name(&self) -> &'static str {
        "unlock"
    }

    fn title(&self) -> &'static str {
        "Unlocking root pool"
    }

    fn target(&self) -> RecoveryState {
        RecoveryState::Unlocked
    }

    fn run(&self, session: &mut Session<'_>) -> Result<()> {
        let selection = session.selection()?;
        let pool = &selection.root_pool;
        let zfs = Zfs::new(session.runner);

        match zfs.keystatus(pool)? {
            KeyStatus::Available => {
                session.notice(format!("key for {} is already loaded", pool));
                return Ok(());
            }
            KeyStatus::None => {
                session.notice(format!("{} is not encrypted", pool));
                return Ok(());
            }
            KeyStatus::Unavailable => {}
        }

        match &selection.key_file {
            Some(path) => session.console.detail(&format!("loading key from {}", path.display())),
            None => session.console.hint(&format!("Enter the passphrase for {}", pool)),
        }
        zfs.load_key(pool, selection.key_file.as_deref())?;

        if zfs.keystatus(pool)? != KeyStatus::Available {
            return Err(RescueError::CommandFailed {
                command: format!("zfs load-key {}", pool),
                code: None,
                stderr: "key still unavailable after loading".to_string(),
            });
        }
        session.console.ok(&format!("loaded key for {}", pool));
        Ok(())
    }
}

/// Decide which datasets hold / and /boot
pub struct IdentifyDatasets;

impl IdentifyDatasets {
    fn identify(session: &Session<'_>, pool: &str, role: &str, preset: Option<String>) -> Result<String> {
        if let Some(dataset) = preset {
            session.console.ok(&format!("{} dataset {} (from environment)", role, dataset));
            return Ok(dataset);
        }

        let zfs = Zfs::new(session.runner);
        if let Some(dataset) = zfs.bootfs(pool)? {
            session.console.ok(&format!("{} dataset {} (bootfs of {})", role, dataset, pool));
            return Ok(dataset);
        }

        let candidates = zfs.filesystems(pool)?;
        let resolver = Resolver::new(session.runner, session.prompter, session.console);
        let dataset = resolver.choose_dataset(pool, role, &candidates)?;
        session.console.ok(&format!("{} dataset {}", role, dataset));
        Ok(dataset)
    }
}

impl Step for IdentifyDatasets {
    fn name(&self) -> &'static str {
        "identify"
    }

    fn title(&self) -> &'static str {
        "Identifying datasets"
    }

    fn target(&self) -> RecoveryState {
        RecoveryState::DatasetsIdentified
    }

    fn run(&self, session: &mut Session<'_>) -> Result<()> {
        let selection = session.selection()?;
        let root_dataset = Self::identify(
            session,
            &selection.root_pool,
            "root",
            session.overrides.root_dataset.clone(),
        )?;
        let boot_dataset = Self::identify(
            session,
            &selection.boot_pool,
            "boot",
            session.overrides.boot_dataset.clone(),
        )?;
        session.context = Some(RecoveryContext::new(&selection, root_dataset, boot_dataset));
        Ok(())
    }
}

/// Assemble the installed system under the recovery root
pub struct MountTarget;

impl MountTarget {
    /// Point `dataset` at `target` and mount it
    fn mount_dataset(session: &mut Session<'_>, dataset: &str, target: &Path) -> Result<()> {
        let zfs = Zfs::new(session.runner);

        let original = zfs.mountpoint(dataset)?;
        let wanted = target.display().to_string();
        if original != wanted {
            session.journal.original_mountpoints.push(OriginalMountpoint {
                dataset: dataset.to_string(),
                mountpoint: original,
            });
            zfs.set_mountpoint(dataset, target)?;
        }

        if zfs.is_mounted(dataset)? {
            session.notice(format!("{} is already mounted", dataset));
            return Ok(());
        }
        match zfs.mount(dataset) {
            Ok(()) => {
                session.registry.record(Resource::mount(target));
                session.console.ok(&format!("mounted {} at {}", dataset, wanted));
            }
            Err(e) => session.warning(format!(
                "could not mount {} at {} (possibly already mounted): {}",
                dataset, wanted, e
            )),
        }
        Ok(())
    }

    /// Mount something at `target` unless it already is a mount point
    fn mount_path<F>(session: &mut Session<'_>, target: &Path, label: &str, action: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        if Mounts::new(session.runner).is_mountpoint(target)? {
            session.notice(format!("{} is already mounted at {}", label, target.display()));
            return Ok(());
        }
        match action() {
            Ok(()) => {
                session.registry.record(Resource::mount(target));
                session.console.ok(&format!("mounted {} at {}", label, target.display()));
            }
            Err(e) => session.warning(format!(
                "could not mount {} at {} (possibly already mounted): {}",
                label,
                target.display(),
                e
            )),
        }
        Ok(())
    }

    fn copy_dns(session: &mut Session<'_>) {
        let source = session.config.dns_source.clone();
        let dest = session.config.in_root("etc/resolv.conf");

        if dest.is_symlink() {
            // Typically points into /run, which is bound from the host.
            session.notice(format!("{} is a symlink, leaving it in place", dest.display()));
            return;
        }

        let copied = match dest.parent() {
            Some(parent) => fs::create_dir_all(parent).and_then(|_| fs::copy(&source, &dest)),
            None => fs::copy(&source, &dest),
        };
        match copied {
            Ok(_) => session.console.ok(&format!("copied {} into the recovery root", source.display())),
            Err(e) => session.warning(format!("could not copy {}: {}", source.display(), e)),
        }
    }
}

impl Step for MountTarget {
    fn name(&self) -> &'static str {
        "mount"
    }

    fn title(&self) -> &'static str {
        "Mounting the installed system"
    }

    fn target(&self) -> RecoveryState {
        RecoveryState::Mounted
    }

    fn run(&self, session: &mut Session<'_>) -> Result<()> {
        let ctx = session.context()?;
        let config = session.config;
        let runner = session.runner;

        fs::create_dir_all(&config.recovery_root)?;
        Self::mount_dataset(session, &ctx.root_dataset, &config.recovery_root)?;

        if ctx.has_separate_boot() {
            Self::mount_dataset(session, &ctx.boot_dataset, &config.in_root("boot"))?;
        } else {
            session.notice(format!("/boot is part of {}", ctx.root_dataset));
        }

        let efi_dir = config.in_root("boot/efi");
        fs::create_dir_all(&efi_dir)?;
        Self::mount_path(session, &efi_dir, "EFI partition", || {
            Mounts::new(runner).mount_device(&ctx.efi_partition, &efi_dir)
        })?;

        for bind in &config.bind_mounts {
            let source = Path::new("/").join(bind);
            let target = config.in_root(bind);
            fs::create_dir_all(&target)?;
            Self::mount_path(session, &target, &format!("/{}", bind), || {
                Mounts::new(runner).rbind_slave(&source, &target)
            })?;
        }

        Self::copy_dns(session);
        Ok(())
    }
}

/// Rebuild initramfs and bootloader inside the chroot
pub struct RepairBoot;

impl Step for RepairBoot {
    fn name(&self) -> &'static str {
        "repair"
    }

    fn title(&self) -> &'static str {
        "Repairing initramfs and bootloader"
    }

    fn target(&self) -> RecoveryState {
        RecoveryState::Repaired
    }

    fn run(&self, session: &mut Session<'_>) -> Result<()> {
        let config = session.config;
        let relative = format!("tmp/{}", config.repair.script_name);
        let host_path = config.in_root(&relative);

        if let Some(parent) = host_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&host_path, render_script(&config.repair))?;
        debug!("wrote repair script to {}", host_path.display());

        let cmd = CommandSpec::new("chroot")
            .args([
                config.recovery_root.display().to_string(),
                config.repair.shell.clone(),
                format!("/{}", relative),
            ])
            .env("DEBIAN_FRONTEND", "noninteractive")
            .interactive();
        let result = session.runner.run_mandatory(&cmd);

        if let Err(e) = fs::remove_file(&host_path) {
            warn!("could not remove {}: {}", host_path.display(), e);
        }
        result?;

        session.console.ok("repair completed");
        Ok(())
    }
}

/// Tear everything down after a successful repair.
///
/// Nothing here fails the run: every problem is recorded as a warning.
pub struct Cleanup;

impl Cleanup {
    /// Unmount the recovery root and anything this run mounted below it.
    ///
    /// The root is released first with `umount -R`. Mounts taken over from
    /// the run are then checked newest first, since they outlive a root
    /// mount that never succeeded. Returns true when nothing is left.
    fn unmount_root(session: &mut Session<'_>, taken: &[Resource]) -> bool {
        let root = session.config.recovery_root.clone();
        let mut targets = vec![root.clone()];
        targets.extend(
            taken
                .iter()
                .rev()
                .filter(|resource| resource.kind == ResourceKind::MountPoint)
                .map(|resource| PathBuf::from(&resource.identifier)),
        );

        let mounts = Mounts::new(session.runner);
        let mut clean = true;
        let mut released = 0;
        for target in targets {
            match mounts.is_mountpoint(&target) {
                Ok(true) => match mounts.unmount_recursive(&target) {
                    Ok(()) => {
                        session.console.ok(&format!("unmounted {}", target.display()));
                        released += 1;
                    }
                    Err(e) => {
                        session.warning(format!("could not unmount {}: {}", target.display(), e));
                        clean = false;
                    }
                },
                Ok(false) => {}
                Err(e) => {
                    session.warning(format!("could not check {}: {}", target.display(), e));
                    clean = false;
                }
            }
        }

        if clean && released == 0 {
            session.notice(format!("nothing mounted at {}", root.display()));
        }
        clean
    }

    fn restore_mountpoints(session: &mut Session<'_>) {
        let zfs = Zfs::new(session.runner);
        for original in session.journal.original_mountpoints.clone() {
            match zfs.set_mountpoint(&original.dataset, Path::new(&original.mountpoint)) {
                Ok(()) => session.console.ok(&format!(
                    "restored mountpoint={} on {}",
                    original.mountpoint, original.dataset
                )),
                Err(e) => session.warning(format!("could not restore mountpoint on {}: {}", original.dataset, e)),
            }
        }
    }

    fn close_keystore(session: &mut Session<'_>, pool: &str) {
        let config = session.config;
        let key_mount = config.keystore.mount_path(pool);
        let mapper = config.keystore.mapper_name(pool);
        let runner = session.runner;

        match Mounts::new(runner).is_mountpoint(&key_mount) {
            Ok(true) => {
                if let Err(e) = runner.run_lenient(&Mounts::unmount_command(&key_mount)) {
                    session.warning(format!("could not unmount keystore {}: {}", key_mount.display(), e));
                }
            }
            Ok(false) => {}
            Err(e) => session.warning(format!("could not check {}: {}", key_mount.display(), e)),
        }

        match Cryptsetup::new(runner).is_open(&mapper) {
            Ok(true) => match runner.run_lenient(&Cryptsetup::close_command(&mapper)) {
                Ok(_) => session.console.ok(&format!("closed keystore {}", mapper)),
                Err(e) => session.warning(format!("could not close keystore {}: {}", mapper, e)),
            },
            Ok(false) => {}
            Err(e) => session.warning(format!("could not check keystore {}: {}", mapper, e)),
        }
    }
}

impl Step for Cleanup {
    fn name(&self) -> &'static str {
        "cleanup"
    }

    fn title(&self) -> &'static str {
        "Cleaning up"
    }

    fn target(&self) -> RecoveryState {
        RecoveryState::CleanedUp
    }

    fn run(&self, session: &mut Session<'_>) -> Result<()> {
        let ctx = session.context()?;
        let taken = session.registry.disarm();
        debug!("cleanup takes over {} resources", taken.len());

        let unmounted = Self::unmount_root(session, &taken);

        if session.config.mountpoints.restore {
            if unmounted {
                Self::restore_mountpoints(session);
            } else {
                session.warning("leaving mountpoints retargeted because the recovery root is still mounted");
            }
        }

        if session.config.keystore.close_after_recovery {
            Self::close_keystore(session, &ctx.root_pool);
        }

        let runner = session.runner;
        for pool in ctx.pools().into_iter().rev() {
            match runner.run_lenient(&Zfs::export_command(pool)) {
                Ok(_) => session.console.ok(&format!("exported {}", pool)),
                Err(e) => session.warning(format!("could not export {} (it may be busy): {}", pool, e)),
            }
        }
        Ok(())
    }
}
