//! Simulated host for integration tests.
//!
//! `FakeHost` keeps a small model of the pool import table, dataset
//! properties, the mount table and device-mapper entries, and answers the
//! zpool/zfs/mount/umount/mountpoint/cryptsetup/chroot commands the crate
//! issues the way the real tools would.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use zrescue::command::{CommandOutput, CommandRunner, CommandSpec};
use zrescue::config::Config;
use zrescue::resolver::Overrides;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    pub mountpoint: String,
    pub mounted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostState {
    /// Pools visible on disk, imported or not
    pub pools: BTreeSet<String>,
    pub imported: BTreeSet<String>,
    /// Per-pool keystatus; absent means `-` (not encrypted)
    pub keystatus: BTreeMap<String, String>,
    pub bootfs: BTreeMap<String, String>,
    pub datasets: BTreeMap<String, Dataset>,
    /// Mount table, by target path
    pub mounts: Vec<String>,
    pub mappers: BTreeSet<String>,
}

impl HostState {
    fn pool_of(dataset: &str) -> &str {
        dataset.split('/').next().unwrap_or(dataset)
    }

    fn has_dataset(&self, dataset: &str) -> bool {
        self.imported.contains(Self::pool_of(dataset)) && self.datasets.contains_key(dataset)
    }

    fn is_mounted(&self, path: &str) -> bool {
        self.mounts.iter().any(|m| m == path)
    }
}

#[derive(Debug, Default)]
pub struct FakeHost {
    state: RefCell<HostState>,
    failures: RefCell<Vec<(String, i32, String)>>,
    calls: RefCell<Vec<String>>,
}

impl FakeHost {
    pub fn new(state: HostState) -> Self {
        Self {
            state: RefCell::new(state),
            ..Default::default()
        }
    }

    /// rpool (encrypted, key not loaded) and bpool, neither imported
    pub fn ubuntu_layout() -> Self {
        let mut state = HostState::default();
        state.pools.insert("rpool".to_string());
        state.pools.insert("bpool".to_string());
        state.keystatus.insert("rpool".to_string(), "unavailable".to_string());
        state
            .bootfs
            .insert("rpool".to_string(), "rpool/ROOT/ubuntu".to_string());
        state
            .bootfs
            .insert("bpool".to_string(), "bpool/BOOT/ubuntu".to_string());
        for (name, mountpoint) in [
            ("rpool", "/"),
            ("rpool/ROOT", "none"),
            ("rpool/ROOT/ubuntu", "/"),
            ("bpool", "/boot"),
            ("bpool/BOOT", "none"),
            ("bpool/BOOT/ubuntu", "/boot"),
        ] {
            state.datasets.insert(
                name.to_string(),
                Dataset {
                    mountpoint: mountpoint.to_string(),
                    mounted: false,
                },
            );
        }
        Self::new(state)
    }

    /// Make every command starting with `prefix` fail
    pub fn fail(&self, prefix: &str, code: i32, stderr: &str) {
        self.failures
            .borrow_mut()
            .push((prefix.to_string(), code, stderr.to_string()));
    }

    pub fn edit(&self, f: impl FnOnce(&mut HostState)) {
        f(&mut self.state.borrow_mut());
    }

    pub fn snapshot(&self) -> HostState {
        self.state.borrow().clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls.borrow().iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// Mount table entries at or below `root`
    pub fn mounts_under(&self, root: &Path) -> Vec<String> {
        let root = root.display().to_string();
        self.state
            .borrow()
            .mounts
            .iter()
            .filter(|m| **m == root || m.starts_with(&format!("{}/", root)))
            .cloned()
            .collect()
    }

    fn zpool(&self, state: &mut HostState, args: &[&str]) -> CommandOutput {
        match args {
            ["list", "-H", "-o", "name"] => {
                let names: String = state.imported.iter().map(|p| format!("{}\n", p)).collect();
                CommandOutput::ok(names)
            }
            ["import"] => {
                let listing: String = state
                    .pools
                    .iter()
                    .filter(|p| !state.imported.contains(*p))
                    .map(|p| format!("   pool: {}\n     id: 1234\n  state: ONLINE\n", p))
                    .collect();
                if listing.is_empty() {
                    CommandOutput::failed(1, "no pools available to import")
                } else {
                    CommandOutput::ok(listing)
                }
            }
            ["import", "-f", "-N", pool] => {
                if !state.pools.contains(*pool) {
                    return CommandOutput::failed(1, format!("cannot import '{}': no such pool available", pool));
                }
                if !state.imported.insert(pool.to_string()) {
                    return CommandOutput::failed(1, format!("cannot import '{}': a pool with that name already exists", pool));
                }
                CommandOutput::ok("")
            }
            ["export", pool] => {
                if !state.imported.contains(*pool) {
                    return CommandOutput::failed(1, format!("cannot open '{}': no such pool", pool));
                }
                let busy = state
                    .datasets
                    .iter()
                    .any(|(name, ds)| HostState::pool_of(name) == *pool && ds.mounted);
                if busy {
                    return CommandOutput::failed(1, format!("cannot export '{}': pool is busy", pool));
                }
                state.imported.remove(*pool);
                if let Some(status) = state.keystatus.get_mut(*pool) {
                    *status = "unavailable".to_string();
                }
                CommandOutput::ok("")
            }
            ["get", "-H", "-o", "value", "bootfs", pool] => {
                if !state.imported.contains(*pool) {
                    return CommandOutput::failed(1, format!("cannot open '{}': no such pool", pool));
                }
                CommandOutput::ok(format!(
                    "{}\n",
                    state.bootfs.get(*pool).map(String::as_str).unwrap_or("-")
                ))
            }
            _ => CommandOutput::failed(2, format!("fake zpool: unsupported {:?}", args)),
        }
    }

    fn zfs(&self, state: &mut HostState, args: &[&str]) -> CommandOutput {
        match args {
            ["get", "-H", "-o", "value", property, dataset] => {
                if !state.has_dataset(dataset) {
                    return CommandOutput::failed(1, format!("cannot open '{}': dataset does not exist", dataset));
                }
                let value = match *property {
                    "keystatus" => state
                        .keystatus
                        .get(HostState::pool_of(dataset))
                        .cloned()
                        .unwrap_or_else(|| "-".to_string()),
                    "mountpoint" => state.datasets[*dataset].mountpoint.clone(),
                    "mounted" => (if state.datasets[*dataset].mounted { "yes" } else { "no" }).to_string(),
                    other => return CommandOutput::failed(2, format!("bad property list: invalid property '{}'", other)),
                };
                CommandOutput::ok(format!("{}\n", value))
            }
            ["load-key", rest @ ..] => {
                let Some(dataset) = rest.last() else {
                    return CommandOutput::failed(2, "missing dataset argument");
                };
                match state.keystatus.get_mut(*dataset) {
                    Some(status) if status == "unavailable" => {
                        *status = "available".to_string();
                        CommandOutput::ok("")
                    }
                    Some(_) => CommandOutput::failed(255, format!("Key load error: Key already loaded for '{}'.", dataset)),
                    None => CommandOutput::failed(255, format!("Key load error: '{}' is not encrypted.", dataset)),
                }
            }
            ["list", "-H", "-o", "name", "-t", "filesystem", "-r", pool] => {
                if !state.imported.contains(*pool) {
                    return CommandOutput::failed(1, format!("cannot open '{}': dataset does not exist", pool));
                }
                let names: String = state
                    .datasets
                    .keys()
                    .filter(|name| HostState::pool_of(name) == *pool)
                    .map(|name| format!("{}\n", name))
                    .collect();
                CommandOutput::ok(names)
            }
            ["set", assignment, dataset] => {
                if !state.has_dataset(dataset) {
                    return CommandOutput::failed(1, format!("cannot open '{}': dataset does not exist", dataset));
                }
                let Some(value) = assignment.strip_prefix("mountpoint=") else {
                    return CommandOutput::failed(2, "fake zfs: only mountpoint is settable");
                };
                if let Some(ds) = state.datasets.get_mut(*dataset) {
                    ds.mountpoint = value.to_string();
                }
                CommandOutput::ok("")
            }
            ["mount", dataset] => {
                if !state.has_dataset(dataset) {
                    return CommandOutput::failed(1, format!("cannot open '{}': dataset does not exist", dataset));
                }
                let pool = HostState::pool_of(dataset).to_string();
                if state.keystatus.get(&pool).is_some_and(|s| s != "available") {
                    return CommandOutput::failed(1, "encryption key not loaded");
                }
                let mountpoint = state.datasets[*dataset].mountpoint.clone();
                if state.datasets[*dataset].mounted {
                    return CommandOutput::failed(1, "filesystem already mounted");
                }
                if let Some(ds) = state.datasets.get_mut(*dataset) {
                    ds.mounted = true;
                }
                state.mounts.push(mountpoint);
                CommandOutput::ok("")
            }
            _ => CommandOutput::failed(2, format!("fake zfs: unsupported {:?}", args)),
        }
    }

    fn mount(&self, state: &mut HostState, args: &[&str]) -> CommandOutput {
        match args {
            ["--rbind", _source, target] => {
                state.mounts.push(target.to_string());
                CommandOutput::ok("")
            }
            ["--make-rslave", target] => {
                if state.is_mounted(target) {
                    CommandOutput::ok("")
                } else {
                    CommandOutput::failed(32, format!("mount: {}: not mount point", target))
                }
            }
            [_device, target] => {
                if state.is_mounted(target) {
                    return CommandOutput::failed(32, format!("mount: {}: already mounted", target));
                }
                state.mounts.push(target.to_string());
                CommandOutput::ok("")
            }
            _ => CommandOutput::failed(1, format!("fake mount: unsupported {:?}", args)),
        }
    }

    fn umount(&self, state: &mut HostState, args: &[&str]) -> CommandOutput {
        let ["-R", path] = args else {
            return CommandOutput::failed(1, format!("fake umount: unsupported {:?}", args));
        };
        if !state.is_mounted(path) {
            return CommandOutput::failed(32, format!("umount: {}: not mounted", path));
        }
        let nested = format!("{}/", path);
        let under = |m: &str| m == *path || m.starts_with(&nested);
        state.mounts.retain(|m| !under(m.as_str()));
        for ds in state.datasets.values_mut() {
            if ds.mounted && under(ds.mountpoint.as_str()) {
                ds.mounted = false;
            }
        }
        CommandOutput::ok("")
    }

    fn cryptsetup(&self, state: &mut HostState, args: &[&str]) -> CommandOutput {
        match args {
            ["status", name] => {
                if state.mappers.contains(*name) {
                    CommandOutput::ok(format!("/dev/mapper/{} is active.\n", name))
                } else {
                    CommandOutput::failed(4, format!("/dev/mapper/{} is inactive.\n", name))
                }
            }
            ["open", _device, name] => {
                if !state.mappers.insert(name.to_string()) {
                    return CommandOutput::failed(5, format!("Device {} already exists.", name));
                }
                CommandOutput::ok("")
            }
            ["close", name] => {
                if !state.mappers.remove(*name) {
                    return CommandOutput::failed(4, format!("Device {} is not active.", name));
                }
                CommandOutput::ok("")
            }
            _ => CommandOutput::failed(1, format!("fake cryptsetup: unsupported {:?}", args)),
        }
    }
}

impl CommandRunner for FakeHost {
    fn run(&self, cmd: &CommandSpec) -> zrescue::Result<CommandOutput> {
        let line = cmd.to_string();
        self.calls.borrow_mut().push(line.clone());

        if let Some((_, code, stderr)) = self
            .failures
            .borrow()
            .iter()
            .rev()
            .find(|(prefix, _, _)| line.starts_with(prefix.as_str()))
        {
            return Ok(CommandOutput::failed(*code, stderr.clone()));
        }

        let args: Vec<&str> = cmd.args.iter().map(String::as_str).collect();
        let mut state = self.state.borrow_mut();
        let output = match cmd.program.as_str() {
            "zpool" => self.zpool(&mut state, &args),
            "zfs" => self.zfs(&mut state, &args),
            "mount" => self.mount(&mut state, &args),
            "umount" => self.umount(&mut state, &args),
            "mountpoint" => match args.as_slice() {
                ["-q", path] if state.is_mounted(path) => CommandOutput::ok(""),
                _ => CommandOutput::failed(32, ""),
            },
            "cryptsetup" => self.cryptsetup(&mut state, &args),
            "chroot" => CommandOutput::ok(""),
            other => CommandOutput::failed(127, format!("{}: command not found", other)),
        };
        Ok(output)
    }
}

/// Overrides for a fully non-interactive two-pool run
pub fn ubuntu_overrides() -> Overrides {
    Overrides {
        root_pool: Some("rpool".to_string()),
        boot_pool: Some("bpool".to_string()),
        efi_partition: Some("/dev/nvme0n1p1".to_string()),
        root_dataset: None,
        boot_dataset: None,
    }
}

/// Config rooted in a scratch directory, with a host resolv.conf to copy
pub fn scratch_config(dir: &Path) -> Config {
    let dns_source = dir.join("host-resolv.conf");
    std::fs::write(&dns_source, "nameserver 192.0.2.53\n").expect("write resolv.conf");
    let mut config = Config {
        recovery_root: dir.join("mnt"),
        dns_source,
        ..Default::default()
    };
    config.keystore.mount_dir = dir.join("keystore");
    config
}
