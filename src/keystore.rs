//! Keystore unlock: import the root pool, open and mount its LUKS keystore
//! volume, then load the pool key from the key file inside it.
//!
//! Everything acquired stays in place on success so `recover` can use the
//! key file. On failure it is undone in reverse order.

use crate::command::CommandRunner;
use crate::config::KeystoreConfig;
use crate::crypt::Cryptsetup;
use crate::error::{RescueError, Result};
use crate::mounts::Mounts;
use crate::output::Console;
use crate::registry::{RegistryGuard, Resource};
use crate::resolver::{Overrides, Prompter, Resolver};
use crate::zfs::{KeyStatus, Zfs};
use log::{debug, info, warn};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

/// What an unlock run left in place
#[derive(Debug, Clone, Serialize)]
pub struct UnlockReport {
    pub pool: String,
    pub mapper: String,
    /// Pass this to `recover`
    pub key_file: PathBuf,
    pub notices: Vec<String>,
    /// Resources this run acquired and kept
    pub acquired: Vec<Resource>,
}

pub struct KeystoreUnlock<'a> {
    runner: &'a dyn CommandRunner,
    prompter: &'a dyn Prompter,
    console: &'a Console,
    config: &'a KeystoreConfig,
}

impl<'a> KeystoreUnlock<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        prompter: &'a dyn Prompter,
        console: &'a Console,
        config: &'a KeystoreConfig,
    ) -> Self {
        Self {
            runner,
            prompter,
            console,
            config,
        }
    }

    /// Unlock the keystore of `pool` (or of the resolved root pool)
    pub fn run(&self, pool: Option<String>, mapper: Option<String>, overrides: &Overrides) -> Result<UnlockReport> {
        let resolver = Resolver::new(self.runner, self.prompter, self.console);
        let pool = resolver.resolve_root_pool(pool, overrides)?;
        let mapper = mapper.unwrap_or_else(|| self.config.mapper_name(&pool));
        info!("unlocking keystore of {} as {}", pool, mapper);

        let mut registry = RegistryGuard::new(self.runner);
        let mut notices = Vec::new();
        let mount_dir = self.config.mount_path(&pool);
        let created_mount_dir = !mount_dir.exists();

        match self.acquire(&mut registry, &mut notices, &pool, &mapper) {
            Ok(key_file) => Ok(UnlockReport {
                pool,
                mapper,
                key_file,
                notices,
                acquired: registry.disarm(),
            }),
            Err(e) => {
                let rollback = registry.rollback();
                for failure in rollback.failures() {
                    self.console.warn(&format!(
                        "could not release {}: {}",
                        failure.resource,
                        failure.error.as_deref().unwrap_or("unknown error")
                    ));
                }
                // Only ever removes the directory if it is still empty
                if created_mount_dir && mount_dir.is_dir() {
                    if let Err(remove) = fs::remove_dir(&mount_dir) {
                        debug!("leaving {} in place: {}", mount_dir.display(), remove);
                    }
                }
                Err(e)
            }
        }
    }

    fn acquire(
        &self,
        registry: &mut RegistryGuard<'_>,
        notices: &mut Vec<String>,
        pool: &str,
        mapper: &str,
    ) -> Result<PathBuf> {
        let zfs = Zfs::new(self.runner);
        let crypt = Cryptsetup::new(self.runner);
        let mounts = Mounts::new(self.runner);

        if zfs.is_imported(pool)? {
            self.notice(notices, format!("pool {} is already imported", pool));
        } else {
            registry.acquire(Resource::pool(pool), || zfs.import(pool))?;
            self.console.ok(&format!("imported {}", pool));
        }

        if crypt.is_open(mapper)? {
            self.notice(notices, format!("keystore {} is already open", mapper));
        } else {
            let device = self.config.zvol_device(pool);
            self.console.hint(&format!("Enter the keystore passphrase for {}", pool));
            registry.acquire(Resource::mapper(mapper), || crypt.open(&device, mapper))?;
            self.console.ok(&format!("opened {} as {}", device.display(), mapper));
        }

        let target = self.config.mount_path(pool);
        fs::create_dir_all(&target)?;
        if mounts.is_mountpoint(&target)? {
            self.notice(notices, format!("keystore is already mounted at {}", target.display()));
        } else {
            let device = Cryptsetup::mapper_path(mapper).display().to_string();
            registry.acquire(Resource::mount(&target), || mounts.mount_device(&device, &target))?;
            self.console.ok(&format!("mounted keystore at {}", target.display()));
        }

        let key_file = self.config.key_file(pool);
        if !key_file.is_file() {
            return Err(RescueError::NotFound(format!(
                "key file {} not found in keystore",
                key_file.display()
            )));
        }

        match zfs.keystatus(pool)? {
            KeyStatus::Available => self.notice(notices, format!("key for {} is already loaded", pool)),
            KeyStatus::None => self.notice(notices, format!("{} is not encrypted", pool)),
            KeyStatus::Unavailable => {
                zfs.load_key(pool, Some(&key_file))?;
                if zfs.keystatus(pool)? != KeyStatus::Available {
                    warn!("keystatus of {} still not available after load-key", pool);
                    return Err(RescueError::CommandFailed {
                        command: format!("zfs load-key {}", pool),
                        code: None,
                        stderr: "key still unavailable after loading".to_string(),
                    });
                }
                self.console.ok(&format!("loaded key for {}", pool));
            }
        }
        Ok(key_file)
    }

    fn notice(&self, notices: &mut Vec<String>, message: String) {
        info!("{}", message);
        self.console.notice(&message);
        notices.push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandOutput, MockRunner};
    use crate::registry::ResourceKind;
    use crate::resolver::ScriptedPrompter;
    use tempfile::TempDir;

    fn keystore_config(dir: &TempDir) -> KeystoreConfig {
        KeystoreConfig {
            mount_dir: dir.path().to_path_buf(),
            ..Default::default()
        }
    }

    fn place_key(config: &KeystoreConfig, pool: &str) {
        fs::create_dir_all(config.mount_path(pool)).unwrap();
        fs::write(config.key_file(pool), "secret").unwrap();
    }

    fn fresh_host() -> MockRunner {
        let runner = MockRunner::new();
        runner.stdout("zpool list", "");
        runner.respond("cryptsetup status", CommandOutput::failed(4, ""));
        runner.respond("mountpoint -q", CommandOutput::failed(1, ""));
        runner
    }

    #[test]
    fn test_key_still_unavailable_rolls_back_in_reverse() {
        let dir = TempDir::new().unwrap();
        let config = keystore_config(&dir);
        place_key(&config, "rpool");

        let runner = fresh_host();
        runner.stdout("zfs get -H -o value keystatus rpool", "unavailable\n");
        let prompter = ScriptedPrompter::new();
        let console = Console::quiet();

        let unlock = KeystoreUnlock::new(&runner, &prompter, &console, &config);
        let result = unlock.run(Some("rpool".to_string()), None, &Overrides::default());

        // The re-check after load-key still sees "unavailable"
        assert!(matches!(result, Err(RescueError::CommandFailed { .. })));
        assert_eq!(runner.count("zfs load-key -L file://"), 1);
        let calls = runner.calls();
        let umount = calls.iter().position(|c| c.starts_with("umount -R")).unwrap();
        let close = calls.iter().position(|c| c == "cryptsetup close keystore-rpool").unwrap();
        let export = calls.iter().position(|c| c == "zpool export rpool").unwrap();
        assert!(umount < close && close < export);
        // The directory existed before the run, so it stays
        assert!(config.key_file("rpool").is_file());
    }

    #[test]
    fn test_unlock_success_reports_key_file() {
        let dir = TempDir::new().unwrap();
        let config = keystore_config(&dir);
        place_key(&config, "rpool");

        let runner = fresh_host();
        runner.stdout("zfs get -H -o value keystatus rpool", "available\n");
        let prompter = ScriptedPrompter::new();
        let console = Console::quiet();

        let report = KeystoreUnlock::new(&runner, &prompter, &console, &config)
            .run(Some("rpool".to_string()), Some("ks".to_string()), &Overrides::default())
            .unwrap();

        assert_eq!(report.mapper, "ks");
        assert_eq!(report.key_file, config.key_file("rpool"));
        let kinds: Vec<ResourceKind> = report.acquired.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![ResourceKind::ImportedPool, ResourceKind::MapperDevice, ResourceKind::MountPoint]
        );
        assert_eq!(runner.count("zfs load-key"), 0);
        assert_eq!(runner.count("zpool export"), 0);
        assert!(runner.calls().contains(&format!(
            "cryptsetup open {} ks",
            config.zvol_device("rpool").display()
        )));
    }

    #[test]
    fn test_already_unlocked_is_all_notices() {
        let dir = TempDir::new().unwrap();
        let config = keystore_config(&dir);
        place_key(&config, "rpool");

        let runner = MockRunner::new();
        runner.stdout("zpool list", "rpool\n");
        runner.stdout("zfs get -H -o value keystatus rpool", "available\n");
        let prompter = ScriptedPrompter::new();
        let console = Console::quiet();

        let report = KeystoreUnlock::new(&runner, &prompter, &console, &config)
            .run(Some("rpool".to_string()), None, &Overrides::default())
            .unwrap();

        assert!(report.acquired.is_empty());
        assert_eq!(report.notices.len(), 4);
        assert_eq!(runner.count("zpool import"), 0);
        assert_eq!(runner.count("cryptsetup open"), 0);
        assert_eq!(runner.count("mount "), 0);
    }

    #[test]
    fn test_missing_key_file_rolls_back() {
        let dir = TempDir::new().unwrap();
        let config = keystore_config(&dir);

        let runner = fresh_host();
        let prompter = ScriptedPrompter::new();
        let console = Console::quiet();

        let err = KeystoreUnlock::new(&runner, &prompter, &console, &config)
            .run(Some("rpool".to_string()), None, &Overrides::default())
            .unwrap_err();

        assert!(matches!(err, RescueError::NotFound(_)));
        assert!(!config.mount_path("rpool").exists());
        assert_eq!(runner.count("umount -R"), 1);
        assert_eq!(runner.count("cryptsetup close keystore-rpool"), 1);
        assert_eq!(runner.count("zpool export rpool"), 1);
    }

    #[test]
    fn test_pool_prompted_when_not_given() {
        let dir = TempDir::new().unwrap();
        let config = keystore_config(&dir);
        place_key(&config, "tank");

        let runner = MockRunner::new();
        runner.stdout("zpool list", "tank\n");
        runner.stdout("zfs get -H -o value keystatus tank", "available\n");
        let prompter = ScriptedPrompter::new().text("tank");
        let console = Console::quiet();

        let report = KeystoreUnlock::new(&runner, &prompter, &console, &config)
            .run(None, None, &Overrides::default())
            .unwrap();
        assert_eq!(report.pool, "tank");
        assert_eq!(report.mapper, "keystore-tank");
        assert_eq!(prompter.asked().len(), 1);
    }
}
