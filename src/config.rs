use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    /// Directory the installed system is assembled under
    pub recovery_root: PathBuf,
    /// Host file copied into the recovery root for name resolution
    pub dns_source: PathBuf,
    /// Host pseudo-filesystems bind-mounted into the recovery root, in order
    pub bind_mounts: Vec<String>,
    pub keystore: KeystoreConfig,
    pub repair: RepairConfig,
    pub mountpoints: MountpointConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeystoreConfig {
    pub zvol_name: String,
    pub mount_dir: PathBuf,
    pub key_file_name: String,
    pub mapper_prefix: String,
    /// Unmount and close the keystore before exporting pools
    pub close_after_recovery: bool,
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        Self {
            zvol_name: "keystore".to_string(),
            mount_dir: PathBuf::from("/run/keystore"),
            key_file_name: "system.key".to_string(),
            mapper_prefix: "keystore-".to_string(),
            close_after_recovery: true,
        }
    }
}

impl KeystoreConfig {
    /// `/dev/zvol/<pool>/<zvol_name>`
    pub fn zvol_device(&self, pool: &str) -> PathBuf {
        PathBuf::from("/dev/zvol").join(pool).join(&self.zvol_name)
    }

    /// Default mapper name for a pool's keystore
    pub fn mapper_name(&self, pool: &str) -> String {
        format!("{}{}", self.mapper_prefix, pool)
    }

    /// Where the opened keystore is mounted
    pub fn mount_path(&self, pool: &str) -> PathBuf {
        self.mount_dir.join(pool)
    }

    /// Key file inside the mounted keystore
    pub fn key_file(&self, pool: &str) -> PathBuf {
        self.mount_path(pool).join(&self.key_file_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    /// Interpreter used inside the chroot
    pub shell: String,
    /// Script file name, written under `<root>/tmp`
    pub script_name: String,
    pub packages: Vec<String>,
    /// Package index refresh run before reinstalling
    pub refresh_command: String,
    pub install_command: String,
    pub initramfs_command: String,
    pub bootloader_command: String,
    pub boot_config_command: String,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            shell: "/bin/sh".to_string(),
            script_name: "zrescue-repair.sh".to_string(),
            packages: vec![
                "grub-efi-amd64".to_string(),
                "grub-efi-amd64-signed".to_string(),
                "shim-signed".to_string(),
                "zfs-initramfs".to_string(),
            ],
            refresh_command: "apt-get update".to_string(),
            install_command: "apt-get install --reinstall -y".to_string(),
            initramfs_command: "update-initramfs -c -k all".to_string(),
            bootloader_command:
                "grub-install --target=x86_64-efi --efi-directory=/boot/efi --bootloader-id=ubuntu --recheck --no-floppy"
                    .to_string(),
            boot_config_command: "update-grub".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MountpointConfig {
    /// Put the original dataset mountpoints back during cleanup
    pub restore: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            recovery_root: PathBuf::from("/mnt"),
            dns_source: PathBuf::from("/etc/resolv.conf"),
            bind_mounts: ["dev", "dev/pts", "proc", "sys", "run"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            keystore: KeystoreConfig::default(),
            repair: RepairConfig::default(),
            mountpoints: MountpointConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Path of a recovery-root-relative location
    pub fn in_root(&self, relative: &str) -> PathBuf {
        self.recovery_root.join(relative.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.recovery_root, PathBuf::from("/mnt"));
        assert_eq!(config.bind_mounts, vec!["dev", "dev/pts", "proc", "sys", "run"]);
        assert!(!config.mountpoints.restore);
        assert!(config.keystore.close_after_recovery);
    }

    #[test]
    fn test_keystore_paths() {
        let keystore = KeystoreConfig::default();
        assert_eq!(keystore.zvol_device("rpool"), PathBuf::from("/dev/zvol/rpool/keystore"));
        assert_eq!(keystore.mapper_name("rpool"), "keystore-rpool");
        assert_eq!(keystore.mount_path("rpool"), PathBuf::from("/run/keystore/rpool"));
        assert_eq!(keystore.key_file("rpool"), PathBuf::from("/run/keystore/rpool/system.key"));
    }

    #[test]
    fn test_in_root_strips_leading_slash() {
        let config = Config::default();
        assert_eq!(config.in_root("boot/efi"), PathBuf::from("/mnt/boot/efi"));
        assert_eq!(config.in_root("/etc/resolv.conf"), PathBuf::from("/mnt/etc/resolv.conf"));
    }

    #[test]
    fn test_load_explicit_partial_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "recovery_root: /target").unwrap();
        writeln!(file, "repair:").unwrap();
        writeln!(file, "  packages: [grub-pc]").unwrap();
        writeln!(file, "mountpoints:").unwrap();
        writeln!(file, "  restore: true").unwrap();

        let path = file.path().to_path_buf();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.recovery_root, PathBuf::from("/target"));
        assert_eq!(config.repair.packages, vec!["grub-pc"]);
        assert!(config.mountpoints.restore);
        // Untouched sections keep their defaults
        assert_eq!(config.repair.initramfs_command, "update-initramfs -c -k all");
        assert_eq!(config.keystore.zvol_name, "keystore");
    }

    #[test]
    fn test_load_explicit_missing_file_fails() {
        let path = PathBuf::from("/nonexistent/zrescue.yml");
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_load_explicit_invalid_yaml_fails() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "bind_mounts: {{ not a list").unwrap();
        let path = file.path().to_path_buf();
        assert!(Config::load(Some(&path)).is_err());
    }
}
