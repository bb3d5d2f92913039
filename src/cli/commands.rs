//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - unlock: open the root pool's keystore and load its key
//! - recover: mount, repair and tear down the installed system

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// zrescue - unlock and repair an encrypted ZFS-on-root installation
#[derive(Parser, Debug)]
#[command(name = "zrescue")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "Environment overrides: ROOT_POOL, BOOT_POOL, EFI_PART, ROOT_DATASET, BOOT_DATASET")]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Import the root pool, open and mount its keystore, load the pool key
    Unlock {
        /// Root pool name (default: $ROOT_POOL, else prompt)
        root_pool: Option<String>,

        /// Device-mapper name for the keystore (default: keystore-<pool>)
        mapper: Option<String>,
    },

    /// Mount the installed system, rebuild initramfs and bootloader, clean up
    Recover {
        /// Key file for the root pool (default: prompt for the passphrase)
        key_file: Option<PathBuf>,

        /// Directory to assemble the system under (default: /mnt)
        #[arg(short, long)]
        root: Option<PathBuf>,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,

        /// Stop once everything is mounted and leave it in place
        #[arg(long)]
        mount_only: bool,
    },
}
