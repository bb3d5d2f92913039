//! zrescue - unlock and repair an encrypted ZFS-on-root installation
//!
//! Opens the root pool's LUKS keystore, imports and unlocks the pools, mounts
//! the installed system under a recovery root, rebuilds its initramfs and
//! bootloader inside a chroot, and tears everything down again. Anything
//! acquired along the way is rolled back in reverse order if a step fails.

pub mod command;
pub mod config;
pub mod crypt;
pub mod error;
pub mod interrupt;
pub mod keystore;
pub mod mounts;
pub mod output;
pub mod preflight;
pub mod recovery;
pub mod registry;
pub mod resolver;
pub mod zfs;

pub use error::{RescueError, Result};
