//! Fully identified recovery target, plus the run journal steps write to.

use crate::resolver::PoolSelection;
use serde::Serialize;
use std::path::PathBuf;

/// Everything the mount, repair and cleanup steps need to know.
///
/// Built once the datasets are identified and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryContext {
    pub root_pool: String,
    pub boot_pool: String,
    pub efi_partition: String,
    pub root_dataset: String,
    pub boot_dataset: String,
    pub key_file: Option<PathBuf>,
}

impl RecoveryContext {
    pub fn new(selection: &PoolSelection, root_dataset: String, boot_dataset: String) -> Self {
        Self {
            root_pool: selection.root_pool.clone(),
            boot_pool: selection.boot_pool.clone(),
            efi_partition: selection.efi_partition.clone(),
            root_dataset,
            boot_dataset,
            key_file: selection.key_file.clone(),
        }
    }

    /// False when /boot lives inside the root dataset
    pub fn has_separate_boot(&self) -> bool {
        self.boot_dataset != self.root_dataset
    }

    /// Pools touched by the run, root first, without duplicates
    pub fn pools(&self) -> Vec<&str> {
        distinct_pools(&self.root_pool, &self.boot_pool)
    }
}

pub(crate) fn distinct_pools<'s>(root: &'s str, boot: &'s str) -> Vec<&'s str> {
    if root == boot { vec![root] } else { vec![root, boot] }
}

/// A dataset's mountpoint before the run retargeted it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OriginalMountpoint {
    pub dataset: String,
    pub mountpoint: String,
}

/// Non-fatal events collected over a run
#[derive(Debug, Clone, Default, Serialize)]
pub struct Journal {
    /// Idempotence notices: work found already done
    pub notices: Vec<String>,
    /// Tolerated failures
    pub warnings: Vec<String>,
    pub original_mountpoints: Vec<OriginalMountpoint>,
}
