//! Recovery of an encrypted ZFS-on-root installation.
//!
//! This module provides:
//! - **State machine**: strictly forward transitions from `Init` to `CleanedUp`
//! - **Steps**: select, import, unlock, identify, mount, repair, cleanup
//! - **Sequencer**: runs the steps, rolling back acquired resources on failure
//! - **Reports**: serializable outcome of a finished or failed run

mod context;
mod repair;
mod report;
mod sequencer;
mod session;
mod state;
mod steps;

pub use context::{Journal, OriginalMountpoint, RecoveryContext};
pub use repair::render_script;
pub use report::{RecoveryFailure, RecoveryReport};
pub use sequencer::Sequencer;
pub use session::Session;
pub use state::{RecoveryState, StateMachine};
pub use steps::{
    Cleanup, IdentifyDatasets, ImportPools, MountTarget, RepairBoot, SelectPools, Step, UnlockRoot, recovery_steps,
};
