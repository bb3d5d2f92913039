//! Operator interrupt handling.
//!
//! SIGINT, SIGTERM and SIGHUP only raise a flag. Runs check it at step
//! boundaries and fail with `Interrupted`, which rolls back like any other
//! step failure instead of leaving pools and mounts behind.

use crate::error::{RescueError, Result};
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};

static INTERRUPTED: LazyLock<Arc<AtomicBool>> = LazyLock::new(|| Arc::new(AtomicBool::new(false)));

/// Route termination signals to the process-wide flag
pub fn install() -> Result<()> {
    for signal in [SIGINT, SIGTERM, SIGHUP] {
        signal_hook::flag::register(signal, Arc::clone(&INTERRUPTED))?;
    }
    Ok(())
}

/// The process-wide interrupt flag
pub fn flag() -> &'static AtomicBool {
    &INTERRUPTED
}

/// `Err(Interrupted)` once `flag` has been raised
pub fn check(flag: &AtomicBool) -> Result<()> {
    if flag.load(Ordering::SeqCst) {
        return Err(RescueError::Interrupted);
    }
    Ok(())
}
