//! Handle ctrl-c by setting a global atomic and checking it from long-running
//! operations.
//!
//! Workers poll this between mutants; subprocess waits poll it between
//! `wait_timeout` slices so a running `swift test` is terminated promptly.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::anyhow;

use crate::Result;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

pub fn install_handler() {
    ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::SeqCst))
        .expect("install ctrl-c handler");
}

/// True if the program was interrupted and should wind down.
pub fn is_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Return an error if the program was interrupted and should exit.
pub fn check_interrupted() -> Result<()> {
    if is_interrupted() {
        Err(anyhow!("interrupted"))
    } else {
        Ok(())
    }
}
