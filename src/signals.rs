// src/signals.rs

//! Signal masking for write transactions
//!
//! A writer in the middle of mutating the database must not be torn down by
//! an interactive interrupt. While a write transaction is open the
//! termination signals are blocked on the calling thread; the mask saved at
//! begin is restored verbatim at end, so signals already blocked by the
//! caller stay blocked afterwards.

use crate::{Error, Result};
use nix::sys::signal::{SigSet, Signal, SigmaskHow, sigprocmask};

const TERMINATION_SIGNALS: [Signal; 3] = [Signal::SIGINT, Signal::SIGTERM, Signal::SIGQUIT];

fn termination_set() -> SigSet {
    let mut set = SigSet::empty();
    for sig in TERMINATION_SIGNALS {
        set.add(sig);
    }
    set
}

/// Block the termination signals, returning the prior mask for `restore`.
pub fn mask_termination() -> Result<SigSet> {
    let mut old = SigSet::empty();
    sigprocmask(SigmaskHow::SIG_BLOCK, Some(&termination_set()), Some(&mut old))
        .map_err(|e| Error::Signal(e.to_string()))?;
    Ok(old)
}

/// Restore a mask previously returned by `mask_termination`.
pub fn restore_mask(old: &SigSet) -> Result<()> {
    sigprocmask(SigmaskHow::SIG_SETMASK, Some(old), None)
        .map_err(|e| Error::Signal(e.to_string()))
}

/// Whether all termination signals are currently blocked on this thread.
pub fn termination_masked() -> bool {
    SigSet::thread_get_mask()
        .map(|mask| TERMINATION_SIGNALS.iter().all(|sig| mask.contains(*sig)))
        .unwrap_or(false)
}
