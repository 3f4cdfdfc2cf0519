//! Machine state guard
//!
//! The store image belongs to the virtual machine while it runs. Every store
//! operation begins with [`assert_inactive`]. The check is a point-in-time
//! look at the machine state, not a lock: the machine may start right after
//! the check passes, so callers still serialize access to a store path.

use std::sync::atomic::{AtomicBool, Ordering};

use super::{Result, VarStoreError};

/// Source of the "is the consuming machine running" predicate
pub trait MachineState {
    /// Whether the machine using the store is currently running
    fn is_running(&self) -> bool;
}

impl<F> MachineState for F
where
    F: Fn() -> bool,
{
    fn is_running(&self) -> bool {
        self()
    }
}

impl MachineState for AtomicBool {
    fn is_running(&self) -> bool {
        self.load(Ordering::Acquire)
    }
}

/// Fail with `ConcurrentAccess` if the machine is running
pub fn assert_inactive<M: MachineState + ?Sized>(machine: &M) -> Result<()> {
    if machine.is_running() {
        log::warn!("refusing variable store access while the machine is running");
        return Err(VarStoreError::ConcurrentAccess);
    }
    Ok(())
}
