//! Shared test harness.
//!
//! The core is one machine-wide instance, so tests serialize on a
//! process-wide lock and reboot the machine before each run: console
//! and TLB history cleared, frame pool rebuilt, environment table
//! emptied.

use std::sync::{Mutex, MutexGuard, OnceLock};

static MACHINE: OnceLock<Mutex<()>> = OnceLock::new();

/// Take the machine and boot a fresh core. Hold the guard for the
/// whole test.
pub fn boot() -> MutexGuard<'static, ()> {
    let guard = MACHINE
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    exos_hal::console::reset();
    exos_hal::tlb::reset();
    exos_kernel::init();
    guard
}
