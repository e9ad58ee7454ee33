//! Shared test harness: serialize on the one machine and reboot the
//! core, then stand up a running root environment.

use std::sync::{Mutex, MutexGuard, OnceLock};

use exos_kernel::env::{self, EnvId, EnvType};

static MACHINE: OnceLock<Mutex<()>> = OnceLock::new();

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

/// Create a user environment and give it the CPU.
pub fn boot_root() -> (MutexGuard<'static, ()>, EnvId) {
    let guard = boot();
    let root = env::env_create(EnvType::User).expect("root env");
    env::env_run(root).expect("root runnable");
    (guard, root)
}
