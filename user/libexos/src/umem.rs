//! User-memory access.
//!
//! Loads and stores against the current environment's address space,
//! routed through the kernel's user memory path so permission bits are
//! honored. A refused access raises the page-fault upcall; once the
//! registered handler returns, the access retries — the same
//! fault/resolve/re-execute cycle the hardware runs.
//!
//! Also home of the self-map readers: `uvpt(pn)` and `uvpd(pdx)` are
//! plain loads from the read-only window every address space carries,
//! so user code inspects its own translations without a system call.

use exos_kernel::memory::layout::{UVPD, UVPT};
use exos_kernel::trap::{self, FaultOutcome};

use crate::pgfault;

/// Read `buf.len()` bytes from `va`.
///
/// # Panics
/// If the environment is destroyed by an unhandled fault.
pub fn read(va: u32, buf: &mut [u8]) {
    loop {
        match trap::user_read(va, buf) {
            Ok(()) => return,
            Err(outcome) => resolve(outcome),
        }
    }
}

/// Write `buf` to `va`. Writes are what trip copy-on-write faults.
///
/// # Panics
/// If the environment is destroyed by an unhandled fault.
pub fn write(va: u32, buf: &[u8]) {
    loop {
        match trap::user_write(va, buf) {
            Ok(()) => return,
            Err(outcome) => resolve(outcome),
        }
    }
}

fn resolve(outcome: FaultOutcome) {
    match outcome {
        FaultOutcome::Upcall { envid, .. } => pgfault::dispatch_upcall(envid),
        FaultOutcome::Destroyed { envid } => {
            log::error!("[{:08x}] destroyed by unhandled fault", envid);
            panic!("[{:08x}] environment destroyed by unhandled fault", envid)
        }
    }
}

/// Load one little-endian word.
pub fn read_u32(va: u32) -> u32 {
    let mut bytes = [0u8; 4];
    read(va, &mut bytes);
    u32::from_le_bytes(bytes)
}

/// Store one little-endian word.
pub fn write_u32(va: u32, value: u32) {
    write(va, &value.to_le_bytes());
}

/// The current environment's page-table entry for virtual page `pn`,
/// via the self-map window.
pub fn uvpt(pn: usize) -> u32 {
    read_u32(UVPT + (pn * 4) as u32)
}

/// The current environment's page-directory entry `pdx`, via the
/// self-map window.
pub fn uvpd(pdx: usize) -> u32 {
    read_u32(UVPD + (pdx * 4) as u32)
}
