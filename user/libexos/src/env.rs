//! Environment views.
//!
//! The kernel publishes read-only snapshots of the environment table;
//! `thisenv` is the conventional self-lookup — an indexed read keyed
//! by `sys_getenvid`, recomputed rather than cached so it stays right
//! across fork.

pub use exos_kernel::env::{envx, EnvId, EnvStatus, EnvType, EnvView, NENV};

use crate::sys::sys_getenvid;
use crate::Result;

/// Snapshot slot `idx` of the environment table.
pub fn env_view(idx: usize) -> EnvView {
    exos_kernel::env::env_view(idx)
}

/// Snapshot of the calling environment.
pub fn thisenv() -> Result<EnvView> {
    let id = sys_getenvid()?;
    Ok(env_view(envx(id)))
}
