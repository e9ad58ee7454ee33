//! System-call wrappers.
//!
//! One thin, typed function per call number. Arguments travel as the
//! five word-sized values of the trap convention; negative returns are
//! decoded back into [`Error`].

use exos_kernel::env::{EnvId, EnvStatus};
use exos_kernel::syscall as abi;

use crate::{Error, Result};

#[inline]
fn syscall(no: u32, a1: u32, a2: u32, a3: u32, a4: u32, a5: u32) -> i32 {
    // The trap gate: on hardware this is the `int` instruction with
    // the number and arguments in registers.
    abi::syscall(no, a1, a2, a3, a4, a5)
}

fn check(r: i32) -> Result<u32> {
    if r < 0 {
        Err(Error::from_code(r).unwrap_or(Error::Inval))
    } else {
        Ok(r as u32)
    }
}

/// Print `len` bytes at user address `va` to the console.
pub fn sys_cputs(va: u32, len: usize) -> Result<()> {
    check(syscall(abi::SYS_CPUTS, va, len as u32, 0, 0, 0)).map(|_| ())
}

/// Non-blocking console read; `None` when no input is waiting.
pub fn sys_cgetc() -> Option<u8> {
    match syscall(abi::SYS_CGETC, 0, 0, 0, 0, 0) {
        0 => None,
        c => Some(c as u8),
    }
}

/// The calling environment's id.
pub fn sys_getenvid() -> Result<EnvId> {
    check(syscall(abi::SYS_GETENVID, 0, 0, 0, 0, 0))
}

/// Destroy `envid` (0 = self).
pub fn sys_env_destroy(envid: EnvId) -> Result<()> {
    check(syscall(abi::SYS_ENV_DESTROY, envid, 0, 0, 0, 0)).map(|_| ())
}

/// Hand the CPU back to the scheduler.
pub fn sys_yield() {
    let _ = syscall(abi::SYS_YIELD, 0, 0, 0, 0, 0);
}

/// Create a child as a register snapshot of the caller. The parent
/// receives the child id; the child observes 0 when first resumed.
pub fn sys_exofork() -> Result<EnvId> {
    check(syscall(abi::SYS_EXOFORK, 0, 0, 0, 0, 0))
}

/// Set an environment RUNNABLE or NOT_RUNNABLE.
pub fn sys_env_set_status(envid: EnvId, status: EnvStatus) -> Result<()> {
    check(syscall(abi::SYS_ENV_SET_STATUS, envid, status.to_abi(), 0, 0, 0)).map(|_| ())
}

/// Register the page-fault upcall entry point for `envid`.
pub fn sys_env_set_pgfault_upcall(envid: EnvId, upcall: u32) -> Result<()> {
    check(syscall(abi::SYS_ENV_SET_PGFAULT_UPCALL, envid, upcall, 0, 0, 0)).map(|_| ())
}

/// Allocate a zeroed page and map it at `va` in `envid`'s space.
pub fn sys_page_alloc(envid: EnvId, va: u32, perm: u32) -> Result<()> {
    check(syscall(abi::SYS_PAGE_ALLOC, envid, va, perm, 0, 0)).map(|_| ())
}

/// Map the page at `src_va` in `src` also at `dst_va` in `dst`.
pub fn sys_page_map(src: EnvId, src_va: u32, dst: EnvId, dst_va: u32, perm: u32) -> Result<()> {
    check(syscall(abi::SYS_PAGE_MAP, src, src_va, dst, dst_va, perm)).map(|_| ())
}

/// Unmap `va` in `envid`'s space (no-op when nothing is mapped).
pub fn sys_page_unmap(envid: EnvId, va: u32) -> Result<()> {
    check(syscall(abi::SYS_PAGE_UNMAP, envid, va, 0, 0, 0)).map(|_| ())
}

/// One send attempt; fails with `IpcNotRecv` when the target is not
/// blocked in receive.
pub fn sys_ipc_try_send(envid: EnvId, value: u32, srcva: u32, perm: u32) -> Result<()> {
    check(syscall(abi::SYS_IPC_TRY_SEND, envid, value, srcva, perm, 0)).map(|_| ())
}

/// Block until a sender delivers; the sender's action completes the
/// call with 0.
pub fn sys_ipc_recv(dstva: u32) -> Result<()> {
    check(syscall(abi::SYS_IPC_RECV, dstva, 0, 0, 0, 0)).map(|_| ())
}

/// Install the trap frame staged at user address `tf_va` into `envid`.
pub fn sys_env_set_trapframe(envid: EnvId, tf_va: u32) -> Result<()> {
    check(syscall(abi::SYS_ENV_SET_TRAPFRAME, envid, tf_va, 0, 0, 0)).map(|_| ())
}

/// Move an environment into priority class `prio`.
pub fn sys_set_priority(envid: EnvId, prio: u32) -> Result<()> {
    check(syscall(abi::SYS_SET_PRIORITY, envid, prio, 0, 0, 0)).map(|_| ())
}
