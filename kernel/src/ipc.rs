//! Rendezvous IPC.
//!
//! A blocked receiver advertises `(recving, dstva)`; the first sender
//! to execute delivers one `(from, value, [page, perm])` tuple straight
//! into the receiver's record, marks it RUNNABLE, and pre-stages its
//! return register so the paused receive call completes with 0. There
//! is no queue: later senders see `IpcNotRecv` and are expected to
//! yield and retry.
//!
//! All send-side validation happens before the target is touched, so a
//! failed send leaves no partial state visible anywhere.

use crate::env::{EnvId, EnvStatus, EnvTable};
use crate::error::{KernError, KernResult};
use crate::memory::address::VirtAddr;
use crate::memory::layout::UTOP;
use crate::memory::paging;

/// Kernel half of `sys_ipc_try_send`.
pub(crate) fn try_send(
    t: &mut EnvTable,
    target: EnvId,
    value: u32,
    srcva: u32,
    perm: u32,
) -> KernResult<u32> {
    let cur = t.current().ok_or(KernError::BadEnv)?;
    // Anyone may send to anyone: resolution without the parent check.
    let dst = t.envid2env(target, false)?;
    if !t.envs[dst].ipc_recving {
        return Err(KernError::IpcNotRecv);
    }

    // Decide the page transfer, if any, before mutating the target.
    let mut xfer_perm = 0;
    if srcva < UTOP {
        let srcva = VirtAddr::new(srcva);
        if !srcva.is_page_aligned() {
            return Err(KernError::Inval);
        }
        crate::syscall::check_map_perm(perm)?;
        let (pa, slot) = paging::lookup(t.envs[cur].pgdir, srcva).ok_or(KernError::Inval)?;
        if perm & paging::PteFlags::W.bits() != 0
            && slot.read() & paging::PteFlags::W.bits() == 0
        {
            return Err(KernError::Inval);
        }
        let dstva = t.envs[dst].ipc_dstva;
        if dstva < UTOP {
            paging::insert(t.envs[dst].pgdir, pa, VirtAddr::new(dstva), perm)
                .map_err(|_| KernError::NoMem)?;
            xfer_perm = perm;
        }
        // Receiver not asking for a page: nothing transferred, no error.
    }

    let from = t.envs[cur].id;
    let d = &mut t.envs[dst];
    d.ipc_perm = xfer_perm;
    d.ipc_from = from;
    d.ipc_value = value;
    d.ipc_recving = false;
    d.tf.regs.eax = 0;
    d.status = EnvStatus::Runnable;
    Ok(0)
}

/// Kernel half of `sys_ipc_recv`. Blocks by status transition; the
/// sender's action completes the call, so the caller's return register
/// is staged to 0 here.
pub(crate) fn recv(t: &mut EnvTable, dstva: u32) -> KernResult<u32> {
    let cur = t.current().ok_or(KernError::BadEnv)?;
    if dstva < UTOP && !VirtAddr::new(dstva).is_page_aligned() {
        return Err(KernError::Inval);
    }
    let e = &mut t.envs[cur];
    e.ipc_recving = true;
    e.ipc_dstva = dstva;
    e.status = EnvStatus::NotRunnable;
    e.tf.regs.eax = 0;
    crate::sched::sched_yield(t);
    Ok(0)
}
