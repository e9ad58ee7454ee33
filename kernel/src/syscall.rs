//! The system-call surface.
//!
//! A single trap vector delivers the call number plus up to five word
//! arguments; the return value replaces the number register on resume.
//! Every call returns a signed 32-bit value, negative on error.
//!
//! For the address-space calls the validation order is fixed — address
//! range, then permission mask, then environment resolution, then
//! page-level checks — which keeps the error codes predictable.

use crate::env::{self, EnvStatus, EnvTable, FL_IF, FL_IOPL_MASK, Trapframe, TRAPFRAME_SIZE};
use crate::error::{KernError, KernResult};
use crate::ipc;
use crate::memory::address::VirtAddr;
use crate::memory::layout::UTOP;
use crate::memory::paging::{self, PteFlags, SYSCALL_MASK};
use crate::memory::pmm::{self, AllocFlags};
use crate::sched::{self, NPRIO};

pub const SYS_CPUTS: u32 = 1;
pub const SYS_CGETC: u32 = 2;
pub const SYS_GETENVID: u32 = 3;
pub const SYS_ENV_DESTROY: u32 = 4;
pub const SYS_YIELD: u32 = 5;
pub const SYS_EXOFORK: u32 = 6;
pub const SYS_ENV_SET_STATUS: u32 = 7;
pub const SYS_ENV_SET_PGFAULT_UPCALL: u32 = 8;
pub const SYS_PAGE_ALLOC: u32 = 9;
pub const SYS_PAGE_MAP: u32 = 10;
pub const SYS_PAGE_UNMAP: u32 = 11;
pub const SYS_IPC_TRY_SEND: u32 = 12;
pub const SYS_IPC_RECV: u32 = 13;
pub const SYS_ENV_SET_TRAPFRAME: u32 = 14;
pub const SYS_SET_PRIORITY: u32 = 15;

/// Dispatch one system call on behalf of the current environment.
pub fn syscall(no: u32, a1: u32, a2: u32, a3: u32, a4: u32, a5: u32) -> i32 {
    let mut t = env::table();
    match dispatch(&mut t, no, a1, a2, a3, a4, a5) {
        Ok(v) => v as i32,
        Err(e) => e.code(),
    }
}

fn dispatch(
    t: &mut EnvTable,
    no: u32,
    a1: u32,
    a2: u32,
    a3: u32,
    a4: u32,
    a5: u32,
) -> KernResult<u32> {
    match no {
        SYS_CPUTS => sys_cputs(t, a1, a2),
        SYS_CGETC => Ok(exos_hal::console::getc().unwrap_or(0) as u32),
        SYS_GETENVID => {
            let cur = t.current().ok_or(KernError::BadEnv)?;
            Ok(t.envs[cur].id)
        }
        SYS_ENV_DESTROY => {
            let idx = t.envid2env(a1, true)?;
            t.destroy(idx);
            Ok(0)
        }
        SYS_YIELD => {
            sched::sched_yield(t);
            Ok(0)
        }
        SYS_EXOFORK => sys_exofork(t),
        SYS_ENV_SET_STATUS => sys_env_set_status(t, a1, a2),
        SYS_ENV_SET_PGFAULT_UPCALL => {
            let idx = t.envid2env(a1, true)?;
            t.envs[idx].pgfault_upcall = a2;
            Ok(0)
        }
        SYS_PAGE_ALLOC => sys_page_alloc(t, a1, a2, a3),
        SYS_PAGE_MAP => sys_page_map(t, a1, a2, a3, a4, a5),
        SYS_PAGE_UNMAP => sys_page_unmap(t, a1, a2),
        SYS_IPC_TRY_SEND => ipc::try_send(t, a1, a2, a3, a4),
        SYS_IPC_RECV => ipc::recv(t, a1),
        SYS_ENV_SET_TRAPFRAME => sys_env_set_trapframe(t, a1, a2),
        SYS_SET_PRIORITY => sys_set_priority(t, a1, a2),
        _ => Err(KernError::Inval),
    }
}

/// A mapping permission a user may request: Present and User set,
/// nothing outside the syscall mask.
pub(crate) fn check_map_perm(perm: u32) -> KernResult<()> {
    let required = PteFlags::P.bits() | PteFlags::U.bits();
    if perm & required != required {
        return Err(KernError::Inval);
    }
    if perm & !SYSCALL_MASK != 0 {
        return Err(KernError::Inval);
    }
    Ok(())
}

fn page_aligned_user_va(va: u32) -> KernResult<VirtAddr> {
    let va = VirtAddr::new(va);
    if va.as_u32() >= UTOP || !va.is_page_aligned() {
        return Err(KernError::Inval);
    }
    Ok(va)
}

/// Print a user buffer to the console. A caller that cannot actually
/// read `[va, va+len)` is destroyed on the spot; the call never returns
/// to it.
fn sys_cputs(t: &mut EnvTable, va: u32, len: u32) -> KernResult<u32> {
    let cur = t.current().ok_or(KernError::BadEnv)?;
    let pgdir = t.envs[cur].pgdir;
    let len = len as usize;

    if let Err(bad) =
        paging::user_mem_check(pgdir, VirtAddr::new(va), len, PteFlags::U.bits())
    {
        log::warn!(
            "[{:08x}] user_mem check failure for va {} in cputs",
            t.envs[cur].id,
            bad
        );
        t.destroy(cur);
        return Err(KernError::BadEnv);
    }

    let mut chunk = [0u8; 256];
    let mut done = 0;
    while done < len {
        let n = chunk.len().min(len - done);
        paging::copy_from_user(pgdir, VirtAddr::new(va) + done as u32, &mut chunk[..n])?;
        exos_hal::console::write_bytes(&chunk[..n]);
        done += n;
    }
    Ok(0)
}

/// Allocate a child as a register snapshot of the caller: same trap
/// frame, return register staged to 0, NOT_RUNNABLE until the parent
/// finishes building its address space.
fn sys_exofork(t: &mut EnvTable) -> KernResult<u32> {
    let cur = t.current().ok_or(KernError::BadEnv)?;
    let parent_id = t.envs[cur].id;
    let parent_tf = t.envs[cur].tf;

    let child = t.alloc(parent_id)?;
    let e = &mut t.envs[child];
    e.status = EnvStatus::NotRunnable;
    e.tf = parent_tf;
    e.tf.regs.eax = 0;
    Ok(e.id)
}

fn sys_env_set_status(t: &mut EnvTable, envid: u32, status: u32) -> KernResult<u32> {
    let status = EnvStatus::from_abi(status)
        .filter(|s| matches!(s, EnvStatus::Runnable | EnvStatus::NotRunnable))
        .ok_or(KernError::Inval)?;
    let idx = t.envid2env(envid, true)?;
    t.envs[idx].status = status;
    Ok(0)
}

fn sys_page_alloc(t: &mut EnvTable, envid: u32, va: u32, perm: u32) -> KernResult<u32> {
    let va = page_aligned_user_va(va)?;
    check_map_perm(perm)?;
    let idx = t.envid2env(envid, true)?;

    let pa = pmm::alloc(AllocFlags::ZERO).ok_or(KernError::NoMem)?;
    if let Err(e) = paging::insert(t.envs[idx].pgdir, pa, va, perm) {
        // The fresh frame was never mapped; hand it straight back.
        pmm::free(pa);
        return Err(e);
    }
    Ok(0)
}

fn sys_page_map(
    t: &mut EnvTable,
    src_envid: u32,
    src_va: u32,
    dst_envid: u32,
    dst_va: u32,
    perm: u32,
) -> KernResult<u32> {
    let src_va = page_aligned_user_va(src_va)?;
    let dst_va = page_aligned_user_va(dst_va)?;
    check_map_perm(perm)?;
    let src = t.envid2env(src_envid, true)?;
    let dst = t.envid2env(dst_envid, true)?;

    let (pa, slot) = paging::lookup(t.envs[src].pgdir, src_va).ok_or(KernError::Inval)?;
    // No write-permission upgrades on a read-only source mapping.
    if perm & PteFlags::W.bits() != 0 && slot.read() & PteFlags::W.bits() == 0 {
        return Err(KernError::Inval);
    }
    paging::insert(t.envs[dst].pgdir, pa, dst_va, perm)?;
    Ok(0)
}

fn sys_page_unmap(t: &mut EnvTable, envid: u32, va: u32) -> KernResult<u32> {
    let va = page_aligned_user_va(va)?;
    let idx = t.envid2env(envid, true)?;
    paging::remove(t.envs[idx].pgdir, va);
    Ok(0)
}

/// Install a trap frame, forcing it back to user privilege: CPL-3
/// selectors, interrupts enabled, I/O privilege cleared.
fn sys_env_set_trapframe(t: &mut EnvTable, envid: u32, tf_va: u32) -> KernResult<u32> {
    let idx = t.envid2env(envid, true)?;
    let cur = t.current().ok_or(KernError::BadEnv)?;

    let caller_pgdir = t.envs[cur].pgdir;
    if paging::user_mem_check(
        caller_pgdir,
        VirtAddr::new(tf_va),
        TRAPFRAME_SIZE,
        PteFlags::U.bits(),
    )
    .is_err()
    {
        return Err(KernError::BadEnv);
    }

    let mut bytes = [0u8; TRAPFRAME_SIZE];
    paging::copy_from_user(caller_pgdir, VirtAddr::new(tf_va), &mut bytes)?;
    let mut tf = Trapframe::from_bytes(&bytes);
    tf.cs |= 3;
    tf.ss |= 3;
    tf.eflags |= FL_IF;
    tf.eflags &= !FL_IOPL_MASK;
    t.envs[idx].tf = tf;
    Ok(0)
}

fn sys_set_priority(t: &mut EnvTable, envid: u32, prio: u32) -> KernResult<u32> {
    if prio >= NPRIO {
        return Err(KernError::Inval);
    }
    let idx = t.envid2env(envid, true)?;
    t.envs[idx].prio = prio;
    Ok(0)
}
