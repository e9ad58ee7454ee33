//! Trap dispatch: the page-fault path and the user memory pipe.
//!
//! The assembly trap entry/exit stubs are collaborators; what lives
//! here is everything they call into. A faulting user access lands in
//! [`page_fault`]: the kernel pushes a fault record onto the
//! environment's dedicated exception stack and redirects its saved
//! context to the registered user-mode upcall — or destroys it when no
//! upcall can run. [`upcall_return`] is the kernel half of the return
//! trampoline: it reinstates the interrupted context from the fault
//! record.
//!
//! [`user_read`] / [`user_write`] are the memory path user-mode
//! execution goes through: translation honors Present/User/Writable at
//! both table levels, and a refused access raises the page-fault path
//! exactly as the MMU would.

use crate::env::{self, EnvId, EnvTable, PushRegs};
use crate::error::KernResult;
use crate::memory::address::{VirtAddr, PGSIZE};
use crate::memory::layout::UXSTACKTOP;
use crate::memory::paging::{self, AccessFault, PteFlags};

/// Fault error code bit: the page was present (protection violation).
pub const FEC_PR: u32 = 1;
/// Fault error code bit: the access was a write.
pub const FEC_WR: u32 = 2;
/// Fault error code bit: the access came from user mode.
pub const FEC_U: u32 = 4;

/// The fault record pushed onto the exception stack, lowest address
/// first: faulting address, error code, then the interrupted context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct UTrapframe {
    pub fault_va: u32,
    pub err: u32,
    pub regs: PushRegs,
    pub eip: u32,
    pub eflags: u32,
    pub esp: u32,
}

/// Byte size of the fault record (13 words).
pub const UTF_SIZE: usize = core::mem::size_of::<UTrapframe>();

impl UTrapframe {
    pub fn from_bytes(bytes: &[u8; UTF_SIZE]) -> Self {
        // SAFETY: repr(C), u32 fields only, any bit pattern valid.
        unsafe { core::ptr::read_unaligned(bytes.as_ptr().cast()) }
    }

    pub fn to_bytes(&self) -> [u8; UTF_SIZE] {
        let mut out = [0u8; UTF_SIZE];
        // SAFETY: as in `from_bytes`.
        unsafe { core::ptr::write_unaligned(out.as_mut_ptr().cast(), *self) };
        out
    }
}

/// What became of a faulting environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOutcome {
    /// The fault record is in place and the environment's saved context
    /// now enters its upcall; resume it to run the handler.
    Upcall { envid: EnvId, utf_va: u32 },
    /// No handler could run; the environment has been destroyed.
    Destroyed { envid: EnvId },
}

fn fault_code(kind: AccessFault, write: bool) -> u32 {
    let mut err = FEC_U;
    if kind == AccessFault::Protection {
        err |= FEC_PR;
    }
    if write {
        err |= FEC_WR;
    }
    err
}

/// Read from the current environment's address space under user access
/// rules. A refused access takes the page-fault path and reports how it
/// was disposed of.
pub fn user_read(va: u32, buf: &mut [u8]) -> Result<(), FaultOutcome> {
    user_copy(va, buf.as_mut_ptr(), buf.len(), false)
}

/// Write into the current environment's address space under user access
/// rules; the write path is what trips copy-on-write faults.
pub fn user_write(va: u32, buf: &[u8]) -> Result<(), FaultOutcome> {
    user_copy(va, buf.as_ptr() as *mut u8, buf.len(), true)
}

fn user_copy(va: u32, buf: *mut u8, len: usize, write: bool) -> Result<(), FaultOutcome> {
    let mut t = env::table();
    let cur = t
        .current()
        .expect("user memory access with no current environment");

    let mut done = 0usize;
    while done < len {
        let cur_va = VirtAddr::new(va.wrapping_add(done as u32));
        let pa = match paging::user_access(t.envs[cur].pgdir, cur_va, write) {
            Ok(pa) => pa,
            Err(kind) => {
                return Err(page_fault(&mut t, cur, cur_va.as_u32(), fault_code(kind, write)));
            }
        };
        let chunk = (PGSIZE - cur_va.pgoff() as usize).min(len - done);
        // SAFETY: `pa` resolves `chunk` contiguous in-frame bytes; the
        // caller's buffer covers `len` bytes.
        unsafe {
            if write {
                core::ptr::copy_nonoverlapping(buf.add(done), pa.kva(), chunk);
            } else {
                core::ptr::copy_nonoverlapping(pa.kva(), buf.add(done), chunk);
            }
        }
        done += chunk;
    }
    Ok(())
}

/// Deliver a page fault to an environment.
///
/// With an upcall registered and a usable exception stack, the fault
/// record lands on that stack — below the current record, with one
/// scratch word of gap, when the fault struck while already handling
/// one — and the saved context is pointed at the upcall. Otherwise the
/// environment is destroyed.
pub(crate) fn page_fault(
    t: &mut EnvTable,
    idx: usize,
    fault_va: u32,
    err: u32,
) -> FaultOutcome {
    let e = &t.envs[idx];
    let envid = e.id;

    if e.pgfault_upcall != 0 {
        let esp = e.tf.esp;
        let xstack_base = UXSTACKTOP - PGSIZE as u32;
        let top = if esp >= xstack_base && esp < UXSTACKTOP {
            // Recursive fault: push below the live record, skipping one
            // word for the trampoline's scratch slot.
            esp - 4
        } else {
            UXSTACKTOP
        };
        let utf_va = top.wrapping_sub(UTF_SIZE as u32);

        let writable = PteFlags::W.bits() | PteFlags::U.bits();
        if utf_va >= xstack_base
            && utf_va < top
            && paging::user_mem_check(e.pgdir, VirtAddr::new(utf_va), UTF_SIZE, writable)
                .is_ok()
        {
            let utf = UTrapframe {
                fault_va,
                err,
                regs: e.tf.regs,
                eip: e.tf.eip,
                eflags: e.tf.eflags,
                esp: e.tf.esp,
            };
            // Cannot fail: the range was just checked mapped.
            let _ = paging::copy_to_user(e.pgdir, VirtAddr::new(utf_va), &utf.to_bytes());

            let e = &mut t.envs[idx];
            e.tf.esp = utf_va;
            e.tf.eip = e.pgfault_upcall;
            return FaultOutcome::Upcall { envid, utf_va };
        }
    }

    log::warn!(
        "[{:08x}] user fault va {:08x} err {:x} eip {:08x}",
        envid,
        fault_va,
        err,
        e.tf.eip
    );
    t.destroy(idx);
    FaultOutcome::Destroyed { envid }
}

/// Read the fault record the environment's saved stack pointer points
/// at (it does, between fault delivery and `upcall_return`).
pub fn read_utf(envid: EnvId) -> KernResult<UTrapframe> {
    let t = env::table();
    let idx = t.envid2env(envid, false)?;
    let e = &t.envs[idx];
    let mut bytes = [0u8; UTF_SIZE];
    paging::copy_from_user(e.pgdir, VirtAddr::new(e.tf.esp), &mut bytes)?;
    Ok(UTrapframe::from_bytes(&bytes))
}

/// Overwrite the pending fault record (handlers may patch the context
/// they will return into).
pub fn write_utf(envid: EnvId, utf: &UTrapframe) -> KernResult<()> {
    let t = env::table();
    let idx = t.envid2env(envid, false)?;
    let e = &t.envs[idx];
    paging::copy_to_user(e.pgdir, VirtAddr::new(e.tf.esp), &utf.to_bytes())
}

/// The kernel half of the upcall return trampoline: pop the fault
/// record and reinstate the interrupted registers, stack, and flags so
/// the faulting instruction re-executes.
pub fn upcall_return(envid: EnvId) -> KernResult<()> {
    let utf = read_utf(envid)?;
    let mut t = env::table();
    let idx = t.envid2env(envid, false)?;
    let e = &mut t.envs[idx];
    e.tf.regs = utf.regs;
    e.tf.eip = utf.eip;
    e.tf.eflags = utf.eflags;
    e.tf.esp = utf.esp;
    Ok(())
}
