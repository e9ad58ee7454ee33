//! User-level copy-on-write fork.
//!
//! `fork` duplicates the caller's address space into a fresh child
//! without copying a single page up front: writable (or already-COW)
//! pages are remapped copy-on-write in *both* parent and child, and the
//! page-fault handler below resolves the first write on either side by
//! swapping in a private copy. Pages carrying the SHARE bit stay shared
//! by reference; plain read-only pages are shared without COW.

use exos_kernel::env::{EnvId, EnvStatus};
use exos_kernel::memory::address::{PGSHIFT, PGSIZE};
use exos_kernel::memory::layout::{PFTEMP, USTACKTOP, UXSTACKTOP};
use exos_kernel::memory::paging::{PteFlags, SYSCALL_MASK};
use exos_kernel::trap::{UTrapframe, FEC_WR};

use crate::pgfault::{self, set_pgfault_handler, PGFAULT_UPCALL};
use crate::sys::{
    sys_env_destroy, sys_env_set_pgfault_upcall, sys_env_set_status, sys_exofork,
    sys_page_alloc, sys_page_map, sys_page_unmap,
};
use crate::{umem, Result};

const P: u32 = PteFlags::P.bits();
const W: u32 = PteFlags::W.bits();
const U: u32 = PteFlags::U.bits();
const COW: u32 = PteFlags::COW.bits();
const SHARE: u32 = PteFlags::SHARE.bits();

/// Resolve a copy-on-write fault: allocate a fresh page at the scratch
/// address, copy the faulting page into it, move it over the faulting
/// address with write permission, and drop the scratch mapping.
///
/// # Panics
/// If the fault is not a write, or not to a COW page — those faults
/// have no business reaching this handler.
fn pgfault(utf: &mut UTrapframe) {
    let addr = utf.fault_va;
    let err = utf.err;

    if err & FEC_WR == 0 {
        panic!(
            "pgfault: non-write fault at va {:08x}, err {:x}, eip {:08x}",
            addr, err, utf.eip
        );
    }
    let pn = (addr >> PGSHIFT) as usize;
    if umem::uvpt(pn) & COW == 0 {
        panic!("pgfault: write to non-COW page at va {:08x}", addr);
    }

    let perm = P | U | W;
    let base = addr & !0xFFF;

    if let Err(e) = sys_page_alloc(0, PFTEMP, perm) {
        panic!("pgfault: failed to allocate a new page: {}", e);
    }
    let mut buf = [0u8; PGSIZE];
    umem::read(base, &mut buf);
    umem::write(PFTEMP, &buf);
    if let Err(e) = sys_page_map(0, PFTEMP, 0, base, perm) {
        panic!("pgfault: failed to map the new page: {}", e);
    }
    if let Err(e) = sys_page_unmap(0, PFTEMP) {
        panic!("pgfault: failed to unmap the scratch page: {}", e);
    }
}

/// Mirror virtual page `pn` into the child.
///
/// Decision table, from the parent's current permissions:
/// SHARE pages keep their permissions verbatim; writable or COW pages
/// become COW on both sides (child first — remarking the parent first
/// would let a racing fault hand the child a private copy); everything
/// else is shared read-only.
fn duppage(child: EnvId, pn: usize) -> Result<()> {
    let va = (pn << PGSHIFT) as u32;
    let perm = umem::uvpt(pn) & SYSCALL_MASK;

    if perm & SHARE != 0 {
        sys_page_map(0, va, child, va, perm)?;
    } else if perm & (COW | W) != 0 {
        let cow_perm = P | U | COW;
        sys_page_map(0, va, child, va, cow_perm)?;
        sys_page_map(0, va, 0, va, cow_perm)?;
    } else {
        sys_page_map(0, va, child, va, P | U)?;
    }
    Ok(())
}

/// Everything that happens to the child after `exofork`: the address
/// space sweep, a private exception stack, the upcall, and RUNNABLE.
fn build_child(child: EnvId) -> Result<()> {
    let top_pn = (USTACKTOP >> PGSHIFT) as usize;
    let mut pn = 0;
    while pn < top_pn {
        let pdx = pn >> 10;
        if umem::uvpd(pdx) & P == 0 {
            // Whole 4 MiB chunk absent; skip to the next directory slot.
            pn = (pdx + 1) << 10;
            continue;
        }
        let pte = umem::uvpt(pn);
        if pte & P != 0 && pte & U != 0 {
            duppage(child, pn)?;
        }
        pn += 1;
    }

    // The exception stack is the one page never shared and never COW.
    sys_page_alloc(child, UXSTACKTOP - PGSIZE as u32, P | U | W)?;
    sys_env_set_pgfault_upcall(child, PGFAULT_UPCALL)?;
    pgfault::inherit(child)?;
    sys_env_set_status(child, EnvStatus::Runnable)?;
    Ok(())
}

/// Duplicate this environment copy-on-write.
///
/// Returns the child's id to the parent; the child, a register
/// snapshot taken at the `exofork` point, observes 0 when it is first
/// scheduled. A failure after the child exists destroys it before
/// reporting, so no half-built environment survives.
pub fn fork() -> Result<EnvId> {
    set_pgfault_handler(pgfault)?;
    let child = sys_exofork()?;
    log::debug!("forked child {:08x}", child);

    if let Err(e) = build_child(child) {
        let _ = sys_env_destroy(child);
        return Err(e);
    }
    Ok(child)
}
