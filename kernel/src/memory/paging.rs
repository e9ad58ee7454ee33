//! Two-level page-table primitives.
//!
//! Page directories and page tables live in ordinary frames and are
//! walked in software through the direct map; intermediate tables are
//! allocated on demand from the page allocator and refcounted into the
//! directory entry that points at them.
//!
//! Every environment's directory shares the kernel half (everything at
//! or above `UTOP`) by reference with the boot-built template, and maps
//! itself read-only at the `UVPT` window so user code can inspect its
//! own translations with plain loads.

use core::sync::atomic::{AtomicU32, Ordering};

use super::address::{PhysAddr, VirtAddr, PGSIZE};
use super::layout::{KERNBASE, NPDENTRIES, NPTENTRIES, UTOP, UVPT};
use super::pmm::{self, AllocFlags};
use crate::error::{KernError, KernResult};

bitflags::bitflags! {
    /// Page-table entry permission bits.
    ///
    /// Bits 9-11 are reserved for software; two of them carry meaning
    /// here: `SHARE` keeps a page inherited by reference across fork
    /// regardless of writability, `COW` marks a page that must be
    /// privately duplicated on write.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u32 {
        const P   = 1 << 0;
        const W   = 1 << 1;
        const U   = 1 << 2;
        const PWT = 1 << 3;
        const PCD = 1 << 4;
        const A   = 1 << 5;
        const D   = 1 << 6;
        const PS  = 1 << 7;
        const G   = 1 << 8;
        const AVAIL0 = 1 << 9;
        const SHARE  = 1 << 10;
        const COW    = 1 << 11;
    }
}

/// All three software-available bits.
pub const AVAIL: u32 = 0xE00;

/// Permission bits a user environment may pass through a system call.
/// Present and User must be set; nothing outside this mask may be.
pub const SYSCALL_MASK: u32 =
    PteFlags::P.bits() | PteFlags::W.bits() | PteFlags::U.bits() | AVAIL;

const P: u32 = PteFlags::P.bits();
const W: u32 = PteFlags::W.bits();
const U: u32 = PteFlags::U.bits();

/// Physical frame address held in an entry (low 12 bits are flags).
#[inline]
fn pte_addr(entry: u32) -> PhysAddr {
    PhysAddr::new(entry & !0xFFF)
}

#[inline]
fn entry(table: PhysAddr, idx: usize) -> u32 {
    debug_assert!(idx < NPTENTRIES);
    // SAFETY: `table` is a frame in the direct map; entries are read
    // with volatile ops because the self-map window aliases them.
    unsafe { core::ptr::read_volatile((table.kva() as *const u32).add(idx)) }
}

#[inline]
fn set_entry(table: PhysAddr, idx: usize, value: u32) {
    debug_assert!(idx < NPTENTRIES);
    // SAFETY: as in `entry`.
    unsafe { core::ptr::write_volatile((table.kva() as *mut u32).add(idx), value) }
}

/// Location of one page-table entry: the table frame plus the index.
#[derive(Clone, Copy)]
pub struct PteSlot {
    table: PhysAddr,
    idx: usize,
}

impl PteSlot {
    #[inline]
    pub fn read(self) -> u32 {
        entry(self.table, self.idx)
    }

    #[inline]
    pub fn write(self, value: u32) {
        set_entry(self.table, self.idx, value);
    }
}

// ── The kernel template directory ─────────────────────────────────

static KERN_PGDIR: AtomicU32 = AtomicU32::new(0);

/// Build the kernel template directory: the direct map of all frames at
/// `KERNBASE` (supervisor only) plus a supervisor self-map. Every
/// environment directory copies the kernel half from here by reference.
///
/// # Panics
/// If the pool cannot supply the handful of boot-time frames.
pub fn init() {
    let pgdir = pmm::alloc(AllocFlags::ZERO).expect("paging: no frame for kernel pgdir");
    pmm::incref(pgdir);

    let mut pa = 0u32;
    let phys_top = exos_hal::mem::PHYS_TOP;
    while pa < phys_top {
        let pt = pmm::alloc(AllocFlags::ZERO).expect("paging: no frame for kernel table");
        pmm::incref(pt);
        set_entry(pgdir, VirtAddr::new(KERNBASE + pa).pdx(), pt.as_u32() | P | W);
        for ptx in 0..NPTENTRIES {
            if pa >= phys_top {
                break;
            }
            set_entry(pt, ptx, pa | P | W);
            pa += PGSIZE as u32;
        }
    }

    set_entry(pgdir, VirtAddr::new(UVPT).pdx(), pgdir.as_u32() | P);
    KERN_PGDIR.store(pgdir.as_u32(), Ordering::Relaxed);
    log::debug!("kernel template pgdir at {}", pgdir);
}

/// Physical address of the kernel template directory.
pub fn kern_pgdir() -> PhysAddr {
    PhysAddr::new(KERN_PGDIR.load(Ordering::Relaxed))
}

// ── Directory lifecycle ───────────────────────────────────────────

/// Create a fresh environment directory: empty user half, kernel half
/// shared by reference with the template, and the environment's own
/// read-only self-map installed over the `UVPT` slot.
pub fn create_pgdir() -> KernResult<PhysAddr> {
    let pgdir = pmm::alloc(AllocFlags::ZERO).ok_or(KernError::NoMem)?;
    pmm::incref(pgdir);

    let kern = kern_pgdir();
    for pdx in VirtAddr::new(UTOP).pdx()..NPDENTRIES {
        set_entry(pgdir, pdx, entry(kern, pdx));
    }
    set_entry(pgdir, VirtAddr::new(UVPT).pdx(), pgdir.as_u32() | P | U);
    Ok(pgdir)
}

/// Tear down the user half of a directory and release the directory
/// itself: every mapped page loses one reference, every user page table
/// is released, then the directory frame is dropped.
pub fn free_space(pgdir: PhysAddr) {
    for pdx in 0..VirtAddr::new(UTOP).pdx() {
        let pde = entry(pgdir, pdx);
        if pde & P == 0 {
            continue;
        }
        let pt = pte_addr(pde);
        for ptx in 0..NPTENTRIES {
            if entry(pt, ptx) & P != 0 {
                remove(pgdir, VirtAddr::new(((pdx << 22) | (ptx << 12)) as u32));
            }
        }
        set_entry(pgdir, pdx, 0);
        pmm::decref(pt);
    }
    pmm::decref(pgdir);
}

// ── Entry-level operations ────────────────────────────────────────

/// Find the entry slot for `va`, without creating anything. `None`
/// when the intermediate table is absent.
pub fn walk(pgdir: PhysAddr, va: VirtAddr) -> Option<PteSlot> {
    let pde = entry(pgdir, va.pdx());
    if pde & P == 0 {
        return None;
    }
    Some(PteSlot { table: pte_addr(pde), idx: va.ptx() })
}

/// Find the entry slot for `va`, allocating (and refcounting) the
/// intermediate table when absent.
pub fn walk_create(pgdir: PhysAddr, va: VirtAddr) -> KernResult<PteSlot> {
    let pde = entry(pgdir, va.pdx());
    let pt = if pde & P != 0 {
        pte_addr(pde)
    } else {
        let pt = pmm::alloc(AllocFlags::ZERO).ok_or(KernError::NoMem)?;
        pmm::incref(pt);
        // Table-level permissions stay wide open; the leaf entry is
        // what gates access.
        set_entry(pgdir, va.pdx(), pt.as_u32() | P | W | U);
        pt
    };
    Ok(PteSlot { table: pt, idx: va.ptx() })
}

/// The page mapped at `va`, along with its entry slot.
pub fn lookup(pgdir: PhysAddr, va: VirtAddr) -> Option<(PhysAddr, PteSlot)> {
    let slot = walk(pgdir, va)?;
    let pte = slot.read();
    if pte & P == 0 {
        return None;
    }
    Some((pte_addr(pte), slot))
}

/// Map `pa` at `va` with `perm | P`, replacing whatever was mapped
/// there. Fails only if a needed page-table allocation fails.
pub fn insert(pgdir: PhysAddr, pa: PhysAddr, va: VirtAddr, perm: u32) -> KernResult<()> {
    let slot = walk_create(pgdir, va)?;
    // Take the new reference before removing the old mapping, so
    // remapping the same page at the same address cannot free it.
    pmm::incref(pa);
    if slot.read() & P != 0 {
        remove(pgdir, va);
    }
    slot.write(pa.as_u32() | perm | P);
    Ok(())
}

/// Unmap `va`: drop the page's reference, clear the entry, invalidate
/// the translation. Silent no-op when nothing is mapped.
pub fn remove(pgdir: PhysAddr, va: VirtAddr) {
    let Some((pa, slot)) = lookup(pgdir, va) else {
        return;
    };
    pmm::decref(pa);
    slot.write(0);
    // An address-space switch reloads the whole TLB, so invalidating
    // here is only needed for the active directory; doing it always is
    // harmless.
    exos_hal::tlb::invlpg(va.as_u32());
}

// ── User access checks ────────────────────────────────────────────

/// Why a user-mode access cannot proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessFault {
    /// Some translation level is absent.
    NotPresent,
    /// Present, but the permission bits forbid this access.
    Protection,
}

/// Translate `va` under user-mode access rules: User required at both
/// levels, Writable required at the leaf for writes.
pub fn user_access(pgdir: PhysAddr, va: VirtAddr, write: bool) -> Result<PhysAddr, AccessFault> {
    let pde = entry(pgdir, va.pdx());
    if pde & P == 0 {
        return Err(AccessFault::NotPresent);
    }
    if pde & U == 0 {
        return Err(AccessFault::Protection);
    }
    let pte = entry(pte_addr(pde), va.ptx());
    if pte & P == 0 {
        return Err(AccessFault::NotPresent);
    }
    if pte & U == 0 || (write && pte & W == 0) {
        return Err(AccessFault::Protection);
    }
    Ok(pte_addr(pte) + va.pgoff())
}

/// Check that the environment owning `pgdir` may access every byte of
/// `[va, va+len)` with permissions `perm | P`. On failure returns the
/// lowest faulting address.
pub fn user_mem_check(
    pgdir: PhysAddr,
    va: VirtAddr,
    len: usize,
    perm: u32,
) -> Result<(), VirtAddr> {
    if len == 0 {
        return Ok(());
    }
    let start = va.as_u32();
    let end = match start.checked_add(len as u32 - 1) {
        Some(end) => end,
        None => return Err(va),
    };
    let needed = perm | P;

    let mut page = start & !0xFFF;
    loop {
        let first_byte = VirtAddr::new(page.max(start));
        if page >= UTOP {
            return Err(first_byte);
        }
        let ok = walk(pgdir, VirtAddr::new(page))
            .map(|slot| slot.read() & needed == needed)
            .unwrap_or(false);
        if !ok {
            return Err(first_byte);
        }
        match page.checked_add(PGSIZE as u32) {
            Some(next) if next <= end => page = next,
            _ => return Ok(()),
        }
    }
}

/// Copy bytes out of an environment's address space through its page
/// tables. The caller is responsible for permission checks; this only
/// requires the range to be mapped.
pub fn copy_from_user(pgdir: PhysAddr, va: VirtAddr, buf: &mut [u8]) -> KernResult<()> {
    let mut copied = 0;
    while copied < buf.len() {
        let cur = va + copied as u32;
        let (pa, _) = lookup(pgdir, cur.page_base()).ok_or(KernError::Inval)?;
        let off = cur.pgoff() as usize;
        let chunk = (PGSIZE - off).min(buf.len() - copied);
        // SAFETY: source is `chunk` in-frame bytes via the direct map;
        // destination is the caller's buffer.
        unsafe {
            core::ptr::copy_nonoverlapping(
                pa.kva().add(off),
                buf[copied..].as_mut_ptr(),
                chunk,
            );
        }
        copied += chunk;
    }
    Ok(())
}

/// Copy bytes into an environment's address space through its page
/// tables. Same contract as [`copy_from_user`].
pub fn copy_to_user(pgdir: PhysAddr, va: VirtAddr, buf: &[u8]) -> KernResult<()> {
    let mut copied = 0;
    while copied < buf.len() {
        let cur = va + copied as u32;
        let (pa, _) = lookup(pgdir, cur.page_base()).ok_or(KernError::Inval)?;
        let off = cur.pgoff() as usize;
        let chunk = (PGSIZE - off).min(buf.len() - copied);
        // SAFETY: destination is `chunk` in-frame bytes via the direct
        // map; source is the caller's buffer.
        unsafe {
            core::ptr::copy_nonoverlapping(
                buf[copied..].as_ptr(),
                pa.kva().add(off),
                chunk,
            );
        }
        copied += chunk;
    }
    Ok(())
}

// ── Monitor support ───────────────────────────────────────────────

/// Ten-character permission rendering, positions `V G S D A C T U W P`
/// left to right, `-` for a clear bit.
pub struct PermString([u8; 10]);

impl PermString {
    pub fn as_str(&self) -> &str {
        // Filled exclusively with ASCII below.
        core::str::from_utf8(&self.0).unwrap_or("----------")
    }
}

impl core::fmt::Display for PermString {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Render an entry's permission bits in the monitor's fixed format.
pub fn perm_string(pte: u32) -> PermString {
    const POSITIONS: [(u32, u8); 10] = [
        (1 << 9, b'V'),
        (1 << 8, b'G'),
        (1 << 7, b'S'),
        (1 << 6, b'D'),
        (1 << 5, b'A'),
        (1 << 4, b'C'),
        (1 << 3, b'T'),
        (1 << 2, b'U'),
        (1 << 1, b'W'),
        (1 << 0, b'P'),
    ];
    let mut out = [b'-'; 10];
    for (i, (bit, ch)) in POSITIONS.iter().enumerate() {
        if pte & bit != 0 {
            out[i] = *ch;
        }
    }
    PermString(out)
}
