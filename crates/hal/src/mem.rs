//! Physical frame store.
//!
//! A fixed pool of `NPAGES` 4 KiB frames. Physical addresses run from 0
//! to `NPAGES * PGSIZE`; the kernel reaches frame contents through
//! [`kva`], the direct-map analog of a higher-half physical map.
//!
//! The store itself is permanently mapped and carries no state of its
//! own — which frames are free, and who references them, is the page
//! allocator's business, not ours.

use core::cell::UnsafeCell;

/// Size of a physical frame in bytes.
pub const PGSIZE: usize = 4096;

/// Number of physical frames in the machine.
pub const NPAGES: usize = 1024;

/// Highest physical address + 1.
pub const PHYS_TOP: u32 = (NPAGES * PGSIZE) as u32;

#[repr(C, align(4096))]
struct Arena(UnsafeCell<[u8; NPAGES * PGSIZE]>);

// SAFETY: all access goes through raw pointers handed out by `kva`;
// callers serialize through the kernel's single-CPU execution model.
unsafe impl Sync for Arena {}

static ARENA: Arena = Arena(UnsafeCell::new([0; NPAGES * PGSIZE]));

/// Translate a physical address into a kernel-accessible pointer.
///
/// The returned pointer stays valid for the life of the machine; frame
/// contents are only ever touched by the environment currently running
/// on the (single) CPU.
///
/// # Panics
/// If `pa` is outside the frame store.
#[inline]
pub fn kva(pa: u32) -> *mut u8 {
    assert!(pa < PHYS_TOP, "kva: physical address {:#010x} out of range", pa);
    unsafe { (ARENA.0.get() as *mut u8).add(pa as usize) }
}

/// Fill one frame with zeros.
///
/// # Panics
/// If `pa` is not frame-aligned or out of range.
pub fn zero_frame(pa: u32) {
    assert!(pa as usize % PGSIZE == 0, "zero_frame: unaligned {:#010x}", pa);
    // SAFETY: `kva` bounds-checks; the range is a whole in-arena frame.
    unsafe { core::ptr::write_bytes(kva(pa), 0, PGSIZE) };
}
