//! TLB invalidation hook.
//!
//! The core must invalidate the translation for a virtual address after
//! any unmap or permission reduction on the active address space. The
//! hook records each request so tests can hold the core to that rule.

use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

static FLUSHES: AtomicU64 = AtomicU64::new(0);
static LAST_VA: AtomicU32 = AtomicU32::new(0);

/// Invalidate the TLB entry for `va` on the current CPU.
#[inline]
pub fn invlpg(va: u32) {
    LAST_VA.store(va, Ordering::Relaxed);
    FLUSHES.fetch_add(1, Ordering::Relaxed);
}

/// Number of invalidations issued since the last [`reset`].
pub fn flush_count() -> u64 {
    FLUSHES.load(Ordering::Relaxed)
}

/// The most recently invalidated virtual address.
pub fn last_va() -> u32 {
    LAST_VA.load(Ordering::Relaxed)
}

/// Clear the recorded history.
pub fn reset() {
    FLUSHES.store(0, Ordering::Relaxed);
    LAST_VA.store(0, Ordering::Relaxed);
}
