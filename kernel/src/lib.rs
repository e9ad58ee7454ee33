//! Exos kernel core.
//!
//! An exokernel-style teaching kernel: user-level environments own and
//! manipulate their address spaces through a small system-call surface,
//! and the kernel provides only protection, dispatch, and resource
//! naming. The pieces:
//!
//! - [`memory`] — physical page allocator and two-level page tables.
//! - [`env`] — the fixed environment table, id encoding, lifecycle.
//! - [`sched`] — cooperative round-robin scheduling with priority classes.
//! - [`ipc`] — synchronous rendezvous message passing with page transfer.
//! - [`syscall`] — the numbered dispatch surface.
//! - [`trap`] — page-fault upcall delivery and the user memory path.
//! - [`monitor`] — the kernel monitor command table.
//!
//! Execution is single-CPU and cooperative: a system call runs to
//! completion before any other environment observes its effects, so the
//! locks below only ever assert exclusive access.
#![cfg_attr(not(test), no_std)]

pub mod env;
pub mod error;
pub mod ipc;
pub mod memory;
pub mod monitor;
pub mod sched;
pub mod syscall;
pub mod trap;

/// Initialize (or reinitialize) the kernel core.
///
/// Builds the free frame list, the kernel template page directory, and a
/// clean environment table, and routes the `log` facade to the HAL
/// diagnostic console. The boot path calls this once before entering the
/// first environment; the test harness calls it per test.
pub fn init() {
    klog::init(exos_hal::console::diag_write);
    memory::pmm::init();
    memory::paging::init();
    env::init();
    let stats = memory::pmm::stats();
    log::info!(
        "exos core up: {} envs, {} frames ({} free)",
        env::NENV,
        stats.total_frames,
        stats.free_frames
    );
}
