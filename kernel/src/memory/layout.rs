//! The virtual-memory map.
//!
//! ```text
//! 0xFFFF_FFFF ─┐
//!              │ kernel direct map of the frame store (no U bit)
//! KERNBASE    ─┤ 0xF000_0000
//!              │ (unused hole)
//! UVPT+4MiB   ─┤ 0xEF80_0000
//!              │ self-map window: the current page tables, read-only;
//!              │ the directory itself appears at UVPD inside it
//! UVPT        ─┤ 0xEF40_0000
//!              │ (unused hole)
//! UTOP        ─┤ 0xEEC0_0000   top of user-controlled address space
//!              │ user exception stack (1 page, never shared or COW)
//! UXSTACKTOP-PGSIZE
//!              │ guard page (never mapped)
//! USTACKTOP   ─┤ 0xEEBF_E000   top of the normal user stack
//!              │ ...
//! UTEXT       ─┤ 0x0080_0000   user program text/data by convention
//!              │ PFTEMP scratch page, then low memory
//! 0x0000_0000 ─┘
//! ```
//!
//! Everything below `UTOP` belongs to the environment; everything at or
//! above it is installed by the kernel at directory creation and shared
//! by reference across all environments.

use super::address::PGSIZE;

/// Entries per page directory / page table.
pub const NPDENTRIES: usize = 1024;
pub const NPTENTRIES: usize = 1024;

/// Bytes of virtual address space mapped by one directory entry (4 MiB).
pub const PTSIZE: u32 = (PGSIZE * NPTENTRIES) as u32;

/// Base of the kernel direct map of physical memory.
pub const KERNBASE: u32 = 0xF000_0000;

/// Base of the read-only self-map window onto the current page tables.
pub const UVPT: u32 = 0xEF40_0000;

/// Address of the current page directory inside the self-map window.
pub const UVPD: u32 = UVPT + ((UVPT >> 22) << 12);

/// Top of the user-controlled address space.
pub const UTOP: u32 = 0xEEC0_0000;

/// Top of the dedicated user exception stack (one page below).
pub const UXSTACKTOP: u32 = UTOP;

/// Top of the normal user stack; the page between the two stacks is a
/// guard and stays unmapped.
pub const USTACKTOP: u32 = UTOP - 2 * PGSIZE as u32;

/// Conventional start of user program text and data.
pub const UTEXT: u32 = 0x0080_0000;

/// User scratch page used while resolving copy-on-write faults.
pub const PFTEMP: u32 = 0x007F_F000;
