//! Console convenience.
//!
//! `sys_cputs` takes a buffer in *user* memory — the kernel checks the
//! range against the caller's page tables. `puts` stages a Rust string
//! through a conventional per-environment page so callers don't manage
//! that themselves.

use exos_kernel::memory::address::{PGSHIFT, PGSIZE};
use exos_kernel::memory::paging::PteFlags;

use crate::sys::{sys_cputs, sys_page_alloc};
use crate::{umem, Result};

/// Page this environment stages console output through.
pub const STDOUT_PAGE: u32 = 0x0060_0000;

/// Write a string to the console through the staging page.
pub fn puts(s: &str) -> Result<()> {
    let pn = (STDOUT_PAGE >> PGSHIFT) as usize;
    if umem::uvpd(pn >> 10) & PteFlags::P.bits() == 0
        || umem::uvpt(pn) & PteFlags::P.bits() == 0
    {
        let perm = (PteFlags::P | PteFlags::U | PteFlags::W).bits();
        sys_page_alloc(0, STDOUT_PAGE, perm)?;
    }
    for chunk in s.as_bytes().chunks(PGSIZE) {
        umem::write(STDOUT_PAGE, chunk);
        sys_cputs(STDOUT_PAGE, chunk.len())?;
    }
    Ok(())
}
