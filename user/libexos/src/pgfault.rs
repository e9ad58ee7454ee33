//! Page-fault upcall registration and dispatch.
//!
//! The kernel stores only an entry-point word per environment; the
//! handler code itself lives in the (shared) user text. Here the entry
//! point is the fixed trampoline address and the handler table below
//! plays the role of the text segment: registration is keyed by
//! environment id, and fork propagates the parent's entry to the child
//! the same way shared program text would.

use exos_kernel::env::{envx, EnvId, NENV};
use exos_kernel::memory::address::PGSIZE;
use exos_kernel::memory::layout::UXSTACKTOP;
use exos_kernel::memory::paging::PteFlags;
use exos_kernel::trap::{self, UTrapframe};
use spin::Mutex;

use crate::sys::{sys_env_set_pgfault_upcall, sys_getenvid, sys_page_alloc};
use crate::Result;

/// The upcall entry point registered with the kernel: where the fault
/// trampoline lives in user text.
pub const PGFAULT_UPCALL: u32 = 0x0010_0000;

/// A user-mode page-fault handler. Runs on the exception stack frame;
/// changes to the frame are what the trampoline returns into.
pub type Handler = fn(&mut UTrapframe);

static HANDLERS: Mutex<[Option<(EnvId, Handler)>; NENV]> = Mutex::new([None; NENV]);

/// Install `handler` as this environment's page-fault handler.
///
/// First installation allocates the dedicated exception stack and
/// registers the trampoline with the kernel; later calls only swap the
/// handler. Whether this is the first time is read back from the
/// kernel's upcall word, the one place that survives everything the
/// environment itself does.
pub fn set_pgfault_handler(handler: Handler) -> Result<()> {
    let id = sys_getenvid()?;
    let slot = envx(id);

    if exos_kernel::env::env_view(slot).pgfault_upcall != PGFAULT_UPCALL {
        let perm = (PteFlags::P | PteFlags::U | PteFlags::W).bits();
        sys_page_alloc(0, UXSTACKTOP - PGSIZE as u32, perm)?;
        sys_env_set_pgfault_upcall(0, PGFAULT_UPCALL)?;
    }
    HANDLERS.lock()[slot] = Some((id, handler));
    Ok(())
}

/// Propagate the caller's handler registration to a forked child (the
/// child shares the parent's text, so the same entry point works).
pub(crate) fn inherit(child: EnvId) -> Result<()> {
    let parent = sys_getenvid()?;
    let mut table = HANDLERS.lock();
    table[envx(child)] = table[envx(parent)].map(|(_, f)| (child, f));
    Ok(())
}

/// Run the registered handler for a delivered fault, then return
/// through the trampoline so the faulting access re-executes.
///
/// # Panics
/// If no handler is registered for `envid` or the fault record is
/// unreachable — both are protocol violations with nothing to recover.
pub(crate) fn dispatch_upcall(envid: EnvId) {
    let handler = {
        let table = HANDLERS.lock();
        table[envx(envid)]
            .and_then(|(owner, f)| (owner == envid).then_some(f))
    };
    let handler = handler
        .unwrap_or_else(|| panic!("[{:08x}] upcall with no registered handler", envid));

    let mut utf = trap::read_utf(envid).expect("fault record unreadable");
    handler(&mut utf);
    trap::write_utf(envid, &utf).expect("fault record unwritable");
    trap::upcall_return(envid).expect("upcall return failed");
}
