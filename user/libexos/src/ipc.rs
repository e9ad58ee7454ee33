//! Rendezvous IPC wrappers.
//!
//! Page-less calls pass [`NO_PAGE`] rather than 0 — zero is a
//! perfectly valid place to map a page.
//!
//! Receiving has two halves: `recv_start` parks the environment in the
//! kernel, and `recv_finish` picks up the delivered tuple once a
//! sender has resumed it. On hardware the two halves are a single
//! blocking call whose return value the sender stages; the split marks
//! the resume point the trap-exit path drives through.

use exos_kernel::env::{EnvId, EnvStatus, EnvType, NENV};

use crate::env::{env_view, thisenv};
use crate::sys::{sys_ipc_recv, sys_ipc_try_send, sys_yield};
use crate::{Error, Result};

/// Sentinel meaning "no page transfer" (any address at or above the
/// top of user space would do).
pub const NO_PAGE: u32 = u32::MAX;

/// How many `IpcNotRecv` rounds `ipc_send` yields through before
/// giving up. Unbounded retry would spin forever without a scheduler
/// interleaving the peer.
const SEND_RETRIES: usize = 64;

/// One delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    pub value: u32,
    pub from: EnvId,
    /// Permission of the transferred page; nonzero iff a page arrived.
    pub perm: u32,
}

/// Park this environment waiting for a sender. Pass `Some(va)` to
/// accept a page mapping at `va`.
pub fn ipc_recv_start(pg: Option<u32>) -> Result<()> {
    sys_ipc_recv(pg.unwrap_or(NO_PAGE))
}

/// Collect the tuple a sender delivered. `None` while still parked.
pub fn ipc_recv_finish() -> Option<Received> {
    let me = thisenv().ok()?;
    if me.ipc_recving {
        return None;
    }
    Some(Received {
        value: me.ipc_value,
        from: me.ipc_from,
        perm: me.ipc_perm,
    })
}

/// One send attempt.
pub fn ipc_try_send(to: EnvId, value: u32, pg: Option<u32>, perm: u32) -> Result<()> {
    sys_ipc_try_send(to, value, pg.unwrap_or(NO_PAGE), perm)
}

/// Send, yielding and retrying while the target is not yet receiving.
///
/// # Panics
/// On any error other than `IpcNotRecv` — those are caller bugs, not
/// timing.
pub fn ipc_send(to: EnvId, value: u32, pg: Option<u32>, perm: u32) -> Result<()> {
    for _ in 0..SEND_RETRIES {
        match ipc_try_send(to, value, pg, perm) {
            Ok(()) => return Ok(()),
            Err(Error::IpcNotRecv) => sys_yield(),
            Err(e) => panic!("ipc_send: {}", e),
        }
    }
    Err(Error::IpcNotRecv)
}

/// Find the first live environment of the given service type.
pub fn ipc_find_env(etype: EnvType) -> Option<EnvId> {
    (0..NENV)
        .map(env_view)
        .find(|v| v.status != EnvStatus::Free && v.etype == etype)
        .map(|v| v.id)
}
