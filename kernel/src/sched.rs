//! Cooperative scheduler.
//!
//! A scheduling decision runs after every trap return where the caller
//! yielded, blocked in IPC, was destroyed, or went NOT_RUNNABLE. The
//! sweep starts at the slot after the last-run environment and covers
//! the whole table, so the previous environment is re-run when nothing
//! else is RUNNABLE; with everything blocked the CPU idles until the
//! next interrupt (the trap-exit collaborator's business).
//!
//! Priority classes are searched highest first. They are advisory: a
//! class is only consulted when every higher class has nothing
//! RUNNABLE, so lower classes keep running whenever higher ones idle.

use crate::env::{EnvStatus, EnvTable, NENV};

/// Number of priority classes; valid priorities are `0..NPRIO`, higher
/// value scheduled first.
pub const NPRIO: u32 = 4;

/// Pick the next environment and make it current. Returns the chosen
/// slot, or `None` when nothing is runnable (idle).
pub(crate) fn sched_yield(t: &mut EnvTable) -> Option<usize> {
    for prio in (0..NPRIO).rev() {
        for off in 1..=NENV {
            let idx = (t.last_run + off) % NENV;
            let e = &t.envs[idx];
            if e.status == EnvStatus::Runnable && e.prio == prio {
                t.cur = Some(idx);
                t.last_run = idx;
                return Some(idx);
            }
        }
    }
    t.cur = None;
    None
}
