//! The environment table.
//!
//! A fixed pool of process-like protection domains. Each slot carries a
//! generation counter so a reused slot never resurrects an old id: the
//! id encodes `(generation << LOG2NENV) | index`, and the generation
//! bumps on every free.
//!
//! Lifecycle: FREE → DORMANT on allocation (trap frame initialized,
//! directory created with the kernel half shared and the user half
//! empty); DORMANT → RUNNABLE / NOT_RUNNABLE by explicit status set;
//! RUNNABLE ↔ NOT_RUNNABLE by scheduler and IPC; any state → FREE on
//! destruction, which releases every user page and the directory.

use spin::{Mutex, MutexGuard};

use crate::error::{KernError, KernResult};
use crate::memory::address::PhysAddr;
use crate::memory::layout::USTACKTOP;
use crate::memory::paging;
use crate::sched;

/// Number of environment slots.
pub const NENV: usize = 256;

/// log2(NENV): how many id bits index the table.
pub const LOG2NENV: u32 = 8;

/// Environment id: generation in the upper bits, slot index in the low
/// `LOG2NENV` bits. Id 0 is the "current environment" sentinel.
pub type EnvId = u32;

/// Slot index of an id.
#[inline]
pub const fn envx(id: EnvId) -> usize {
    (id as usize) & (NENV - 1)
}

// Segment selectors and flag bits of the saved user context.
pub const GD_UT: u32 = 0x18;
pub const GD_UD: u32 = 0x20;
pub const FL_IF: u32 = 0x200;
pub const FL_TF: u32 = 0x100;
pub const FL_IOPL_MASK: u32 = 0x3000;

/// Default priority class for fresh environments.
pub const PRIO_DEFAULT: u32 = 1;

/// Scheduling status of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvStatus {
    Free,
    Dormant,
    Runnable,
    NotRunnable,
    Dying,
}

impl EnvStatus {
    /// Decode the word-sized status used at the system-call boundary.
    pub const fn from_abi(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Free),
            1 => Some(Self::Dormant),
            2 => Some(Self::Runnable),
            3 => Some(Self::NotRunnable),
            4 => Some(Self::Dying),
            _ => None,
        }
    }

    pub const fn to_abi(self) -> u32 {
        match self {
            Self::Free => 0,
            Self::Dormant => 1,
            Self::Runnable => 2,
            Self::NotRunnable => 3,
            Self::Dying => 4,
        }
    }
}

/// Environment type; the non-user types name system services that
/// other environments discover by scanning the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvType {
    User,
    Fs,
    Ns,
}

/// General registers in the order the trap entry path saves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct PushRegs {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub oesp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
}

/// Saved user-mode context: what the trap entry path spills and the
/// trap exit path reloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct Trapframe {
    pub regs: PushRegs,
    pub es: u32,
    pub ds: u32,
    pub trapno: u32,
    pub err: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub esp: u32,
    pub ss: u32,
}

/// Byte size of a trap frame as it appears in memory (17 words).
pub const TRAPFRAME_SIZE: usize = core::mem::size_of::<Trapframe>();

impl Trapframe {
    /// The initial frame of a fresh environment: user-privilege
    /// selectors, interrupts enabled, stack at the top of the normal
    /// user stack.
    pub fn user_default() -> Self {
        Self {
            ds: GD_UD | 3,
            es: GD_UD | 3,
            ss: GD_UD | 3,
            cs: GD_UT | 3,
            esp: USTACKTOP,
            eflags: FL_IF,
            ..Self::default()
        }
    }

    /// Reinterpret a word-aligned byte image (all fields are words, so
    /// the struct has no padding).
    pub fn from_bytes(bytes: &[u8; TRAPFRAME_SIZE]) -> Self {
        // SAFETY: repr(C), u32 fields only, any bit pattern valid.
        unsafe { core::ptr::read_unaligned(bytes.as_ptr().cast()) }
    }

    pub fn to_bytes(&self) -> [u8; TRAPFRAME_SIZE] {
        let mut out = [0u8; TRAPFRAME_SIZE];
        // SAFETY: as in `from_bytes`.
        unsafe { core::ptr::write_unaligned(out.as_mut_ptr().cast(), *self) };
        out
    }
}

/// One environment record.
#[derive(Clone, Copy)]
pub(crate) struct Env {
    pub id: EnvId,
    pub parent_id: EnvId,
    pub status: EnvStatus,
    pub etype: EnvType,
    pub tf: Trapframe,
    pub pgdir: PhysAddr,
    pub prio: u32,
    pub ipc_recving: bool,
    pub ipc_dstva: u32,
    pub ipc_value: u32,
    pub ipc_from: EnvId,
    pub ipc_perm: u32,
    pub pgfault_upcall: u32,
    generation: u32,
}

const FREE_SLOT: Env = Env {
    id: 0,
    parent_id: 0,
    status: EnvStatus::Free,
    etype: EnvType::User,
    tf: Trapframe {
        regs: PushRegs { edi: 0, esi: 0, ebp: 0, oesp: 0, ebx: 0, edx: 0, ecx: 0, eax: 0 },
        es: 0,
        ds: 0,
        trapno: 0,
        err: 0,
        eip: 0,
        cs: 0,
        eflags: 0,
        esp: 0,
        ss: 0,
    },
    pgdir: PhysAddr::new(0),
    prio: PRIO_DEFAULT,
    ipc_recving: false,
    ipc_dstva: 0,
    ipc_value: 0,
    ipc_from: 0,
    ipc_perm: 0,
    pgfault_upcall: 0,
    generation: 1,
};

pub(crate) struct EnvTable {
    pub envs: [Env; NENV],
    pub cur: Option<usize>,
    pub last_run: usize,
}

impl EnvTable {
    /// Resolve an id to a slot index. Id 0 names the current
    /// environment. With `check_perm`, the caller must be the target or
    /// its immediate parent.
    pub fn envid2env(&self, id: EnvId, check_perm: bool) -> KernResult<usize> {
        let cur = self.cur;
        let idx = if id == 0 {
            cur.ok_or(KernError::BadEnv)?
        } else {
            let idx = envx(id);
            let e = &self.envs[idx];
            if e.status == EnvStatus::Free || e.id != id {
                return Err(KernError::BadEnv);
            }
            idx
        };
        if check_perm {
            let cur = cur.ok_or(KernError::BadEnv)?;
            let caller_id = self.envs[cur].id;
            if idx != cur && self.envs[idx].parent_id != caller_id {
                return Err(KernError::BadEnv);
            }
        }
        Ok(idx)
    }

    /// Slot index of the running environment.
    pub fn current(&self) -> Option<usize> {
        self.cur
    }

    /// Claim the first FREE slot: fresh directory, initialized trap
    /// frame, DORMANT status.
    pub fn alloc(&mut self, parent_id: EnvId) -> KernResult<usize> {
        let idx = self
            .envs
            .iter()
            .position(|e| e.status == EnvStatus::Free)
            .ok_or(KernError::NoFreeEnv)?;

        let pgdir = paging::create_pgdir()?;
        let e = &mut self.envs[idx];
        e.id = (e.generation << LOG2NENV) | idx as u32;
        e.parent_id = parent_id;
        e.status = EnvStatus::Dormant;
        e.etype = EnvType::User;
        e.tf = Trapframe::user_default();
        e.pgdir = pgdir;
        e.prio = PRIO_DEFAULT;
        e.ipc_recving = false;
        e.ipc_dstva = 0;
        e.ipc_value = 0;
        e.ipc_from = 0;
        e.ipc_perm = 0;
        e.pgfault_upcall = 0;
        log::debug!("env {:08x} allocated (slot {})", e.id, idx);
        Ok(idx)
    }

    /// Release a slot: free every user page and the directory, bump the
    /// generation so the old id goes stale, return the slot to FREE.
    pub fn free(&mut self, idx: usize) {
        let e = &mut self.envs[idx];
        debug_assert!(e.status != EnvStatus::Free, "env_free of free slot {}", idx);
        let pgdir = e.pgdir;
        e.status = EnvStatus::Free;
        e.pgdir = PhysAddr::new(0);
        e.generation = (e.generation + 1) & 0x007F_FFFF;
        if e.generation == 0 {
            e.generation = 1;
        }
        if self.cur == Some(idx) {
            self.cur = None;
        }
        paging::free_space(pgdir);
    }

    /// Destroy an environment; destroying the current one hands the CPU
    /// to the scheduler.
    pub fn destroy(&mut self, idx: usize) {
        let was_current = self.cur == Some(idx);
        let id = self.envs[idx].id;
        if was_current {
            log::info!("[{:08x}] exiting gracefully", id);
        } else {
            let by = self.cur.map(|c| self.envs[c].id).unwrap_or(0);
            log::info!("[{:08x}] destroying {:08x}", by, id);
        }
        self.free(idx);
        if was_current {
            sched::sched_yield(self);
        }
    }
}

static ENVS: Mutex<EnvTable> = Mutex::new(EnvTable {
    envs: [FREE_SLOT; NENV],
    cur: None,
    last_run: 0,
});

/// Lock the table. Internal to the core; everything user-visible goes
/// through the system-call surface or [`EnvView`].
pub(crate) fn table() -> MutexGuard<'static, EnvTable> {
    ENVS.lock()
}

/// Reset every slot to FREE. Part of core (re)initialization; any
/// directories owned by stale slots were dropped with the frame pool.
pub fn init() {
    let mut t = ENVS.lock();
    t.envs = [FREE_SLOT; NENV];
    t.cur = None;
    t.last_run = 0;
}

/// Create a kernel-spawned environment of the given type, immediately
/// RUNNABLE. This is how boot brings up service environments.
pub fn env_create(etype: EnvType) -> KernResult<EnvId> {
    let mut t = ENVS.lock();
    let idx = t.alloc(0)?;
    let e = &mut t.envs[idx];
    e.etype = etype;
    e.status = EnvStatus::Runnable;
    Ok(e.id)
}

/// Context-switch to a RUNNABLE environment: it becomes the current
/// environment whose trap frame the trap-exit path reloads.
pub fn env_run(id: EnvId) -> KernResult<()> {
    let mut t = ENVS.lock();
    let idx = t.envid2env(id, false)?;
    if t.envs[idx].status != EnvStatus::Runnable {
        return Err(KernError::Inval);
    }
    t.cur = Some(idx);
    t.last_run = idx;
    Ok(())
}

/// Id of the environment currently holding the CPU.
pub fn current_env() -> Option<EnvId> {
    let t = ENVS.lock();
    t.cur.map(|idx| t.envs[idx].id)
}

/// Run `f` over a live environment's saved trap frame (monitor and
/// trap-exit path use this to edit the resume context).
pub fn with_trapframe(id: EnvId, f: impl FnOnce(&mut Trapframe)) -> KernResult<()> {
    let mut t = ENVS.lock();
    let idx = t.envid2env(id, false)?;
    f(&mut t.envs[idx].tf);
    Ok(())
}

/// Read-only snapshot of one slot.
///
/// This is the read-only environment window user code consults for
/// `thisenv`-style lookups: an indexed read over published fields,
/// never a live pointer into the table.
#[derive(Debug, Clone, Copy)]
pub struct EnvView {
    pub id: EnvId,
    pub parent_id: EnvId,
    pub status: EnvStatus,
    pub etype: EnvType,
    pub prio: u32,
    pub pgdir: PhysAddr,
    pub tf: Trapframe,
    pub ipc_recving: bool,
    pub ipc_dstva: u32,
    pub ipc_value: u32,
    pub ipc_from: EnvId,
    pub ipc_perm: u32,
    pub pgfault_upcall: u32,
}

/// Snapshot slot `idx` (any state, FREE included).
pub fn env_view(idx: usize) -> EnvView {
    let t = ENVS.lock();
    let e = &t.envs[idx];
    EnvView {
        id: e.id,
        parent_id: e.parent_id,
        status: e.status,
        etype: e.etype,
        prio: e.prio,
        pgdir: e.pgdir,
        tf: e.tf,
        ipc_recving: e.ipc_recving,
        ipc_dstva: e.ipc_dstva,
        ipc_value: e.ipc_value,
        ipc_from: e.ipc_from,
        ipc_perm: e.ipc_perm,
        pgfault_upcall: e.pgfault_upcall,
    }
}

/// Snapshot a live environment by id; `None` once the id has gone
/// stale.
pub fn view_by_id(id: EnvId) -> Option<EnvView> {
    let view = env_view(envx(id));
    (view.status != EnvStatus::Free && view.id == id).then_some(view)
}
