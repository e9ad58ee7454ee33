//! Kernel monitor command table.
//!
//! The interactive readline loop is a collaborator; what it needs from
//! the core is here: a tagged command enumeration, the name → command
//! table, and the handlers. [`run_line`] parses one whitespace-split
//! command line, dispatches it, and reports whether the monitor should
//! keep reading or resume the interrupted environment.

use core::fmt::Write;

use crate::env::{self, EnvStatus, FL_TF};
use crate::memory::address::{VirtAddr, PGSIZE};
use crate::memory::paging;
use crate::memory::pmm;

/// What the monitor loop should do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Keep reading commands.
    Stay,
    /// Resume the current environment (trap-exit path takes over).
    Resume,
}

/// Command kinds, one per handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdKind {
    Help,
    KernInfo,
    Backtrace,
    Mappings,
    ClearPerms,
    ChangePerms,
    Continue,
    Step,
}

pub struct Command {
    pub name: &'static str,
    pub desc: &'static str,
    pub kind: CmdKind,
}

pub static COMMANDS: &[Command] = &[
    Command { name: "help", desc: "Display this list of commands", kind: CmdKind::Help },
    Command { name: "kerninfo", desc: "Display information about the kernel", kind: CmdKind::KernInfo },
    Command { name: "bt", desc: "Display backtrace information", kind: CmdKind::Backtrace },
    Command { name: "mp", desc: "Show mappings for virtual addresses", kind: CmdKind::Mappings },
    Command { name: "clrprm", desc: "Clear permissions of a mapping: clrprm addr", kind: CmdKind::ClearPerms },
    Command { name: "chprm", desc: "Change permissions of a mapping: chprm addr <+/->[W|U]", kind: CmdKind::ChangePerms },
    Command { name: "continue", desc: "Continue execution", kind: CmdKind::Continue },
    Command { name: "c", desc: "Continue execution", kind: CmdKind::Continue },
    Command { name: "step", desc: "Single step program", kind: CmdKind::Step },
    Command { name: "s", desc: "Single step program", kind: CmdKind::Step },
];

const MAXARGS: usize = 16;

/// Parse and run one command line.
pub fn run_line(line: &str, out: &mut dyn Write) -> LoopAction {
    let mut argv = [""; MAXARGS];
    let mut argc = 0;
    for word in line.split_whitespace() {
        if argc == MAXARGS {
            let _ = writeln!(out, "Too many arguments (max {})", MAXARGS);
            return LoopAction::Stay;
        }
        argv[argc] = word;
        argc += 1;
    }
    if argc == 0 {
        return LoopAction::Stay;
    }

    let Some(cmd) = COMMANDS.iter().find(|c| c.name == argv[0]) else {
        let _ = writeln!(out, "Unknown command '{}'", argv[0]);
        return LoopAction::Stay;
    };

    let argv = &argv[..argc];
    match cmd.kind {
        CmdKind::Help => mon_help(out),
        CmdKind::KernInfo => mon_kerninfo(out),
        CmdKind::Backtrace => mon_backtrace(out),
        CmdKind::Mappings => mon_mappings(argv, out),
        CmdKind::ClearPerms | CmdKind::ChangePerms => mon_modify_perms(cmd.kind, argv, out),
        CmdKind::Continue => mon_resume(false, out),
        CmdKind::Step => mon_resume(true, out),
    }
}

fn parse_hex(s: &str) -> Option<u32> {
    let s = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    u32::from_str_radix(s, 16).ok()
}

/// The directory the monitor inspects: the interrupted environment's,
/// or the kernel template when nothing is running.
fn inspected_pgdir() -> crate::memory::address::PhysAddr {
    env::current_env()
        .and_then(env::view_by_id)
        .map(|v| v.pgdir)
        .unwrap_or_else(paging::kern_pgdir)
}

fn mon_help(out: &mut dyn Write) -> LoopAction {
    for cmd in COMMANDS {
        let _ = writeln!(out, "{} - {}", cmd.name, cmd.desc);
    }
    LoopAction::Stay
}

fn mon_kerninfo(out: &mut dyn Write) -> LoopAction {
    let stats = pmm::stats();
    let live = (0..env::NENV)
        .filter(|&i| env::env_view(i).status != EnvStatus::Free)
        .count();
    let _ = writeln!(out, "Exos kernel core");
    let _ = writeln!(out, "  environments   {} live of {}", live, env::NENV);
    let _ = writeln!(
        out,
        "  frames         {} free of {} ({}KB)",
        stats.free_frames,
        stats.total_frames,
        stats.total_frames * PGSIZE / 1024
    );
    LoopAction::Stay
}

fn mon_backtrace(out: &mut dyn Write) -> LoopAction {
    let Some(view) = env::current_env().and_then(env::view_by_id) else {
        let _ = writeln!(out, "Nothing to trace");
        return LoopAction::Stay;
    };
    let _ = writeln!(out, "Stack backtrace:");

    // Saved-frame-pointer chain: [ebp] is the caller's ebp, [ebp+4]
    // the return address, [ebp+8..] the first arguments. A zeroed ebp
    // ends the chain.
    let mut ebp = view.tf.regs.ebp;
    for _ in 0..16 {
        if ebp == 0 {
            break;
        }
        let mut frame = [0u8; 28];
        if paging::copy_from_user(view.pgdir, VirtAddr::new(ebp), &mut frame).is_err() {
            break;
        }
        let word = |i: usize| {
            u32::from_le_bytes([frame[i * 4], frame[i * 4 + 1], frame[i * 4 + 2], frame[i * 4 + 3]])
        };
        let _ = write!(out, "ebp {:08x}  eip {:08x}  args", ebp, word(1));
        for arg in 2..7 {
            let _ = write!(out, " {:08x}", word(arg));
        }
        let _ = writeln!(out);
        ebp = word(0);
    }
    LoopAction::Stay
}

fn mon_mappings(argv: &[&str], out: &mut dyn Write) -> LoopAction {
    if argv.len() < 2 || argv.len() > 3 {
        let _ = writeln!(
            out,
            "mp: {} arguments!",
            if argv.len() < 2 { "too few" } else { "too many" }
        );
        return LoopAction::Stay;
    }
    let (Some(start), Some(end)) = (
        parse_hex(argv[1]),
        argv.get(2).map_or(parse_hex(argv[1]), |s| parse_hex(s)),
    ) else {
        let _ = writeln!(out, "mp: bad address");
        return LoopAction::Stay;
    };

    let pgdir = inspected_pgdir();
    let mut va = start as u64 & !0xFFF;
    while va <= end as u64 {
        let vaddr = VirtAddr::new(va as u32);
        match paging::walk(pgdir, vaddr).map(|slot| slot.read()) {
            Some(pte) if pte & paging::PteFlags::P.bits() != 0 => {
                let _ = writeln!(
                    out,
                    "VA 0x{:08x} PA 0x{:08x} perms {}",
                    va,
                    pte & !0xFFF,
                    paging::perm_string(pte & 0xFFF)
                );
            }
            _ => {
                let _ = writeln!(out, "VA 0x{:08x}: PA [unmapped]", va);
            }
        }
        va += PGSIZE as u64;
    }
    LoopAction::Stay
}

fn mon_modify_perms(kind: CmdKind, argv: &[&str], out: &mut dyn Write) -> LoopAction {
    let usage = match kind {
        CmdKind::ClearPerms => "Usage: clrprm addr",
        _ => "Usage: chprm addr <+/->[W|U]",
    };
    let expected = if kind == CmdKind::ClearPerms { 2 } else { 3 };
    if argv.len() != expected {
        let _ = writeln!(out, "{}", usage);
        return LoopAction::Stay;
    }
    let Some(va) = parse_hex(argv[1]) else {
        let _ = writeln!(out, "{}", usage);
        return LoopAction::Stay;
    };

    let pgdir = inspected_pgdir();
    let vaddr = VirtAddr::new(va);
    let slot = match paging::walk(pgdir, vaddr) {
        Some(slot) if slot.read() & paging::PteFlags::P.bits() != 0 => slot,
        _ => {
            let _ = writeln!(out, "VA 0x{:08x}: PA [unmapped]", va);
            return LoopAction::Stay;
        }
    };

    let pte = slot.read();
    let pa = pte & !0xFFF;
    let mut perms = pte & 0xFFF;
    let w = paging::PteFlags::W.bits();
    let u = paging::PteFlags::U.bits();

    match kind {
        CmdKind::ClearPerms => perms &= !(w | u),
        _ => {
            let change = argv[2];
            let set = !change.starts_with('-');
            for ch in change.chars() {
                let bit = match ch {
                    'W' | 'w' => w,
                    'U' | 'u' => u,
                    _ => continue,
                };
                if set {
                    perms |= bit;
                } else {
                    perms &= !bit;
                }
            }
        }
    }

    // Present survives every edit, and the shrunken translation must
    // leave the TLB.
    slot.write(pa | perms | paging::PteFlags::P.bits());
    exos_hal::tlb::invlpg(vaddr.page_base().as_u32());
    let _ = writeln!(
        out,
        "VA 0x{:08x} PA 0x{:08x} perms {}",
        va,
        pa,
        paging::perm_string(perms | paging::PteFlags::P.bits())
    );
    LoopAction::Stay
}

fn mon_resume(single_step: bool, out: &mut dyn Write) -> LoopAction {
    let Some(id) = env::current_env() else {
        let _ = writeln!(out, "Nothing to continue");
        return LoopAction::Stay;
    };
    // Trap flag drives single-step traps; continue clears it.
    let flip = move |tf: &mut crate::env::Trapframe| {
        if single_step {
            tf.eflags |= FL_TF;
        } else {
            tf.eflags &= !FL_TF;
        }
    };
    let _ = env::with_trapframe(id, flip);
    LoopAction::Resume
}
