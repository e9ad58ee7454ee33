//! Monitor command tests: mapping inspection, permission editing,
//! single-step control.

mod common;

use exos_kernel::env::{self, EnvType, FL_TF};
use exos_kernel::memory::address::VirtAddr;
use exos_kernel::memory::paging;
use exos_kernel::monitor::{run_line, LoopAction};
use exos_kernel::syscall::{self, syscall};
use exos_kernel::trap;

const OK: i32 = 0;
const UWP: u32 = 0x7;

fn running_env() -> u32 {
    let id = env::env_create(EnvType::User).unwrap();
    env::env_run(id).unwrap();
    id
}

fn run(line: &str) -> (String, LoopAction) {
    let mut out = String::new();
    let action = run_line(line, &mut out);
    (out, action)
}

#[test]
fn help_lists_the_command_table() {
    let _m = common::boot();
    let (out, action) = run("help");
    assert_eq!(action, LoopAction::Stay);
    for name in ["help", "kerninfo", "bt", "mp", "clrprm", "chprm", "continue", "step"] {
        assert!(out.contains(name), "missing {} in:\n{}", name, out);
    }
}

#[test]
fn unknown_commands_are_reported() {
    let _m = common::boot();
    let (out, action) = run("frobnicate 1 2");
    assert_eq!(action, LoopAction::Stay);
    assert!(out.contains("Unknown command 'frobnicate'"));
}

#[test]
fn mp_prints_va_pa_and_the_permission_string() {
    let _m = common::boot();
    let _a = running_env();
    assert_eq!(syscall(syscall::SYS_PAGE_ALLOC, 0, 0x0040_0000, UWP, 0, 0), OK);

    let pgdir = env::view_by_id(_a).unwrap().pgdir;
    let (pa, _) = paging::lookup(pgdir, VirtAddr::new(0x0040_0000)).unwrap();

    let (out, _) = run("mp 400000");
    let expected = format!(
        "VA 0x00400000 PA 0x{:08x} perms -------UWP",
        pa.as_u32()
    );
    assert!(out.contains(&expected), "got:\n{}", out);

    let (out, _) = run("mp 400000 402000");
    assert!(out.contains("VA 0x00400000"));
    assert!(out.contains("VA 0x00401000: PA [unmapped]"));
    assert!(out.contains("VA 0x00402000: PA [unmapped]"));
}

#[test]
fn chprm_toggles_bits_and_preserves_present() {
    let _m = common::boot();
    let a = running_env();
    assert_eq!(syscall(syscall::SYS_PAGE_ALLOC, 0, 0x0040_0000, UWP, 0, 0), OK);
    let pgdir = env::view_by_id(a).unwrap().pgdir;
    let va = VirtAddr::new(0x0040_0000);

    let (out, _) = run("chprm 400000 -W");
    assert!(out.contains("perms -------U-P"), "got:\n{}", out);
    let pte = paging::lookup(pgdir, va).unwrap().1.read();
    assert_eq!(pte & 0x2, 0, "Writable cleared");
    assert_ne!(pte & 0x1, 0, "Present preserved");

    // The shrunken translation left the TLB.
    assert_eq!(exos_hal::tlb::last_va(), 0x0040_0000);

    let (out, _) = run("chprm 400000 +W");
    assert!(out.contains("perms -------UWP"));

    let (out, _) = run("chprm 400000 -WU");
    assert!(out.contains("perms ---------P"));
    let pte = paging::lookup(pgdir, va).unwrap().1.read();
    assert_eq!(pte & 0x6, 0);
}

#[test]
fn clrprm_strips_writable_and_user() {
    let _m = common::boot();
    let a = running_env();
    assert_eq!(syscall(syscall::SYS_PAGE_ALLOC, 0, 0x0040_0000, UWP, 0, 0), OK);
    let pgdir = env::view_by_id(a).unwrap().pgdir;

    let (out, _) = run("clrprm 400000");
    assert!(out.contains("perms ---------P"), "got:\n{}", out);
    let pte = paging::lookup(pgdir, VirtAddr::new(0x0040_0000)).unwrap().1.read();
    assert_eq!(pte & 0x6, 0);
    assert_ne!(pte & 0x1, 0);

    let (out, _) = run("clrprm 400000 extra");
    assert!(out.contains("Usage: clrprm addr"));
}

#[test]
fn mp_and_chprm_handle_unmapped_addresses() {
    let _m = common::boot();
    let _a = running_env();
    let (out, _) = run("chprm 700000 +W");
    assert!(out.contains("VA 0x00700000: PA [unmapped]"));
}

#[test]
fn step_and_continue_drive_the_trap_flag() {
    let _m = common::boot();
    let a = running_env();

    let (_, action) = run("step");
    assert_eq!(action, LoopAction::Resume);
    assert_ne!(env::view_by_id(a).unwrap().tf.eflags & FL_TF, 0);

    let (_, action) = run("continue");
    assert_eq!(action, LoopAction::Resume);
    assert_eq!(env::view_by_id(a).unwrap().tf.eflags & FL_TF, 0);

    // The single-letter aliases hit the same handlers.
    let (_, action) = run("s");
    assert_eq!(action, LoopAction::Resume);
    assert_ne!(env::view_by_id(a).unwrap().tf.eflags & FL_TF, 0);
    let (_, action) = run("c");
    assert_eq!(action, LoopAction::Resume);
    assert_eq!(env::view_by_id(a).unwrap().tf.eflags & FL_TF, 0);
}

#[test]
fn resume_without_an_environment_is_refused() {
    let _m = common::boot();
    let (out, action) = run("continue");
    assert_eq!(action, LoopAction::Stay);
    assert!(out.contains("Nothing to continue"));
}

#[test]
fn kerninfo_reports_pool_and_table_usage() {
    let _m = common::boot();
    let _a = running_env();
    let (out, _) = run("kerninfo");
    assert!(out.contains("environments"), "got:\n{}", out);
    assert!(out.contains("frames"));
    assert!(out.contains("1 live of 256"));
}

#[test]
fn backtrace_walks_the_saved_frame_chain() {
    let _m = common::boot();
    let a = running_env();
    assert_eq!(syscall(syscall::SYS_PAGE_ALLOC, 0, 0x0040_0000, UWP, 0, 0), OK);

    // Hand-build two stack frames: ebp chain 0x400100 -> 0x400040 -> 0.
    let frame0: [u32; 7] = [0, 0xDEAD_0000, 0, 0, 0, 0, 0];
    let frame1: [u32; 7] = [0x0040_0040, 0xBEEF_0000, 11, 22, 33, 44, 55];
    let as_bytes = |words: &[u32; 7]| {
        let mut b = [0u8; 28];
        for (i, w) in words.iter().enumerate() {
            b[i * 4..i * 4 + 4].copy_from_slice(&w.to_le_bytes());
        }
        b
    };
    trap::user_write(0x0040_0040, &as_bytes(&frame0)).unwrap();
    trap::user_write(0x0040_0100, &as_bytes(&frame1)).unwrap();
    env::with_trapframe(a, |tf| tf.regs.ebp = 0x0040_0100).unwrap();

    let (out, _) = run("bt");
    assert!(out.contains("Stack backtrace:"), "got:\n{}", out);
    assert!(out.contains("ebp 00400100  eip beef0000  args 0000000b 00000016 00000021 0000002c 00000037"));
    assert!(out.contains("ebp 00400040  eip dead0000"));
}
