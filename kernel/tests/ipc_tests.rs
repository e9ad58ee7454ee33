//! Rendezvous IPC tests.

mod common;

use exos_kernel::env::{self, EnvStatus, EnvType};
use exos_kernel::error::KernError;
use exos_kernel::memory::address::VirtAddr;
use exos_kernel::memory::layout::UTOP;
use exos_kernel::memory::paging;
use exos_kernel::memory::pmm;
use exos_kernel::syscall::{self, syscall};

const OK: i32 = 0;
const NO_PAGE: u32 = u32::MAX;
const UP: u32 = 0x5; // User | Present
const UWP: u32 = 0x7;

fn two_envs() -> (u32, u32) {
    let a = env::env_create(EnvType::User).unwrap();
    let b = env::env_create(EnvType::User).unwrap();
    (a, b)
}

#[test]
fn send_with_page_transfer_aliases_the_frame() {
    let _m = common::boot();
    let (a, b) = two_envs();

    // B maps a page at 0x00400000 to send.
    env::env_run(b).unwrap();
    assert_eq!(syscall(syscall::SYS_PAGE_ALLOC, 0, 0x0040_0000, UWP, 0, 0), OK);

    // A parks in receive, willing to accept a page at 0x00800000.
    env::env_run(a).unwrap();
    assert_eq!(syscall(syscall::SYS_IPC_RECV, 0x0080_0000, 0, 0, 0, 0), OK);
    let parked = env::view_by_id(a).unwrap();
    assert!(parked.ipc_recving);
    assert_eq!(parked.status, EnvStatus::NotRunnable);
    assert_eq!(parked.ipc_dstva, 0x0080_0000);
    // The receiver blocked; the scheduler moved on to b.
    assert_eq!(env::current_env(), Some(b));

    assert_eq!(syscall(syscall::SYS_IPC_TRY_SEND, a, 42, 0x0040_0000, UP, 0), OK);

    let done = env::view_by_id(a).unwrap();
    assert_eq!(done.status, EnvStatus::Runnable);
    assert!(!done.ipc_recving);
    assert_eq!(done.ipc_value, 42);
    assert_eq!(done.ipc_from, b);
    assert_eq!(done.ipc_perm, UP);
    assert_eq!(done.tf.regs.eax, 0, "the paused receive completes with 0");

    // Same physical frame in both spaces.
    let b_pgdir = env::view_by_id(b).unwrap().pgdir;
    let (pa_src, _) = paging::lookup(b_pgdir, VirtAddr::new(0x0040_0000)).unwrap();
    let (pa_dst, slot) = paging::lookup(done.pgdir, VirtAddr::new(0x0080_0000)).unwrap();
    assert_eq!(pa_src, pa_dst);
    assert_eq!(slot.read() & 0xFFF, UP);
    assert_eq!(pmm::refcount(pa_src), 2);
}

#[test]
fn send_to_a_non_receiver_changes_nothing() {
    let _m = common::boot();
    let (a, b) = two_envs();
    let before = env::view_by_id(a).unwrap();

    env::env_run(b).unwrap();
    assert_eq!(
        syscall(syscall::SYS_IPC_TRY_SEND, a, 42, NO_PAGE, 0, 0),
        KernError::IpcNotRecv.code()
    );

    let after = env::view_by_id(a).unwrap();
    assert_eq!(after.status, before.status);
    assert_eq!(after.ipc_value, before.ipc_value);
    assert_eq!(after.ipc_from, before.ipc_from);
    assert_eq!(after.tf, before.tf);
}

#[test]
fn value_only_delivery_reports_zero_perm() {
    let _m = common::boot();
    let (a, b) = two_envs();

    env::env_run(a).unwrap();
    assert_eq!(syscall(syscall::SYS_IPC_RECV, NO_PAGE, 0, 0, 0, 0), OK);

    env::env_run(b).unwrap();
    assert_eq!(syscall(syscall::SYS_IPC_TRY_SEND, a, 7, NO_PAGE, 0, 0), OK);

    let done = env::view_by_id(a).unwrap();
    assert_eq!(done.ipc_value, 7);
    assert_eq!(done.ipc_perm, 0);
}

#[test]
fn reluctant_receiver_gets_the_value_but_no_page() {
    let _m = common::boot();
    let (a, b) = two_envs();

    // A receives without offering a destination.
    env::env_run(a).unwrap();
    assert_eq!(syscall(syscall::SYS_IPC_RECV, NO_PAGE, 0, 0, 0, 0), OK);

    // B offers a page anyway; that is not an error, just no transfer.
    env::env_run(b).unwrap();
    assert_eq!(syscall(syscall::SYS_PAGE_ALLOC, 0, 0x0040_0000, UWP, 0, 0), OK);
    assert_eq!(syscall(syscall::SYS_IPC_TRY_SEND, a, 9, 0x0040_0000, UP, 0), OK);

    let done = env::view_by_id(a).unwrap();
    assert_eq!(done.ipc_value, 9);
    assert_eq!(done.ipc_perm, 0);
    assert!(paging::lookup(done.pgdir, VirtAddr::new(0x0040_0000)).is_none());
}

#[test]
fn receive_validates_alignment() {
    let _m = common::boot();
    let (a, _) = two_envs();
    env::env_run(a).unwrap();

    assert_eq!(
        syscall(syscall::SYS_IPC_RECV, UTOP - 1, 0, 0, 0, 0),
        KernError::Inval.code()
    );
    // The failed call must not have parked the caller.
    let view = env::view_by_id(a).unwrap();
    assert!(!view.ipc_recving);
    assert_eq!(env::current_env(), Some(a));
}

#[test]
fn send_side_validation_is_complete_before_delivery() {
    let _m = common::boot();
    let (a, b) = two_envs();

    env::env_run(a).unwrap();
    assert_eq!(syscall(syscall::SYS_IPC_RECV, 0x0080_0000, 0, 0, 0, 0), OK);

    env::env_run(b).unwrap();
    assert_eq!(syscall(syscall::SYS_PAGE_ALLOC, 0, 0x0040_0000, UP, 0, 0), OK);

    // Unaligned source.
    assert_eq!(
        syscall(syscall::SYS_IPC_TRY_SEND, a, 1, 0x0040_0800, UP, 0),
        KernError::Inval.code()
    );
    // Bad permission mask (missing Present).
    assert_eq!(
        syscall(syscall::SYS_IPC_TRY_SEND, a, 1, 0x0040_0000, 0x6, 0),
        KernError::Inval.code()
    );
    // Source not mapped.
    assert_eq!(
        syscall(syscall::SYS_IPC_TRY_SEND, a, 1, 0x0060_0000, UP, 0),
        KernError::Inval.code()
    );
    // Writable upgrade of a read-only source.
    assert_eq!(
        syscall(syscall::SYS_IPC_TRY_SEND, a, 1, 0x0040_0000, UWP, 0),
        KernError::Inval.code()
    );

    // None of the failures delivered anything.
    let parked = env::view_by_id(a).unwrap();
    assert!(parked.ipc_recving);
    assert_eq!(parked.status, EnvStatus::NotRunnable);
    assert!(paging::lookup(parked.pgdir, VirtAddr::new(0x0080_0000)).is_none());

    // And the rendezvous still completes afterwards.
    assert_eq!(syscall(syscall::SYS_IPC_TRY_SEND, a, 5, 0x0040_0000, UP, 0), OK);
    assert_eq!(env::view_by_id(a).unwrap().ipc_value, 5);
}

#[test]
fn first_sender_wins() {
    let _m = common::boot();
    let a = env::env_create(EnvType::User).unwrap();
    let b = env::env_create(EnvType::User).unwrap();
    let c = env::env_create(EnvType::User).unwrap();

    env::env_run(a).unwrap();
    assert_eq!(syscall(syscall::SYS_IPC_RECV, NO_PAGE, 0, 0, 0, 0), OK);

    env::env_run(b).unwrap();
    assert_eq!(syscall(syscall::SYS_IPC_TRY_SEND, a, 100, NO_PAGE, 0, 0), OK);

    env::env_run(c).unwrap();
    assert_eq!(
        syscall(syscall::SYS_IPC_TRY_SEND, a, 200, NO_PAGE, 0, 0),
        KernError::IpcNotRecv.code()
    );
    assert_eq!(env::view_by_id(a).unwrap().ipc_value, 100);
    assert_eq!(env::view_by_id(a).unwrap().ipc_from, b);
}
