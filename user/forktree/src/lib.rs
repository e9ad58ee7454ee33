//! Fork a binary tree of environments and display their structure.
//!
//! Every environment keeps its path label ("" at the root, then "0",
//! "1", "00", ...) in a data page of its own address space. Before each
//! fork the parent stages the child's label next to its own; the child
//! starts by adopting the staged label as its own, and that first write
//! is what trips the copy-on-write machinery into giving it a private
//! page. The parent then re-stages for the second branch, privatizing
//! its side too.
#![cfg_attr(not(test), no_std)]

use exos_kernel::env::env_run;
use exos_kernel::memory::layout::UTEXT;
use exos_kernel::memory::paging::PteFlags;
use libexos::fork::fork;
use libexos::sys::{sys_getenvid, sys_page_alloc};
use libexos::{console, umem};

/// Depth of the tree: 15 environments, paths of length 0..=3.
pub const DEPTH: usize = 3;

/// The data page each environment keeps its label in.
const DATA_PAGE: u32 = UTEXT;

// Layout within the data page.
const CUR_LEN: u32 = DATA_PAGE;
const CUR_PATH: u32 = DATA_PAGE + 4;
const PENDING_LEN: u32 = DATA_PAGE + 16;
const PENDING_PATH: u32 = DATA_PAGE + 20;

fn read_label(len_va: u32, path_va: u32) -> ([u8; DEPTH], usize) {
    let len = (umem::read_u32(len_va) as usize).min(DEPTH);
    let mut path = [0u8; DEPTH];
    umem::read(path_va, &mut path[..len]);
    (path, len)
}

fn write_label(len_va: u32, path_va: u32, path: &[u8]) {
    umem::write_u32(len_va, path.len() as u32);
    umem::write(path_va, path);
}

fn announce(path: &[u8]) {
    let mut msg = [0u8; 16];
    let mut len = 0;
    for &b in b"I am '" {
        msg[len] = b;
        len += 1;
    }
    for &b in path {
        msg[len] = b;
        len += 1;
    }
    msg[len] = b'\'';
    msg[len + 1] = b'\n';
    len += 2;
    let text = core::str::from_utf8(&msg[..len]).unwrap();
    console::puts(text).expect("console write failed");
}

/// One environment's turn: print the label, then fork and descend both
/// branches.
fn node() {
    let me = sys_getenvid().expect("no current environment");
    let (path, len) = read_label(CUR_LEN, CUR_PATH);
    announce(&path[..len]);

    if len >= DEPTH {
        return;
    }

    for branch in [b'0', b'1'] {
        let mut next = [0u8; DEPTH];
        next[..len].copy_from_slice(&path[..len]);
        next[len] = branch;
        write_label(PENDING_LEN, PENDING_PATH, &next[..len + 1]);

        let child = fork().expect("fork failed");

        // The scheduler's turn: resume the child. It adopts the staged
        // label as its own — the write that privatizes its data page —
        // and works its subtree.
        env_run(child).expect("child not runnable");
        let (pending, plen) = read_label(PENDING_LEN, PENDING_PATH);
        write_label(CUR_LEN, CUR_PATH, &pending[..plen]);
        node();

        // Back to this environment for the other branch.
        env_run(me).expect("parent not runnable");
    }
}

/// Entry point. The caller provides a fresh, running environment; the
/// tree grows from it.
pub fn run_root() {
    let perm = (PteFlags::P | PteFlags::U | PteFlags::W).bits();
    sys_page_alloc(0, DATA_PAGE, perm).expect("data page allocation failed");
    write_label(CUR_LEN, CUR_PATH, b"");
    node();
}
