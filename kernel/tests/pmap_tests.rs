//! Page allocator and address-space primitive tests.

mod common;

use exos_kernel::memory::address::{VirtAddr, PGSIZE};
use exos_kernel::memory::layout::UTOP;
use exos_kernel::memory::paging::{self, PteFlags, AVAIL, SYSCALL_MASK};
use exos_kernel::memory::pmm::{self, AllocFlags};

const P: u32 = PteFlags::P.bits();
const W: u32 = PteFlags::W.bits();
const U: u32 = PteFlags::U.bits();

#[test]
fn alloc_and_free_track_the_pool() {
    let _m = common::boot();
    let before = pmm::stats().free_frames;

    let pa = pmm::alloc(AllocFlags::empty()).unwrap();
    assert_eq!(pmm::stats().free_frames, before - 1);
    assert_eq!(pmm::refcount(pa), 0);

    pmm::free(pa);
    assert_eq!(pmm::stats().free_frames, before);
}

#[test]
fn zeroed_allocation_is_zeroed() {
    let _m = common::boot();
    // Dirty a frame, free it, then demand a zeroed one until that
    // frame comes back around.
    let pa = pmm::alloc(AllocFlags::empty()).unwrap();
    unsafe { core::ptr::write_bytes(pa.kva(), 0xA5, PGSIZE) };
    pmm::free(pa);

    let pa2 = pmm::alloc(AllocFlags::ZERO).unwrap();
    assert_eq!(pa2, pa, "free list should hand the frame straight back");
    let bytes = unsafe { core::slice::from_raw_parts(pa2.kva(), PGSIZE) };
    assert!(bytes.iter().all(|&b| b == 0));
    pmm::free(pa2);
}

#[test]
#[should_panic(expected = "refcount")]
fn freeing_a_mapped_frame_panics() {
    let _m = common::boot();
    let pgdir = paging::create_pgdir().unwrap();
    let pa = pmm::alloc(AllocFlags::ZERO).unwrap();
    paging::insert(pgdir, pa, VirtAddr::new(0x0040_0000), P | U | W).unwrap();
    pmm::free(pa);
}

#[test]
fn insert_lookup_round_trip_masks_permissions() {
    let _m = common::boot();
    let pgdir = paging::create_pgdir().unwrap();
    let va = VirtAddr::new(0x0040_0000);
    let pa = pmm::alloc(AllocFlags::ZERO).unwrap();

    paging::insert(pgdir, pa, va, U | W | PteFlags::SHARE.bits()).unwrap();
    let (found, slot) = paging::lookup(pgdir, va).expect("mapping must exist");
    assert_eq!(found, pa);
    let pte = slot.read();
    assert_eq!(pte & !0xFFF, pa.as_u32());
    assert_eq!(pte & 0xFFF, P | U | W | PteFlags::SHARE.bits());
    assert_eq!(pte & 0xFFF & !(SYSCALL_MASK | AVAIL), 0);
    assert_eq!(pmm::refcount(pa), 1);
}

#[test]
fn insert_replaces_an_existing_mapping() {
    let _m = common::boot();
    let pgdir = paging::create_pgdir().unwrap();
    let va = VirtAddr::new(0x0040_0000);
    let first = pmm::alloc(AllocFlags::ZERO).unwrap();
    let second = pmm::alloc(AllocFlags::ZERO).unwrap();

    paging::insert(pgdir, first, va, P | U).unwrap();
    let free_before = pmm::stats().free_frames;
    paging::insert(pgdir, second, va, P | U).unwrap();

    let (found, _) = paging::lookup(pgdir, va).unwrap();
    assert_eq!(found, second);
    // The displaced page lost its only reference and went back to the
    // free list.
    assert_eq!(pmm::stats().free_frames, free_before + 1);
    assert_eq!(pmm::refcount(second), 1);
}

#[test]
fn remapping_the_same_page_survives() {
    let _m = common::boot();
    let pgdir = paging::create_pgdir().unwrap();
    let va = VirtAddr::new(0x0040_0000);
    let pa = pmm::alloc(AllocFlags::ZERO).unwrap();

    paging::insert(pgdir, pa, va, P | U | W).unwrap();
    // Same page, same address, reduced permissions: the increment must
    // land before the removal or the frame would be freed mid-insert.
    paging::insert(pgdir, pa, va, P | U).unwrap();

    let (found, slot) = paging::lookup(pgdir, va).unwrap();
    assert_eq!(found, pa);
    assert_eq!(slot.read() & 0xFFF, P | U);
    assert_eq!(pmm::refcount(pa), 1);
}

#[test]
fn walk_create_allocates_and_pins_the_table() {
    let _m = common::boot();
    let pgdir = paging::create_pgdir().unwrap();
    let va = VirtAddr::new(0x0123_4000);

    assert!(paging::walk(pgdir, va).is_none());
    let before = pmm::stats().free_frames;
    let slot = paging::walk_create(pgdir, va).unwrap();
    assert_eq!(slot.read(), 0, "fresh table entries start non-present");
    assert_eq!(pmm::stats().free_frames, before - 1);
    assert!(paging::walk(pgdir, va).is_some());
}

#[test]
fn remove_unmaps_invalidates_and_frees() {
    let _m = common::boot();
    let pgdir = paging::create_pgdir().unwrap();
    let va = VirtAddr::new(0x0040_0000);
    let pa = pmm::alloc(AllocFlags::ZERO).unwrap();
    paging::insert(pgdir, pa, va, P | U | W).unwrap();

    let flushes = exos_hal::tlb::flush_count();
    paging::remove(pgdir, va);

    assert!(paging::lookup(pgdir, va).is_none());
    assert!(exos_hal::tlb::flush_count() > flushes);
    assert_eq!(exos_hal::tlb::last_va(), va.as_u32());

    // No refcount left: the frame is back on the free list, and a
    // second remove of the same address is a silent no-op.
    let free_before = pmm::stats().free_frames;
    paging::remove(pgdir, va);
    assert_eq!(pmm::stats().free_frames, free_before);
}

#[test]
fn refcount_counts_mappings_across_spaces() {
    let _m = common::boot();
    let da = paging::create_pgdir().unwrap();
    let db = paging::create_pgdir().unwrap();
    let pa = pmm::alloc(AllocFlags::ZERO).unwrap();

    paging::insert(da, pa, VirtAddr::new(0x0040_0000), P | U).unwrap();
    paging::insert(db, pa, VirtAddr::new(0x0080_0000), P | U).unwrap();
    paging::insert(da, pa, VirtAddr::new(0x0040_1000), P | U).unwrap();
    assert_eq!(pmm::refcount(pa), 3);

    paging::remove(da, VirtAddr::new(0x0040_0000));
    assert_eq!(pmm::refcount(pa), 2);
    paging::remove(db, VirtAddr::new(0x0080_0000));
    paging::remove(da, VirtAddr::new(0x0040_1000));
    assert_eq!(pmm::refcount(pa), 0);
}

#[test]
fn allocation_fails_only_when_the_pool_is_dry() {
    let _m = common::boot();
    let mut held = Vec::new();
    while let Some(pa) = pmm::alloc(AllocFlags::empty()) {
        held.push(pa);
    }
    assert!(!held.is_empty());
    assert_eq!(pmm::stats().free_frames, 0);

    // A walk that needs a fresh table now reports out-of-memory.
    let pgdir = paging::kern_pgdir();
    assert!(paging::walk_create(pgdir, VirtAddr::new(0x0555_5000)).is_err());

    for pa in held {
        pmm::free(pa);
    }
}

#[test]
fn user_mem_check_finds_the_first_bad_page() {
    let _m = common::boot();
    let pgdir = paging::create_pgdir().unwrap();
    let base = VirtAddr::new(0x0040_0000);
    let pa = pmm::alloc(AllocFlags::ZERO).unwrap();
    paging::insert(pgdir, pa, base, P | U).unwrap();

    assert!(paging::user_mem_check(pgdir, base, PGSIZE, U).is_ok());
    assert!(paging::user_mem_check(pgdir, base + 16, 64, U).is_ok());

    // Second page unmapped: the failure points at its first byte.
    let bad = paging::user_mem_check(pgdir, base + 0x800, PGSIZE, U);
    assert_eq!(bad, Err(VirtAddr::new(0x0040_1000)));

    // Writable demanded on a read-only page.
    assert!(paging::user_mem_check(pgdir, base, 8, U | W).is_err());

    // Kernel half is never user-accessible.
    assert!(paging::user_mem_check(pgdir, VirtAddr::new(UTOP), 4, U).is_err());
}

#[test]
fn directory_self_map_resolves_to_the_directory() {
    let _m = common::boot();
    let pgdir = paging::create_pgdir().unwrap();

    // Walking any address inside the window lands in the directory
    // frame itself: the directory doubles as the window's page table.
    let uvpd = VirtAddr::new(exos_kernel::memory::layout::UVPD);
    let slot = paging::walk(pgdir, uvpd).expect("self-map present");
    assert_eq!(
        slot.read() & !0xFFF,
        pgdir.as_u32(),
        "UVPD reads back the directory frame"
    );
    assert_ne!(slot.read() & U, 0, "window is user-readable");
    assert_eq!(slot.read() & W, 0, "window is read-only");
}

#[test]
fn free_space_returns_every_frame() {
    let _m = common::boot();
    let baseline = pmm::stats().free_frames;

    let pgdir = paging::create_pgdir().unwrap();
    let pa = pmm::alloc(AllocFlags::ZERO).unwrap();
    paging::insert(pgdir, pa, VirtAddr::new(0x0040_0000), P | U | W).unwrap();
    paging::insert(pgdir, pa, VirtAddr::new(0x0123_4000), P | U).unwrap();
    assert!(pmm::stats().free_frames < baseline);

    // Directory, both page tables, and the doubly-mapped page all come
    // back.
    paging::free_space(pgdir);
    assert_eq!(pmm::stats().free_frames, baseline);
}
