//! Physical page allocator.
//!
//! One [`PageInfo`] record per frame, with free frames threaded onto a
//! singly-linked free list through their `link` field. A frame's
//! reference count equals the number of page-table mappings of that
//! frame across all environments (kernel-pinned frames — page tables,
//! directories — count as one reference per installing entry).
//!
//! The rules, violations of which are programming errors and panic:
//! - a frame on the free list has refcount zero and is mapped nowhere;
//! - [`free`] requires refcount zero;
//! - [`decref`] reaching zero returns the frame to the free list.
//!
//! Frame 0 is permanently reserved so a zero physical address can serve
//! as a null marker.

use spin::Mutex;

use super::address::{PhysAddr, NPAGES, PGSIZE};

bitflags::bitflags! {
    /// Allocation behavior flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AllocFlags: u32 {
        /// Clear the returned frame.
        const ZERO = 1 << 0;
    }
}

/// Snapshot of frame-pool statistics, for `kerninfo` and tests.
#[derive(Debug, Clone, Copy)]
pub struct MemStats {
    pub total_frames: usize,
    pub free_frames: usize,
}

/// Per-frame bookkeeping record.
#[derive(Clone, Copy)]
struct PageInfo {
    /// Next frame on the free list, when free.
    link: Option<u16>,
    /// Number of page-table entries mapping this frame.
    refcount: u16,
    /// On the free list right now.
    free: bool,
}

struct PagePool {
    pages: [PageInfo; NPAGES],
    free_head: Option<u16>,
    free_count: usize,
}

impl PagePool {
    const fn empty() -> Self {
        Self {
            pages: [PageInfo { link: None, refcount: 0, free: false }; NPAGES],
            free_head: None,
            free_count: 0,
        }
    }

    fn init(&mut self) {
        *self = Self::empty();
        // Frame 0 stays reserved; build the list so low frames come
        // out first.
        for frame in (1..NPAGES).rev() {
            self.pages[frame] = PageInfo {
                link: self.free_head,
                refcount: 0,
                free: true,
            };
            self.free_head = Some(frame as u16);
            self.free_count += 1;
        }
    }

    fn alloc(&mut self, flags: AllocFlags) -> Option<PhysAddr> {
        let frame = self.free_head?;
        let page = &mut self.pages[frame as usize];
        self.free_head = page.link;
        page.link = None;
        page.free = false;
        self.free_count -= 1;

        let pa = PhysAddr::new(frame as u32 * PGSIZE as u32);
        if flags.contains(AllocFlags::ZERO) {
            exos_hal::mem::zero_frame(pa.as_u32());
        }
        Some(pa)
    }

    fn free(&mut self, pa: PhysAddr) {
        assert!(pa.is_page_aligned(), "pmm: cannot free unaligned {}", pa);
        let frame = pa.frame();
        assert!(frame != 0, "pmm: cannot free reserved frame 0");
        let page = &mut self.pages[frame];
        assert!(!page.free, "pmm: double free of frame {} ({})", frame, pa);
        assert!(
            page.refcount == 0,
            "pmm: freeing frame {} with refcount {}",
            frame,
            page.refcount
        );
        page.link = self.free_head;
        page.free = true;
        self.free_head = Some(frame as u16);
        self.free_count += 1;
    }
}

static POOL: Mutex<PagePool> = Mutex::new(PagePool::empty());

/// (Re)build the pool with every frame free. Called by the boot path
/// before any allocation.
pub fn init() {
    POOL.lock().init();
}

/// Allocate one frame. The refcount starts at zero; mapping the frame
/// is what takes references.
///
/// Returns `None` when every frame is in use.
pub fn alloc(flags: AllocFlags) -> Option<PhysAddr> {
    POOL.lock().alloc(flags)
}

/// Return a frame with refcount zero to the free list.
///
/// # Panics
/// On unaligned addresses, double frees, or nonzero refcounts.
pub fn free(pa: PhysAddr) {
    POOL.lock().free(pa);
}

/// Take a reference to a frame (pair with a mapping insertion).
pub fn incref(pa: PhysAddr) {
    let mut pool = POOL.lock();
    let page = &mut pool.pages[pa.frame()];
    assert!(!page.free, "pmm: incref of free frame {}", pa);
    page.refcount += 1;
}

/// Drop a reference; the last reference frees the frame.
pub fn decref(pa: PhysAddr) {
    let mut guard = POOL.lock();
    let pool = &mut *guard;
    let frame = pa.frame();
    let page = &mut pool.pages[frame];
    assert!(page.refcount > 0, "pmm: decref of unreferenced frame {}", pa);
    page.refcount -= 1;
    if page.refcount == 0 {
        pool.free(pa);
    }
}

/// Current reference count of a frame.
pub fn refcount(pa: PhysAddr) -> u16 {
    POOL.lock().pages[pa.frame()].refcount
}

/// Pool statistics snapshot.
pub fn stats() -> MemStats {
    let pool = POOL.lock();
    MemStats {
        total_frames: NPAGES,
        free_frames: pool.free_count,
    }
}
