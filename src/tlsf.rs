//! The allocator facade (C6) and the opt-in integrity checker (C7).
//! Grounded on `tlsf.c:527-739` (`tlsf_create`/`tlsf_destroy`/
//! `tlsf_malloc`/`tlsf_free`/`tlsf_realloc`/`tlsf_calloc`/`tlsf_check`) and
//! `spec.md` §4.5-4.6.

use core::mem::size_of;
use core::ptr::{self, addr_of_mut, NonNull};

use crate::block::{self, BlockHeader};
use crate::freelist::{FreeListIndex, FreeListRemover};
use crate::map::{self, BLOCK_SIZE_MIN};
use crate::pool::{self, POOL_OVERHEAD};
use crate::source::BackingSource;
use crate::stats::Counters;

#[cfg(feature = "stats")]
use crate::stats::Stats;

/// Everything the allocator owns besides the pools themselves. Placed at
/// the start of the region returned by the first [`BackingSource::acquire`]
/// call, with the initial pool immediately following it — `tlsf.c`'s
/// combined control-structure-plus-first-pool layout (`tlsf_create`).
struct Control<S> {
    list: FreeListIndex,
    stats: Counters,
    source: S,
    /// The region backing this struct and the initial pool, released in
    /// full by [`Tlsf::destroy`].
    initial_region: (NonNull<u8>, usize),
    /// Free-list sentinel (`block_null`): self-referential, so an empty
    /// list's head/`next_free`/`prev_free` never needs a null check.
    null: BlockHeader,
}

/// A TLSF allocator instance. Grows its pool set lazily by calling out to
/// `S` whenever [`allocate`](Tlsf::allocate) can't satisfy a request from
/// existing pools.
///
/// Per `spec.md` §5 the core is not thread-safe: all calls on one instance
/// must come from a single logical thread of control, or be serialized by
/// the caller (see [`crate::GlobalTlsf`] for a `Mutex`-wrapped global
/// allocator built on top of this).
pub struct Tlsf<S: BackingSource> {
    control: NonNull<Control<S>>,
}

impl<S: BackingSource> Tlsf<S> {
    /// Create a new instance, requesting an initial region from `source`
    /// sized to hold the control structure plus a minimal pool. Returns
    /// `None` if `source` can't satisfy that request. `tlsf.c`'s
    /// `tlsf_create`.
    pub fn new(mut source: S) -> Option<Self> {
        let control_size = block::align_up(size_of::<Control<S>>());
        let min_size = control_size + POOL_OVERHEAD + BLOCK_SIZE_MIN;
        let (region, region_size) = unsafe { source.acquire(min_size) }?;
        debug_assert!(region_size >= min_size);
        debug_assert_eq!(region.as_ptr() as usize % map::ALIGN, 0);

        let control_ptr: NonNull<Control<S>> = region.cast();
        // Field-by-field placement: `region` is raw, uninitialized memory,
        // so we never form a `Control<S>` struct literal (that would
        // require a value for `null`, which must be initialized in place
        // because it is self-referential on its own final address).
        unsafe {
            let null_field =
                NonNull::new_unchecked(addr_of_mut!((*control_ptr.as_ptr()).null));
            block::init_sentinel(null_field);
            let list = FreeListIndex::new(null_field);
            ptr::write(addr_of_mut!((*control_ptr.as_ptr()).list), list);
            ptr::write(addr_of_mut!((*control_ptr.as_ptr()).stats), Counters::new());
            ptr::write(addr_of_mut!((*control_ptr.as_ptr()).source), source);
            ptr::write(
                addr_of_mut!((*control_ptr.as_ptr()).initial_region),
                (region, region_size),
            );
        }

        let pool_mem = unsafe { NonNull::new_unchecked(region.as_ptr().add(control_size)) };
        let pool_size = region_size - control_size;
        unsafe {
            let control = control_ptr.as_ref();
            pool::add_pool(pool_mem, pool_size, false, &control.list, &control.stats);
        }

        Some(Self { control: control_ptr })
    }

    // These borrow individual fields straight off the raw control pointer
    // rather than through a whole-`&Control<S>` reference, so a later
    // exclusive borrow of `.source` (for a backing-source call) never
    // aliases a live borrow of `.list`/`.stats`.
    #[inline]
    fn list(&self) -> &FreeListIndex {
        unsafe { &(*self.control.as_ptr()).list }
    }

    #[inline]
    fn stats(&self) -> &Counters {
        unsafe { &(*self.control.as_ptr()).stats }
    }

    /// A shared view of the whole control block, for call sites (`free`,
    /// `reallocate`, `stats`, `check`) that need more than one field at
    /// once. Every field behind it is either a `Cell` or only ever mutated
    /// through a raw-pointer path (`source.acquire`/`release`), so a shared
    /// borrow here never aliases a live exclusive borrow.
    #[inline]
    fn control(&self) -> &Control<S> {
        unsafe { self.control.as_ref() }
    }

    /// Round `size` up per [`block::adjust_size`], locate a free block of
    /// sufficient size (growing a pool on exhaustion), and carve out
    /// exactly `size` bytes. `tlsf.c`'s `tlsf_malloc` (minus the trailing
    /// `block_set_free`/return, split out as [`Self::allocate`]'s body so
    /// `reallocate` can share it).
    fn locate_free(&mut self, size: usize) -> Option<NonNull<BlockHeader>> {
        let (fl, sl) = map::mapping_search(size);
        if let Some(block) = self.search_and_remove(fl, sl) {
            return Some(block);
        }

        self.grow_pool(size)?;
        let (fl, sl) = map::mapping_search(size);
        let block = self
            .search_and_remove(fl, sl)
            .expect("pool growth didn't yield a usable block");
        Some(block)
    }

    fn search_and_remove(&mut self, fl: usize, sl: usize) -> Option<NonNull<BlockHeader>> {
        let (fl, sl, block) = self.list().search(fl, sl)?;
        if self.list().is_null(block) {
            return None;
        }
        self.list().remove_at(block, fl, sl, self.stats());
        Some(block)
    }

    /// Request a new region from the backing source, sized for `size` plus
    /// pool overhead, and install it as a pool whose main block is marked
    /// `is_pool` (eligible for wholesale reclamation in [`Self::free`]).
    fn grow_pool(&mut self, size: usize) -> Option<()> {
        let min_size = POOL_OVERHEAD + size;
        let (mem, mem_size) = unsafe { (*self.control.as_ptr()).source.acquire(min_size) }?;
        debug_assert!(mem_size >= min_size);
        pool::add_pool(mem, mem_size, true, self.list(), self.stats());
        Some(())
    }

    /// Carve any worthwhile remainder off the back of a free `block` sized
    /// for at least `size`, returning it to the free list. `tlsf.c`'s
    /// `block_trim_free`.
    fn trim_free(&self, block: NonNull<BlockHeader>, size: usize) {
        debug_assert!(block::is_free(block));
        if block::can_split(block, size) {
            let remaining = block::split(block, size);
            block::link_next(block);
            // `split` already marked `remaining` itself free (mirroring into
            // *its* successor); `block`, `remaining`'s predecessor, is still
            // free at this point, so record that on `remaining` directly
            // rather than toggling `remaining`'s own free bit again.
            block::set_is_prev_free(remaining, true);
            self.list().insert_by_size(remaining, self.stats());
        }
    }

    /// Like [`Self::trim_free`] but for a used block: the split-off
    /// remainder must be coalesced with a free physical successor before
    /// it's inserted. `tlsf.c`'s `block_trim_used`.
    fn trim_used(&self, block: NonNull<BlockHeader>, size: usize) {
        debug_assert!(!block::is_free(block));
        if block::can_split(block, size) {
            let remaining = block::split(block, size);
            block::link_next(block);
            // `block`, `remaining`'s predecessor, is still used here.
            block::set_is_prev_free(remaining, false);
            let mut remover = FreeListRemover { list: self.list(), stats: self.stats() };
            let remaining = block::merge_next(remaining, &mut remover);
            self.list().insert_by_size(remaining, self.stats());
        }
    }

    /// Allocate `size` bytes, growing a pool from the backing source if no
    /// existing pool has room. Returns `None` only on backing-source
    /// exhaustion; an oversize request aborts the process instead (see
    /// [`block::adjust_size`]). `tlsf.c`'s `tlsf_malloc`.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        let size = block::adjust_size(size);
        let block = self.locate_free(size)?;
        self.stats().on_allocate();

        self.trim_free(block, size);
        block::set_free(block, false);
        Some(block::block_to_ptr(block))
    }

    /// Allocate `size` bytes and zero them. `tlsf.c`'s `tlsf_calloc`.
    /// Named `allocate_zeroed` rather than `calloc` to match the crate's
    /// `allocate`/`free`/`reallocate` naming.
    pub fn allocate_zeroed(&mut self, size: usize) -> Option<NonNull<u8>> {
        let ptr = self.allocate(size)?;
        unsafe { ptr.as_ptr().write_bytes(0, size) };
        Some(ptr)
    }

    /// Release a previously allocated pointer. A no-op on `None`, so a
    /// zero-size `reallocate` can forward into this uniformly. Eagerly
    /// coalesces with any free physical neighbor, and returns an
    /// emptied grown pool to the backing source. `tlsf.c`'s `tlsf_free`.
    pub fn free(&mut self, ptr: Option<NonNull<u8>>) {
        let Some(ptr) = ptr else { return };
        let block = block::block_from_ptr(ptr);
        debug_assert!(!block::is_free(block), "double free");

        self.control().stats.on_free();
        block::set_free(block, true);

        let control = self.control();
        let mut remover = FreeListRemover { list: &control.list, stats: &control.stats };
        let block = block::merge_prev(block, &mut remover);
        let block = block::merge_next(block, &mut remover);

        let next = block::block_next(block);
        if block::is_pool(block) && block::size(next) == 0 {
            let (region, size) = pool::remove_pool(block, &control.stats);
            unsafe { (*self.control.as_ptr()).source.release(region, size) };
        } else {
            control.list.insert_by_size(block, &control.stats);
        }
    }

    /// Resize a previously allocated pointer in place when possible,
    /// otherwise allocate-copy-free. `mem == None` behaves like
    /// [`Self::allocate`]; `size == 0` behaves like [`Self::free`],
    /// returning `None`. On allocation failure during the grow path the
    /// original allocation is left untouched. `tlsf.c`'s `tlsf_realloc`.
    pub fn reallocate(&mut self, mem: Option<NonNull<u8>>, size: usize) -> Option<NonNull<u8>> {
        let Some(mem) = mem else {
            return self.allocate(size);
        };
        if size == 0 {
            self.free(Some(mem));
            return None;
        }

        let block = block::block_from_ptr(mem);
        debug_assert!(!block::is_free(block), "realloc of a freed pointer");
        let next = block::block_next(block);
        let cur_size = block::size(block);
        let combined = cur_size + block::size(next) + map::ALIGN;
        let size = block::adjust_size(size);

        if size > cur_size && (!block::is_free(next) || size > combined) {
            let new_ptr = self.allocate(size)?;
            unsafe {
                ptr::copy_nonoverlapping(mem.as_ptr(), new_ptr.as_ptr(), cur_size);
            }
            self.free(Some(mem));
            return Some(new_ptr);
        }

        if size > cur_size {
            let control = self.control();
            let mut remover = FreeListRemover { list: &control.list, stats: &control.stats };
            block::merge_next(block, &mut remover);
            // `merge_next` absorbed a free neighbor into `block`, which
            // stays used throughout — the absorbed neighbor's own successor
            // still has a stale `is_prev_free = true` from when that
            // neighbor was free. Mark it used now so a later `free` on it
            // doesn't try to coalesce into (and remove from the free list)
            // a `block` that was never in one (`spec.md` §3 invariant 2).
            block::set_is_prev_free(block::block_next(block), false);
        }

        self.trim_used(block, size);
        Some(mem)
    }

    /// A point-in-time snapshot of the allocator's counters (`spec.md`
    /// §4.6). Requires the `stats` feature.
    #[cfg(feature = "stats")]
    pub fn stats(&self) -> Stats {
        self.control().stats.snapshot()
    }

    /// Walk every free-list slot, verifying the invariants in `spec.md` §3:
    /// bitmap bits agree with list non-emptiness, every listed block is
    /// free with no free physical neighbor and maps back to its own slot,
    /// and the free/used/total size sum invariant holds. Returns `false`
    /// (rather than aborting) on the first violation found, so callers can
    /// use this in tests without taking down the process. Requires the
    /// `stats` feature (the sum-invariant check needs tracked totals).
    /// `tlsf.c`'s `tlsf_check`.
    #[cfg(feature = "stats")]
    pub fn check(&self) -> bool {
        let control = self.control();
        for (fl, sl, fl_bit, sl_bit, head) in control.list.slots() {
            if !fl_bit && sl_bit {
                return false;
            }
            if !sl_bit {
                if !control.list.is_null(head) {
                    return false;
                }
                continue;
            }

            let mut block = head;
            while !control.list.is_null(block) {
                if !block::is_free(block) {
                    return false;
                }
                if block::is_prev_free(block) {
                    return false;
                }
                let next = block::block_next(block);
                if block::is_free(next) || !block::is_prev_free(next) {
                    return false;
                }
                if block::size(block) < BLOCK_SIZE_MIN {
                    return false;
                }
                let (block_fl, block_sl) = map::mapping_insert(block::size(block));
                if block_fl != fl || block_sl != sl {
                    return false;
                }
                block = block::next_free(block);
            }
        }

        control.stats.check_sum_invariant()
    }
}

impl<S: BackingSource> Drop for Tlsf<S> {
    /// Release the region backing the control structure and initial pool.
    /// Pools grown later must already have been returned individually by
    /// [`Self::free`] emptying them; a still-outstanding grown pool is a
    /// leak the debug-only checks below catch (`tlsf.c:561-563`'s
    /// `tlsf_destroy` assertions), mirroring `tlsf.c`, which only ever
    /// releases the combined control-plus-initial-pool region itself.
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        {
            let control = self.control();
            if control.stats.pool_count() != 1 {
                crate::fatal::fatal!("memory leak detected: some pools were not released before destroy");
            }
            if control.stats.free_size() != control.stats.total_size() {
                crate::fatal::fatal!("memory leak detected: used bytes remain at destroy");
            }
        }

        unsafe {
            let control = self.control.as_ptr();
            let (region, size) = (*control).initial_region;
            (*control).source.release(region, size);
        }
    }
}
