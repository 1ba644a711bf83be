//! The segregated free-list index: per-class head pointers plus the
//! two-tier bitmap (C3 in the design). Grounded on
//! `tlsf.c:141-160,278-372`.

use core::array;
use core::cell::Cell;
use core::ptr::NonNull;

use crate::block::{self, BlockHeader};
use crate::map::{self, ffs, FL_COUNT, SL_COUNT};
use crate::stats::Counters;

/// Bitmaps and list heads for every `(first_level, second_level)` size
/// class, plus the shared sentinel node every empty list points at
/// (`tlsf.c`'s `block_null`).
pub(crate) struct FreeListIndex {
    fl_bitmap: Cell<u32>,
    sl_bitmap: [Cell<u32>; FL_COUNT],
    blocks: [[Cell<NonNull<BlockHeader>>; SL_COUNT]; FL_COUNT],
    /// Address of the sentinel `BlockHeader`; every array slot above starts
    /// out pointing at it.
    null: NonNull<BlockHeader>,
}

const _: () = assert!(FL_COUNT <= 32, "fl_bitmap is a single u32");

impl FreeListIndex {
    /// `null` must be a pointer to an already-initialized sentinel node
    /// (see [`block::init_sentinel`]) that outlives `self`.
    pub(crate) fn new(null: NonNull<BlockHeader>) -> Self {
        Self {
            fl_bitmap: Cell::new(0),
            sl_bitmap: array::from_fn(|_| Cell::new(0)),
            blocks: array::from_fn(|_| array::from_fn(|_| Cell::new(null))),
            null,
        }
    }

    #[inline]
    fn head(&self, fl: usize, sl: usize) -> NonNull<BlockHeader> {
        self.blocks[fl][sl].get()
    }

    #[inline]
    fn set_head(&self, fl: usize, sl: usize, block: NonNull<BlockHeader>) {
        self.blocks[fl][sl].set(block);
    }

    /// Push `block` (already sized into class `(fl, sl)`) onto the head of
    /// that list and set the bitmap bits. `tlsf.c`'s `insert_free_block`.
    pub(crate) fn insert(&self, block: NonNull<BlockHeader>, fl: usize, sl: usize, stats: &Counters) {
        let current = self.head(fl, sl);
        block::set_next_free(block, current);
        block::set_prev_free(block, self.null);
        block::set_prev_free(current, block);

        self.set_head(fl, sl, block);
        self.fl_bitmap.set(self.fl_bitmap.get() | (1 << fl));
        self.sl_bitmap[fl].set(self.sl_bitmap[fl].get() | (1 << sl));

        stats.on_block_freed(block::size(block));
    }

    /// Insert a block using its exact size class (`mapping_insert`).
    pub(crate) fn insert_by_size(&self, block: NonNull<BlockHeader>, stats: &Counters) {
        let (fl, sl) = map::mapping_insert(block::size(block));
        self.insert(block, fl, sl, stats);
    }

    /// Splice `block` out of list `(fl, sl)`, clearing bitmap bits if the
    /// list becomes empty. `tlsf.c`'s `remove_free_block`.
    pub(crate) fn remove_at(&self, block: NonNull<BlockHeader>, fl: usize, sl: usize, stats: &Counters) {
        let prev = block::prev_free(block);
        let next = block::next_free(block);
        block::set_prev_free(next, prev);
        block::set_next_free(prev, next);

        if self.head(fl, sl) == block {
            self.set_head(fl, sl, next);

            if next == self.null {
                self.sl_bitmap[fl].set(self.sl_bitmap[fl].get() & !(1 << sl));
                if self.sl_bitmap[fl].get() == 0 {
                    self.fl_bitmap.set(self.fl_bitmap.get() & !(1 << fl));
                }
            }
        }

        stats.on_block_allocated(block::size(block));
    }

    /// Remove a block using its exact size class.
    pub(crate) fn remove(&self, block: NonNull<BlockHeader>, stats: &Counters) {
        let (fl, sl) = map::mapping_insert(block::size(block));
        self.remove_at(block, fl, sl, stats);
    }

    /// Find the smallest nonempty list whose class is `>= (fl, sl)`.
    /// Returns the list's (possibly adjusted) indices and its head block.
    /// `tlsf.c`'s `search_suitable_block`.
    pub(crate) fn search(&self, fl: usize, sl: usize) -> Option<(usize, usize, NonNull<BlockHeader>)> {
        let sl_map = self.sl_bitmap[fl].get() & (!0u32 << sl);

        let (fl, sl_map) = if sl_map == 0 {
            let fl_map = self.fl_bitmap.get() & (!0u32 << (fl + 1));
            if fl_map == 0 {
                return None;
            }
            let fl = ffs(fl_map) as usize;
            (fl, self.sl_bitmap[fl].get())
        } else {
            (fl, sl_map)
        };

        debug_assert_ne!(sl_map, 0);
        let sl = ffs(sl_map) as usize;
        Some((fl, sl, self.head(fl, sl)))
    }

    /// Every `(fl, sl)` slot, its bitmap bits, and its list head, for
    /// [`crate::tlsf::Tlsf::check`].
    pub(crate) fn slots(&self) -> impl Iterator<Item = (usize, usize, bool, bool, NonNull<BlockHeader>)> + '_ {
        (0..FL_COUNT).flat_map(move |fl| {
            (0..SL_COUNT).map(move |sl| {
                let fl_bit = self.fl_bitmap.get() & (1 << fl) != 0;
                let sl_bit = self.sl_bitmap[fl].get() & (1 << sl) != 0;
                (fl, sl, fl_bit, sl_bit, self.head(fl, sl))
            })
        })
    }

    pub(crate) fn is_null(&self, block: NonNull<BlockHeader>) -> bool {
        block == self.null
    }
}

/// Adapts [`FreeListIndex::remove`] to the narrow interface `block.rs`'s
/// coalescing functions need, so `block.rs` stays ignorant of how the free
/// list is represented.
pub(crate) struct FreeListRemover<'a> {
    pub(crate) list: &'a FreeListIndex,
    pub(crate) stats: &'a Counters,
}

impl block::RemoveFromFreeList for FreeListRemover<'_> {
    fn remove(&mut self, block: NonNull<BlockHeader>) {
        self.list.remove(block, self.stats);
    }
}
