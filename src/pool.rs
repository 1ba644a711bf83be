//! Pool installation and reclamation (C5 in the design). Grounded on
//! `tlsf.c:466-521` (`tlsf_add_pool`/`tlsf_remove_pool`) and `spec.md` §4.4.

use core::ptr::NonNull;

use crate::block::{self, BlockHeader};
use crate::freelist::FreeListIndex;
use crate::map::{ALIGN, BLOCK_SIZE_MAX, BLOCK_SIZE_MIN};
use crate::stats::Counters;

/// Bytes of header overhead a pool consumes beyond the usable block size:
/// one word donated as the hidden `prev_phys_block` slot for the pool's
/// first block, one word for the trailing sentinel's header.
pub(crate) const POOL_OVERHEAD: usize = 2 * ALIGN;

/// Carve `mem[..size]` into one large free block flanked by a zero-size
/// sentinel, and insert the free block into `list`. `mem` must be
/// `ALIGN`-aligned and own `size` bytes exclusively for the pool's
/// lifetime. Returns the sentinel block, which the caller threads into
/// [`remove_pool`]'s emptiness check. `tlsf.c`'s `tlsf_add_pool`.
pub(crate) fn add_pool(
    mem: NonNull<u8>,
    size: usize,
    is_pool: bool,
    list: &FreeListIndex,
    stats: &Counters,
) -> NonNull<BlockHeader> {
    debug_assert_eq!(mem.as_ptr() as usize % ALIGN, 0);
    let block_size = size - POOL_OVERHEAD;
    debug_assert!(block_size >= BLOCK_SIZE_MIN && block_size < BLOCK_SIZE_MAX);

    // The header sits one word before `mem`: that word becomes the block's
    // `prev_phys_block` slot, which is never read because `is_prev_free`
    // starts false.
    let main = unsafe { NonNull::new_unchecked(mem.as_ptr().sub(ALIGN).cast()) };
    unsafe { block::init(main, block_size, is_pool) };

    // `main`'s size is now set, so its physical successor's address is
    // computable; that's where the sentinel goes.
    let sentinel_addr = block::block_next(main);
    unsafe { block::init(sentinel_addr, 0, false) };

    // Links `main` to the now-initialized sentinel and records `main` as
    // its predecessor. `set_free` mirrors `is_free` into the sentinel's
    // `is_prev_free`, so flip the main block free only after this.
    let sentinel = block::link_next(main);
    block::set_free(main, true);

    // `tlsf.c`'s `add_pool` counts only the usable `block_size` in
    // `total_size`/`used_size`, never the header overhead — so a fully
    // drained allocator reads `used_size == 0`, not `used_size ==
    // overhead * pool_count`. `insert_by_size` below immediately moves
    // `block_size` from used to free, leaving the overhead untracked either
    // way (spec.md invariant 7 only ranges over usable bytes).
    stats.on_pool_added(block_size);
    list.insert_by_size(main, stats);

    sentinel
}

/// Reclaim a pool whose only remaining block is `block`, immediately
/// followed by its sentinel. Returns the region to hand back to the
/// backing source. The caller must have already removed `block` from the
/// free list. `tlsf.c`'s `tlsf_remove_pool`.
pub(crate) fn remove_pool(block: NonNull<BlockHeader>, stats: &Counters) -> (NonNull<u8>, usize) {
    let block_size = block::size(block);
    stats.on_pool_removed(block_size);

    let region = unsafe { NonNull::new_unchecked(block.as_ptr().cast::<u8>().add(ALIGN)) };
    (region, block_size + POOL_OVERHEAD)
}
