//! Word parameters and the size-class mapping functions (`mapping_insert`,
//! `mapping_search` in `tlsf.c`; C2 in the design). Grounded directly on
//! `tlsf.c:17-276`, translated from preprocessor constants and bitfield
//! tricks to `const`s and shifts/masks on `usize`.

use cfg_if::cfg_if;

/// Native word alignment. Every block size and every user pointer is a
/// multiple of this.
pub const ALIGN: usize = core::mem::size_of::<usize>();

const ALIGN_SHIFT: u32 = ALIGN.trailing_zeros();

/// `log2` of the number of second-level (linear) subdivisions per
/// first-level class. `tlsf.c` calls this `SL_INDEX_COUNT_SHIFT`; 5 is the
/// value it (and every other TLSF implementation) uses.
pub(crate) const SL_SHIFT: u32 = 5;
pub(crate) const SL_COUNT: usize = 1 << SL_SHIFT;

cfg_if! {
    if #[cfg(target_pointer_width = "64")] {
        /// `log2` of the largest supported block size (8 GiB).
        const FL_INDEX_MAX: u32 = 33;
    } else if #[cfg(target_pointer_width = "32")] {
        /// `log2` of the largest supported block size (1 GiB).
        const FL_INDEX_MAX: u32 = 29;
    } else {
        compile_error!("tlsf only supports 32-bit and 64-bit targets");
    }
}

pub(crate) const FL_SHIFT: u32 = SL_SHIFT + ALIGN_SHIFT;
pub(crate) const FL_COUNT: usize = (FL_INDEX_MAX - FL_SHIFT + 1) as usize;

/// Sizes below this go straight into first-level class 0, subdivided
/// linearly by `ALIGN`. Above it, first-level classes are powers of two.
pub(crate) const SMALL_BLOCK_SIZE: usize = 1 << FL_SHIFT;

/// A block's payload word count, excluding the size word itself, is stored
/// in `usize::BITS - 3` bits; the remaining 3 bits hold `is_free`,
/// `is_prev_free`, `is_pool`.
pub(crate) const SIZE_FIELD_BITS: u32 = usize::BITS - 3;
pub(crate) const MAX_ENCODABLE_SIZE: usize = (1 << SIZE_FIELD_BITS) - 1;

pub const BLOCK_SIZE_MAX: usize = 1 << FL_INDEX_MAX;

/// Computed from [`crate::block::BlockHeader`]'s layout in `block.rs`
/// (`size_of::<BlockHeader>() - size_of::<*mut BlockHeader>()`); re-exported
/// here once `block` has defined it, via [`crate::block::BLOCK_SIZE_MIN`].
pub use crate::block::BLOCK_SIZE_MIN;

/// Exact size class of an already-sized block: `(first_level,
/// second_level)`. Used when inserting/removing blocks whose size is fixed
/// (as opposed to rounding a requested allocation size up). `tlsf.c`'s
/// `mapping_insert`.
#[inline]
pub(crate) fn mapping_insert(size: usize) -> (usize, usize) {
    debug_assert!(size >= BLOCK_SIZE_MIN);

    if size < SMALL_BLOCK_SIZE {
        (0, size / (SMALL_BLOCK_SIZE / SL_COUNT))
    } else {
        let fl = fls(size);
        let sl = (size >> (fl - SL_SHIFT)) ^ (1 << SL_SHIFT);
        (fl as usize - (FL_SHIFT as usize - 1), sl)
    }
}

/// Size class guaranteed to hold only blocks `>= size`: rounds `size` up to
/// the next list's lower bound before delegating to [`mapping_insert`].
/// `tlsf.c`'s `mapping_search`. Used when locating a free block for an
/// allocation request.
#[inline]
pub(crate) fn mapping_search(size: usize) -> (usize, usize) {
    debug_assert!(size >= BLOCK_SIZE_MIN);

    if size >= SMALL_BLOCK_SIZE {
        let round = (1usize << (fls(size) - SL_SHIFT)) - 1;
        // `size` can legitimately overflow here only if the caller already
        // violated `adjust_size`'s `BLOCK_SIZE_MAX` ceiling.
        mapping_insert(size.wrapping_add(round))
    } else {
        mapping_insert(size)
    }
}

/// Find-last-set, zero-based: index of the most significant set bit.
/// `tlsf.c`'s `flsl`.
#[inline]
fn fls(x: usize) -> u32 {
    debug_assert_ne!(x, 0);
    usize::BITS - 1 - x.leading_zeros()
}

/// Find-first-set, zero-based: index of the least significant set bit.
/// `tlsf.c`'s `ffs`.
#[inline]
pub(crate) fn ffs(x: u32) -> u32 {
    debug_assert_ne!(x, 0);
    x.trailing_zeros()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn small_block_boundary_never_overflows_sl() {
        // First Open Question in spec.md: verify `mapping_search` never
        // yields `sl >= SL_COUNT` near `SMALL_BLOCK_SIZE`.
        for size in (BLOCK_SIZE_MIN..SMALL_BLOCK_SIZE * 4).step_by(ALIGN) {
            let (fl, sl) = mapping_search(size);
            assert!(sl < SL_COUNT, "size={size} fl={fl} sl={sl}");
            let (fl, sl) = mapping_insert(size);
            assert!(sl < SL_COUNT, "size={size} fl={fl} sl={sl}");
        }
    }

    #[test]
    fn mapping_insert_is_exact_for_small_sizes() {
        assert_eq!(mapping_insert(BLOCK_SIZE_MIN), (0, BLOCK_SIZE_MIN / ALIGN));
        assert_eq!(mapping_insert(SMALL_BLOCK_SIZE - ALIGN).0, 0);
    }

    #[quickcheck]
    fn mapping_search_class_can_satisfy_request(size_words: u16) -> bool {
        let size = (size_words as usize).saturating_mul(ALIGN).max(BLOCK_SIZE_MIN);
        if size >= BLOCK_SIZE_MAX {
            return true;
        }
        let (fl, sl) = mapping_search(size);
        // Reconstruct that class's minimum member size and check it's >= size.
        let min_size = class_min_size(fl, sl);
        min_size >= size
    }

    /// Smallest size that maps (via `mapping_insert`) into `(fl, sl)`.
    /// Used only by tests, as an independent cross-check of `mapping_search`.
    fn class_min_size(fl: usize, sl: usize) -> usize {
        if fl == 0 {
            sl * (SMALL_BLOCK_SIZE / SL_COUNT)
        } else {
            let fl_bit = fl + (FL_SHIFT as usize - 1);
            (1usize << fl_bit) | (sl << (fl_bit - SL_SHIFT as usize))
        }
    }
}
