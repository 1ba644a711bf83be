//! Opt-in counters (C7 in the design). Grounded on `tlsf.c`'s
//! `TLSF_STATS`-gated `tlsf_stats_t` and the updates sprinkled through
//! `insert_free_block`/`remove_free_block`/`add_pool`/`remove_pool`.
//!
//! The bookkeeping here always runs — the `stats` Cargo feature only gates
//! whether [`crate::Tlsf::stats`] and [`crate::Tlsf::check`] (and the
//! public [`Stats`] type) are exposed, not whether the counters are
//! maintained. Tracking four `usize` additions per free-list operation is
//! not worth a second code path.

use core::cell::Cell;

/// A point-in-time snapshot of the counters described in `spec.md` §4.6.
/// Invariant 7 (`spec.md` §3): `free_size + used_size == total_size`.
#[cfg(feature = "stats")]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct Stats {
    pub free_size: usize,
    pub used_size: usize,
    pub total_size: usize,
    pub pool_count: usize,
    pub allocate_count: u64,
    pub free_count: u64,
}

/// `tlsf.c`'s `tlsf_printstats`, as a `Display` impl instead of a
/// `fprintf(stderr, ...)` call — pair with `log::info!("{stats}")` or
/// similar at the call site.
#[cfg(feature = "stats")]
impl core::fmt::Display for Stats {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "tlsf free_size={} used_size={} total_size={} pool_count={} \
             allocate_count={} free_count={}",
            self.free_size,
            self.used_size,
            self.total_size,
            self.pool_count,
            self.allocate_count,
            self.free_count,
        )
    }
}

#[derive(Default)]
pub(crate) struct Counters {
    free_size: Cell<usize>,
    used_size: Cell<usize>,
    total_size: Cell<usize>,
    pool_count: Cell<usize>,
    allocate_count: Cell<u64>,
    free_count: Cell<u64>,
}

impl Counters {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// A block of `size` payload bytes moved from used to free.
    #[inline]
    pub(crate) fn on_block_freed(&self, size: usize) {
        self.free_size.set(self.free_size.get() + size);
        self.used_size.set(self.used_size.get() - size);
    }

    /// A block of `size` payload bytes moved from free to used.
    #[inline]
    pub(crate) fn on_block_allocated(&self, size: usize) {
        self.free_size.set(self.free_size.get() - size);
        self.used_size.set(self.used_size.get() + size);
    }

    /// `block_size` is the pool's *usable* size — its main block's payload
    /// size, excluding [`crate::pool::POOL_OVERHEAD`]. Header overhead is
    /// never counted in `total_size`/`used_size`, matching `tlsf.c`'s
    /// `add_pool` (only `pool_size = size - POOL_OVERHEAD` is added).
    #[inline]
    pub(crate) fn on_pool_added(&self, block_size: usize) {
        self.pool_count.set(self.pool_count.get() + 1);
        self.total_size.set(self.total_size.get() + block_size);
        self.used_size.set(self.used_size.get() + block_size);
    }

    #[inline]
    pub(crate) fn on_pool_removed(&self, block_size: usize) {
        self.pool_count.set(self.pool_count.get() - 1);
        self.total_size.set(self.total_size.get() - block_size);
        self.used_size.set(self.used_size.get() - block_size);
    }

    #[inline]
    pub(crate) fn on_allocate(&self) {
        self.allocate_count.set(self.allocate_count.get() + 1);
    }

    #[inline]
    pub(crate) fn on_free(&self) {
        self.free_count.set(self.free_count.get() + 1);
    }

    #[inline]
    pub(crate) fn pool_count(&self) -> usize {
        self.pool_count.get()
    }

    /// Used by [`crate::tlsf::Tlsf`]'s `Drop` leak check: a correctly
    /// drained allocator has no bytes left in `used_size` at destroy time.
    #[inline]
    pub(crate) fn free_size(&self) -> usize {
        self.free_size.get()
    }

    #[inline]
    pub(crate) fn total_size(&self) -> usize {
        self.total_size.get()
    }

    #[cfg(feature = "stats")]
    pub(crate) fn snapshot(&self) -> Stats {
        Stats {
            free_size: self.free_size.get(),
            used_size: self.used_size.get(),
            total_size: self.total_size.get(),
            pool_count: self.pool_count.get(),
            allocate_count: self.allocate_count.get(),
            free_count: self.free_count.get(),
        }
    }

    #[cfg(feature = "stats")]
    pub(crate) fn check_sum_invariant(&self) -> bool {
        self.free_size.get() + self.used_size.get() == self.total_size.get()
    }
}
