//! Crate-wide test fixtures: the [`ShadowAllocator`] byte-range model and a
//! randomized allocate/free/reallocate stress test. Grounded on
//! `crates/rlsf/src/tests.rs`'s `ShadowAllocator` and
//! `crates/rlsf/src/tlsf/tests.rs::random`/`random_inner`, adapted from
//! `Layout`-keyed fixed-pool allocation to this crate's `usize`-sized,
//! growable-pool model. `crates/rlsf/src/flex/tests.rs::TrackingFlexSource`
//! is the model for wrapping a source so every pool it hands out (not just
//! the initial one) is registered with the shadow model.

extern crate std;

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ops::Range;
use std::rc::Rc;
use std::vec::Vec;

use core::ptr::NonNull;
use quickcheck_macros::quickcheck;

use crate::source::tests::HeapSource;
use crate::Tlsf;

/// Tracks which byte ranges of the address space this test has seen handed
/// out as pool memory, and whether they're currently `Free` or `Used`.
/// Catches overlapping-allocation and double-free bugs that unit tests on
/// individual operations (`split`/`absorb`/`insert`/`remove`) can't see,
/// since those never check two allocations against each other.
pub(crate) struct ShadowAllocator {
    regions: BTreeMap<usize, SaRegion>,
}

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub(crate) enum SaRegion {
    Free,
    Used,
    Invalid,
}

impl ShadowAllocator {
    pub(crate) fn new() -> Self {
        Self { regions: Some((0, SaRegion::Invalid)).into_iter().collect() }
    }

    fn convert_range(&mut self, range: Range<usize>, old: SaRegion, new: SaRegion) {
        if range.is_empty() {
            return;
        }
        assert_ne!(old, new);

        let (&addr, &region) = self.regions.range(0..range.end).next_back().unwrap();
        assert!(addr <= range.start, "discontinuity in range {range:?}");
        assert_eq!(region, old, "range {range:?} is {region:?}, expected {old:?}");

        if addr == range.start {
            *self.regions.get_mut(&addr).unwrap() = new;
        } else {
            self.regions.insert(range.start, new);
        }

        if let Some((_, &region)) = self.regions.range(0..range.start).next_back() {
            if region == new {
                self.regions.remove(&range.start);
            }
        }

        if let Some(&end_region) = self.regions.get(&range.end) {
            if end_region == new {
                self.regions.remove(&range.end);
            }
        } else {
            self.regions.insert(range.end, old);
        }
    }

    pub(crate) fn insert_free_block(&mut self, start: usize, len: usize) {
        self.convert_range(start..start + len, SaRegion::Invalid, SaRegion::Free);
    }

    pub(crate) fn remove_free_block(&mut self, start: usize, len: usize) {
        self.convert_range(start..start + len, SaRegion::Free, SaRegion::Invalid);
    }

    pub(crate) fn allocate(&mut self, start: usize, len: usize) {
        assert_eq!(start % crate::ALIGN, 0, "0x{start:x} is not word-aligned");
        self.convert_range(start..start + len, SaRegion::Free, SaRegion::Used);
    }

    pub(crate) fn deallocate(&mut self, start: usize, len: usize) {
        self.convert_range(start..start + len, SaRegion::Used, SaRegion::Free);
    }
}

/// A [`crate::BackingSource`] that forwards to [`HeapSource`] and mirrors
/// every region it acquires or releases into a shared [`ShadowAllocator`],
/// so the stress test below can validate pools grown mid-run the same way
/// it validates the initial one.
struct TrackingSource {
    inner: HeapSource,
    sa: Rc<RefCell<ShadowAllocator>>,
}

unsafe impl crate::BackingSource for TrackingSource {
    unsafe fn acquire(&mut self, min_size: usize) -> Option<(NonNull<u8>, usize)> {
        let (ptr, size) = unsafe { self.inner.acquire(min_size) }?;
        self.sa.borrow_mut().insert_free_block(ptr.as_ptr() as usize, size);
        Some((ptr, size))
    }

    unsafe fn release(&mut self, ptr: NonNull<u8>, size: usize) {
        self.sa.borrow_mut().remove_free_block(ptr.as_ptr() as usize, size);
        unsafe { self.inner.release(ptr, size) }
    }
}

#[test]
fn minimal_alloc_dealloc() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut tlsf = Tlsf::new(HeapSource::new()).unwrap();
    let p = tlsf.allocate(1).unwrap();
    assert_eq!(p.as_ptr() as usize % crate::ALIGN, 0);
    tlsf.free(Some(p));
    assert!(tlsf.check());
}

#[test]
fn zero_size_allocation_is_freeable() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut tlsf = Tlsf::new(HeapSource::new()).unwrap();
    let p1 = tlsf.allocate(0).unwrap();
    let p2 = tlsf.allocate(0).unwrap();
    assert_ne!(p1, p2);
    tlsf.free(Some(p1));
    tlsf.free(Some(p2));
    assert!(tlsf.check());
}

#[test]
fn pool_grows_then_shrinks_back() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut tlsf = Tlsf::new(HeapSource::new()).unwrap();
    assert_eq!(tlsf.stats().pool_count, 1);

    // Request something far larger than the initial pool's free block;
    // this must trigger `grow_pool`.
    let big = tlsf.allocate(1 << 20).unwrap();
    assert_eq!(tlsf.stats().pool_count, 2);

    tlsf.free(Some(big));
    assert_eq!(tlsf.stats().pool_count, 1);
    assert!(tlsf.check());
}

/// Randomized allocate/free/reallocate sequences, checked at every step
/// against the shadow model and `Tlsf::check`. Grounded on
/// `crates/rlsf/src/tlsf/tests.rs::random_inner`; a bytecode op can ask for
/// a request large enough to force pool growth, exercising `grow_pool`/
/// `remove_pool` as well as plain split/coalesce.
#[quickcheck]
fn random(bytecode: Vec<u8>) {
    random_inner(bytecode);
}

fn random_inner(bytecode: Vec<u8>) {
    let _ = env_logger::builder().is_test(true).try_init();

    let sa = Rc::new(RefCell::new(ShadowAllocator::new()));
    let mut tlsf =
        Tlsf::new(TrackingSource { inner: HeapSource::new(), sa: Rc::clone(&sa) }).unwrap();

    struct Alloc {
        ptr: NonNull<u8>,
        size: usize,
    }
    let mut allocs: Vec<Alloc> = Vec::new();

    // Drains `allocs` before `tlsf` drops, whether the bytecode ran to
    // completion or ran out mid-step — `Tlsf::drop`'s debug-only leak check
    // (`tlsf.c:561-563`) would otherwise fire on any outstanding allocation.
    let run = || -> Option<()> {
        let mut it = bytecode.iter().copied();
        loop {
            match it.next()? % 8 {
                0..=2 => {
                    let len = u16::from_le_bytes([it.next()?, it.next()?]) as usize % 4096;
                    log::trace!("allocate({len})");
                    if let Some(ptr) = tlsf.allocate(len) {
                        sa.borrow_mut().allocate(ptr.as_ptr() as usize, adjusted(len));
                        allocs.push(Alloc { ptr, size: len });
                    }
                }
                3..=5 => {
                    let i = it.next()?;
                    if !allocs.is_empty() {
                        let alloc = allocs.swap_remove(i as usize % allocs.len());
                        log::trace!("free({:?})", alloc.ptr);
                        sa.borrow_mut().deallocate(alloc.ptr.as_ptr() as usize, adjusted(alloc.size));
                        tlsf.free(Some(alloc.ptr));
                    }
                }
                6..=7 => {
                    let i = it.next()?;
                    if !allocs.is_empty() {
                        let len = u16::from_le_bytes([it.next()?, it.next()?]) as usize % 4096;
                        let i = i as usize % allocs.len();
                        let alloc = &mut allocs[i];
                        log::trace!("reallocate({:?}, {len})", alloc.ptr);
                        sa.borrow_mut().deallocate(alloc.ptr.as_ptr() as usize, adjusted(alloc.size));
                        if let Some(ptr) = tlsf.reallocate(Some(alloc.ptr), len) {
                            sa.borrow_mut().allocate(ptr.as_ptr() as usize, adjusted(len));
                            alloc.ptr = ptr;
                            alloc.size = len;
                        } else {
                            // A failing reallocate leaves the original untouched (spec.md L5).
                            sa.borrow_mut().allocate(alloc.ptr.as_ptr() as usize, adjusted(alloc.size));
                        }
                    }
                }
                _ => unreachable!(),
            }
            assert!(tlsf.check(), "integrity check failed mid-sequence");
        }
    };
    run();

    for alloc in allocs.drain(..) {
        sa.borrow_mut().deallocate(alloc.ptr.as_ptr() as usize, adjusted(alloc.size));
        tlsf.free(Some(alloc.ptr));
    }
    assert!(tlsf.check(), "integrity check failed after drain");
}

/// Mirrors `block::adjust_size`'s alignment rounding (not its
/// `BLOCK_SIZE_MIN` clamp) so the shadow model's claimed range for an
/// allocation is always a subset of the real block's payload — it only
/// needs to never overstate what's occupied, not match it exactly.
fn adjusted(requested: usize) -> usize {
    (requested + (crate::ALIGN - 1)) & !(crate::ALIGN - 1)
}
