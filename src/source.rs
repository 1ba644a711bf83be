//! The backing-source abstraction the facade grows and shrinks pools
//! through (`map`/`unmap` in `spec.md` §6). Grounded on rlsf's
//! `flex::FlexSource` trait (`crates/rlsf/src/flex.rs`), simplified to the
//! two operations this design actually calls: acquiring a region of at
//! least a requested size, and releasing a region previously acquired.

use core::ptr::NonNull;

/// A source of backing memory for [`crate::Tlsf`] to carve pools out of.
///
/// # Safety
///
/// Implementations must uphold:
/// - `acquire` returns a region that is `ALIGN`-aligned (see
///   [`crate::ALIGN`]), at least `min_size` bytes, exclusively owned by the
///   caller until a matching `release`, and not overlapping any other live
///   region this source has handed out.
/// - `release` is only ever called with a `(ptr, size)` pair exactly as
///   returned from a prior `acquire` on the same source.
pub unsafe trait BackingSource {
    /// Acquire a region of at least `min_size` bytes. Returns the region's
    /// start and its actual size (which may exceed `min_size` — the
    /// allocator uses every byte it's given). `None` signals exhaustion.
    unsafe fn acquire(&mut self, min_size: usize) -> Option<(NonNull<u8>, usize)>;

    /// Release a region previously returned by `acquire`. Pools are only
    /// ever released in their entirety (`spec.md` §4.4, `remove_pool`), so
    /// `size` always matches the value `acquire` returned.
    ///
    /// The default implementation does nothing: a source that never
    /// implements `release` simply never returns memory, which matches
    /// `spec.md` §6's "`unmap` may be null" case.
    #[allow(unused_variables)]
    unsafe fn release(&mut self, ptr: NonNull<u8>, size: usize) {}
}

/// A [`BackingSource`] that rounds every request up to a multiple of the
/// system page size and serves it via anonymous `mmap`, releasing pools
/// back to the kernel via `munmap` on reclamation. Grounded on
/// `crates/rlsf/src/global/unix.rs`.
#[cfg(all(unix, feature = "std"))]
pub struct MmapSource {
    page_size_m1: usize,
}

#[cfg(all(unix, feature = "std"))]
impl MmapSource {
    pub fn new() -> Self {
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
        debug_assert!(page_size.is_power_of_two());
        Self { page_size_m1: page_size - 1 }
    }
}

#[cfg(all(unix, feature = "std"))]
impl Default for MmapSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(unix, feature = "std"))]
unsafe impl BackingSource for MmapSource {
    unsafe fn acquire(&mut self, min_size: usize) -> Option<(NonNull<u8>, usize)> {
        let num_bytes = min_size.checked_add(self.page_size_m1)? & !self.page_size_m1;

        let ptr = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                num_bytes,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_ANONYMOUS | libc::MAP_PRIVATE,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return None;
        }

        Some((NonNull::new(ptr.cast())?, num_bytes))
    }

    unsafe fn release(&mut self, ptr: NonNull<u8>, size: usize) {
        unsafe {
            libc::munmap(ptr.as_ptr().cast(), size);
        }
    }
}
