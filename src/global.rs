//! [`GlobalTlsf`]: a [`GlobalAlloc`] wrapper around [`Tlsf`], serializing
//! access with a `std::sync::Mutex`. Grounded on `crates/rlsf/src/global.rs`
//! and `crates/rlsf/src/global/unix.rs`'s `Mutex`-guarded `FlexTlsf`, with
//! `std::sync::Mutex` standing in for the teacher's hand-rolled
//! `pthread_mutex_t` wrapper — this crate's `std` feature already pulls in
//! `std`, so there's no reason to hand-roll one.
//!
//! Unlike the teacher, this crate's pools come from an explicit
//! [`BackingSource`] supplied by the caller rather than a platform-specific
//! `mmap` shim baked into the global-allocator path, so [`GlobalTlsf::new`]
//! is fallible and takes the source as an argument instead of being a
//! `const fn` usable directly in a `static`. Pair it with
//! `std::sync::OnceLock` (or a `lazy_static`-style cell) if you need it
//! installed as `#[global_allocator]` from a `static`.

use std::alloc::{GlobalAlloc, Layout};
use std::ptr::{self, NonNull};
use std::sync::Mutex;

use crate::source::BackingSource;
use crate::tlsf::Tlsf;

/// [`Tlsf`] behind a [`Mutex`], implementing [`GlobalAlloc`]. This is the
/// crate's answer to `spec.md` §1's "any thread-synchronization wrapper ...
/// [is] out of scope" for the core: the core stays caller-serialized, and
/// this type is the caller that does the serializing, for embedders who
/// opted into `std` and want a drop-in global allocator.
pub struct GlobalTlsf<S: BackingSource> {
    inner: Mutex<Tlsf<S>>,
}

impl<S: BackingSource> GlobalTlsf<S> {
    /// Wrap an already-constructed [`Tlsf`] instance as a global allocator.
    /// Use [`Tlsf::new`] to build one from a [`BackingSource`] first — this
    /// type doesn't retry source exhaustion any differently than the core
    /// does.
    pub fn new(tlsf: Tlsf<S>) -> Self {
        Self { inner: Mutex::new(tlsf) }
    }

    #[inline]
    fn lock(&self) -> std::sync::MutexGuard<'_, Tlsf<S>> {
        // A poisoned mutex means a prior allocation call panicked while
        // holding it, which this crate's own code never does (`fatal!`
        // aborts the process instead of unwinding past the lock). A pool
        // embedded elsewhere could still poison it, so recover rather than
        // poisoning every subsequent call.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

unsafe impl<S: BackingSource + Send> Send for GlobalTlsf<S> {}
unsafe impl<S: BackingSource + Send> Sync for GlobalTlsf<S> {}

unsafe impl<S: BackingSource + Send> GlobalAlloc for GlobalTlsf<S> {
    /// # Safety
    /// Per `spec.md` §1's alignment non-goal, `layout.align()` must not
    /// exceed [`crate::ALIGN`] — every allocation this crate hands out is
    /// aligned to the native word size and no more. Debug builds assert
    /// this; release builds trust the caller, matching §7's "release builds
    /// omit most assertions."
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        debug_assert!(layout.align() <= crate::ALIGN, "over-alignment request");
        self.lock()
            .allocate(layout.size())
            .map(|p| p.as_ptr())
            .unwrap_or(ptr::null_mut())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.lock().free(NonNull::new(ptr));
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        debug_assert!(layout.align() <= crate::ALIGN, "over-alignment request");
        self.lock()
            .allocate_zeroed(layout.size())
            .map(|p| p.as_ptr())
            .unwrap_or(ptr::null_mut())
    }

    unsafe fn realloc(&self, ptr: *mut u8, _layout: Layout, new_size: usize) -> *mut u8 {
        self.lock()
            .reallocate(NonNull::new(ptr), new_size)
            .map(|p| p.as_ptr())
            .unwrap_or(ptr::null_mut())
    }
}
