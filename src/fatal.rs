//! Contract-violation and internal-invariant aborts.
//!
//! These mirror `tlsf.c`'s `INSIST` macro: unlike an out-of-memory
//! condition, which is a recoverable `None` return, the conditions checked
//! here (double free, a corrupted free list, a backing source that lied
//! about the size or alignment it handed back) indicate a programming
//! error and are not meant to be caught. Release builds still check these —
//! `fatal!` is not gated behind `debug_assertions` — because a corrupted
//! heap is worse than a crash. Finer-grained, debug-only sanity checks use
//! plain `debug_assert!` instead.

#[cfg(feature = "logging")]
macro_rules! fatal {
    ($($arg:tt)*) => {{
        log::error!("tlsf: fatal: {}", core::format_args!($($arg)*));
        fatal_abort()
    }};
}

#[cfg(not(feature = "logging"))]
macro_rules! fatal {
    ($($arg:tt)*) => {{
        let _ = core::format_args!($($arg)*);
        fatal_abort()
    }};
}

pub(crate) use fatal;

/// Terminates the process. On `std` + Unix this calls `libc::abort`
/// directly, matching `tlsf.c`'s `abort()`; otherwise it panics, which
/// still aborts under a `panic = "abort"` profile (the typical profile for
/// the embedded/no_std targets this crate is meant for).
#[cold]
#[inline(never)]
pub(crate) fn fatal_abort() -> ! {
    #[cfg(unix)]
    {
        unsafe { libc::abort() }
    }
    #[cfg(not(unix))]
    {
        panic!("tlsf: aborting due to a fatal contract violation")
    }
}
