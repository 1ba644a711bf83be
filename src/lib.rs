//! This crate implements the TLSF (Two-Level Segregated Fit) dynamic memory
//! allocation algorithm¹.
//!
//!  - **Allocation, deallocation, and reallocation all complete in
//!    guaranteed constant time.** TLSF is suitable for real-time and
//!    embedded applications.
//!
//!  - **Memory pools are supplied lazily by the caller.** [`Tlsf::new`]
//!    takes a pair of callbacks (bundled as a [`BackingSource`]) — one to
//!    acquire a region of memory, one to release it — rather than owning a
//!    fixed arena up front. The allocator grows its pool set on demand and
//!    (where the caller wants it) shrinks it again when a grown pool empties
//!    out.
//!
//!  - **`#![no_std]` by default.** The core algorithm has no dependency on
//!    an operating system. Enable the `std` feature for the optional
//!    `GlobalAlloc` wrapper ([`global`]) and an `mmap`-backed
//!    [`source::MmapSource`] on Unix.
//!
//! <sub>¹ M. Masmano, I. Ripoll, A. Crespo and J. Real, "TLSF: a new dynamic
//! memory allocator for real-time systems," *Proceedings. 16th Euromicro
//! Conference on Real-Time Systems*, 2004.</sub>
//!
//! # Example
//!
//! ```
//! use tlsf::{BackingSource, Tlsf};
//! use std::alloc::{alloc, dealloc, Layout};
//! use std::ptr::NonNull;
//!
//! /// A backing source that simply forwards to the global allocator, for
//! /// illustration. Real embedders usually hand out static arrays or
//! /// `mmap`-backed regions instead.
//! struct SystemSource;
//!
//! unsafe impl BackingSource for SystemSource {
//!     unsafe fn acquire(&mut self, min_size: usize) -> Option<(NonNull<u8>, usize)> {
//!         let layout = Layout::from_size_align(min_size, tlsf::ALIGN).ok()?;
//!         let ptr = NonNull::new(alloc(layout))?;
//!         Some((ptr, min_size))
//!     }
//!
//!     unsafe fn release(&mut self, ptr: NonNull<u8>, size: usize) {
//!         let layout = Layout::from_size_align_unchecked(size, tlsf::ALIGN);
//!         dealloc(ptr.as_ptr(), layout);
//!     }
//! }
//!
//! let mut tlsf = Tlsf::new(SystemSource).expect("backing source exhausted");
//! unsafe {
//!     let p = tlsf.allocate(64).unwrap();
//!     tlsf.free(Some(p));
//! }
//! ```
#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate cfg_if;

#[cfg(feature = "logging")]
extern crate log;

#[cfg(any(test, feature = "std"))]
extern crate std;

mod block;
mod fatal;
mod freelist;
mod map;
mod pool;
mod source;
mod stats;
mod tlsf;

#[cfg(feature = "global")]
mod global;

pub use self::map::{ALIGN, BLOCK_SIZE_MAX, BLOCK_SIZE_MIN};
pub use self::source::BackingSource;
pub use self::tlsf::Tlsf;

#[cfg(feature = "stats")]
pub use self::stats::Stats;

#[cfg(feature = "global")]
pub use self::global::GlobalTlsf;

#[cfg(all(unix, feature = "std"))]
pub use self::source::MmapSource;

#[cfg(test)]
mod tests;
