//! # allocator_core - a general-purpose heap allocator
//!
//! A drop-in replacement for the platform allocator inside a single
//! process, built on two raw OS primitives: a contiguous, growable
//! program-break region (`sbrk`) and an anonymous page-mapping facility
//! (`mmap`/`munmap`).
//!
//! ## Overview
//!
//! Small requests are served from a heap arena carved out of the program
//! break; large requests go straight to an independent mapping:
//!
//! ```text
//!   ┌──────────────────────────────────────────────────────────────────┐
//!   │                         HEAP ARENA (sbrk)                        │
//!   │   ┌────────┬────────┬──────────────────────────────────────┐     │
//!   │   │ ALLOC  │ ALLOC  │              FREE                    │     │
//!   │   └────────┴────────┴──────────────────────────────────────┘     │
//!   │                                                      ▲ break     │
//!   └──────────────────────────────────────────────────────────────────┘
//!
//!   ┌──────────────────────────────────────────────────────────────────┐
//!   │             MAPPED BLOCKS (one mmap per block, own lifetime)      │
//!   │   ┌────────────────┐     ┌────────────────┐                      │
//!   │   │     MAPPED     │     │     MAPPED     │                      │
//!   │   └────────────────┘     └────────────────┘                      │
//!   └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   allocator_core
//!   ├── align    - alignment constant and align_up()
//!   ├── block    - BlockHeader model and pointer arithmetic
//!   ├── os       - OsBackend trait; SyscallBackend (real) and MockBackend (tests)
//!   ├── heap     - heap arena: best-fit, coalesce, split, tail expansion
//!   ├── mapped   - mapped-region registry
//!   └── context  - AllocatorContext: routing + the four public operations
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use allocator_core::{allocate, free};
//!
//! let ptr = allocate(64);
//! assert!(!ptr.is_null());
//! unsafe {
//!     ptr.write(42);
//! }
//! free(ptr);
//! ```
//!
//! ## Block Header
//!
//! A header sits immediately before every payload, whether heap-resident
//! or mapped:
//!
//! ```text
//!   ┌─────────────────────┬────────────────────────────────┐
//!   │     BlockHeader      │           payload              │
//!   │  size / status /     │                                │
//!   │  prev / next (H B)   │       (size bytes usable)      │
//!   └─────────────────────┴────────────────────────────────┘
//!                          ▲
//!                          └── pointer returned to the caller
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded only**: no synchronization primitives; see §5 of the
//!   design notes for the concurrency contract.
//! - **No slabs / caches**: every request goes through best-fit or a fresh
//!   mapping; there is no per-size-class fast path.
//! - **Never shrinks the heap**: freed heap pages are not returned to the
//!   OS by moving the break backward.
//! - **Unix-only**: requires `libc` (`sbrk`/`mmap`/`munmap`/`sysconf`).
//!
//! ## Safety
//!
//! This crate is inherently unsafe: it manages raw memory on the caller's
//! behalf. The public entry points (`allocate`, `zero_allocate`,
//! `reallocate`, `free`) are safe to call, but callers must uphold the usual
//! allocator contract (no double free, no use-after-free, sizes passed to
//! `free`/`reallocate` must describe memory this crate handed out).

pub mod align;
pub mod block;
pub mod context;
pub mod heap;
pub mod mapped;
pub mod os;

use std::cell::UnsafeCell;
use std::sync::OnceLock;

pub use context::{AllocatorContext, OomPolicy, THRESHOLD};
pub use os::{MockBackend, OsBackend, OsError, SyscallBackend};

/// Wrapper giving the process-wide context a `'static` home. Not actually
/// safe to touch from multiple threads at once; this crate's contract is
/// single-threaded and non-reentrant (§5), so we assert `Sync` ourselves
/// rather than pay for a mutex nothing in the contract asks for.
struct Singleton(UnsafeCell<AllocatorContext<SyscallBackend>>);

unsafe impl Sync for Singleton {}

static GLOBAL: OnceLock<Singleton> = OnceLock::new();

fn global() -> &'static UnsafeCell<AllocatorContext<SyscallBackend>> {
  &GLOBAL
    .get_or_init(|| Singleton(UnsafeCell::new(AllocatorContext::new(SyscallBackend::new(), OomPolicy::Abort))))
    .0
}

/// §4.5.1. Returns null for `size <= 0`.
pub fn allocate(size: isize) -> *mut u8 {
  unsafe { (*global().get()).allocate(size) }
}

/// §4.5.2. Returns null if `count <= 0` or `elem <= 0`. The returned
/// payload's first `count * elem` bytes are zero.
pub fn zero_allocate(count: isize, elem: isize) -> *mut u8 {
  unsafe { (*global().get()).zero_allocate(count, elem) }
}

/// §4.5.4.
pub fn reallocate(payload: *mut u8, size: isize) -> *mut u8 {
  unsafe { (*global().get()).reallocate(payload, size) }
}

/// §4.5.3. No-op on a null pointer.
pub fn free(payload: *mut u8) {
  unsafe { (*global().get()).free(payload) }
}
