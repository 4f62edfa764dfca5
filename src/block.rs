//! Block header model and the pointer arithmetic that bridges header and
//! payload addresses.
//!
//! A header sits immediately before every payload, whether the payload came
//! from the heap arena or from an independent OS mapping:
//!
//! ```text
//!   ┌────────────────────┬────────────────────────────┐
//!   │    BlockHeader      │        payload             │
//!   │  (H bytes, aligned) │     (size bytes)           │
//!   └────────────────────┴────────────────────────────┘
//!   ▲                     ▲
//!   │                     └── returned to the caller
//!   └── header_of(payload)
//! ```

use std::mem;

use crate::align::{ALIGNMENT, align_up};

/// Status of a block, tracked per §3 of the block header contract.
///
/// `Free` and `Alloc` are only legal for heap-resident blocks; `Mapped` is
/// only legal for blocks obtained from the mapping backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockStatus {
  Free,
  Alloc,
  Mapped,
}

/// Fixed-size metadata record stored immediately before every payload.
#[repr(C)]
pub struct BlockHeader {
  pub size: usize,
  pub status: BlockStatus,
  pub prev: *mut BlockHeader,
  pub next: *mut BlockHeader,
}

/// Size of a `BlockHeader`, rounded up to `ALIGNMENT`. Payload pointers are
/// always `header address + H`.
pub const H: usize = align_up(mem::size_of::<BlockHeader>(), ALIGNMENT);

impl BlockHeader {
  /// Writes a fresh header at `at`, returning it as a typed pointer.
  ///
  /// # Safety
  ///
  /// `at` must point to at least `H` writable bytes.
  pub unsafe fn init(
    at: *mut u8,
    size: usize,
    status: BlockStatus,
    prev: *mut BlockHeader,
    next: *mut BlockHeader,
  ) -> *mut BlockHeader {
    let header = at as *mut BlockHeader;
    unsafe {
      header.write(BlockHeader { size, status, prev, next });
    }
    header
  }

  /// Payload address for a given header address.
  ///
  /// # Safety
  ///
  /// `header` must be a valid, non-null `BlockHeader` pointer.
  pub unsafe fn payload_ptr(header: *mut BlockHeader) -> *mut u8 {
    unsafe { (header as *mut u8).add(H) }
  }

  /// Header address for a given payload address (the inverse of
  /// [`BlockHeader::payload_ptr`]).
  ///
  /// # Safety
  ///
  /// `payload` must have been returned by `payload_ptr` for some live header.
  pub unsafe fn header_of(payload: *mut u8) -> *mut BlockHeader {
    unsafe { payload.sub(H) as *mut BlockHeader }
  }

  /// Address at which a successor header would sit if this block's payload
  /// were exactly `payload_size` bytes.
  ///
  /// # Safety
  ///
  /// `header` must be a valid, non-null `BlockHeader` pointer.
  pub unsafe fn successor_addr(header: *mut BlockHeader, payload_size: usize) -> *mut u8 {
    unsafe { (header as *mut u8).add(H + payload_size) }
  }
}
