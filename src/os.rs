//! The OS backend contract the core allocator is built against, plus two
//! implementations: [`SyscallBackend`], which talks to the real kernel via
//! `libc`, and [`MockBackend`], an in-process fake used only by tests.

use std::collections::HashMap;
use std::io;

use libc::{c_void, intptr_t};

/// Failure modes surfaced by an [`OsBackend`]. Carries enough context to
/// print a useful diagnostic on the fatal-abort path (§7).
#[derive(Debug)]
pub enum OsError {
  BreakExtendFailed { delta: usize, errno: io::Error },
  MapFailed { size: usize, errno: io::Error },
  UnmapFailed { size: usize, errno: io::Error },
}

impl std::fmt::Display for OsError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      OsError::BreakExtendFailed { delta, errno } => {
        write!(f, "failed to extend program break by {delta} bytes: {errno}")
      }
      OsError::MapFailed { size, errno } => {
        write!(f, "failed to map {size} bytes: {errno}")
      }
      OsError::UnmapFailed { size, errno } => {
        write!(f, "failed to unmap {size} bytes: {errno}")
      }
    }
  }
}

impl std::error::Error for OsError {}

/// The two OS primitives the core allocator is built on: a growable
/// program-break region, and an anonymous page-mapping facility (§2, §6).
pub trait OsBackend {
  /// Grows the single contiguous program-break region by `delta` bytes,
  /// returning a pointer to the start of the newly added region.
  fn extend_break(&mut self, delta: usize) -> Result<*mut u8, OsError>;

  /// Obtains an independent anonymous, readable-writable region of `n`
  /// bytes.
  fn map(&mut self, n: usize) -> Result<*mut u8, OsError>;

  /// Releases a region of `n` bytes previously returned by [`OsBackend::map`].
  ///
  /// # Safety
  ///
  /// `ptr` must be a region previously returned by `map` on `self`, not yet
  /// unmapped, with `n` matching the size it was obtained with.
  unsafe fn unmap(&mut self, ptr: *mut u8, n: usize) -> Result<(), OsError>;

  /// The OS memory page granularity.
  fn page_size(&self) -> usize;
}

/// The real backend: `sbrk` for the program break, `mmap`/`munmap` for
/// independent mappings.
pub struct SyscallBackend {
  page_size: usize,
}

impl SyscallBackend {
  pub fn new() -> Self {
    // SAFETY: sysconf(_SC_PAGESIZE) never fails on the platforms this crate
    // targets.
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
    Self { page_size }
  }
}

impl Default for SyscallBackend {
  fn default() -> Self {
    Self::new()
  }
}

impl OsBackend for SyscallBackend {
  fn extend_break(&mut self, delta: usize) -> Result<*mut u8, OsError> {
    // SAFETY: sbrk only ever mutates process-global break state; the core
    // contract requires this backend have exclusive ownership of it (§5).
    let raw = unsafe { libc::sbrk(delta as intptr_t) };

    if raw == usize::MAX as *mut c_void {
      return Err(OsError::BreakExtendFailed { delta, errno: io::Error::last_os_error() });
    }

    Ok(raw as *mut u8)
  }

  fn map(&mut self, n: usize) -> Result<*mut u8, OsError> {
    // SAFETY: a fixed, well-formed set of mmap flags requesting a fresh
    // anonymous mapping; no file descriptor is involved.
    let raw = unsafe {
      libc::mmap(
        std::ptr::null_mut(),
        n,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
        -1,
        0,
      )
    };

    if raw == libc::MAP_FAILED {
      return Err(OsError::MapFailed { size: n, errno: io::Error::last_os_error() });
    }

    Ok(raw as *mut u8)
  }

  unsafe fn unmap(&mut self, ptr: *mut u8, n: usize) -> Result<(), OsError> {
    // SAFETY: forwarded from the caller's contract on `OsBackend::unmap`.
    let ret = unsafe { libc::munmap(ptr as *mut c_void, n) };

    if ret == -1 {
      return Err(OsError::UnmapFailed { size: n, errno: io::Error::last_os_error() });
    }

    Ok(())
  }

  fn page_size(&self) -> usize {
    self.page_size
  }
}

/// Deterministic, in-process stand-in for the OS used by tests.
///
/// The "program break" is an offset into a fixed-capacity buffer, so
/// pointers handed out stay stable for the backend's whole lifetime (unlike
/// a `Vec<u8>`, which would invalidate them on reallocation). Mapped regions
/// are boxed slices tracked by address so `unmap` can drop them.
pub struct MockBackend {
  heap: Box<[u8]>,
  brk_offset: usize,
  page_size: usize,
  mapped: HashMap<usize, Box<[u8]>>,
  fail_next_extend: bool,
  fail_next_map: bool,
}

impl MockBackend {
  /// `capacity` bounds the total size the simulated program break can grow
  /// to; tests should size it comfortably above whatever `THRESHOLD` they
  /// exercise.
  pub fn with_capacity(capacity: usize, page_size: usize) -> Self {
    Self {
      heap: vec![0u8; capacity].into_boxed_slice(),
      brk_offset: 0,
      page_size,
      mapped: HashMap::new(),
      fail_next_extend: false,
      fail_next_map: false,
    }
  }

  /// Makes the next `extend_break` call fail, to exercise the OOM paths
  /// (§7) without touching the real allocator.
  pub fn fail_next_extend(&mut self) {
    self.fail_next_extend = true;
  }

  /// Makes the next `map` call fail.
  pub fn fail_next_map(&mut self) {
    self.fail_next_map = true;
  }

  pub fn live_mapping_count(&self) -> usize {
    self.mapped.len()
  }
}

impl OsBackend for MockBackend {
  fn extend_break(&mut self, delta: usize) -> Result<*mut u8, OsError> {
    if self.fail_next_extend {
      self.fail_next_extend = false;
      return Err(OsError::BreakExtendFailed { delta, errno: io::Error::from_raw_os_error(libc::ENOMEM) });
    }

    if self.brk_offset + delta > self.heap.len() {
      return Err(OsError::BreakExtendFailed { delta, errno: io::Error::from_raw_os_error(libc::ENOMEM) });
    }

    let ptr = unsafe { self.heap.as_mut_ptr().add(self.brk_offset) };
    self.brk_offset += delta;
    Ok(ptr)
  }

  fn map(&mut self, n: usize) -> Result<*mut u8, OsError> {
    if self.fail_next_map {
      self.fail_next_map = false;
      return Err(OsError::MapFailed { size: n, errno: io::Error::from_raw_os_error(libc::ENOMEM) });
    }

    let mut region = vec![0u8; n].into_boxed_slice();
    let ptr = region.as_mut_ptr();
    self.mapped.insert(ptr as usize, region);
    Ok(ptr)
  }

  unsafe fn unmap(&mut self, ptr: *mut u8, n: usize) -> Result<(), OsError> {
    if self.mapped.remove(&(ptr as usize)).is_none() {
      return Err(OsError::UnmapFailed { size: n, errno: io::Error::from_raw_os_error(libc::EINVAL) });
    }

    Ok(())
  }

  fn page_size(&self) -> usize {
    self.page_size
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn extend_break_returns_contiguous_offsets() {
    let mut backend = MockBackend::with_capacity(4096, 4096);

    let first = backend.extend_break(64).unwrap();
    let second = backend.extend_break(32).unwrap();

    assert_eq!(second as usize, first as usize + 64);
  }

  #[test]
  fn extend_break_fails_past_capacity() {
    let mut backend = MockBackend::with_capacity(128, 4096);

    assert!(backend.extend_break(256).is_err());
  }

  #[test]
  fn fail_next_extend_fires_once() {
    let mut backend = MockBackend::with_capacity(4096, 4096);
    backend.fail_next_extend();

    assert!(backend.extend_break(64).is_err());
    assert!(backend.extend_break(64).is_ok());
  }

  #[test]
  fn map_then_unmap_round_trips() {
    let mut backend = MockBackend::with_capacity(4096, 4096);

    let ptr = backend.map(256).unwrap();
    assert_eq!(backend.live_mapping_count(), 1);

    unsafe {
      backend.unmap(ptr, 256).unwrap();
    }
    assert_eq!(backend.live_mapping_count(), 0);
  }

  #[test]
  fn mapped_regions_come_pre_zeroed() {
    let mut backend = MockBackend::with_capacity(4096, 4096);

    let ptr = backend.map(64).unwrap();
    let slice = unsafe { std::slice::from_raw_parts(ptr, 64) };

    assert!(slice.iter().all(|&b| b == 0));
  }
}
