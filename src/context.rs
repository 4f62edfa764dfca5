//! Allocator context: bundles an [`OsBackend`], the heap and mapped list
//! heads, and the `heap_initialised` flag into one value, and implements
//! routing (§4.4) and the four public operations (§4.5).
//!
//! Production code drives a single process-wide `AllocatorContext<SyscallBackend>`
//! (see `lib.rs`); tests build independent contexts over a [`MockBackend`]
//! per the mock-driven testing pattern called out in the design notes.

use crate::align::{ALIGNMENT, align_up};
use crate::block::{BlockHeader, BlockStatus, H};
use crate::heap;
use crate::mapped;
use crate::os::{OsBackend, OsError};

/// Size at or above which a request is served by a fresh OS mapping rather
/// than the heap arena, for the plain-allocate entry point (§6).
pub const THRESHOLD: usize = 128 * 1024;

/// What to do when an OS backend call fails (§7). The reference design
/// aborts; embedding environments may prefer a null return instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OomPolicy {
  /// Print a diagnostic and call `std::process::abort()`.
  Abort,
  /// Propagate the failure as an ordinary null return.
  ReturnNull,
}

/// One allocator instance: an `OsBackend`, its two block lists, and the
/// pre-allocation flag (§3).
pub struct AllocatorContext<B: OsBackend> {
  backend: B,
  heap_head: *mut BlockHeader,
  mapped_head: *mut BlockHeader,
  heap_initialised: bool,
  oom_policy: OomPolicy,
}

impl<B: OsBackend> AllocatorContext<B> {
  pub fn new(backend: B, oom_policy: OomPolicy) -> Self {
    Self {
      backend,
      heap_head: std::ptr::null_mut(),
      mapped_head: std::ptr::null_mut(),
      heap_initialised: false,
      oom_policy,
    }
  }

  fn on_os_error(&self, err: OsError) -> *mut u8 {
    match self.oom_policy {
      OomPolicy::Abort => {
        eprintln!("allocator: fatal OS failure: {err}");
        std::process::abort();
      }
      OomPolicy::ReturnNull => std::ptr::null_mut(),
    }
  }

  /// Routing (§4.4): serves `n` bytes from the mapped registry if
  /// `n + H >= threshold`, otherwise from the heap arena.
  fn route_alloc(
    &mut self,
    n: usize,
    threshold: usize,
    preinit_ceiling: usize,
  ) -> Result<*mut BlockHeader, OsError> {
    if n + H >= threshold {
      mapped::map_alloc(&mut self.backend, &mut self.mapped_head, n)
    } else {
      heap::heap_alloc(&mut self.backend, &mut self.heap_head, &mut self.heap_initialised, n, preinit_ceiling, THRESHOLD)
    }
  }

  /// §4.5.1.
  pub fn allocate(&mut self, size: isize) -> *mut u8 {
    if size <= 0 {
      return std::ptr::null_mut();
    }

    let n = align_up(size as usize, ALIGNMENT);

    match self.route_alloc(n, THRESHOLD, THRESHOLD) {
      Ok(header) => unsafe { BlockHeader::payload_ptr(header) },
      Err(e) => self.on_os_error(e),
    }
  }

  /// §4.5.2.
  pub fn zero_allocate(&mut self, count: isize, elem: isize) -> *mut u8 {
    if count <= 0 || elem <= 0 {
      return std::ptr::null_mut();
    }

    let raw_size = count as usize * elem as usize;
    let n = align_up(raw_size, ALIGNMENT);
    let page_size = self.backend.page_size();

    match self.route_alloc(n, page_size, page_size) {
      Ok(header) => unsafe {
        let payload = BlockHeader::payload_ptr(header);
        std::ptr::write_bytes(payload, 0, raw_size);
        payload
      },
      Err(e) => self.on_os_error(e),
    }
  }

  /// §4.5.3.
  pub fn free(&mut self, payload: *mut u8) {
    if payload.is_null() {
      return;
    }

    unsafe {
      let header = BlockHeader::header_of(payload);

      match (*header).status {
        BlockStatus::Alloc => (*header).status = BlockStatus::Free,
        BlockStatus::Mapped => {
          if let Err(e) = mapped::remove_from_mapped(&mut self.backend, &mut self.mapped_head, header) {
            self.on_os_error(e);
          }
        }
        BlockStatus::Free => {
          // Double free: undefined by the contract. Left as a no-op rather
          // than attempting detection, which is explicitly out of scope.
        }
      }
    }
  }

  /// §4.5.4.
  pub fn reallocate(&mut self, payload: *mut u8, new_size: isize) -> *mut u8 {
    if payload.is_null() {
      return self.allocate(new_size);
    }

    if new_size == 0 {
      self.free(payload);
      return std::ptr::null_mut();
    }

    unsafe {
      let header = BlockHeader::header_of(payload);

      if (*header).status == BlockStatus::Free {
        return std::ptr::null_mut();
      }

      let n = align_up(new_size as usize, ALIGNMENT);

      if (*header).size == n {
        return payload;
      }

      if n + H >= THRESHOLD || (*header).status == BlockStatus::Mapped {
        return self.realloc_via_copy(payload, header, n, new_size);
      }

      if n <= (*header).size {
        heap::split(header, n);
        return payload;
      }

      // Growing, still below the mapping threshold. `next.is_null()` is
      // treated as "is the heap list's tail" (§9 open question 1).
      if (*header).next.is_null() {
        let delta = n - (*header).size;
        match self.backend.extend_break(delta) {
          Ok(_) => (*header).size = n,
          Err(e) => return self.on_os_error(e),
        }
      } else {
        heap::coalesce_forward_from(header, n);
      }

      if (*header).size >= n {
        heap::split(header, n);
        return payload;
      }

      self.realloc_via_copy(payload, header, n, new_size)
    }
  }

  unsafe fn realloc_via_copy(
    &mut self,
    payload: *mut u8,
    header: *mut BlockHeader,
    n: usize,
    new_size: isize,
  ) -> *mut u8 {
    unsafe {
      let old_size = (*header).size;
      let new_payload = self.allocate(new_size);

      if new_payload.is_null() {
        return std::ptr::null_mut();
      }

      let copy_len = old_size.min(n);
      std::ptr::copy_nonoverlapping(payload, new_payload, copy_len);
      self.free(payload);

      new_payload
    }
  }

  /// Test/diagnostic helper: `(size, status)` for every heap-list block in
  /// address order.
  pub fn heap_snapshot(&self) -> Vec<(usize, BlockStatus)> {
    let mut out = Vec::new();
    let mut current = self.heap_head;
    unsafe {
      while !current.is_null() {
        out.push(((*current).size, (*current).status));
        current = (*current).next;
      }
    }
    out
  }

  /// Test/diagnostic helper: payload size of every live mapped block.
  pub fn mapped_snapshot(&self) -> Vec<usize> {
    let mut out = Vec::new();
    let mut current = self.mapped_head;
    unsafe {
      while !current.is_null() {
        out.push((*current).size);
        current = (*current).next;
      }
    }
    out
  }

  /// Asserts the quantified invariants of §3/§8 across both lists. Panics
  /// on violation; intended for test use.
  #[cfg(test)]
  fn assert_invariants(&self) {
    unsafe {
      let mut current = self.heap_head;
      let mut prev_was_free = false;

      while !current.is_null() {
        assert_eq!((*current).size % ALIGNMENT, 0, "block size must be A-aligned");
        assert!((*current).size >= ALIGNMENT, "block size must be >= A");

        let is_free = (*current).status == BlockStatus::Free;
        assert!(!(prev_was_free && is_free), "adjacent heap blocks must not both be FREE");
        prev_was_free = is_free;

        if !(*current).next.is_null() {
          let next = (*current).next;
          let expected_next_addr = BlockHeader::successor_addr(current, (*current).size);
          assert_eq!(next as *mut u8, expected_next_addr, "heap blocks must be address-contiguous");
        }

        current = (*current).next;
      }

      assert_eq!(self.heap_head.is_null(), !self.heap_initialised, "heap list non-empty iff initialised");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::os::MockBackend;

  const PAGE: usize = 4096;

  fn ctx() -> AllocatorContext<MockBackend> {
    AllocatorContext::new(MockBackend::with_capacity(4 * THRESHOLD, PAGE), OomPolicy::ReturnNull)
  }

  #[test]
  fn allocate_zero_or_negative_returns_null_and_allocates_nothing() {
    let mut c = ctx();
    assert!(c.allocate(0).is_null());
    assert!(c.allocate(-1).is_null());
    assert!(c.heap_snapshot().is_empty());
  }

  #[test]
  fn scenario_1_first_allocate_preallocates_and_splits() {
    let mut c = ctx();
    let p = c.allocate(100);
    assert!(!p.is_null());

    let snapshot = c.heap_snapshot();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot[0], (104, BlockStatus::Alloc));
    assert_eq!(snapshot[1].0, THRESHOLD - H - 104 - H);
    assert_eq!(snapshot[1].1, BlockStatus::Free);

    c.assert_invariants();
  }

  #[test]
  fn scenario_2_best_fit_reuses_freed_slot_without_splitting() {
    let mut c = ctx();
    let p = c.allocate(100);
    let _q = c.allocate(200);
    c.free(p);
    let r = c.allocate(96);

    assert_eq!(r, p);
    c.assert_invariants();
  }

  #[test]
  fn scenario_3_free_then_smaller_allocate_reuses_slot() {
    let mut c = ctx();
    let p = c.allocate(100);
    c.free(p);
    let q = c.allocate(50);

    assert_eq!(q, p);
    c.assert_invariants();
  }

  #[test]
  fn scenario_4_large_zero_allocate_is_mapped_and_zeroed() {
    let mut c = ctx();
    let p = c.zero_allocate(1, 200_000);
    assert!(!p.is_null());

    unsafe {
      let slice = std::slice::from_raw_parts(p, 200_000);
      assert!(slice.iter().all(|&b| b == 0));
    }

    assert_eq!(c.mapped_snapshot().len(), 1);
    c.free(p);
    assert!(c.mapped_snapshot().is_empty());
  }

  #[test]
  fn scenario_5_shrink_via_realloc_keeps_pointer_and_splits() {
    let mut c = ctx();
    let p = c.allocate(100);
    // slack = 104 - 40 = 64, comfortably over H + A (40): splits.
    let q = c.reallocate(p, 40);

    assert_eq!(q, p);
    let snapshot = c.heap_snapshot();
    assert_eq!(snapshot[0], (40, BlockStatus::Alloc));
    assert_eq!(snapshot[1].1, BlockStatus::Free);
    c.assert_invariants();
  }

  #[test]
  fn shrink_via_realloc_with_small_slack_is_handed_out_whole() {
    let mut c = ctx();
    let p = c.allocate(100);
    // slack = 104 - 80 = 24, at most H + A (40): no split, original size kept.
    let q = c.reallocate(p, 80);

    assert_eq!(q, p);
    assert_eq!(c.heap_snapshot()[0], (104, BlockStatus::Alloc));
    c.assert_invariants();
  }

  #[test]
  fn scenario_6_growing_realloc_absorbs_freed_forward_neighbour() {
    let mut c = ctx();
    let p = c.allocate(100);
    let q = c.allocate(200);
    c.free(q);
    let r = c.reallocate(p, 240);

    assert_eq!(r, p);
    let snapshot = c.heap_snapshot();
    assert_eq!(snapshot[0], (240, BlockStatus::Alloc));
    c.assert_invariants();
  }

  #[test]
  fn scenario_7_realloc_past_threshold_moves_to_mapped_and_preserves_contents() {
    let mut c = ctx();
    let p = c.allocate(100);
    unsafe {
      std::ptr::write_bytes(p, 0xAB, 100);
    }

    let q = c.reallocate(p, 200_000);
    assert_ne!(q, p);

    unsafe {
      let slice = std::slice::from_raw_parts(q, 100);
      assert!(slice.iter().all(|&b| b == 0xAB));
    }

    assert_eq!(c.mapped_snapshot().len(), 1);
  }

  #[test]
  fn reallocate_null_behaves_as_allocate() {
    let mut c = ctx();
    let p = c.reallocate(std::ptr::null_mut(), 64);
    assert!(!p.is_null());
  }

  #[test]
  fn reallocate_to_zero_behaves_as_free() {
    let mut c = ctx();
    let p = c.allocate(64);
    let q = c.reallocate(p, 0);

    assert!(q.is_null());
    assert_eq!(c.heap_snapshot()[0].1, BlockStatus::Free);
  }

  #[test]
  fn reallocate_same_aligned_size_is_a_no_op() {
    let mut c = ctx();
    let p = c.allocate(100);
    let before = c.heap_snapshot();
    let q = c.reallocate(p, 100);

    assert_eq!(q, p);
    assert_eq!(c.heap_snapshot(), before);
  }

  #[test]
  fn reallocate_of_a_free_block_is_invalid() {
    let mut c = ctx();
    let p = c.allocate(64);
    c.free(p);

    assert!(c.reallocate(p, 128).is_null());
  }

  #[test]
  fn free_of_null_is_a_no_op() {
    let mut c = ctx();
    c.free(std::ptr::null_mut());
  }

  #[test]
  fn exact_threshold_boundary_routes_to_mapped() {
    let mut c = ctx();
    // align_up(n) + H == THRESHOLD exactly triggers the mapping path.
    let n = THRESHOLD - H;
    let p = c.allocate(n as isize);

    assert!(!p.is_null());
    assert_eq!(c.mapped_snapshot().len(), 1);
    assert!(c.heap_snapshot().is_empty());
  }

  #[test]
  fn oom_policy_return_null_propagates_backend_failure() {
    // Primes the backend to fail the very first break extension, i.e. the
    // first-time pre-allocation itself.
    let mut backend = MockBackend::with_capacity(4 * THRESHOLD, PAGE);
    backend.fail_next_extend();
    let mut c = AllocatorContext::new(backend, OomPolicy::ReturnNull);

    assert!(c.allocate(64).is_null());
  }
}
