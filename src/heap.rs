//! Heap arena manager: best-fit search, coalescing, splitting, tail
//! expansion and first-time pre-allocation over the program-break region
//! (§4.2).

use crate::align::ALIGNMENT;
use crate::block::{BlockHeader, BlockStatus, H};
use crate::os::{OsBackend, OsError};

/// First-time pre-allocation (§4.2.1): grows the break by `preinit_growth`
/// bytes (always `THRESHOLD`, regardless of which entry point triggered it)
/// in one extension, and carves the whole region into a single ALLOC block
/// of size `max_chunk - H` (`max_chunk` is the entry point's own ceiling:
/// `THRESHOLD` for allocate, the OS page size for zero-allocate).
pub fn preallocate<B: OsBackend>(
  backend: &mut B,
  preinit_growth: usize,
  max_chunk: usize,
) -> Result<*mut BlockHeader, OsError> {
  let raw = backend.extend_break(preinit_growth)?;
  // SAFETY: extend_break guarantees `preinit_growth` writable bytes at
  // `raw`, and `max_chunk - H` never exceeds that since max_chunk <=
  // preinit_growth.
  let block = unsafe {
    BlockHeader::init(raw, max_chunk - H, BlockStatus::Alloc, std::ptr::null_mut(), std::ptr::null_mut())
  };
  Ok(block)
}

/// Best-fit search (§4.2.2): the FREE block of smallest size `>= n`, ties
/// broken by first encountered. Null if none qualifies.
pub fn best_fit(head: *mut BlockHeader, n: usize) -> *mut BlockHeader {
  let mut best: *mut BlockHeader = std::ptr::null_mut();
  let mut current = head;

  unsafe {
    while !current.is_null() {
      if (*current).status == BlockStatus::Free && (*current).size >= n {
        if best.is_null() || (*current).size < (*best).size {
          best = current;
        }
      }
      current = (*current).next;
    }
  }

  best
}

/// Coalescing (§4.2.3): a single forward pass merging every run of adjacent
/// FREE blocks into one.
pub fn coalesce(head: *mut BlockHeader) {
  let mut current = head;

  unsafe {
    while !current.is_null() && !(*current).next.is_null() {
      let next = (*current).next;

      if (*current).status == BlockStatus::Free && (*next).status == BlockStatus::Free {
        (*current).size += (*next).size + H;
        let after = (*next).next;
        (*current).next = after;
        if !after.is_null() {
          (*after).prev = current;
        }
        // keep scanning from `current`: a run of k FREE blocks collapses
        // into one in a single pass.
      } else {
        current = next;
      }
    }
  }
}

/// Splitting (§4.2.4): marks `block` ALLOC and, if the slack over `n` is
/// strictly more than `H + ALIGNMENT`, carves a FREE remainder block after
/// it. Otherwise hands `block` out whole.
///
/// Also used (with the block already ALLOC) by realloc's shrink path.
pub fn split(block: *mut BlockHeader, n: usize) {
  unsafe {
    (*block).status = BlockStatus::Alloc;

    let slack = (*block).size - n;
    if slack <= H + ALIGNMENT {
      return;
    }

    let remainder_addr = BlockHeader::successor_addr(block, n);
    let remainder_size = slack - H;
    let next = (*block).next;

    let remainder = BlockHeader::init(remainder_addr, remainder_size, BlockStatus::Free, block, next);
    if !next.is_null() {
      (*next).prev = remainder;
    }

    (*block).next = remainder;
    (*block).size = n;
  }
}

/// Last block in the heap list, starting the search from `head`.
///
/// # Safety
///
/// `head` must be non-null (the heap must be initialised).
pub fn find_last(head: *mut BlockHeader) -> *mut BlockHeader {
  let mut current = head;
  unsafe {
    while !(*current).next.is_null() {
      current = (*current).next;
    }
  }
  current
}

/// Tail expansion (§4.2.5): grows the break to satisfy `n` when best-fit
/// found nothing, either by extending the FREE tail in place or appending a
/// fresh ALLOC block.
pub fn expand_tail<B: OsBackend>(
  backend: &mut B,
  last: *mut BlockHeader,
  n: usize,
) -> Result<*mut BlockHeader, OsError> {
  unsafe {
    if (*last).status == BlockStatus::Free {
      let delta = n - (*last).size;
      backend.extend_break(delta)?;
      (*last).size = n;
      (*last).status = BlockStatus::Alloc;
      Ok(last)
    } else {
      let raw = backend.extend_break(n + H)?;
      let new_block = BlockHeader::init(raw, n, BlockStatus::Alloc, last, std::ptr::null_mut());
      (*last).next = new_block;
      Ok(new_block)
    }
  }
}

/// Top-level heap allocation (§4.2.6).
pub fn heap_alloc<B: OsBackend>(
  backend: &mut B,
  head: &mut *mut BlockHeader,
  heap_initialised: &mut bool,
  n: usize,
  preinit_ceiling: usize,
  preinit_growth: usize,
) -> Result<*mut BlockHeader, OsError> {
  if !*heap_initialised {
    let block = preallocate(backend, preinit_growth, preinit_ceiling)?;
    *head = block;
    *heap_initialised = true;
    // No best-fit search needed (it's the only block), but it is still
    // carved down to `n` via the ordinary split path.
    split(block, n);
    return Ok(block);
  }

  coalesce(*head);

  let found = best_fit(*head, n);
  if !found.is_null() {
    split(found, n);
    return Ok(found);
  }

  let last = find_last(*head);
  expand_tail(backend, last, n)
}

/// Realloc's forward-absorb loop (§4.5.4, branch 6b): repeatedly merges the
/// forward neighbour into `block` while it is FREE and `block` is still
/// smaller than `n`. The absorbed node's header is destroyed by the merge
/// and never read again, so its status is left untouched.
pub fn coalesce_forward_from(block: *mut BlockHeader, n: usize) {
  unsafe {
    while (*block).size < n && !(*block).next.is_null() && (*(*block).next).status == BlockStatus::Free {
      let next = (*block).next;
      (*block).size += (*next).size + H;
      let after = (*next).next;
      (*block).next = after;
      if !after.is_null() {
        (*after).prev = block;
      }
    }
  }
}
