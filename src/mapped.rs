//! Mapped-region registry: each block occupies its own OS mapping, with no
//! coalescing, splitting, or reuse (§4.3).

use crate::block::{BlockHeader, BlockStatus, H};
use crate::os::{OsBackend, OsError};

fn find_last(head: *mut BlockHeader) -> *mut BlockHeader {
  let mut current = head;
  unsafe {
    while !(*current).next.is_null() {
      current = (*current).next;
    }
  }
  current
}

/// Obtains an anonymous region of `n + H` bytes, writes a MAPPED header into
/// its prefix, and appends it to the tail of the mapped list.
pub fn map_alloc<B: OsBackend>(
  backend: &mut B,
  head: &mut *mut BlockHeader,
  n: usize,
) -> Result<*mut BlockHeader, OsError> {
  let raw = backend.map(n + H)?;

  unsafe {
    let tail = if head.is_null() { std::ptr::null_mut() } else { find_last(*head) };
    let block = BlockHeader::init(raw, n, BlockStatus::Mapped, tail, std::ptr::null_mut());

    if tail.is_null() {
      *head = block;
    } else {
      (*tail).next = block;
    }

    Ok(block)
  }
}

/// Unlinks `block` from the mapped list (head, interior, or tail) and
/// unmaps its region.
///
/// # Safety
///
/// `block` must currently be linked into the list rooted at `*head`.
pub unsafe fn remove_from_mapped<B: OsBackend>(
  backend: &mut B,
  head: &mut *mut BlockHeader,
  block: *mut BlockHeader,
) -> Result<(), OsError> {
  unsafe {
    let prev = (*block).prev;
    let next = (*block).next;

    if block == *head {
      *head = next;
    } else if !prev.is_null() {
      (*prev).next = next;
    }

    if !next.is_null() {
      (*next).prev = prev;
    }

    let size = (*block).size;
    backend.unmap(block as *mut u8, size + H)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::os::MockBackend;

  #[test]
  fn map_alloc_links_successive_blocks_at_the_tail() {
    let mut backend = MockBackend::with_capacity(4096, 4096);
    let mut head: *mut BlockHeader = std::ptr::null_mut();

    let first = map_alloc(&mut backend, &mut head, 64).unwrap();
    let second = map_alloc(&mut backend, &mut head, 128).unwrap();

    unsafe {
      assert_eq!(head, first);
      assert_eq!((*first).next, second);
      assert_eq!((*second).prev, first);
      assert!((*second).next.is_null());
    }
  }

  #[test]
  fn remove_from_mapped_head_reseats_the_list_head() {
    let mut backend = MockBackend::with_capacity(4096, 4096);
    let mut head: *mut BlockHeader = std::ptr::null_mut();

    let first = map_alloc(&mut backend, &mut head, 64).unwrap();
    let second = map_alloc(&mut backend, &mut head, 64).unwrap();

    unsafe {
      remove_from_mapped(&mut backend, &mut head, first).unwrap();
    }

    assert_eq!(head, second);
    assert_eq!(backend.live_mapping_count(), 1);
  }

  #[test]
  fn remove_from_mapped_interior_block_relinks_neighbours() {
    let mut backend = MockBackend::with_capacity(4096, 4096);
    let mut head: *mut BlockHeader = std::ptr::null_mut();

    let first = map_alloc(&mut backend, &mut head, 64).unwrap();
    let second = map_alloc(&mut backend, &mut head, 64).unwrap();
    let third = map_alloc(&mut backend, &mut head, 64).unwrap();

    unsafe {
      remove_from_mapped(&mut backend, &mut head, second).unwrap();

      assert_eq!((*first).next, third);
      assert_eq!((*third).prev, first);
    }
    assert_eq!(backend.live_mapping_count(), 2);
  }

  #[test]
  fn remove_from_mapped_unmaps_the_underlying_region() {
    let mut backend = MockBackend::with_capacity(4096, 4096);
    let mut head: *mut BlockHeader = std::ptr::null_mut();

    let block = map_alloc(&mut backend, &mut head, 64).unwrap();
    assert_eq!(backend.live_mapping_count(), 1);

    unsafe {
      remove_from_mapped(&mut backend, &mut head, block).unwrap();
    }

    assert_eq!(backend.live_mapping_count(), 0);
    assert!(head.is_null());
  }
}
