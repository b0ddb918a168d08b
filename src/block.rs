use std::{mem, ptr};

use crate::align::is_aligned;

/// Header written at the start of every region of the arena.
///
/// The payload follows the header immediately, so a payload pointer and its
/// header are always `HEADER_SIZE` bytes apart. `size == 0` marks a free block.
#[repr(C)]
pub struct Block {
  pub capacity: usize,
  pub size: usize,
  pub prev: *mut Block,
  pub next: *mut Block,
}

pub const HEADER_SIZE: usize = mem::size_of::<Block>();

impl Block {
  pub fn new(
    capacity: usize,
    size: usize,
    prev: *mut Block,
    next: *mut Block,
  ) -> Self {
    Self {
      capacity,
      size,
      prev,
      next,
    }
  }

  #[inline]
  pub fn is_free(&self) -> bool {
    self.size == 0
  }
}

/// Writes a fresh header at `at` and returns it as a block pointer.
///
/// # Safety
///
/// `at` must be word-aligned and valid for `HEADER_SIZE` bytes of writes.
pub unsafe fn write_header(
  at: *mut u8,
  header: Block,
) -> *mut Block {
  debug_assert!(is_aligned(at as usize), "unaligned block header at {at:?}");
  let block = at as *mut Block;
  unsafe { ptr::write(block, header) };
  block
}

/// # Safety
///
/// `block` must point to a header inside the arena.
#[inline]
pub unsafe fn payload(block: *mut Block) -> *mut u8 {
  unsafe { (block as *mut u8).add(HEADER_SIZE) }
}

/// Recovers the header from a payload pointer handed out by the arena.
///
/// # Safety
///
/// `data` must have been returned by [`payload`] for a block of the same arena.
#[inline]
pub unsafe fn from_payload(data: *mut u8) -> *mut Block {
  debug_assert!(is_aligned(data as usize), "payload {data:?} is not word-aligned");
  unsafe { data.sub(HEADER_SIZE) as *mut Block }
}

/// One past the last byte owned by `block`.
///
/// # Safety
///
/// `block` must point to a live header.
#[inline]
pub unsafe fn end(block: *mut Block) -> *mut u8 {
  unsafe { payload(block).add((*block).capacity) }
}
