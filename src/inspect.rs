//! Read-only views of an arena: block walk, totals, invariant check and heap map.
//!
//! Nothing here mutates the arena.

use std::{fmt, marker::PhantomData, ptr};

use crate::{
  arena::Arena,
  block::{self, Block, HEADER_SIZE},
  error::{AllocError, AllocResult},
  fit::Placement,
  heap::HeapSource,
};

/// Snapshot of one block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  pub address: *mut u8,
  pub payload: *mut u8,
  pub prev: *mut u8,
  pub next: *mut u8,
  pub capacity: usize,
  pub size: usize,
}

impl BlockInfo {
  unsafe fn read(block: *mut Block) -> Self {
    unsafe {
      Self {
        address: block as *mut u8,
        payload: block::payload(block),
        prev: (*block).prev as *mut u8,
        next: (*block).next as *mut u8,
        capacity: (*block).capacity,
        size: (*block).size,
      }
    }
  }

  pub fn is_free(&self) -> bool {
    self.size == 0
  }

  pub fn slack(&self) -> usize {
    self.capacity - self.size
  }

  /// Header plus capacity.
  pub fn block_size(&self) -> usize {
    self.capacity + HEADER_SIZE
  }
}

/// Blocks in address order, head to tail.
pub struct Blocks<'a> {
  current: *mut Block,
  _arena: PhantomData<&'a ()>,
}

impl Iterator for Blocks<'_> {
  type Item = BlockInfo;

  fn next(&mut self) -> Option<BlockInfo> {
    if self.current.is_null() {
      return None;
    }

    let info = unsafe { BlockInfo::read(self.current) };
    self.current = info.next as *mut Block;
    Some(info)
  }
}

/// Aggregate totals over every block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArenaStats {
  pub used_blocks: usize,
  pub free_blocks: usize,
  /// Headers plus capacities; equals the arena span.
  pub block_bytes: usize,
  pub capacity_bytes: usize,
  pub user_bytes: usize,
  pub slack_bytes: usize,
}

impl<H: HeapSource> Arena<H> {
  pub fn blocks(&self) -> Blocks<'_> {
    Blocks {
      current: self.head(),
      _arena: PhantomData,
    }
  }

  pub fn stats(&self) -> ArenaStats {
    self.blocks().fold(ArenaStats::default(), |mut stats, info| {
      if info.is_free() {
        stats.free_blocks += 1;
      } else {
        stats.used_blocks += 1;
      }
      stats.block_bytes += info.block_size();
      stats.capacity_bytes += info.capacity;
      stats.user_bytes += info.size;
      stats.slack_bytes += info.slack();
      stats
    })
  }

  /// Checks every block list invariant, reporting the first one that fails.
  pub fn verify(&self) -> AllocResult<()> {
    let corrupted = |index: usize, reason: String| AllocError::Corrupted { index, reason };

    let low = self.low_water_mark();
    let high = self.high_water_mark();
    let empty = self.head().is_null();

    if empty != low.is_null() || empty != high.is_null() || empty != self.tail().is_null() {
      return Err(corrupted(0, "water marks disagree with the block list".into()));
    }

    let cursor = self.cursor() as *mut u8;
    let mut cursor_seen = cursor.is_null();
    let mut expected = low;
    let mut previous: Option<BlockInfo> = None;
    let mut index = 0;

    for info in self.blocks() {
      if info.address != expected {
        return Err(corrupted(
          index,
          format!("starts at {:?}, expected {expected:?}", info.address),
        ));
      }
      if info.capacity < info.size {
        return Err(corrupted(
          index,
          format!("size {} exceeds capacity {}", info.size, info.capacity),
        ));
      }

      let prev = previous.map_or(ptr::null_mut(), |p| p.address);
      if info.prev != prev {
        return Err(corrupted(index, "prev link does not match the walk".into()));
      }
      if previous.is_some_and(|p| p.is_free()) && info.is_free() {
        return Err(corrupted(index, "adjacent free blocks were not coalesced".into()));
      }

      cursor_seen |= info.address == cursor;
      expected = expected.wrapping_add(info.block_size());
      previous = Some(info);
      index += 1;
    }

    if expected != high {
      return Err(corrupted(
        index,
        format!("blocks end at {expected:?}, high water mark is {high:?}"),
      ));
    }
    if previous.map_or(ptr::null_mut(), |p| p.address) != self.tail() as *mut u8 {
      return Err(corrupted(index, "tail is not the last block".into()));
    }
    if !cursor_seen {
      return Err(corrupted(index, "next-fit cursor is not in the list".into()));
    }

    Ok(())
  }

  /// The heap map report, with addresses shown as offsets from `base`.
  pub fn heap_map(
    &self,
    base: *const u8,
  ) -> HeapMap<'_, H> {
    HeapMap {
      arena: self,
      base: base as usize,
    }
  }
}

/// Human-readable listing of every block followed by totals.
pub struct HeapMap<'a, H: HeapSource> {
  arena: &'a Arena<H>,
  base: usize,
}

impl<H: HeapSource> HeapMap<'_, H> {
  fn offset(
    &self,
    addr: *const u8,
  ) -> usize {
    if addr.is_null() {
      0
    } else {
      (addr as usize).wrapping_sub(self.base)
    }
  }
}

impl<H: HeapSource> fmt::Display for HeapMap<'_, H> {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    let arena = self.arena;
    let marks_cursor = arena.placement() == Placement::NextFit;
    let cursor = arena.cursor() as *mut u8;

    writeln!(f, "Heap map")?;
    writeln!(
      f,
      "  {:<8}{:<12}{:<12}{:<12}{:<12}{:>10}{:>10}{:>10}{:>10}  status",
      "blk no", "block add", "next add", "prev add", "data add", "blk size", "capacity", "size", "excess",
    )?;

    for (index, info) in arena.blocks().enumerate() {
      write!(
        f,
        "  {:<8}{:<#12x}{:<#12x}{:<#12x}{:<#12x}{:>10}{:>10}{:>10}{:>10}  {}",
        index,
        self.offset(info.address),
        self.offset(info.next),
        self.offset(info.prev),
        self.offset(info.payload),
        info.block_size(),
        info.capacity,
        info.size,
        info.slack(),
        if info.is_free() { "free   *" } else { "in use  " },
      )?;
      if marks_cursor && info.address == cursor {
        write!(f, " <")?;
      }
      writeln!(f)?;
    }

    let stats = arena.stats();
    writeln!(
      f,
      "  {:<56}{:>10}{:>10}{:>10}{:>10}",
      "Total bytes used", stats.block_bytes, stats.capacity_bytes, stats.user_bytes, stats.slack_bytes,
    )?;
    writeln!(
      f,
      "  Used blocks: {:4}  Free blocks: {:4}  Min heap: {:#09x}  Max heap: {:#09x}  Total bytes: {}  Block size: {} bytes",
      stats.used_blocks,
      stats.free_blocks,
      self.offset(arena.low_water_mark()),
      self.offset(arena.high_water_mark()),
      arena.high_water_mark() as usize - arena.low_water_mark() as usize,
      HEADER_SIZE,
    )
  }
}
