use std::{
  ffi::CStr,
  fmt,
  io::{self, Write},
  ptr::{self, NonNull},
};

use tracing::{debug, trace, warn};

use crate::{
  align,
  block::{self, Block, HEADER_SIZE},
  config::ArenaConfig,
  error::{AllocError, AllocResult},
  fit::{self, Fit, Placement},
  heap::{HeapSource, ProgramBreak},
};

/// Growth chunk used until [`Arena::set_min_growth`] says otherwise.
pub const DEFAULT_MIN_GROWTH: usize = 2048;

/// Floor applied when a silly-small growth chunk is configured.
pub const SILLY_MIN_GROWTH: usize = 128;

/// A single growable arena carved into address-ordered blocks.
///
/// Every byte between the water marks belongs to exactly one block. Blocks are
/// created by growth or by splitting an in-use block's unused tail, and are
/// destroyed only by coalescing or by [`reset`](Arena::reset).
///
/// The arena is single-threaded: it holds raw pointers into its heap and is
/// neither `Send` nor `Sync`.
pub struct Arena<H: HeapSource = ProgramBreak> {
  heap: H,
  head: *mut Block,
  tail: *mut Block,
  low_water_mark: *mut u8,
  high_water_mark: *mut u8,
  // Block that satisfied the previous request; next fit resumes after it.
  prev_fit: *mut Block,
  min_growth: usize,
  placement: Placement,
  verbose: bool,
  sink: Box<dyn Write>,
}

impl Arena<ProgramBreak> {
  /// An arena on the process program break.
  pub fn new() -> Self {
    Self::with_heap(ProgramBreak::new())
  }
}

impl Default for Arena<ProgramBreak> {
  fn default() -> Self {
    Self::new()
  }
}

impl<H: HeapSource> Arena<H> {
  pub fn with_heap(heap: H) -> Self {
    Self {
      heap,
      head: ptr::null_mut(),
      tail: ptr::null_mut(),
      low_water_mark: ptr::null_mut(),
      high_water_mark: ptr::null_mut(),
      prev_fit: ptr::null_mut(),
      min_growth: DEFAULT_MIN_GROWTH,
      placement: Placement::FirstFit,
      verbose: false,
      sink: Box::new(io::stderr()),
    }
  }

  pub fn with_config(
    heap: H,
    config: &ArenaConfig,
  ) -> Self {
    let mut arena = Self::with_heap(heap);
    arena.configure(config);
    arena
  }

  /// Applies every setting in `config` through its setter, so verbose
  /// notes reach the current diagnostic sink.
  pub fn configure(
    &mut self,
    config: &ArenaConfig,
  ) {
    self.set_min_growth(config.min_growth);
    self.set_verbose(config.verbose);
    self.set_placement(config.placement);
  }

  // ---------------------------------------------------------------------------
  // Configuration
  // ---------------------------------------------------------------------------

  /// Sets the minimum growth chunk and returns the value now in effect.
  ///
  /// `0` leaves the setting alone. Values smaller than two headers are raised
  /// to a safe floor, and every value is rounded up to the word size.
  pub fn set_min_growth(
    &mut self,
    size: usize,
  ) -> usize {
    if size == 0 {
      return self.min_growth;
    }

    let size = if size < 2 * HEADER_SIZE {
      (2 * HEADER_SIZE).max(SILLY_MIN_GROWTH)
    } else {
      size
    };

    self.min_growth = align::checked_align(size).unwrap_or(size & !(align::WORD - 1));
    self.min_growth
  }

  pub fn set_placement(
    &mut self,
    placement: Placement,
  ) {
    self.placement = placement;
    self.note(format_args!("** {placement} selected"));
  }

  pub fn set_verbose(
    &mut self,
    verbose: bool,
  ) {
    self.verbose = verbose;
    self.note(format_args!("Verbose enabled"));
  }

  /// Where verbose diagnostics and heap maps are written. Defaults to stderr.
  ///
  /// The sink must not call back into this arena.
  pub fn set_diagnostic_sink(
    &mut self,
    sink: Box<dyn Write>,
  ) {
    self.sink = sink;
  }

  pub fn min_growth(&self) -> usize {
    self.min_growth
  }

  pub fn placement(&self) -> Placement {
    self.placement
  }

  pub fn is_verbose(&self) -> bool {
    self.verbose
  }

  pub fn heap(&self) -> &H {
    &self.heap
  }

  pub fn low_water_mark(&self) -> *mut u8 {
    self.low_water_mark
  }

  pub fn high_water_mark(&self) -> *mut u8 {
    self.high_water_mark
  }

  pub(crate) fn head(&self) -> *mut Block {
    self.head
  }

  pub(crate) fn tail(&self) -> *mut Block {
    self.tail
  }

  pub(crate) fn cursor(&self) -> *mut Block {
    self.prev_fit
  }

  // ---------------------------------------------------------------------------
  // Allocation
  // ---------------------------------------------------------------------------

  /// Hands out at least `size` bytes, or `None` for a zero-size request or a
  /// failure (which is logged).
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Option<NonNull<u8>> {
    self.try_allocate(size).unwrap_or_else(|err| {
      warn!(size, error = %err, "allocation failed");
      None
    })
  }

  pub fn try_allocate(
    &mut self,
    size: usize,
  ) -> AllocResult<Option<NonNull<u8>>> {
    trace!(size, placement = ?self.placement, "allocate");
    if size == 0 {
      return Ok(None);
    }

    let block = unsafe {
      match fit::find(self.placement, self.head, self.prev_fit, size) {
        Some(Fit::Reuse(block)) => {
          (*block).size = size;
          block
        }
        Some(Fit::Carve(block)) => self.split(block, size),
        None => self.grow(size)?,
      }
    };

    if self.placement == Placement::NextFit {
      self.prev_fit = block;
    }

    Ok(NonNull::new(unsafe { block::payload(block) }))
  }

  /// Allocates `count * elem_size` zeroed bytes.
  pub fn zeroed_allocate(
    &mut self,
    count: usize,
    elem_size: usize,
  ) -> Option<NonNull<u8>> {
    self.try_zeroed_allocate(count, elem_size).unwrap_or_else(|err| {
      warn!(count, elem_size, error = %err, "zeroed allocation failed");
      None
    })
  }

  pub fn try_zeroed_allocate(
    &mut self,
    count: usize,
    elem_size: usize,
  ) -> AllocResult<Option<NonNull<u8>>> {
    trace!(count, elem_size, "zeroed_allocate");
    let total = count
      .checked_mul(elem_size)
      .ok_or(AllocError::Overflow { count, elem_size })?;

    let data = self.try_allocate(total)?;
    if let Some(data) = data {
      unsafe { ptr::write_bytes(data.as_ptr(), 0, total) };
    }

    Ok(data)
  }

  /// Copies a C string, terminator included, into a fresh allocation.
  pub fn duplicate(
    &mut self,
    source: Option<&CStr>,
  ) -> Option<NonNull<u8>> {
    self.try_duplicate(source).unwrap_or_else(|err| {
      warn!(error = %err, "string duplication failed");
      None
    })
  }

  pub fn try_duplicate(
    &mut self,
    source: Option<&CStr>,
  ) -> AllocResult<Option<NonNull<u8>>> {
    let Some(source) = source else {
      return Ok(None);
    };

    let bytes = source.to_bytes_with_nul();
    trace!(len = bytes.len(), "duplicate");

    let data = self.try_allocate(bytes.len())?;
    if let Some(data) = data {
      unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), data.as_ptr(), bytes.len()) };
    }

    Ok(data)
  }

  // ---------------------------------------------------------------------------
  // Release and resize
  // ---------------------------------------------------------------------------

  /// Returns a block to the arena and merges it with free neighbours.
  ///
  /// Null is ignored, and so is a block that is already free.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a pointer returned by this arena since its last
  /// reset.
  pub unsafe fn free(
    &mut self,
    ptr: *mut u8,
  ) {
    if ptr.is_null() {
      return;
    }
    if !self.owns(ptr) {
      warn!(ptr = ?ptr, "free of a pointer outside the arena ignored");
      return;
    }

    unsafe {
      let block = block::from_payload(ptr);

      if (*block).is_free() {
        let offset = ptr as usize - self.low_water_mark as usize;
        self.note(format_args!("Block is already free: ptr = {offset:#09x}"));
        return;
      }

      trace!(ptr = ?ptr, size = (*block).size, "free");
      (*block).size = 0;

      let next = (*block).next;
      if !next.is_null() && (*next).is_free() {
        self.absorb_next(block);
      }

      let prev = (*block).prev;
      if !prev.is_null() && (*prev).is_free() {
        self.absorb_next(prev);
      }
    }
  }

  /// Changes the size of an allocation, in place when its capacity allows.
  ///
  /// Null behaves as [`allocate`](Arena::allocate); a zero size frees `ptr`.
  /// A pointer outside the arena is ignored, like in [`free`](Arena::free).
  /// On relocation the live bytes are copied and the old block is freed. On
  /// failure `ptr` is left untouched and `None` is returned.
  ///
  /// # Safety
  ///
  /// Same contract as [`free`](Arena::free).
  pub unsafe fn resize(
    &mut self,
    ptr: *mut u8,
    size: usize,
  ) -> Option<NonNull<u8>> {
    unsafe { self.try_resize(ptr, size) }.unwrap_or_else(|err| {
      warn!(size, error = %err, "resize failed");
      None
    })
  }

  /// # Safety
  ///
  /// Same contract as [`free`](Arena::free).
  pub unsafe fn try_resize(
    &mut self,
    ptr: *mut u8,
    size: usize,
  ) -> AllocResult<Option<NonNull<u8>>> {
    if ptr.is_null() {
      return self.try_allocate(size);
    }
    if size == 0 {
      unsafe { self.free(ptr) };
      return Ok(None);
    }
    if !self.owns(ptr) {
      warn!(ptr = ?ptr, "resize of a pointer outside the arena ignored");
      return Ok(None);
    }

    unsafe {
      let block = block::from_payload(ptr);
      trace!(ptr = ?ptr, from = (*block).size, to = size, "resize");

      if (*block).capacity >= size {
        (*block).size = size;
        return Ok(NonNull::new(ptr));
      }

      let live = (*block).size.min(size);
      let Some(moved) = self.try_allocate(size)? else {
        return Ok(None);
      };

      ptr::copy_nonoverlapping(ptr, moved.as_ptr(), live);
      self.free(ptr);

      Ok(Some(moved))
    }
  }

  // ---------------------------------------------------------------------------
  // Reset
  // ---------------------------------------------------------------------------

  /// Gives the whole arena back to the heap source and forgets every block.
  ///
  /// Failures are logged; the arena is emptied either way.
  pub fn reset(&mut self) {
    if let Err(err) = self.try_reset() {
      warn!(error = %err, "arena memory was not returned");
    }
  }

  pub fn try_reset(&mut self) -> AllocResult<()> {
    trace!("reset");
    let Some(low) = NonNull::new(self.low_water_mark) else {
      return Ok(());
    };

    self.note(format_args!("*** Resetting all arena space ***"));
    let released = self.heap.shrink_to(low);
    debug!(
      bytes = self.high_water_mark as usize - low.as_ptr() as usize,
      released = released.is_ok(),
      "arena reset"
    );

    self.head = ptr::null_mut();
    self.tail = ptr::null_mut();
    self.low_water_mark = ptr::null_mut();
    self.high_water_mark = ptr::null_mut();
    self.prev_fit = ptr::null_mut();

    released
  }

  // ---------------------------------------------------------------------------
  // Reporting
  // ---------------------------------------------------------------------------

  /// Writes the heap map, offsets relative to `base`, to the diagnostic sink.
  pub fn dump_heap_map(
    &mut self,
    base: *const u8,
  ) {
    let map = self.heap_map(base).to_string();
    let _ = self.sink.write_all(map.as_bytes());
    let _ = self.sink.flush();
  }

  // ---------------------------------------------------------------------------
  // Internals
  // ---------------------------------------------------------------------------

  fn owns(
    &self,
    ptr: *mut u8,
  ) -> bool {
    let addr = ptr as usize;
    addr >= self.low_water_mark as usize + HEADER_SIZE && addr < self.high_water_mark as usize
  }

  fn note(
    &mut self,
    message: fmt::Arguments<'_>,
  ) {
    if self.verbose {
      let _ = writeln!(self.sink, "{message}");
    }
  }

  /// Extends the heap and appends one block holding `size` bytes.
  fn grow(
    &mut self,
    size: usize,
  ) -> AllocResult<*mut Block> {
    let min = self.min_growth;
    let amount = size
      .checked_add(HEADER_SIZE)
      .and_then(|needed| (needed / min).checked_add(1))
      .and_then(|chunks| chunks.checked_mul(min))
      .ok_or(AllocError::Exhausted { requested: size })?;

    let start = self.heap.grow(amount)?.as_ptr();
    if !self.high_water_mark.is_null() && start != self.high_water_mark {
      return Err(AllocError::Discontiguous {
        expected: self.high_water_mark as usize,
        found: start as usize,
      });
    }

    unsafe {
      let block = block::write_header(
        start,
        Block::new(amount - HEADER_SIZE, size, self.tail, ptr::null_mut()),
      );

      if self.head.is_null() {
        self.head = block;
        self.low_water_mark = start;
      } else {
        (*self.tail).next = block;
      }
      self.tail = block;
      self.high_water_mark = start.add(amount);

      debug!(size, amount, block = ?block, "arena grown");
      Ok(block)
    }
  }

  /// Turns the unused tail of `block` into a new block holding `size` bytes.
  ///
  /// The source keeps only its word-rounded live bytes.
  unsafe fn split(
    &mut self,
    block: *mut Block,
    size: usize,
  ) -> *mut Block {
    unsafe {
      let used = align!((*block).size);
      let carved = block::write_header(
        block::payload(block).add(used),
        Block::new(
          (*block).capacity - used - HEADER_SIZE,
          size,
          block,
          (*block).next,
        ),
      );

      if (*block).next.is_null() {
        self.tail = carved;
      } else {
        (*(*block).next).prev = carved;
      }
      (*block).next = carved;
      (*block).capacity = used;

      debug!(from = ?block, carved = ?carved, capacity = (*carved).capacity, "block split");
      carved
    }
  }

  /// Merges the block after `block` into it.
  unsafe fn absorb_next(
    &mut self,
    block: *mut Block,
  ) {
    unsafe {
      let next = (*block).next;
      debug_assert_eq!(block::end(block), next as *mut u8, "coalescing non-adjacent blocks");

      (*block).capacity += (*next).capacity + HEADER_SIZE;
      (*block).next = (*next).next;

      if (*next).next.is_null() {
        self.tail = block;
      } else {
        (*(*next).next).prev = block;
      }
      if self.prev_fit == next {
        self.prev_fit = block;
      }

      debug!(into = ?block, absorbed = ?next, capacity = (*block).capacity, "blocks coalesced");
    }
  }
}
