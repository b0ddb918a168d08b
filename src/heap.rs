use std::{io, mem, ptr, ptr::NonNull};

use libc::{c_void, intptr_t, sbrk};
use tracing::{debug, trace, warn};

use crate::{
  align::checked_align,
  error::{AllocError, AllocResult},
};

/// The primitive an arena grows into: a break that only moves at its end.
///
/// Successive calls to [`grow`](HeapSource::grow) are expected to return
/// adjacent regions. The arena rejects a region that does not start where the
/// previous one ended.
pub trait HeapSource {
  /// Current end of the heap, the equivalent of `sbrk(0)`.
  fn current(&self) -> *mut u8;

  /// Extends the heap by `increment` bytes and returns the start of the new region.
  fn grow(
    &mut self,
    increment: usize,
  ) -> AllocResult<NonNull<u8>>;

  /// Moves the end of the heap back down to `base`, returning everything above it.
  fn shrink_to(
    &mut self,
    base: NonNull<u8>,
  ) -> AllocResult<()>;
}

/// The process data segment, moved with `sbrk(2)`.
///
/// Other code in the process (the system `malloc` included) may move the
/// break as well. Once that is seen between two growths, the current run of
/// growths is tainted: further growth is refused as discontiguous, and the
/// memory is never handed back, since lowering the break would release the
/// other user's memory too. A successful or refused release starts a fresh run.
pub struct ProgramBreak {
  end: *mut u8,
  tainted: bool,
}

impl ProgramBreak {
  pub fn new() -> Self {
    Self {
      end: ptr::null_mut(),
      tainted: false,
    }
  }

  /// Returns a region obtained by a growth that is not going to be used.
  ///
  /// Only possible while the region still sits at the top of the break.
  unsafe fn give_back(
    start: *mut u8,
    len: usize,
  ) {
    unsafe {
      let on_top = sbrk(0) as usize == start as usize + len;
      if on_top && sbrk(-(len as intptr_t)) != usize::MAX as *mut c_void {
        trace!(len, start = ?start, "rejected region returned");
        return;
      }
    }

    warn!(len, start = ?start, "rejected region stays allocated");
  }
}

impl Default for ProgramBreak {
  fn default() -> Self {
    Self::new()
  }
}

impl HeapSource for ProgramBreak {
  fn current(&self) -> *mut u8 {
    unsafe { sbrk(0) as *mut u8 }
  }

  fn grow(
    &mut self,
    increment: usize,
  ) -> AllocResult<NonNull<u8>> {
    let exhausted = || AllocError::Exhausted {
      requested: increment,
    };

    unsafe {
      let current = sbrk(0) as usize;
      if current == usize::MAX {
        return Err(exhausted());
      }
      if !self.end.is_null() && current != self.end as usize {
        self.tainted = true;
        return Err(AllocError::Discontiguous {
          expected: self.end as usize,
          found: current,
        });
      }

      // The very first break is not guaranteed to be word-aligned.
      let pad = checked_align(current).ok_or_else(exhausted)? - current;
      let total = increment
        .checked_add(pad)
        .filter(|total| *total <= isize::MAX as usize)
        .ok_or_else(exhausted)?;

      let address = sbrk(total as intptr_t);
      if address == usize::MAX as *mut c_void {
        return Err(exhausted());
      }
      if address as usize != current {
        // The break moved between the two calls.
        Self::give_back(address as *mut u8, total);
        self.tainted = true;
        return Err(AllocError::Discontiguous {
          expected: current,
          found: address as usize,
        });
      }

      let start = (address as *mut u8).add(pad);
      self.end = start.add(increment);
      trace!(increment, pad, start = ?start, "program break moved up");

      NonNull::new(start).ok_or_else(exhausted)
    }
  }

  fn shrink_to(
    &mut self,
    base: NonNull<u8>,
  ) -> AllocResult<()> {
    let end = mem::replace(&mut self.end, ptr::null_mut());
    if mem::take(&mut self.tainted) {
      return Err(AllocError::Release {
        reason: "another user moved the program break above the arena".into(),
      });
    }

    unsafe {
      let current = sbrk(0) as *mut u8;
      if current != end {
        return Err(AllocError::Release {
          reason: format!("program break moved to {current:?}, the arena ended at {end:?}"),
        });
      }

      let decrement = (current as usize)
        .checked_sub(base.as_ptr() as usize)
        .filter(|decrement| *decrement <= isize::MAX as usize)
        .ok_or_else(|| AllocError::Release {
          reason: format!("{:?} is above the program break {current:?}", base.as_ptr()),
        })?;

      if sbrk(-(decrement as intptr_t)) == usize::MAX as *mut c_void {
        return Err(AllocError::Release {
          reason: io::Error::last_os_error().to_string(),
        });
      }

      trace!(decrement, "program break moved down");
    }

    Ok(())
  }
}

/// A private span of address space with its own break.
///
/// The whole span is reserved up front with `mmap` and handed out from the
/// bottom, so an arena on top of it behaves exactly as on the program break
/// while staying isolated from everything else in the process. Growth beyond
/// the reservation fails with [`AllocError::Exhausted`].
pub struct MappedHeap {
  base: NonNull<u8>,
  limit: usize,
  brk: usize,
}

impl MappedHeap {
  pub fn reserve(limit: usize) -> AllocResult<Self> {
    let address = unsafe {
      libc::mmap(
        ptr::null_mut(),
        limit,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
        -1,
        0,
      )
    };

    if address == libc::MAP_FAILED {
      return Err(AllocError::Reserve {
        bytes: limit,
        source: io::Error::last_os_error(),
      });
    }

    let base = NonNull::new(address as *mut u8).ok_or_else(|| AllocError::Reserve {
      bytes: limit,
      source: io::Error::other("mmap returned a null mapping"),
    })?;
    debug!(limit, base = ?base, "reserved private heap");

    Ok(Self {
      base,
      limit,
      brk: 0,
    })
  }

  pub fn base(&self) -> *mut u8 {
    self.base.as_ptr()
  }

  pub fn limit(&self) -> usize {
    self.limit
  }

  /// Bytes currently below the break.
  pub fn used(&self) -> usize {
    self.brk
  }
}

impl HeapSource for MappedHeap {
  fn current(&self) -> *mut u8 {
    unsafe { self.base.as_ptr().add(self.brk) }
  }

  fn grow(
    &mut self,
    increment: usize,
  ) -> AllocResult<NonNull<u8>> {
    let brk = self
      .brk
      .checked_add(increment)
      .filter(|brk| *brk <= self.limit)
      .ok_or(AllocError::Exhausted {
        requested: increment,
      })?;

    let start = unsafe { self.base.add(self.brk) };
    self.brk = brk;
    trace!(increment, used = brk, "private break moved up");

    Ok(start)
  }

  fn shrink_to(
    &mut self,
    base: NonNull<u8>,
  ) -> AllocResult<()> {
    let offset = (base.as_ptr() as usize)
      .checked_sub(self.base.as_ptr() as usize)
      .filter(|offset| *offset <= self.brk)
      .ok_or_else(|| AllocError::Release {
        reason: format!("{:?} is outside the reserved span", base.as_ptr()),
      })?;

    // Hand whole pages back to the OS; the span itself stays reserved.
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
    let first_page = offset.div_ceil(page) * page;
    let last_page = self.brk.div_ceil(page) * page;
    if first_page < last_page {
      let status = unsafe {
        libc::madvise(
          self.base.as_ptr().add(first_page) as *mut c_void,
          last_page - first_page,
          libc::MADV_DONTNEED,
        )
      };
      if status != 0 {
        return Err(AllocError::Release {
          reason: io::Error::last_os_error().to_string(),
        });
      }
    }

    self.brk = offset;
    trace!(used = offset, "private break moved down");

    Ok(())
  }
}

impl Drop for MappedHeap {
  fn drop(&mut self) {
    unsafe { libc::munmap(self.base.as_ptr() as *mut c_void, self.limit) };
  }
}
