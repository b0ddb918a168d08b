use std::mem;

/// Machine word size. Every block header and payload starts on a multiple of it.
pub const WORD: usize = mem::size_of::<usize>();

/// Rounds a byte count up to the machine word size.
///
/// Overflows for values within one word of `usize::MAX`; use [`checked_align`]
/// for sizes that come from callers.
///
/// # Examples
///
/// ```rust
/// use fitalloc::align;
///
/// match fitalloc::align::WORD {
///     8 => assert_eq!(align!(13), 16), // 64 bit machine.
///     4 => assert_eq!(align!(11), 12), // 32 bit machine.
///     _ => {},
/// };
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    ($value + $crate::align::WORD - 1) & !($crate::align::WORD - 1)
  };
}

/// Like [`align!`], but returns `None` instead of overflowing.
pub const fn checked_align(value: usize) -> Option<usize> {
  match value.checked_add(WORD - 1) {
    Some(v) => Some(v & !(WORD - 1)),
    None => None,
  }
}

pub const fn is_aligned(addr: usize) -> bool {
  addr & (WORD - 1) == 0
}
