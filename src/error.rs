//! Error types for the arena and its configuration.

use std::{io, path::PathBuf};

use thiserror::Error;

/// Failures an arena operation can report through its `try_*` form.
#[derive(Error, Debug)]
pub enum AllocError {
  /// The heap source refused to extend the arena.
  #[error("heap exhausted: cannot grow the arena by {requested} bytes")]
  Exhausted {
    /// Bytes the arena asked the heap source for.
    requested: usize,
  },

  /// `count * elem_size` does not fit in a `usize`.
  #[error("allocation size overflow: {count} elements of {elem_size} bytes")]
  Overflow {
    /// Number of elements requested.
    count: usize,
    /// Size of one element.
    elem_size: usize,
  },

  /// New memory did not start where the arena currently ends.
  #[error("heap grew discontiguously: expected {expected:#x}, got {found:#x}")]
  Discontiguous {
    /// Current high water mark.
    expected: usize,
    /// Address the heap source actually returned.
    found: usize,
  },

  /// The heap source could not give the arena back.
  #[error("failed to release the arena: {reason}")]
  Release {
    /// Why the release was refused.
    reason: String,
  },

  /// A dedicated mapping could not be created.
  #[error("failed to reserve {bytes} bytes: {source}")]
  Reserve {
    /// Size of the requested reservation.
    bytes: usize,
    /// OS error from the mapping call.
    #[source]
    source: io::Error,
  },

  /// A block list invariant does not hold.
  #[error("arena corrupted at block {index}: {reason}")]
  Corrupted {
    /// Position of the offending block in address order.
    index: usize,
    /// Which invariant failed.
    reason: String,
  },
}

/// Result type for arena operations.
pub type AllocResult<T> = Result<T, AllocError>;

/// Failures while loading an [`ArenaConfig`](crate::ArenaConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
  /// The configuration file could not be read.
  #[error("cannot read config {}: {source}", .path.display())]
  Io {
    /// File that failed to load.
    path: PathBuf,
    /// Underlying I/O error.
    #[source]
    source: io::Error,
  },

  /// The TOML was malformed or had unknown values.
  #[error("invalid config: {0}")]
  Parse(#[from] toml::de::Error),
}
