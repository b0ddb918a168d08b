//! # fitalloc - A Placement-Strategy Heap Allocator
//!
//! This crate manages one contiguous, growable arena taken from the operating
//! system's heap-growth primitive (`sbrk` by default) and offers
//! allocate / free / resize / zeroed-allocate / duplicate / reset on top of it.
//! The block placement strategy is selectable so the trade-offs of each can be
//! observed.
//!
//! ## Overview
//!
//! Every byte of the arena belongs to exactly one block, and the blocks form a
//! doubly linked list in address order:
//!
//! ```text
//!   low water mark                                            high water mark
//!   ▼                                                                       ▼
//!   ┌────┬──────────────┬────┬────────┬────┬───────────────────────────────┐
//!   │ H0 │ in use  ░░░░ │ H1 │  free  │ H2 │ in use        ░░░░░░░░░░░░░░░ │
//!   └────┴──────────────┴────┴────────┴────┴───────────────────────────────┘
//!     ◄─────next/prev────►◄────next/prev────►
//!
//!   H  = block header (capacity, size, prev, next)
//!   ░  = slack: capacity the block owns beyond its live size
//! ```
//!
//! A block with `size == 0` is free. Slack is kept on reuse so a later
//! [`resize`](Arena::resize) can grow in place.
//!
//! ## Crate Structure
//!
//! ```text
//!   fitalloc
//!   ├── align      - word rounding (align!, checked_align)
//!   ├── block      - block header layout and header <-> payload conversion
//!   ├── heap       - HeapSource: ProgramBreak (sbrk) and MappedHeap (mmap)
//!   ├── fit        - Placement strategies and candidate search
//!   ├── arena      - Arena: allocation, split, coalesce, growth, reset
//!   ├── inspect    - block walk, totals, invariant check, heap map
//!   ├── config     - ArenaConfig from TOML
//!   └── error      - AllocError, ConfigError
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fitalloc::{Arena, MappedHeap, Placement};
//!
//! let mut arena = Arena::with_heap(MappedHeap::reserve(1 << 20).unwrap());
//! arena.set_placement(Placement::BestFit);
//!
//! let data = arena.allocate(100).unwrap();
//! unsafe {
//!     data.as_ptr().write_bytes(0xAB, 100);
//!     let data = arena.resize(data.as_ptr(), 200).unwrap();
//!     arena.free(data.as_ptr());
//! }
//! arena.reset();
//! ```
//!
//! ## How A Request Is Placed
//!
//! ```text
//!   allocate(n)
//!     │
//!     ├─ a free block with capacity >= n ─────────────► reuse it in place
//!     │
//!     ├─ an in-use block whose unused tail
//!     │  holds n + header bytes ───────────────────────► split the tail off
//!     │
//!     └─ nothing fits ─────────────────────────────────► grow the arena by
//!                                                        ((n + header) / chunk + 1) * chunk
//! ```
//!
//! Which candidate wins depends on the [`Placement`]: the first in address
//! order, the smallest, the largest, or the first after the previous winner.
//! Freeing a block merges it with free neighbours at once, so two free blocks
//! are never adjacent.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: an `Arena` is neither `Send` nor `Sync`
//! - **No return to the OS on free**: memory goes back only on reset
//! - **No compaction**
//! - **Word alignment only**: nothing stricter than the header's alignment
//! - **Unix-only**: requires `libc` for `sbrk` and `mmap`
//!
//! ## Safety
//!
//! Pointers handed out by an arena are raw. [`Arena::free`] and
//! [`Arena::resize`] are `unsafe` because they trust that the pointer came
//! from the same arena and has not been invalidated by a reset.

pub mod align;
mod arena;
mod block;
mod config;
mod error;
mod fit;
mod heap;
mod inspect;

pub use arena::{Arena, DEFAULT_MIN_GROWTH, SILLY_MIN_GROWTH};
pub use block::HEADER_SIZE;
pub use config::ArenaConfig;
pub use error::{AllocError, AllocResult, ConfigError};
pub use fit::{ParsePlacementError, Placement};
pub use heap::{HeapSource, MappedHeap, ProgramBreak};
pub use inspect::{ArenaStats, BlockInfo, Blocks, HeapMap};
