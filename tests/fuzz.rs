use std::ptr::NonNull;

use fitalloc::{Arena, HeapSource, MappedHeap, Placement};
use proptest::{prelude::*, sample::Index};

#[derive(Debug, Clone)]
enum Op {
  Alloc(usize),
  Free(Index),
  Resize(Index, usize),
  Zeroed(usize, usize),
  Reset,
}

fn op() -> impl Strategy<Value = Op> {
  prop_oneof![
    6 => (1_usize..6000).prop_map(Op::Alloc),
    4 => any::<Index>().prop_map(Op::Free),
    3 => (any::<Index>(), 0_usize..9000).prop_map(|(i, n)| Op::Resize(i, n)),
    1 => (0_usize..100, 0_usize..64).prop_map(|(c, e)| Op::Zeroed(c, e)),
    1 => Just(Op::Reset),
  ]
}

struct Live {
  data: NonNull<u8>,
  len: usize,
  tag: u8,
}

impl Live {
  fn fill(&self) {
    unsafe { self.data.as_ptr().write_bytes(self.tag, self.len) };
  }

  fn bytes(&self) -> &[u8] {
    unsafe { std::slice::from_raw_parts(self.data.as_ptr(), self.len) }
  }
}

fn check(
  arena: &Arena<MappedHeap>,
  live: &[Live],
) -> Result<(), TestCaseError> {
  arena
    .verify()
    .map_err(|err| TestCaseError::fail(err.to_string()))?;

  let low = arena.low_water_mark() as usize;
  let high = arena.high_water_mark() as usize;

  for entry in live {
    let addr = entry.data.as_ptr() as usize;
    prop_assert!(addr > low && addr < high);

    let info = arena
      .blocks()
      .find(|info| info.payload == entry.data.as_ptr())
      .ok_or_else(|| TestCaseError::fail("live pointer has no block"))?;
    prop_assert_eq!(info.size, entry.len);
    prop_assert!(info.capacity >= info.size);

    prop_assert!(entry.bytes().iter().all(|b| *b == entry.tag));
  }

  prop_assert_eq!(arena.stats().used_blocks, live.len());
  Ok(())
}

proptest! {
  #[test]
  fn invariants_hold_after_every_operation(
    placement in prop::sample::select(Placement::ALL.to_vec()),
    chunk in prop::sample::select(vec![0_usize, 10, 512, 2048, 4096]),
    ops in prop::collection::vec(op(), 1..80),
  ) {
    let mut arena = Arena::with_heap(MappedHeap::reserve(64 << 20).unwrap());
    arena.set_placement(placement);
    arena.set_min_growth(chunk);

    let mut live: Vec<Live> = Vec::new();
    let mut next_tag = 1_u8;
    let mut tag = || {
      next_tag = next_tag.wrapping_add(1).max(1);
      next_tag
    };

    for op in ops {
      match op {
        Op::Alloc(size) => {
          let data = arena.allocate(size).unwrap();
          let entry = Live { data, len: size, tag: tag() };
          entry.fill();
          live.push(entry);
        }
        Op::Free(index) => {
          if live.is_empty() {
            continue;
          }
          let entry = live.swap_remove(index.index(live.len()));

          unsafe { arena.free(entry.data.as_ptr()) };
          let once: Vec<_> = arena.blocks().collect();
          let cursor_map = arena.heap_map(arena.low_water_mark()).to_string();

          // A second free of the same pointer changes nothing.
          unsafe { arena.free(entry.data.as_ptr()) };
          prop_assert_eq!(arena.blocks().collect::<Vec<_>>(), once);
          prop_assert_eq!(arena.heap_map(arena.low_water_mark()).to_string(), cursor_map);
        }
        Op::Resize(index, size) => {
          if live.is_empty() {
            continue;
          }
          let mut entry = live.swap_remove(index.index(live.len()));
          let kept = entry.len.min(size);

          let resized = unsafe { arena.resize(entry.data.as_ptr(), size) };
          match resized {
            None => prop_assert_eq!(size, 0),
            Some(data) => {
              let bytes = unsafe { std::slice::from_raw_parts(data.as_ptr(), kept) };
              prop_assert!(bytes.iter().all(|b| *b == entry.tag));

              entry.data = data;
              entry.len = size;
              entry.fill();
              live.push(entry);
            }
          }
        }
        Op::Zeroed(count, elem_size) => {
          let total = count * elem_size;
          match arena.zeroed_allocate(count, elem_size) {
            None => prop_assert_eq!(total, 0),
            Some(data) => {
              let entry = Live { data, len: total, tag: tag() };
              prop_assert!(entry.bytes().iter().all(|b| *b == 0));
              entry.fill();
              live.push(entry);
            }
          }
        }
        Op::Reset => {
          arena.reset();
          live.clear();
          prop_assert_eq!(arena.heap().used(), 0);
        }
      }

      check(&arena, &live)?;
    }
  }

  #[test]
  fn reset_restarts_address_arithmetic(
    placement in prop::sample::select(Placement::ALL.to_vec()),
    sizes in prop::collection::vec(1_usize..10_000, 1..30),
  ) {
    let mut arena = Arena::with_heap(MappedHeap::reserve(64 << 20).unwrap());
    arena.set_placement(placement);
    let base = arena.heap().current();

    let first: Vec<_> = sizes.iter().map(|size| arena.allocate(*size).unwrap()).collect();
    arena.reset();
    prop_assert_eq!(arena.heap().current(), base);

    let second: Vec<_> = sizes.iter().map(|size| arena.allocate(*size).unwrap()).collect();
    prop_assert_eq!(first, second);
  }
}
