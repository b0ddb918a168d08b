use std::ptr::{self, NonNull};

use fitalloc::{Arena, BlockInfo, DEFAULT_MIN_GROWTH, HEADER_SIZE, HeapSource, MappedHeap, Placement};

fn arena(placement: Placement) -> Arena<MappedHeap> {
  let mut arena = Arena::with_heap(MappedHeap::reserve(4 << 20).unwrap());
  arena.set_placement(placement);
  arena
}

fn block_of(
  arena: &Arena<MappedHeap>,
  data: NonNull<u8>,
) -> BlockInfo {
  arena
    .blocks()
    .find(|info| info.payload == data.as_ptr())
    .unwrap()
}

#[test]
fn coalesce_forward_backward_and_both() {
  for placement in Placement::ALL {
    let mut arena = arena(placement);
    let chunk = arena.set_min_growth(0);
    let half = chunk / 2;

    let ptr1 = arena.allocate(half + 10).unwrap();
    let ptr2 = arena.allocate(half + 30).unwrap();
    let ptr3 = arena.allocate(half + 50).unwrap();
    let ptr4 = arena.allocate(half + half).unwrap();
    let ptr5 = arena.allocate(half + half + chunk).unwrap();

    assert!(arena.low_water_mark() < ptr1.as_ptr());
    assert!(ptr1 < ptr2 && ptr2 < ptr3 && ptr3 < ptr4 && ptr4 < ptr5);
    assert_eq!(arena.blocks().count(), 5);

    unsafe {
      arena.free(ptr2.as_ptr());
      arena.free(ptr4.as_ptr());
      assert_eq!(arena.blocks().count(), 5);
      arena.verify().unwrap();

      // Block 1 absorbs block 2.
      arena.free(ptr1.as_ptr());
      assert_eq!(arena.blocks().count(), 4);
      assert!(arena.blocks().next().unwrap().is_free());
      arena.verify().unwrap();

      // Block 4 absorbs block 5.
      arena.free(ptr5.as_ptr());
      assert_eq!(arena.blocks().count(), 3);
      assert!(arena.blocks().last().unwrap().is_free());
      arena.verify().unwrap();

      // Block 3 merges on both sides.
      arena.free(ptr3.as_ptr());
    }

    let blocks: Vec<_> = arena.blocks().collect();
    let span = arena.high_water_mark() as usize - arena.low_water_mark() as usize;

    assert_eq!(blocks.len(), 1, "{placement}");
    assert!(blocks[0].is_free());
    assert_eq!(blocks[0].address, arena.low_water_mark());
    assert_eq!(blocks[0].capacity + HEADER_SIZE, span);
    arena.verify().unwrap();

    arena.reset();
    assert_eq!(arena.heap().used(), 0);
  }
}

#[test]
fn best_fit_chooses_smallest_candidate() {
  let mut arena = arena(Placement::BestFit);
  let carve_after = |data: NonNull<u8>, size: usize| {
    data.as_ptr() as usize + fitalloc::align!(size) + HEADER_SIZE
  };

  let ptr1 = arena.allocate(2000).unwrap();
  let ptr2 = arena.allocate(570).unwrap();
  let ptr3 = arena.allocate(3000).unwrap();
  let ptr4 = arena.allocate(530).unwrap();
  let ptr5 = arena.allocate(510).unwrap();

  // 2000, 570 and 3000 each take a fresh chunk. 530 goes to the snuggest
  // tail, behind the 3000 block; 510 then only fits behind the 570 block.
  //
  //   +------+-----+-----+------+-----+
  //   | 2000 | 570 | 510 | 3000 | 530 |
  //   +------+-----+-----+------+-----+
  assert_eq!(ptr3.as_ptr() as usize, ptr2.as_ptr() as usize + DEFAULT_MIN_GROWTH);
  assert_eq!(ptr4.as_ptr() as usize, carve_after(ptr3, 3000));
  assert_eq!(ptr5.as_ptr() as usize, carve_after(ptr2, 570));
  assert_eq!(
    arena.blocks().map(|info| info.payload).collect::<Vec<_>>(),
    [ptr1, ptr2, ptr5, ptr3, ptr4].map(NonNull::as_ptr)
  );

  unsafe {
    arena.free(ptr1.as_ptr());
    arena.free(ptr3.as_ptr());
    arena.free(ptr5.as_ptr());
  }
  arena.verify().unwrap();

  // 5 absorbs 3; 1 stays a separate hole.
  let merged = block_of(&arena, ptr5);
  assert_eq!(arena.blocks().count(), 4);
  assert!(merged.is_free());
  assert_eq!(
    merged.address as usize + merged.block_size(),
    ptr4.as_ptr() as usize - HEADER_SIZE
  );
  let chunk_capacity = DEFAULT_MIN_GROWTH - HEADER_SIZE;
  let tail_of_570 = chunk_capacity - fitalloc::align!(570) - HEADER_SIZE;
  assert_eq!(merged.capacity, tail_of_570 + HEADER_SIZE + 3000);
  assert_eq!(block_of(&arena, ptr1).capacity, chunk_capacity);

  // 570 has no tail left and 530's is too short, so the first hole is the snuggest.
  assert_eq!(arena.allocate(500).unwrap(), ptr1);

  let merged_after = block_of(&arena, ptr5);
  assert!(merged_after.is_free());
  assert_eq!(merged_after, merged);
  arena.verify().unwrap();
}

// Three free holes of different sizes separated by in-use guards, and no
// in-use block with enough tail to split.
//
//   +------+----+------+----+------+----+
//   | 4064 |xxxx| 2016 |xxxx| 6000 |xxxx|
//   +------+----+------+----+------+----+
fn holes(placement: Placement) -> (Arena<MappedHeap>, [NonNull<u8>; 3]) {
  let mut arena = arena(placement);
  assert_eq!(arena.min_growth(), DEFAULT_MIN_GROWTH);

  let a = arena.allocate(4000).unwrap();
  arena.allocate(2000).unwrap();
  let b = arena.allocate(2000).unwrap();
  arena.allocate(2000).unwrap();
  let c = arena.allocate(6000).unwrap();
  arena.allocate(2000).unwrap();
  assert_eq!(arena.blocks().count(), 6);

  unsafe {
    arena.free(a.as_ptr());
    arena.free(b.as_ptr());
    arena.free(c.as_ptr());
  }
  arena.verify().unwrap();

  (arena, [a, b, c])
}

#[test]
fn each_placement_picks_its_hole() {
  let (mut first, [a, _, _]) = holes(Placement::FirstFit);
  assert_eq!(first.allocate(1500).unwrap(), a);

  let (mut best, [_, b, _]) = holes(Placement::BestFit);
  assert_eq!(best.allocate(1500).unwrap(), b);

  let (mut worst, [_, _, c]) = holes(Placement::WorstFit);
  assert_eq!(worst.allocate(1500).unwrap(), c);

  // The cursor sits on the last guard, so next fit wraps to the head.
  let (mut next, [a, _, _]) = holes(Placement::NextFit);
  assert_eq!(next.allocate(1500).unwrap(), a);
}

#[test]
fn next_fit_resumes_where_first_fit_restarts() {
  let (mut first, [a, _, _]) = holes(Placement::FirstFit);
  let (mut next, [_, b, _]) = holes(Placement::NextFit);

  first.allocate(1500).unwrap();
  next.allocate(1500).unwrap();

  // First fit carves the rest of the first hole; next fit moves on to the second.
  let carved = first.allocate(1500).unwrap();
  assert_eq!(
    carved.as_ptr() as usize,
    a.as_ptr() as usize + fitalloc::align!(1500) + HEADER_SIZE
  );
  assert_eq!(next.allocate(1500).unwrap(), b);

  first.verify().unwrap();
  next.verify().unwrap();
}

#[test]
fn worst_fit_ties_go_to_lowest_address() {
  let mut arena = arena(Placement::WorstFit);
  let a = arena.allocate(2000).unwrap();
  arena.allocate(2000).unwrap();
  let b = arena.allocate(2000).unwrap();
  arena.allocate(2000).unwrap();

  unsafe {
    arena.free(a.as_ptr());
    arena.free(b.as_ptr());
  }

  assert_eq!(arena.allocate(100).unwrap(), a);
}

#[test]
fn split_then_coalesce_restores_single_block() {
  let mut arena = arena(Placement::FirstFit);

  let big = arena.allocate(100).unwrap();
  let small: Vec<_> = (0..8).map(|i| arena.allocate(50 + i).unwrap()).collect();

  // All nine live in the first chunk.
  assert_eq!(arena.heap().used(), DEFAULT_MIN_GROWTH);
  assert_eq!(arena.blocks().count(), 9);
  arena.verify().unwrap();

  unsafe {
    for data in small.iter().rev() {
      arena.free(data.as_ptr());
      arena.verify().unwrap();
    }
    arena.free(big.as_ptr());
  }

  let blocks: Vec<_> = arena.blocks().collect();
  assert_eq!(blocks.len(), 1);
  assert_eq!(blocks[0].capacity, DEFAULT_MIN_GROWTH - HEADER_SIZE);
}

#[test]
fn resize_grows_in_place_into_slack() {
  let mut arena = arena(Placement::FirstFit);

  let data = arena.allocate(1000).unwrap();
  arena.allocate(3000).unwrap();
  unsafe {
    data.as_ptr().write_bytes(7, 1000);
    arena.free(data.as_ptr());
  }

  // Reuse keeps the whole capacity, so the block can grow back without moving.
  let small = arena.allocate(10).unwrap();
  assert_eq!(small, data);

  unsafe {
    let grown = arena.resize(small.as_ptr(), 2000).unwrap();
    assert_eq!(grown, data);
    assert_eq!(block_of(&arena, grown).size, 2000);
    assert_eq!(*grown.as_ptr(), 7);

    let shrunk = arena.resize(grown.as_ptr(), 20).unwrap();
    assert_eq!(shrunk, data);
  }
  arena.verify().unwrap();
}

#[test]
fn resize_round_trip_preserves_content() {
  let mut arena = arena(Placement::FirstFit);

  for n in [16, 500, 2016, 5000, 20_000] {
    let data = arena.allocate(8).unwrap();
    unsafe {
      data.as_ptr().copy_from(b"abcdefgh".as_ptr(), 8);

      let once = arena.resize(data.as_ptr(), n).unwrap();
      let twice = arena.resize(once.as_ptr(), n).unwrap();
      assert_eq!(once, twice);

      let bytes = std::slice::from_raw_parts(twice.as_ptr(), 8);
      assert_eq!(bytes, b"abcdefgh", "n = {n}");
      arena.free(twice.as_ptr());
    }
    arena.verify().unwrap();
  }
}

#[test]
fn zeroed_allocate_scenario() {
  let mut arena = arena(Placement::FirstFit);

  let data = arena.zeroed_allocate(1000, 17).unwrap();
  let bytes = unsafe { std::slice::from_raw_parts(data.as_ptr(), 17_000) };

  assert!(bytes.iter().all(|b| *b == 0));
  assert_eq!(block_of(&arena, data).size, 17_000);
}

#[test]
fn reset_then_rebuild() {
  let mut arena = arena(Placement::NextFit);
  let base = arena.heap().current();

  let first: Vec<_> = (1..20).map(|i| arena.allocate(i * 97).unwrap()).collect();
  let span = arena.heap().used();
  arena.reset();

  assert_eq!(arena.heap().current(), base);
  assert_eq!(arena.blocks().count(), 0);
  arena.verify().unwrap();

  let again: Vec<_> = (1..20).map(|i| arena.allocate(i * 97).unwrap()).collect();
  assert_eq!(first, again);
  assert_eq!(arena.heap().used(), span);
}

#[test]
fn duplicate_and_free_strings() {
  let mut arena = arena(Placement::BestFit);
  let words = [c"alpha", c"beta", c"gamma delta epsilon"];

  let copies: Vec<_> = words
    .iter()
    .map(|word| arena.duplicate(Some(*word)).unwrap())
    .collect();

  for (word, copy) in words.iter().zip(&copies) {
    let copied = unsafe { std::ffi::CStr::from_ptr(copy.as_ptr() as *const std::ffi::c_char) };
    assert_eq!(copied, *word);
  }

  unsafe {
    for copy in copies {
      arena.free(copy.as_ptr());
    }
    arena.free(ptr::null_mut());
  }
  assert_eq!(arena.stats().used_blocks, 0);
  assert_eq!(arena.blocks().count(), 1);
}
