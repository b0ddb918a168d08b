use std::{fmt, ptr, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
  align::checked_align,
  block::{Block, HEADER_SIZE},
};

/// Policy for choosing which block satisfies a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Placement {
  /// Lowest address that fits.
  #[default]
  FirstFit,
  /// Smallest room that fits, lowest address on ties.
  BestFit,
  /// Largest room, lowest address on ties.
  WorstFit,
  /// First fit, resuming after the block that satisfied the previous request.
  NextFit,
}

impl Placement {
  pub const ALL: [Placement; 4] = [
    Placement::FirstFit,
    Placement::BestFit,
    Placement::WorstFit,
    Placement::NextFit,
  ];

  pub fn short_name(self) -> &'static str {
    match self {
      Placement::FirstFit => "ff",
      Placement::BestFit => "bf",
      Placement::WorstFit => "wf",
      Placement::NextFit => "nf",
    }
  }
}

impl fmt::Display for Placement {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.write_str(match self {
      Placement::FirstFit => "First fit",
      Placement::BestFit => "Best fit",
      Placement::WorstFit => "Worst fit",
      Placement::NextFit => "Next fit",
    })
  }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("placement not recognized: {0}")]
pub struct ParsePlacementError(pub String);

impl FromStr for Placement {
  type Err = ParsePlacementError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "ff" | "first-fit" => Ok(Placement::FirstFit),
      "bf" | "best-fit" => Ok(Placement::BestFit),
      "wf" | "worst-fit" => Ok(Placement::WorstFit),
      "nf" | "next-fit" => Ok(Placement::NextFit),
      other => Err(ParsePlacementError(other.to_owned())),
    }
  }
}

/// How a chosen block will hold the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fit {
  /// A free block taken over in place; its excess capacity stays as slack.
  Reuse(*mut Block),
  /// An in-use block whose unused tail is split off into a new block.
  Carve(*mut Block),
}

/// Tail bytes of an in-use block that a split could hand out, header included.
unsafe fn spare(block: *mut Block) -> usize {
  let block = unsafe { &*block };
  checked_align(block.size)
    .and_then(|used| block.capacity.checked_sub(used))
    .unwrap_or(0)
}

/// Whether `block` can hold `size` bytes, and how much room it offers.
unsafe fn candidate(
  block: *mut Block,
  size: usize,
) -> Option<(Fit, usize)> {
  unsafe {
    if (*block).is_free() {
      let capacity = (*block).capacity;
      return (capacity >= size).then_some((Fit::Reuse(block), capacity));
    }

    let spare = spare(block);
    let needed = size.checked_add(HEADER_SIZE)?;
    (spare >= needed).then_some((Fit::Carve(block), spare))
  }
}

/// First fitting block in `[from, until)`; a null `until` runs to the tail.
unsafe fn scan(
  from: *mut Block,
  until: *mut Block,
  size: usize,
) -> Option<Fit> {
  unsafe {
    let mut current = from;

    while !current.is_null() && current != until {
      if let Some((fit, _)) = candidate(current, size) {
        return Some(fit);
      }
      current = (*current).next;
    }

    None
  }
}

/// Walks the whole list and keeps the candidate `prefer` ranks above all
/// earlier ones, so ties stay at the lowest address.
unsafe fn select(
  head: *mut Block,
  size: usize,
  prefer: fn(usize, usize) -> bool,
) -> Option<Fit> {
  unsafe {
    let mut chosen: Option<(Fit, usize)> = None;
    let mut current = head;

    while !current.is_null() {
      if let Some((fit, room)) = candidate(current, size) {
        match chosen {
          Some((_, best)) if !prefer(room, best) => {}
          _ => chosen = Some((fit, room)),
        }
      }
      current = (*current).next;
    }

    chosen.map(|(fit, _)| fit)
  }
}

/// Picks the block that satisfies `size` under `placement`.
///
/// # Safety
///
/// `head` must start a well-formed block list and `cursor` must be null or a
/// member of it.
pub unsafe fn find(
  placement: Placement,
  head: *mut Block,
  cursor: *mut Block,
  size: usize,
) -> Option<Fit> {
  unsafe {
    match placement {
      Placement::FirstFit => scan(head, ptr::null_mut(), size),
      Placement::BestFit => select(head, size, |room, best| room < best),
      Placement::WorstFit => select(head, size, |room, best| room > best),
      Placement::NextFit if cursor.is_null() => scan(head, ptr::null_mut(), size),
      Placement::NextFit => {
        let resume = (*cursor).next;
        scan(resume, ptr::null_mut(), size).or_else(|| scan(head, resume, size))
      }
    }
  }
}
