//! Walks an arena through numbered scenarios, printing the heap map after
//! each interesting step.
//!
//! ```text
//! cargo run --example walkthrough -- -a bf -t 4 -v
//! RUST_LOG=fitalloc=debug cargo run --example walkthrough -- -t 2
//! ```

use std::{
  error::Error,
  ffi::{CStr, c_char},
  fs::File,
  io::{self, Write},
  path::PathBuf,
  ptr::NonNull,
};

use clap::Parser;
use fitalloc::{Arena, ArenaConfig, HeapSource, MappedHeap, Placement, ProgramBreak};

const STRESS_SLOTS: usize = 100;
const MAPPED_SPAN: usize = 256 << 20;

/// Exercise a fit allocator arena step by step.
#[derive(Parser)]
#[command(name = "walkthrough")]
#[command(about, long_about = None)]
struct Cli {
  /// Placement strategy: ff, bf, wf or nf
  #[arg(short = 'a', long)]
  placement: Option<Placement>,

  /// Minimum growth chunk in bytes
  #[arg(short = 's', long)]
  chunk: Option<usize>,

  /// Write allocator diagnostics
  #[arg(short, long)]
  verbose: bool,

  /// File receiving diagnostics and heap maps instead of stderr
  #[arg(short, long)]
  output: Option<PathBuf>,

  /// Scenario to run, 0 for all
  #[arg(short, long, default_value_t = 0)]
  test: usize,

  /// Arena settings in TOML; flags override them
  #[arg(long)]
  config: Option<PathBuf>,

  /// Grow on the process program break instead of a private mapping
  #[arg(long)]
  program_break: bool,
}

struct Walk<H: HeapSource> {
  arena: Arena<H>,
  out: Box<dyn Write>,
  base: *const u8,
}

impl<H: HeapSource> Walk<H> {
  fn map(
    &mut self,
    label: &str,
  ) -> io::Result<()> {
    writeln!(self.out, "\n{label}")?;
    self.arena.dump_heap_map(self.base);
    Ok(())
  }

  fn alloc(
    &mut self,
    size: usize,
  ) -> io::Result<NonNull<u8>> {
    self
      .arena
      .allocate(size)
      .ok_or_else(|| io::Error::other(format!("allocation of {size} bytes failed")))
  }

  fn free(
    &mut self,
    data: NonNull<u8>,
  ) {
    unsafe { self.arena.free(data.as_ptr()) };
  }
}

type Scenario<H> = fn(&mut Walk<H>) -> io::Result<()>;

fn scenarios<H: HeapSource>() -> [(&'static str, Scenario<H>); 8] {
  [
    ("basic", basic),
    ("coalesce", coalesce),
    ("split", split),
    ("best fit", best_fit),
    ("zero fill", zero_fill),
    ("resize", resize),
    ("duplicate", duplicate),
    ("stress", stress),
  ]
}

fn basic<H: HeapSource>(walk: &mut Walk<H>) -> io::Result<()> {
  for size in [10, 2000, 10_000] {
    let data = walk.alloc(size)?;
    unsafe { data.as_ptr().write_bytes(0x5A, size) };
    walk.map(&format!("allocated {size} bytes"))?;

    walk.free(data);
    walk.map(&format!("freed {size} bytes"))?;
  }
  Ok(())
}

fn coalesce<H: HeapSource>(walk: &mut Walk<H>) -> io::Result<()> {
  let chunk = walk.arena.min_growth();
  let half = chunk / 2;

  let ptr1 = walk.alloc(half + 10)?;
  let ptr2 = walk.alloc(half + 30)?;
  let ptr3 = walk.alloc(half + 50)?;
  let ptr4 = walk.alloc(half + half)?;
  let ptr5 = walk.alloc(half + half + chunk)?;
  walk.map("five blocks")?;

  walk.free(ptr2);
  walk.free(ptr4);
  walk.map("freed 2 and 4, no neighbours to merge")?;

  walk.free(ptr1);
  walk.map("freed 1, merged forward")?;

  walk.free(ptr5);
  walk.map("freed 5, merged backward")?;

  walk.free(ptr3);
  walk.map("freed 3, merged both ways")
}

fn split<H: HeapSource>(walk: &mut Walk<H>) -> io::Result<()> {
  let big = walk.alloc(100)?;
  let mut small = Vec::new();
  for i in 0..8 {
    small.push(walk.alloc(50 + i)?);
  }
  walk.map("one chunk split nine ways")?;

  for data in small.into_iter().rev() {
    walk.free(data);
  }
  walk.free(big);
  walk.map("all freed")
}

fn best_fit<H: HeapSource>(walk: &mut Walk<H>) -> io::Result<()> {
  let ptr1 = walk.alloc(2000)?;
  let _ptr2 = walk.alloc(570)?;
  let ptr3 = walk.alloc(3000)?;
  let _ptr4 = walk.alloc(530)?;
  let ptr5 = walk.alloc(510)?;

  walk.free(ptr1);
  walk.free(ptr3);
  walk.free(ptr5);
  walk.map("holes at 1, 3 and 5")?;

  let placed = walk.alloc(500)?;
  let offset = placed.as_ptr() as usize - walk.base as usize;
  walk.map(&format!("500 bytes placed at {offset:#09x}"))
}

fn zero_fill<H: HeapSource>(walk: &mut Walk<H>) -> io::Result<()> {
  let dirty = walk.alloc(17_000)?;
  unsafe { dirty.as_ptr().write_bytes(0xAA, 17_000) };
  walk.free(dirty);

  let clean = walk
    .arena
    .zeroed_allocate(1000, 17)
    .ok_or_else(|| io::Error::other("zeroed allocation failed"))?;
  let bytes = unsafe { std::slice::from_raw_parts(clean.as_ptr(), 17_000) };
  let stray = bytes.iter().filter(|b| **b != 0).count();

  walk.map(&format!("1000 x 17 zeroed bytes, {stray} non-zero"))
}

fn resize<H: HeapSource>(walk: &mut Walk<H>) -> io::Result<()> {
  let mut data = walk.alloc(8)?;
  unsafe { data.as_ptr().copy_from(b"abcdefgh".as_ptr(), 8) };

  for size in [16, 500, 2016, 5000, 20_000, 40] {
    data = unsafe { walk.arena.resize(data.as_ptr(), size) }
      .ok_or_else(|| io::Error::other(format!("resize to {size} bytes failed")))?;

    let head = unsafe { std::slice::from_raw_parts(data.as_ptr(), 8) };
    walk.map(&format!(
      "resized to {size} bytes, content {}",
      String::from_utf8_lossy(head)
    ))?;
  }

  walk.free(data);
  walk.map("freed")
}

fn duplicate<H: HeapSource>(walk: &mut Walk<H>) -> io::Result<()> {
  let words = [c"Lorem", c"ipsum dolor sit amet", c"consectetur adipiscing elit"];
  let mut copies = Vec::new();

  for word in words {
    let copy = walk
      .arena
      .duplicate(Some(word))
      .ok_or_else(|| io::Error::other("duplicate failed"))?;
    let copied = unsafe { CStr::from_ptr(copy.as_ptr() as *const c_char) };
    writeln!(walk.out, "copied {copied:?}")?;
    copies.push(copy);
  }
  walk.map("three copies")?;

  for copy in copies {
    walk.free(copy);
  }
  walk.map("copies freed")
}

fn stress<H: HeapSource>(walk: &mut Walk<H>) -> io::Result<()> {
  let mut slots: [Option<NonNull<u8>>; STRESS_SLOTS] = [None; STRESS_SLOTS];
  let mut state = 0x2545_F491_4F6C_DD1D_u64;
  let mut next = move || {
    state ^= state << 13;
    state ^= state >> 7;
    state ^= state << 17;
    state as usize
  };

  for _ in 0..10 * STRESS_SLOTS {
    let slot = next() % STRESS_SLOTS;
    let size = next() % 4096 + 1;

    slots[slot] = match slots[slot] {
      None => Some(walk.alloc(size)?),
      Some(data) if size % 3 == 0 => {
        walk.free(data);
        None
      }
      Some(data) => unsafe { walk.arena.resize(data.as_ptr(), size) },
    };
  }

  walk
    .arena
    .verify()
    .map_err(|err| io::Error::other(err.to_string()))?;

  let stats = walk.arena.stats();
  writeln!(
    walk.out,
    "\n{} used, {} free, {} user bytes in {} block bytes",
    stats.used_blocks, stats.free_blocks, stats.user_bytes, stats.block_bytes
  )?;
  walk.map("after stress")
}

fn run<H: HeapSource>(
  mut walk: Walk<H>,
  only: usize,
) -> Result<(), Box<dyn Error>> {
  for (number, (name, scenario)) in (1..).zip(scenarios::<H>()) {
    if only != 0 && only != number {
      continue;
    }

    writeln!(walk.out, "\n===== {number}: {name} ({}) =====", walk.arena.placement())?;
    scenario(&mut walk)?;

    walk.arena.verify()?;
    if let Err(err) = walk.arena.try_reset() {
      writeln!(walk.out, "reset: {err}")?;
    }
    tracing::info!(number, name, "scenario finished");
  }

  Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
  tracing_subscriber::fmt()
    .with_writer(io::stderr)
    .with_env_filter(
      tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::WARN.into()),
    )
    .init();

  let cli = Cli::parse();

  let mut config = match &cli.config {
    Some(path) => ArenaConfig::load(path)?,
    None => ArenaConfig::default(),
  };
  if let Some(placement) = cli.placement {
    config.placement = placement;
  }
  if let Some(chunk) = cli.chunk {
    config.min_growth = chunk;
  }
  config.verbose |= cli.verbose;

  let (sink, mut out): (Box<dyn Write>, Box<dyn Write>) = match &cli.output {
    Some(path) => {
      let file = File::create(path)?;
      (Box::new(file.try_clone()?), Box::new(file))
    }
    None => (Box::new(io::stderr()), Box::new(io::stderr())),
  };

  write!(out, "{}", toml::to_string(&config)?)?;

  if cli.program_break {
    let heap = ProgramBreak::new();
    let base = heap.current();
    let mut arena = Arena::with_heap(heap);
    arena.set_diagnostic_sink(sink);
    arena.configure(&config);
    writeln!(out, "program break grows in multiples of {}", arena.min_growth())?;

    run(Walk { arena, out, base }, cli.test)
  } else {
    let heap = MappedHeap::reserve(MAPPED_SPAN)?;
    let base = heap.current();
    let mut arena = Arena::with_heap(heap);
    arena.set_diagnostic_sink(sink);
    arena.configure(&config);
    writeln!(out, "private heap grows in multiples of {}", arena.min_growth())?;

    run(Walk { arena, out, base }, cli.test)
  }
}
