use std::ptr;
use std::ptr::NonNull;

use divan::Bencher;
use divan::bench;
use divan::bench_group;
use divan::black_box;
use garbage_ring::Config;
use garbage_ring::GarbageList;
use garbage_ring::oracle::Domain;
use garbage_ring::oracle::Unprotected;

const OPS: &[usize] = &[1 << 8, 1 << 10, 1 << 12, 1 << 14, 1 << 16];

const THREADS: &[usize] = &[0, 1, 4, 8];

const CAPACITY: usize = 1 << 12;

unsafe fn noop(_context: *mut (), _object: *mut ()) {}

fn object(index: usize) -> NonNull<()> {
  NonNull::new((index | 1) as *mut ()).unwrap()
}

// -----------------------------------------------------------------------------
// Raw Push
// -----------------------------------------------------------------------------

#[bench_group(name = "Push", skip_ext_time, threads = THREADS)]
mod push {
  use super::*;

  #[bench(args = OPS)]
  fn bench_unprotected(bencher: Bencher<'_, '_>, ops: usize) {
    let config: Config<Unprotected> = Config::new().oracle(Unprotected::new()).capacity(CAPACITY);
    let list: GarbageList<Unprotected> = GarbageList::with_config(config).unwrap();

    bencher.counter(ops).bench(|| {
      for index in 0..ops {
        // SAFETY: `noop` ignores both pointers.
        unsafe {
          list.push(black_box(object(index)), noop, ptr::null_mut());
        }
      }
    });
  }

  #[bench(args = OPS)]
  fn bench_domain(bencher: Bencher<'_, '_>, ops: usize) {
    let domain: Domain = Domain::new();
    let config: Config<&Domain> = Config::new().oracle(&domain).capacity(CAPACITY);
    let list: GarbageList<&Domain> = GarbageList::with_config(config).unwrap();

    bencher.counter(ops).bench(|| {
      for index in 0..ops {
        // SAFETY: `noop` ignores both pointers.
        unsafe {
          list.push(black_box(object(index)), noop, ptr::null_mut());
        }
      }
    });
  }
}

// -----------------------------------------------------------------------------
// Boxed Retire
// -----------------------------------------------------------------------------

#[bench_group(name = "Retire", skip_ext_time)]
mod retire {
  use super::*;

  #[bench(args = OPS)]
  fn bench_boxed(bencher: Bencher<'_, '_>, ops: usize) {
    let config: Config<Unprotected> = Config::new().oracle(Unprotected::new()).capacity(CAPACITY);
    let list: GarbageList<Unprotected> = GarbageList::with_config(config).unwrap();

    bencher.counter(ops).bench(|| {
      for index in 0..ops {
        list.retire(Box::new(black_box(index)));
      }
    });
  }
}

// -----------------------------------------------------------------------------
// Scavenge
// -----------------------------------------------------------------------------

#[bench_group(name = "Scavenge", skip_ext_time)]
mod scavenge {
  use super::*;

  #[bench(args = OPS)]
  fn bench_full_ring(bencher: Bencher<'_, '_>, ops: usize) {
    let config: Config<Unprotected> = Config::new().oracle(Unprotected::new()).capacity(ops);
    let list: GarbageList<Unprotected> = GarbageList::with_config(config).unwrap();

    bencher.counter(ops).bench_local(|| {
      for index in 0..ops {
        // SAFETY: `noop` ignores both pointers.
        unsafe {
          list.push(object(index), noop, ptr::null_mut());
        }
      }

      black_box(list.scavenge())
    });
  }
}

fn main() {
  divan::main();
}
