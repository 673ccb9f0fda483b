//! Oracles and destructors shared by the unit tests.

use core::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use crate::oracle::EpochOracle;
use crate::params::Config;
use crate::slot::Destructor;
use crate::slot::EMPTY;
use crate::slot::Epoch;

// -----------------------------------------------------------------------------
// Manual Oracle
// -----------------------------------------------------------------------------

/// An oracle steered by the test.
///
/// Epochs up to `safe_through` are safe, except `blocked`. Advances can be
/// frozen so every push is stamped with the same epoch.
#[derive(Debug)]
pub(crate) struct ManualOracle {
  current: AtomicU64,
  frozen: AtomicBool,
  blocked: AtomicU64,
  safe_through: AtomicU64,
  advances: AtomicUsize,
}

impl ManualOracle {
  pub(crate) fn new() -> Self {
    Self {
      current: AtomicU64::new(1),
      frozen: AtomicBool::new(false),
      blocked: AtomicU64::new(EMPTY),
      safe_through: AtomicU64::new(Epoch::MAX - 1),
      advances: AtomicUsize::new(0),
    }
  }

  /// Stops `advance_epoch` from moving the current epoch.
  pub(crate) fn freeze(&self) {
    self.frozen.store(true, Ordering::SeqCst);
  }

  pub(crate) fn set_current(&self, epoch: Epoch) {
    self.current.store(epoch, Ordering::SeqCst);
  }

  pub(crate) fn block(&self, epoch: Epoch) {
    self.blocked.store(epoch, Ordering::SeqCst);
  }

  pub(crate) fn unblock(&self) {
    self.blocked.store(EMPTY, Ordering::SeqCst);
  }

  pub(crate) fn set_safe_through(&self, epoch: Epoch) {
    self.safe_through.store(epoch, Ordering::SeqCst);
  }

  pub(crate) fn advances(&self) -> usize {
    self.advances.load(Ordering::SeqCst)
  }
}

impl EpochOracle for ManualOracle {
  fn current_epoch(&self) -> Epoch {
    self.current.load(Ordering::SeqCst)
  }

  fn advance_epoch(&self) {
    self.advances.fetch_add(1, Ordering::SeqCst);

    if !self.frozen.load(Ordering::SeqCst) {
      self.current.fetch_add(1, Ordering::SeqCst);
    }
  }

  fn is_safe_to_reclaim(&self, epoch: Epoch) -> bool {
    epoch != self.blocked.load(Ordering::SeqCst) && epoch <= self.safe_through.load(Ordering::SeqCst)
  }
}

pub(crate) fn config(oracle: &ManualOracle, capacity: usize) -> Config<&ManualOracle> {
  Config::new().oracle(oracle).capacity(capacity)
}

// -----------------------------------------------------------------------------
// Counting Destructor
// -----------------------------------------------------------------------------

/// Per-object destruction counts.
///
/// Objects are fake pointers encoding `index + 1`; the destructor bumps the
/// matching counter through the context pointer.
pub(crate) struct Counters {
  hits: Vec<AtomicUsize>,
}

impl Counters {
  pub(crate) fn new(objects: usize) -> Self {
    Self {
      hits: (0..objects).map(|_| AtomicUsize::new(0)).collect(),
    }
  }

  pub(crate) fn context(&self) -> *mut () {
    (self as *const Self).cast_mut().cast()
  }

  pub(crate) fn object(index: usize) -> NonNull<()> {
    NonNull::new((index + 1) as *mut ()).expect("index + 1 is never null")
  }

  pub(crate) const DESTRUCTOR: Destructor = count_destroy;

  pub(crate) fn get(&self, index: usize) -> usize {
    self.hits[index].load(Ordering::SeqCst)
  }

  pub(crate) fn total(&self) -> usize {
    self.hits.iter().map(|hit| hit.load(Ordering::SeqCst)).sum()
  }

  /// Asserts every object was destroyed exactly once.
  #[track_caller]
  pub(crate) fn assert_each_once(&self) {
    for (index, hit) in self.hits.iter().enumerate() {
      assert_eq!(
        hit.load(Ordering::SeqCst),
        1,
        "object {index} must be destroyed exactly once",
      );
    }
  }
}

unsafe fn count_destroy(context: *mut (), object: *mut ()) {
  // SAFETY: Tests pass a `Counters` that outlives the list as context.
  let counters: &Counters = unsafe { &*context.cast::<Counters>() };
  let index: usize = object as usize - 1;

  counters.hits[index].fetch_add(1, Ordering::SeqCst);
}

// -----------------------------------------------------------------------------
// Drop Tracking
// -----------------------------------------------------------------------------

/// A value that records its own drop.
pub(crate) struct Tracked {
  drops: Arc<AtomicUsize>,
}

impl Tracked {
  pub(crate) fn new(drops: &Arc<AtomicUsize>) -> Box<Self> {
    Box::new(Self {
      drops: Arc::clone(drops),
    })
  }
}

impl Drop for Tracked {
  fn drop(&mut self) {
    self.drops.fetch_add(1, Ordering::SeqCst);
  }
}
