use crate::oracle::EpochOracle;
use crate::slot::Epoch;
use crate::sync::atomic::AtomicU64;
use crate::sync::atomic::Ordering::Acquire;
use crate::sync::atomic::Ordering::Relaxed;

/// An oracle that considers every epoch quiesced.
///
/// Slots are recycled as soon as the ring wraps around to them. Sound only
/// when nothing reads retired objects concurrently, e.g. a single-threaded
/// structure or a test harness.
#[derive(Debug)]
pub struct Unprotected {
  current: AtomicU64,
}

impl Unprotected {
  /// Creates an oracle starting at epoch `1`.
  #[inline]
  pub fn new() -> Self {
    Self {
      current: AtomicU64::new(1),
    }
  }
}

impl Default for Unprotected {
  #[inline]
  fn default() -> Self {
    Self::new()
  }
}

impl EpochOracle for Unprotected {
  #[inline]
  fn current_epoch(&self) -> Epoch {
    self.current.load(Acquire)
  }

  #[inline]
  fn advance_epoch(&self) {
    self.current.fetch_add(1, Relaxed);
  }

  #[inline]
  fn is_safe_to_reclaim(&self, _epoch: Epoch) -> bool {
    true
  }
}
