use core::cell::Cell;
use core::fmt::Debug;
use core::fmt::Formatter;
use core::fmt::Result as FmtResult;

use crate::oracle::EpochOracle;
use crate::padded::CachePadded;
use crate::slot::EMPTY;
use crate::slot::Epoch;
use crate::sync::Arc;
use crate::sync::Mutex;
use crate::sync::atomic::AtomicU64;
use crate::sync::atomic::Ordering::AcqRel;
use crate::sync::atomic::Ordering::Acquire;
use crate::sync::atomic::Ordering::Relaxed;
use crate::sync::atomic::Ordering::SeqCst;

/// Announced epoch of a participant outside any critical section.
const QUIESCENT: Epoch = EMPTY;

// -----------------------------------------------------------------------------
// Domain
// -----------------------------------------------------------------------------

/// An epoch oracle backed by an explicit participant registry.
///
/// Threads that read shared data [`register`] once and [`protect`] each
/// critical section. An epoch is safe to reclaim once every participant that
/// was protecting it has left its critical section.
///
/// ```
/// use garbage_ring::oracle::Domain;
/// use garbage_ring::oracle::EpochOracle;
///
/// let domain: Domain = Domain::new();
/// let participant = domain.register();
///
/// let retired = {
///   let _guard = participant.protect();
///   let epoch = domain.current_epoch();
///   domain.advance_epoch();
///   assert!(!domain.is_safe_to_reclaim(epoch));
///   epoch
/// };
///
/// assert!(domain.is_safe_to_reclaim(retired));
/// ```
///
/// [`protect`]: Participant::protect
/// [`register`]: Domain::register
pub struct Domain {
  current: CachePadded<AtomicU64>,
  reclaimable: CachePadded<AtomicU64>,
  registry: Mutex<Vec<Arc<Announcement>>>,
}

impl Domain {
  /// Creates a domain starting at epoch `1` with no participants.
  pub fn new() -> Self {
    Self {
      current: CachePadded::new(AtomicU64::new(1)),
      reclaimable: CachePadded::new(AtomicU64::new(QUIESCENT)),
      registry: Mutex::new(Vec::new()),
    }
  }

  /// Registers the calling thread as a participant.
  ///
  /// The participant stays registered until it is dropped.
  pub fn register(&self) -> Participant<'_> {
    let announcement: Arc<Announcement> = Arc::new(Announcement::new());

    self.registry.lock().push(Arc::clone(&announcement));

    Participant {
      domain: self,
      announcement,
      depth: Cell::new(0),
    }
  }

  /// Returns the number of registered participants.
  pub fn participants(&self) -> usize {
    self.registry.lock().len()
  }

  /// Returns the highest epoch known to be safe, without rescanning.
  ///
  /// Raised on every advance and whenever a check misses the cache.
  #[inline]
  pub fn reclaimable_epoch(&self) -> Epoch {
    self.reclaimable.load(Acquire)
  }

  /// Rescans the registry and raises the reclaimable epoch.
  ///
  /// Returns the new reclaimable epoch.
  fn refresh(&self) -> Epoch {
    // Read before the scan: a participant that pins after this load announces
    // at least `current`.
    let current: Epoch = self.current.load(SeqCst);
    let mut oldest: Epoch = current;

    for announcement in self.registry.lock().iter() {
      let epoch: Epoch = announcement.protected.load(SeqCst);

      if epoch != QUIESCENT && epoch < oldest {
        oldest = epoch;
      }
    }

    let safe: Epoch = oldest - 1;
    let prior: Epoch = self.reclaimable.fetch_max(safe, AcqRel);

    prior.max(safe)
  }

  fn deregister(&self, announcement: &Arc<Announcement>) {
    self.registry.lock().retain(|other| !Arc::ptr_eq(other, announcement));
  }
}

impl Default for Domain {
  #[inline]
  fn default() -> Self {
    Self::new()
  }
}

impl Debug for Domain {
  fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
    f.debug_struct("Domain")
      .field("current", &self.current.load(Relaxed))
      .field("reclaimable", &self.reclaimable.load(Relaxed))
      .field("participants", &self.participants())
      .finish()
  }
}

impl EpochOracle for Domain {
  #[inline]
  fn current_epoch(&self) -> Epoch {
    self.current.load(Acquire)
  }

  fn advance_epoch(&self) {
    self.current.fetch_add(1, SeqCst);
    self.refresh();
  }

  fn is_safe_to_reclaim(&self, epoch: Epoch) -> bool {
    if epoch <= self.reclaimable.load(Acquire) {
      return true;
    }

    // Nothing in the current epoch can be safe yet; skip the registry lock.
    if epoch >= self.current.load(Acquire) {
      return false;
    }

    epoch <= self.refresh()
  }
}

// -----------------------------------------------------------------------------
// Participant
// -----------------------------------------------------------------------------

struct Announcement {
  protected: AtomicU64,
}

impl Announcement {
  fn new() -> Self {
    Self {
      protected: AtomicU64::new(QUIESCENT),
    }
  }
}

/// A registered reader of a [`Domain`].
///
/// Not `Sync`: each thread registers its own participant.
pub struct Participant<'domain> {
  domain: &'domain Domain,
  announcement: Arc<Announcement>,
  depth: Cell<usize>,
}

impl<'domain> Participant<'domain> {
  /// Enters a critical section.
  ///
  /// Sections nest: only the outermost guard announces an epoch, and the
  /// participant becomes quiescent when the outermost guard drops.
  pub fn protect(&self) -> Guard<'_, 'domain> {
    let depth: usize = self.depth.get();

    if depth == 0 {
      self.announce();
    }

    self.depth.set(depth + 1);

    Guard { participant: self }
  }

  /// Returns `true` if the participant is inside a critical section.
  #[inline]
  pub fn is_protected(&self) -> bool {
    self.depth.get() != 0
  }

  /// Returns the domain this participant is registered with.
  #[inline]
  pub fn domain(&self) -> &'domain Domain {
    self.domain
  }

  fn announce(&self) {
    let mut epoch: Epoch = self.domain.current.load(SeqCst);

    loop {
      self.announcement.protected.store(epoch, SeqCst);

      // An advance between the load and the store may have gone unseen by a
      // concurrent scan; announce again until the epoch is stable.
      let latest: Epoch = self.domain.current.load(SeqCst);

      if latest == epoch {
        break;
      }

      epoch = latest;
    }
  }

  fn release(&self) {
    let depth: usize = self.depth.get();

    debug_assert!(depth != 0, "Participant::release requires an active guard");

    self.depth.set(depth - 1);

    if depth == 1 {
      self.announcement.protected.store(QUIESCENT, SeqCst);
    }
  }
}

impl Debug for Participant<'_> {
  fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
    f.debug_struct("Participant")
      .field("protected", &self.announcement.protected.load(Relaxed))
      .field("depth", &self.depth.get())
      .finish()
  }
}

impl Drop for Participant<'_> {
  fn drop(&mut self) {
    self.domain.deregister(&self.announcement);
  }
}

// -----------------------------------------------------------------------------
// Guard
// -----------------------------------------------------------------------------

/// An active critical section of a [`Participant`].
///
/// While a guard is alive, nothing retired in or after its announced epoch
/// is reclaimed.
#[must_use = "the critical section ends as soon as the guard is dropped"]
pub struct Guard<'participant, 'domain> {
  participant: &'participant Participant<'domain>,
}

impl Guard<'_, '_> {
  /// Returns the epoch announced by the enclosing participant.
  #[inline]
  pub fn epoch(&self) -> Epoch {
    self.participant.announcement.protected.load(Relaxed)
  }
}

impl Debug for Guard<'_, '_> {
  fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
    f.debug_struct("Guard").field("epoch", &self.epoch()).finish()
  }
}

impl Drop for Guard<'_, '_> {
  #[inline]
  fn drop(&mut self) {
    self.participant.release();
  }
}

#[cfg(all(test, not(any(loom, shuttle))))]
mod tests {
  use crate::oracle::Domain;
  use crate::oracle::EpochOracle;

  #[test]
  fn empty_domain_reclaims_past_epochs() {
    let domain: Domain = Domain::new();
    let epoch: u64 = domain.current_epoch();

    assert!(!domain.is_safe_to_reclaim(epoch));

    domain.advance_epoch();

    assert!(domain.is_safe_to_reclaim(epoch));
    assert!(!domain.is_safe_to_reclaim(domain.current_epoch()));
  }

  #[test]
  fn guard_blocks_its_epoch() {
    let domain: Domain = Domain::new();
    let participant = domain.register();
    let guard = participant.protect();
    let epoch: u64 = guard.epoch();

    domain.advance_epoch();
    domain.advance_epoch();

    assert!(!domain.is_safe_to_reclaim(epoch));
    assert!(domain.is_safe_to_reclaim(epoch - 1));

    drop(guard);

    assert!(domain.is_safe_to_reclaim(epoch));
  }

  #[test]
  fn nested_guards_announce_once() {
    let domain: Domain = Domain::new();
    let participant = domain.register();
    let outer = participant.protect();
    let epoch: u64 = outer.epoch();

    domain.advance_epoch();

    let inner = participant.protect();

    assert_eq!(inner.epoch(), epoch);
    drop(inner);
    assert!(participant.is_protected());
    assert!(!domain.is_safe_to_reclaim(epoch));

    drop(outer);
    assert!(!participant.is_protected());
    assert!(domain.is_safe_to_reclaim(epoch));
  }

  #[test]
  fn dropping_a_participant_deregisters() {
    let domain: Domain = Domain::new();
    let first = domain.register();
    let second = domain.register();

    assert_eq!(domain.participants(), 2);
    drop(first);
    assert_eq!(domain.participants(), 1);
    drop(second);
    assert_eq!(domain.participants(), 0);
  }

  #[test]
  fn advance_raises_reclaimable_epoch() {
    let domain: Domain = Domain::new();

    domain.advance_epoch();
    domain.advance_epoch();

    assert_eq!(domain.reclaimable_epoch(), domain.current_epoch() - 1);

    let participant = domain.register();
    let guard = participant.protect();
    let epoch: u64 = guard.epoch();

    domain.advance_epoch();
    domain.advance_epoch();

    assert_eq!(domain.reclaimable_epoch(), epoch - 1, "a guard caps the cached epoch");

    drop(guard);
    domain.advance_epoch();

    assert_eq!(domain.reclaimable_epoch(), domain.current_epoch() - 1);
  }

  #[test]
  fn reclaimable_epoch_is_monotonic() {
    let domain: Domain = Domain::new();

    for _ in 0..8 {
      domain.advance_epoch();
    }

    assert!(domain.is_safe_to_reclaim(4));
    let first: u64 = domain.reclaimable_epoch();

    let participant = domain.register();
    let _guard = participant.protect();

    assert!(!domain.is_safe_to_reclaim(domain.current_epoch()));
    assert!(domain.reclaimable_epoch() >= first);
    assert!(domain.is_safe_to_reclaim(4));
  }
}
