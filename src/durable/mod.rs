//! Crash-consistent garbage list on durable memory.
//!
//! The slot array lives in a region borrowed from a [`Pool`]. Every record
//! is published so that a crash at any instant leaves each slot either in
//! its old state or its new one, never an object paired with a foreign
//! destructor. After a restart, [`DurableGarbageList::recover`] destroys
//! whatever the previous run left behind.
//!
//! Destructor words are code addresses. They are only meaningful to a
//! process running the same executable image, so a region must be recovered
//! by the program that wrote it.

mod pool;

use core::fmt::Debug;
use core::fmt::Formatter;
use core::fmt::Result as FmtResult;
use core::ptr;
use core::ptr::NonNull;
use core::slice;

use tracing::debug;
use tracing::info;

use crate::error::Error;
use crate::oracle::EpochOracle;
use crate::params::CACHE_LINE;
use crate::params::Capacity;
use crate::params::Config;
use crate::reserve::HeldSlot;
use crate::reserve::Reservation;
use crate::ring::Backing;
use crate::ring::Ring;
use crate::slot::Destructor;
use crate::slot::Record;
use crate::slot::Slot;
use crate::slot::drop_boxed;
use crate::sync::atomic::AtomicU64;
use crate::sync::atomic::Ordering::Relaxed;
use crate::sync::atomic::Ordering::Release;

pub use self::pool::HeapPool;
pub use self::pool::Pool;
pub use self::pool::PoolError;
pub use self::pool::Region;

/// Returns the region size needed for `capacity` slots.
///
/// The slot array starts at the first cache-line boundary of the region, so
/// one line is reserved for whatever padding the pool's alignment requires.
#[inline]
pub const fn region_len(capacity: Capacity) -> usize {
  capacity.bytes() + CACHE_LINE
}

// -----------------------------------------------------------------------------
// Publication
// -----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Publication {
  /// One 32-byte non-temporal store, then a store fence.
  #[cfg(target_arch = "x86_64")]
  Stream,
  /// Word by word, persisting after each step.
  Ordered,
}

impl Publication {
  fn detect() -> Self {
    #[cfg(target_arch = "x86_64")]
    if std::is_x86_feature_detected!("avx") {
      return Self::Stream;
    }

    Self::Ordered
  }
}

/// Writes `record` into `slot` with a single 32-byte streaming store.
///
/// # Safety
///
/// The CPU must support AVX, `slot` must be 32-byte aligned, and the caller
/// must hold the slot locked or have exclusive access.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx")]
unsafe fn stream(slot: &Slot, record: Record) {
  use core::arch::x86_64::__m256i;
  use core::arch::x86_64::_mm_sfence;
  use core::arch::x86_64::_mm256_set_epi64x;
  use core::arch::x86_64::_mm256_stream_si256;

  let value: __m256i = _mm256_set_epi64x(
    record.object as i64,
    record.context as i64,
    record.destructor as i64,
    record.epoch as i64,
  );

  let target: *mut __m256i = ptr::from_ref(slot).cast_mut().cast();

  // SAFETY: `Slot` is `repr(C, align(32))` with the same field order as
  // `Record`. Competing threads only touch the epoch word, and every lane of
  // the store is an aligned 8-byte write.
  unsafe {
    _mm256_stream_si256(target, value);
  }

  _mm_sfence();
}

// -----------------------------------------------------------------------------
// Durable Backing
// -----------------------------------------------------------------------------

pub(crate) struct Durable<P>
where
  P: Pool,
{
  pool: P,
  region: Region,
  slots: NonNull<Slot>,
  length: usize,
  publication: Publication,
}

// SAFETY: The slots are atomics in pool memory that outlives the list; the
// pool itself is shared only if it is `Sync`.
unsafe impl<P> Send for Durable<P> where P: Pool + Send {}

// SAFETY: As above.
unsafe impl<P> Sync for Durable<P> where P: Pool + Sync {}

impl<P> Durable<P>
where
  P: Pool,
{
  #[inline]
  fn persist(&self, word: &AtomicU64, words: usize) {
    self.pool.persist(NonNull::from(word).cast(), words * size_of::<u64>());
  }

  fn publish_ordered(&self, slot: &Slot, record: Record) {
    // Unhook the old object first so no step pairs it with a new destructor.
    slot.object.store(0, Relaxed);
    self.persist(&slot.object, 1);

    slot.destructor.store(record.destructor, Relaxed);
    slot.context.store(record.context, Relaxed);
    self.persist(&slot.destructor, 2);

    slot.object.store(record.object, Relaxed);
    self.persist(&slot.object, 1);

    slot.epoch.store(record.epoch, Release);
    self.persist(&slot.epoch, 1);
  }
}

impl<P> Backing for Durable<P>
where
  P: Pool,
{
  #[inline]
  fn slots(&self) -> &[Slot] {
    // SAFETY: `open` checked that the region holds `length` aligned slots,
    // and every bit pattern is a valid `Slot`.
    unsafe { slice::from_raw_parts(self.slots.as_ptr(), self.length) }
  }

  #[inline]
  fn publish(&self, slot: &Slot, record: Record) {
    match self.publication {
      #[cfg(target_arch = "x86_64")]
      Publication::Stream => {
        // SAFETY: `Stream` is only selected when AVX is detected, slots are
        // 32-byte aligned, and `Backing::publish` callers hold the slot.
        unsafe {
          stream(slot, record);
        }

        self.persist(&slot.epoch, 4);
      }
      Publication::Ordered => self.publish_ordered(slot, record),
    }
  }
}

impl<P> Drop for Durable<P>
where
  P: Pool,
{
  fn drop(&mut self) {
    self.pool.release(self.region);
  }
}

// -----------------------------------------------------------------------------
// Durable Garbage List
// -----------------------------------------------------------------------------

/// A garbage list whose slots survive a crash.
///
/// Behaves like [`GarbageList`] once open. A list reopened on a region that
/// a previous run used must be [`recover`]ed before anything else; every
/// other operation panics until then.
///
/// [`GarbageList`]: crate::list::GarbageList
/// [`recover`]: DurableGarbageList::recover
pub struct DurableGarbageList<O, P>
where
  O: EpochOracle,
  P: Pool,
{
  ring: Option<Ring<O, Durable<P>>>,
  recovering: bool,
}

impl<O, P> DurableGarbageList<O, P>
where
  O: EpochOracle,
  P: Pool,
{
  /// Opens the list on `pool`, creating its region on first use.
  ///
  /// A freshly created region starts with every slot empty. An existing
  /// region is left untouched and the list starts in the recovery state.
  ///
  /// # Errors
  ///
  /// Returns [`Error::MissingOracle`] or [`Error::InvalidCapacity`] for a bad
  /// config and [`Error::Pool`] if the pool cannot supply a region of the
  /// required size.
  pub fn open(config: Config<O>, pool: P) -> Result<Self, Error> {
    let (oracle, capacity): (O, Capacity) = config.validate()?;
    let region: Region = pool.region(region_len(capacity))?;

    let offset: usize = region.base().as_ptr().align_offset(CACHE_LINE);
    let required: usize = offset.saturating_add(capacity.bytes());

    if required > region.len() {
      pool.release(region);

      return Err(Error::Pool(PoolError::TooSmall {
        len: region.len(),
        required,
      }));
    }

    // SAFETY: `offset + capacity.bytes()` is within the region.
    let slots: NonNull<Slot> = unsafe { region.base().add(offset).cast() };
    let publication: Publication = Publication::detect();
    let recovering: bool = !region.is_fresh();

    debug!(
      capacity = capacity.as_usize(),
      offset,
      fresh = region.is_fresh(),
      ?publication,
      "opened durable garbage list"
    );

    let backing: Durable<P> = Durable {
      pool,
      region,
      slots,
      length: capacity.as_usize(),
      publication,
    };

    Ok(Self {
      ring: Some(Ring::new(oracle, backing)),
      recovering,
    })
  }

  /// Returns `true` if the list was reopened and not yet recovered.
  #[inline]
  pub const fn needs_recovery(&self) -> bool {
    self.recovering
  }

  /// Destroys every object left in the region and empties every slot.
  ///
  /// Objects are destroyed regardless of epoch, including those staged in
  /// reservations that were never published. Slots abandoned while locked
  /// are emptied. The cursor restarts at zero. Returns the number of objects
  /// destroyed.
  ///
  /// Calling this on a list that does not need recovery drains it all the
  /// same.
  pub fn recover(&mut self) -> usize {
    let Some(ref mut ring) = self.ring else {
      return 0;
    };

    let reclaimed: usize = ring.drain();

    self.recovering = false;

    info!(reclaimed, capacity = ring.capacity(), "recovered durable garbage list");

    reclaimed
  }

  /// Destroys every retired object and releases the region.
  ///
  /// The region stays in the pool, all slots empty. Returns the number of
  /// objects destroyed.
  pub fn uninitialize(&mut self) -> usize {
    let Some(mut ring) = self.ring.take() else {
      return 0;
    };

    let destroyed: usize = ring.drain();

    self.recovering = false;

    debug!(capacity = ring.capacity(), destroyed, "closed durable garbage list");

    destroyed
  }

  /// Releases the region without destroying anything, as a crash would.
  ///
  /// Retired objects and staged reservations stay in the region for the
  /// next [`recover`](DurableGarbageList::recover) on the same pool.
  pub fn abandon(mut self) {
    if let Some(ring) = self.ring.take() {
      debug!(capacity = ring.capacity(), live = ring.live(), "abandoned durable garbage list");
    }
  }

  /// Returns `true` until the list is uninitialized.
  #[inline]
  pub const fn is_initialized(&self) -> bool {
    self.ring.is_some()
  }

  /// Returns the number of slots, or `0` if uninitialized.
  #[inline]
  pub fn capacity(&self) -> usize {
    self.ring.as_ref().map_or(0, Ring::capacity)
  }

  /// Returns the bound oracle, if initialized.
  #[inline]
  pub fn oracle(&self) -> Option<&O> {
    self.ring.as_ref().map(Ring::oracle)
  }

  /// Returns the number of slots holding a retired object.
  #[inline]
  pub fn live(&self) -> usize {
    self.ring.as_ref().map_or(0, Ring::live)
  }

  /// Durably retires `object`.
  ///
  /// # Safety
  ///
  /// Same contract as [`GarbageList::push`]. In addition, `destructor` and
  /// `context` must still be valid when a later run of the same program
  /// recovers the region.
  ///
  /// # Panics
  ///
  /// Panics if the list is uninitialized or needs recovery.
  ///
  /// [`GarbageList::push`]: crate::list::GarbageList::push
  #[inline]
  pub unsafe fn push(&self, object: NonNull<()>, destructor: Destructor, context: *mut ()) {
    // SAFETY: Guaranteed by the caller.
    unsafe {
      self.ring().push(object, destructor, context);
    }
  }

  /// Durably retires a boxed value.
  ///
  /// # Panics
  ///
  /// Panics if the list is uninitialized or needs recovery.
  #[inline]
  pub fn retire<T>(&self, value: Box<T>)
  where
    T: Send + 'static,
  {
    let object: NonNull<()> = NonNull::from(Box::leak(value)).cast();

    // SAFETY: `drop_boxed::<T>` reclaims exactly the box leaked above.
    unsafe {
      self.push(object, drop_boxed::<T>, ptr::null_mut());
    }
  }

  /// Claims a slot and hands it back locked.
  ///
  /// Staging an allocation in the reservation before linking it makes a
  /// crash in between reclaim the allocation on recovery.
  ///
  /// # Panics
  ///
  /// Panics if the list is uninitialized or needs recovery.
  #[inline]
  pub fn reserve(&self) -> Reservation<'_> {
    let ring: &Ring<O, Durable<P>> = self.ring();

    Reservation::new(ring, ring.acquire())
  }

  /// Empties a slot kept locked by [`Reservation::into_held`].
  ///
  /// Nothing staged in the slot is destroyed.
  ///
  /// # Panics
  ///
  /// Panics if the list is uninitialized or needs recovery, if `held` came from another
  /// list, or if the slot is no longer locked.
  #[inline]
  pub fn reset_item(&self, held: HeldSlot) {
    let ring: &Ring<O, Durable<P>> = self.ring();

    ring.reset(held.into_index(ring.base()));
  }

  /// Destroys every object whose epoch has quiesced.
  ///
  /// # Panics
  ///
  /// Panics if the list is uninitialized or needs recovery.
  #[inline]
  pub fn scavenge(&self) -> usize {
    self.ring().scavenge()
  }

  /// Returns the number of slot claims since the list was opened or last
  /// recovered.
  #[inline]
  pub fn cursor(&self) -> usize {
    self.ring.as_ref().map_or(0, Ring::cursor)
  }

  #[inline]
  fn ring(&self) -> &Ring<O, Durable<P>> {
    assert!(!self.recovering, "durable garbage list must be recovered before use");

    match self.ring {
      Some(ref ring) => ring,
      None => panic!("durable garbage list is not initialized"),
    }
  }
}

impl<O, P> Debug for DurableGarbageList<O, P>
where
  O: EpochOracle,
  P: Pool,
{
  fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
    match self.ring {
      Some(ref ring) => f
        .debug_struct("DurableGarbageList")
        .field("ring", ring)
        .field("recovering", &self.recovering)
        .finish(),
      None => f.write_str("DurableGarbageList(<uninitialized>)"),
    }
  }
}

impl<O, P> Drop for DurableGarbageList<O, P>
where
  O: EpochOracle,
  P: Pool,
{
  fn drop(&mut self) {
    self.uninitialize();
  }
}

#[cfg(test)]
mod tests {
  use core::ptr::NonNull;

  use crate::durable::Durable;
  use crate::durable::HeapPool;
  use crate::durable::Pool;
  use crate::durable::PoolError;
  use crate::durable::Publication;
  use crate::durable::Region;
  use crate::params::CACHE_LINE;
  use crate::ring::Backing;
  use crate::slot::LOCKED;
  use crate::slot::Record;
  use crate::slot::Slot;
  use crate::sync::Mutex;

  const RECORD: Record = Record {
    epoch: 9,
    destructor: 0x1000,
    context: 0x2000,
    object: 0x3000,
  };

  /// Remembers every byte range it was asked to persist.
  struct Recording {
    inner: HeapPool,
    persisted: Mutex<Vec<(usize, usize)>>,
  }

  impl Recording {
    fn new() -> Self {
      Self {
        inner: HeapPool::new(),
        persisted: Mutex::new(Vec::new()),
      }
    }

    fn covers(&self, word: usize) -> bool {
      self
        .persisted
        .lock()
        .iter()
        .any(|&(start, len)| start <= word && word + 8 <= start + len)
    }

    fn clear(&self) {
      self.persisted.lock().clear();
    }
  }

  impl Pool for Recording {
    fn region(&self, len: usize) -> Result<Region, PoolError> {
      self.inner.region(len)
    }

    fn persist(&self, addr: NonNull<u8>, len: usize) {
      self.persisted.lock().push((addr.as_ptr() as usize, len));
      self.inner.persist(addr, len);
    }

    fn release(&self, region: Region) {
      self.inner.release(region);
    }
  }

  fn backing<P>(pool: P, publication: Publication) -> Durable<P>
  where
    P: Pool,
  {
    let region: Region = pool.region(4 * 32 + CACHE_LINE).unwrap();
    let offset: usize = region.base().as_ptr().align_offset(CACHE_LINE);

    Durable {
      pool,
      region,
      // SAFETY: The region holds four slots past `offset`.
      slots: unsafe { region.base().add(offset).cast::<Slot>() },
      length: 4,
      publication,
    }
  }

  fn publications() -> Vec<Publication> {
    let mut modes: Vec<Publication> = vec![Publication::Ordered];

    if Publication::detect() != Publication::Ordered {
      modes.push(Publication::detect());
    }

    modes
  }

  fn words(slot: &Slot) -> [usize; 4] {
    let base: usize = NonNull::from(slot).as_ptr() as usize;

    [base, base + 8, base + 16, base + 24]
  }

  #[test]
  fn slots_start_on_a_cache_line() {
    let pool: HeapPool = HeapPool::new();
    let backing: Durable<&HeapPool> = backing(&pool, Publication::Ordered);
    let address: usize = NonNull::from(&backing.slots()[0]).as_ptr() as usize;

    assert_eq!(address % CACHE_LINE, 0);
  }

  #[test]
  fn publication_writes_every_word() {
    for publication in publications() {
      let pool: HeapPool = HeapPool::new();
      let backing: Durable<&HeapPool> = backing(&pool, publication);
      let slot: &Slot = &backing.slots()[1];

      assert!(slot.try_lock(0));
      backing.publish(slot, RECORD);

      assert_eq!(slot.load(), RECORD, "{publication:?}");

      assert!(slot.try_lock(9));
      backing.publish(slot, Record::LOCKED);

      assert_eq!(slot.load(), Record::LOCKED, "{publication:?}");
      assert_eq!(slot.epoch(), LOCKED);

      backing.publish(slot, Record::EMPTY);

      assert_eq!(slot.load(), Record::EMPTY, "{publication:?}");
    }
  }

  #[test]
  fn publication_persists_every_word() {
    for publication in publications() {
      let pool: Recording = Recording::new();
      let backing: Durable<&Recording> = backing(&pool, publication);
      let slot: &Slot = &backing.slots()[2];

      assert!(slot.try_lock(0));
      backing.publish(slot, RECORD);

      for word in words(slot) {
        assert!(pool.covers(word), "{publication:?} left word {word:#x} unpersisted");
      }

      pool.clear();

      // The clear that precedes a destructor call must reach the media too.
      assert!(slot.try_lock(9));
      backing.publish(slot, Record::LOCKED);

      assert!(
        pool.covers(words(slot)[0]),
        "{publication:?} left the locked epoch unpersisted",
      );
    }
  }

  #[test]
  fn backing_releases_its_region() {
    let pool: HeapPool = HeapPool::new();
    let backing: Durable<&HeapPool> = backing(&pool, Publication::Ordered);

    assert!(pool.is_leased());
    assert_eq!(pool.region(4 * 32 + CACHE_LINE).unwrap_err(), PoolError::InUse);

    drop(backing);

    assert!(!pool.is_leased());
    assert!(!pool.region(4 * 32 + CACHE_LINE).unwrap().is_fresh());
  }
}
