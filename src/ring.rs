//! The reclamation ring shared by the volatile and durable lists.
//!
//! A [`Ring`] owns a power-of-two run of [`Slot`]s and a monotonic cursor.
//! Producers claim the slot under the cursor, reclaiming whatever it held if
//! the oracle allows, and stamp their object with the current epoch. How a
//! record reaches its slot is left to the [`Backing`]: the volatile list
//! stores it word by word, the durable list flushes it to its pool.

use core::fmt::Debug;
use core::fmt::Formatter;
use core::fmt::Result as FmtResult;
use core::ptr::NonNull;

use tracing::trace;

use crate::oracle::EpochOracle;
use crate::padded::CachePadded;
use crate::slot::Destructor;
use crate::slot::EMPTY;
use crate::slot::Epoch;
use crate::slot::LOCKED;
use crate::slot::Record;
use crate::slot::Slot;
use crate::slot::SlotIndex;
use crate::spin;
use crate::sync::atomic::AtomicUsize;
use crate::sync::atomic::Ordering::Relaxed;

/// Storage holding the slots of a [`Ring`].
pub(crate) trait Backing {
  /// Returns every slot, in ring order.
  fn slots(&self) -> &[Slot];

  /// Makes `record` the content of `slot`.
  ///
  /// The caller holds `slot` locked or has exclusive access to the ring.
  fn publish(&self, slot: &Slot, record: Record);
}

// -----------------------------------------------------------------------------
// Ring
// -----------------------------------------------------------------------------

pub(crate) struct Ring<O, B> {
  cursor: CachePadded<AtomicUsize>,
  mask: usize,
  oracle: O,
  backing: B,
}

impl<O, B> Ring<O, B>
where
  O: EpochOracle,
  B: Backing,
{
  #[inline]
  pub(crate) fn new(oracle: O, backing: B) -> Self {
    let length: usize = backing.slots().len();

    debug_assert!(length.is_power_of_two(), "Ring::new requires a power-of-two slot count");

    Self {
      cursor: CachePadded::new(AtomicUsize::new(0)),
      mask: length - 1,
      oracle,
      backing,
    }
  }

  #[inline]
  pub(crate) const fn capacity(&self) -> usize {
    self.mask + 1
  }

  #[inline]
  pub(crate) const fn oracle(&self) -> &O {
    &self.oracle
  }

  /// Returns the address of the slot array, which identifies the ring.
  #[inline]
  pub(crate) fn base(&self) -> usize {
    self.backing.slots().as_ptr().addr()
  }

  #[inline]
  pub(crate) fn cursor(&self) -> usize {
    self.cursor.load(Relaxed)
  }

  #[inline]
  pub(crate) fn slot(&self, index: SlotIndex) -> &Slot {
    let slots: &[Slot] = self.backing.slots();

    assert!(
      index.get() < slots.len(),
      "slot index {index} out of range for a ring of {} slots",
      slots.len(),
    );

    &slots[index.get()]
  }

  /// Returns the number of slots holding a retired object.
  pub(crate) fn live(&self) -> usize {
    self
      .backing
      .slots()
      .iter()
      .filter(|slot| !matches!(slot.epoch(), EMPTY | LOCKED))
      .count()
  }

  // ---------------------------------------------------------------------------
  // Acquisition
  // ---------------------------------------------------------------------------

  /// Claims the next reusable slot.
  ///
  /// On return the slot is locked and holds no payload. If it held an object
  /// retired in a quiesced epoch, that object has been destroyed.
  pub(crate) fn acquire(&self) -> SlotIndex {
    loop {
      let index: usize = self.cursor.fetch_add(1, Relaxed) & self.mask;

      // Four advances per lap keep epochs moving without a dedicated thread.
      if (index << 2) & self.mask == 0 {
        self.oracle.advance_epoch();
      }

      let slot: &Slot = &self.backing.slots()[index];
      let prior: Epoch = slot.epoch();

      if prior == LOCKED || !slot.try_lock(prior) {
        spin();
        continue;
      }

      if prior == EMPTY {
        return SlotIndex::new(index);
      }

      if !self.oracle.is_safe_to_reclaim(prior) {
        slot.unlock(prior);
        trace!(index, epoch = prior, "slot not yet reclaimable");
        spin();
        continue;
      }

      let record: Record = slot.load();

      // Clear before destroying: a crash in between leaks the object rather
      // than leaving it to be destroyed a second time.
      self.backing.publish(slot, Record::LOCKED);

      // SAFETY: The record was copied out under the slot lock and the slot
      // no longer refers to it.
      unsafe {
        record.destroy();
      }

      return SlotIndex::new(index);
    }
  }

  /// Retires `object`, reclaiming at most one older object to make room.
  ///
  /// # Safety
  ///
  /// `destructor` must accept `context` and `object`, and `object` must not
  /// be retired twice.
  #[inline]
  pub(crate) unsafe fn push(&self, object: NonNull<()>, destructor: Destructor, context: *mut ()) {
    let index: SlotIndex = self.acquire();

    self.publish(index, object, destructor, context);
  }

  /// Stamps a locked slot with the current epoch, making it live.
  #[inline]
  pub(crate) fn publish(
    &self,
    index: SlotIndex,
    object: NonNull<()>,
    destructor: Destructor,
    context: *mut (),
  ) {
    let epoch: Epoch = self.oracle.current_epoch();

    debug_assert!(
      epoch != EMPTY && epoch != LOCKED,
      "EpochOracle::current_epoch returned reserved epoch {epoch}",
    );

    let slot: &Slot = self.locked(index);
    let record: Record = Record::new(epoch, Some(destructor), context, object.as_ptr());

    self.backing.publish(slot, record);
  }

  /// Writes a payload into a locked slot without making it live.
  #[inline]
  pub(crate) fn stage(
    &self,
    index: SlotIndex,
    object: NonNull<()>,
    destructor: Destructor,
    context: *mut (),
  ) {
    let slot: &Slot = self.locked(index);
    let record: Record = Record::new(LOCKED, Some(destructor), context, object.as_ptr());

    self.backing.publish(slot, record);
  }

  /// Returns a locked slot to the empty state without destroying anything.
  ///
  /// # Panics
  ///
  /// Panics if the slot is not locked.
  #[inline]
  pub(crate) fn reset(&self, index: SlotIndex) {
    let slot: &Slot = self.locked(index);

    self.backing.publish(slot, Record::EMPTY);
  }

  #[inline]
  fn locked(&self, index: SlotIndex) -> &Slot {
    let slot: &Slot = self.slot(index);

    assert!(slot.is_locked(), "slot {index} is not locked");

    slot
  }

  // ---------------------------------------------------------------------------
  // Sweeping
  // ---------------------------------------------------------------------------

  /// Reclaims every slot whose epoch has quiesced.
  ///
  /// Empty and locked slots are skipped, as are slots lost to a racing
  /// producer. Returns the number of objects destroyed.
  pub(crate) fn scavenge(&self) -> usize {
    let mut reclaimed: usize = 0;

    for slot in self.backing.slots() {
      let prior: Epoch = slot.epoch();

      if prior == EMPTY || prior == LOCKED || !slot.try_lock(prior) {
        continue;
      }

      if !self.oracle.is_safe_to_reclaim(prior) {
        slot.unlock(prior);
        continue;
      }

      let record: Record = slot.load();

      self.backing.publish(slot, Record::EMPTY);

      // SAFETY: Copied out under the slot lock; the slot is empty again.
      if unsafe { record.destroy() } {
        reclaimed += 1;
      }
    }

    trace!(reclaimed, "scavenged garbage ring");

    reclaimed
  }

  /// Destroys every recorded object regardless of epoch and empties the ring.
  ///
  /// Abandoned locked slots are emptied too. Returns the number of objects
  /// destroyed.
  pub(crate) fn drain(&mut self) -> usize {
    let mut destroyed: usize = 0;

    for slot in self.backing.slots() {
      let record: Record = slot.load();

      if record == Record::EMPTY {
        continue;
      }

      self.backing.publish(slot, Record::EMPTY);

      // SAFETY: `&mut self` excludes every other thread, and the slot no
      // longer refers to the object.
      if unsafe { record.destroy() } {
        destroyed += 1;
      }
    }

    self.cursor.store(0, Relaxed);

    destroyed
  }
}

impl<O, B> Debug for Ring<O, B>
where
  O: EpochOracle,
  B: Backing,
{
  fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
    f.debug_struct("Ring")
      .field("capacity", &self.capacity())
      .field("cursor", &self.cursor())
      .field("live", &self.live())
      .finish()
  }
}
