//! Reclamation records and their lock word.
//!
//! A slot is four pointer-sized words. The first, `epoch`, doubles as the
//! slot's lock: `0` means empty, [`LOCKED`] means some thread owns the
//! payload, and anything in between is the epoch in which the payload was
//! retired.

use core::fmt::Debug;
use core::fmt::Display;
use core::fmt::Formatter;
use core::fmt::Result as FmtResult;
use core::mem;

use crate::sync::atomic::AtomicU64;
use crate::sync::atomic::Ordering::AcqRel;
use crate::sync::atomic::Ordering::Acquire;
use crate::sync::atomic::Ordering::Relaxed;
use crate::sync::atomic::Ordering::Release;

/// A logical timestamp supplied by an [`EpochOracle`].
///
/// [`EpochOracle`]: crate::oracle::EpochOracle
pub type Epoch = u64;

/// Epoch of a slot that holds nothing.
pub const EMPTY: Epoch = 0;

/// Epoch of a slot that is mid-transition.
pub const LOCKED: Epoch = Epoch::MAX;

/// Size of one slot record, in bytes.
pub const SLOT_BYTES: usize = 32;

/// Reclaims a retired object.
///
/// Invoked exactly once, on the reclaiming thread, with the context and
/// object pointers given when the object was retired. It must release
/// everything `object` owns, including its backing memory.
///
/// # Safety
///
/// Callers of the garbage list vouch that the destructor accepts the paired
/// `context` and `object`.
pub type Destructor = unsafe fn(context: *mut (), object: *mut ());

// -----------------------------------------------------------------------------
// Record
// -----------------------------------------------------------------------------

/// A plain copy of a slot's four words.
///
/// Laid out exactly like [`Slot`] so a whole record can be published with a
/// single wide store.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(C, align(32))]
pub(crate) struct Record {
  pub(crate) epoch: u64,
  pub(crate) destructor: u64,
  pub(crate) context: u64,
  pub(crate) object: u64,
}

const _: () = assert!(size_of::<Record>() == SLOT_BYTES);
const _: () = assert!(align_of::<Record>() == SLOT_BYTES);

impl Record {
  pub(crate) const EMPTY: Self = Self::bare(EMPTY);

  /// A locked slot with no payload: reserved, or mid-reclaim.
  pub(crate) const LOCKED: Self = Self::bare(LOCKED);

  #[inline]
  const fn bare(epoch: Epoch) -> Self {
    Self {
      epoch,
      destructor: 0,
      context: 0,
      object: 0,
    }
  }

  #[inline]
  pub(crate) fn new(
    epoch: Epoch,
    destructor: Option<Destructor>,
    context: *mut (),
    object: *mut (),
  ) -> Self {
    Self {
      epoch,
      destructor: match destructor {
        Some(function) => function as usize as u64,
        None => 0,
      },
      context: context as usize as u64,
      object: object as usize as u64,
    }
  }

  #[inline]
  pub(crate) const fn is_occupied(&self) -> bool {
    self.object != 0
  }

  #[inline]
  pub(crate) fn destructor(&self) -> Option<Destructor> {
    // SAFETY: The word was written by `Record::new` from an
    // `Option<Destructor>`, whose niche makes `0` the `None` pattern.
    unsafe { mem::transmute::<usize, Option<Destructor>>(self.destructor as usize) }
  }

  #[inline]
  pub(crate) fn context(&self) -> *mut () {
    self.context as usize as *mut ()
  }

  #[inline]
  pub(crate) fn object(&self) -> *mut () {
    self.object as usize as *mut ()
  }

  /// Runs the destructor on the recorded object.
  ///
  /// Returns `false`, doing nothing, if the record holds no object.
  ///
  /// # Safety
  ///
  /// The caller must own the payload: it was copied out of a slot the caller
  /// held locked, and no other copy will be destroyed.
  #[inline]
  pub(crate) unsafe fn destroy(self) -> bool {
    if !self.is_occupied() {
      return false;
    }

    debug_assert!(
      self.destructor().is_some(),
      "Record::destroy requires a destructor for occupied records",
    );

    if let Some(destructor) = self.destructor() {
      // SAFETY: Caller owns the payload; the pairing was vouched for when it
      // was retired.
      unsafe { destructor(self.context(), self.object()) }
    }

    true
  }
}

impl Debug for Record {
  fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
    f.debug_struct("Record")
      .field("epoch", &self.epoch)
      .field("destructor", &format_args!("{:#x}", self.destructor))
      .field("context", &format_args!("{:#x}", self.context))
      .field("object", &format_args!("{:#x}", self.object))
      .finish()
  }
}

// -----------------------------------------------------------------------------
// Slot
// -----------------------------------------------------------------------------

/// Shared storage for one [`Record`].
///
/// Only `epoch` is contended. The payload words are read and written by the
/// thread holding the slot locked, or under exclusive access.
#[repr(C, align(32))]
pub(crate) struct Slot {
  pub(crate) epoch: AtomicU64,
  pub(crate) destructor: AtomicU64,
  pub(crate) context: AtomicU64,
  pub(crate) object: AtomicU64,
}

#[cfg(not(any(loom, shuttle)))]
const _: () = assert!(size_of::<Slot>() == size_of::<Record>());

impl Slot {
  #[inline]
  pub(crate) fn new() -> Self {
    Self {
      epoch: AtomicU64::new(EMPTY),
      destructor: AtomicU64::new(0),
      context: AtomicU64::new(0),
      object: AtomicU64::new(0),
    }
  }

  /// Loads the slot's epoch with acquire ordering.
  #[inline]
  pub(crate) fn epoch(&self) -> Epoch {
    self.epoch.load(Acquire)
  }

  /// Attempts to move the slot from `prior` to [`LOCKED`].
  #[inline]
  pub(crate) fn try_lock(&self, prior: Epoch) -> bool {
    debug_assert!(prior != LOCKED, "Slot::try_lock requires an unlocked epoch");

    self.epoch.compare_exchange(prior, LOCKED, AcqRel, Relaxed).is_ok()
  }

  /// Releases the lock without touching the payload.
  #[inline]
  pub(crate) fn unlock(&self, epoch: Epoch) {
    debug_assert!(self.is_locked(), "Slot::unlock requires a locked slot");

    self.epoch.store(epoch, Release);
  }

  #[inline]
  pub(crate) fn is_locked(&self) -> bool {
    self.epoch.load(Relaxed) == LOCKED
  }

  /// Copies the payload out of the slot.
  ///
  /// The caller must hold the lock or have exclusive access.
  #[inline]
  pub(crate) fn load(&self) -> Record {
    Record {
      epoch: self.epoch.load(Relaxed),
      destructor: self.destructor.load(Relaxed),
      context: self.context.load(Relaxed),
      object: self.object.load(Relaxed),
    }
  }

  /// Writes the payload words, then releases `record.epoch`.
  ///
  /// The caller must hold the lock or have exclusive access.
  #[inline]
  pub(crate) fn store(&self, record: Record) {
    self.destructor.store(record.destructor, Relaxed);
    self.context.store(record.context, Relaxed);
    self.object.store(record.object, Relaxed);
    self.epoch.store(record.epoch, Release);
  }
}

impl Debug for Slot {
  fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
    Debug::fmt(&self.load(), f)
  }
}

// -----------------------------------------------------------------------------
// Slot Index
// -----------------------------------------------------------------------------

/// Identifies a slot within a garbage list.
///
/// Reported by [`Reservation::index`] and [`HeldSlot::index`]. An index on
/// its own grants nothing: slots are handed back through a [`HeldSlot`].
///
/// [`HeldSlot`]: crate::reserve::HeldSlot
/// [`HeldSlot::index`]: crate::reserve::HeldSlot::index
/// [`Reservation::index`]: crate::reserve::Reservation::index
#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct SlotIndex {
  index: usize,
}

impl SlotIndex {
  #[inline]
  pub(crate) const fn new(index: usize) -> Self {
    Self { index }
  }

  /// Returns the position of the slot in the ring.
  #[inline]
  pub const fn get(self) -> usize {
    self.index
  }
}

impl Debug for SlotIndex {
  fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
    Debug::fmt(&self.index, f)
  }
}

impl Display for SlotIndex {
  fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
    Display::fmt(&self.index, f)
  }
}

// -----------------------------------------------------------------------------
// Typed Destructors
// -----------------------------------------------------------------------------

/// Destructor for objects retired as `Box<T>`.
///
/// # Safety
///
/// `object` must come from `Box::<T>::into_raw` and not have been freed.
pub(crate) unsafe fn drop_boxed<T>(_context: *mut (), object: *mut ()) {
  // SAFETY: Guaranteed by the caller.
  drop(unsafe { Box::from_raw(object.cast::<T>()) });
}
