//! Locked slots handed out by `reserve`.

use core::fmt::Debug;
use core::fmt::Formatter;
use core::fmt::Result as FmtResult;
use core::mem;
use core::ptr;
use core::ptr::NonNull;

use crate::oracle::EpochOracle;
use crate::ring::Backing;
use crate::ring::Ring;
use crate::slot::Destructor;
use crate::slot::SlotIndex;
use crate::slot::drop_boxed;

/// Operations available on a slot the caller holds locked.
pub(crate) trait Claim {
  fn base(&self) -> usize;

  fn publish(&self, index: SlotIndex, object: NonNull<()>, destructor: Destructor, context: *mut ());

  fn stage(&self, index: SlotIndex, object: NonNull<()>, destructor: Destructor, context: *mut ());

  fn reset(&self, index: SlotIndex);
}

impl<O, B> Claim for Ring<O, B>
where
  O: EpochOracle,
  B: Backing,
{
  #[inline]
  fn base(&self) -> usize {
    Ring::base(self)
  }

  #[inline]
  fn publish(&self, index: SlotIndex, object: NonNull<()>, destructor: Destructor, context: *mut ()) {
    Ring::publish(self, index, object, destructor, context);
  }

  #[inline]
  fn stage(&self, index: SlotIndex, object: NonNull<()>, destructor: Destructor, context: *mut ()) {
    Ring::stage(self, index, object, destructor, context);
  }

  #[inline]
  fn reset(&self, index: SlotIndex) {
    Ring::reset(self, index);
  }
}

/// A slot held locked on behalf of the caller.
///
/// Any object the slot held before has already been reclaimed. The slot
/// stays invisible to producers and to `scavenge` until the reservation is
/// published or reset. Dropping the reservation resets it.
///
/// ```
/// use garbage_ring::Config;
/// use garbage_ring::GarbageList;
/// use garbage_ring::oracle::Unprotected;
///
/// let list: GarbageList<Unprotected> =
///   GarbageList::with_config(Config::new().oracle(Unprotected::new()).capacity(16)).unwrap();
///
/// let reservation = list.reserve();
/// reservation.retire(Box::new(String::from("unlinked")));
///
/// assert_eq!(list.live(), 1);
/// ```
#[must_use = "dropping a reservation immediately releases the slot"]
pub struct Reservation<'list> {
  claim: &'list dyn Claim,
  index: SlotIndex,
}

impl<'list> Reservation<'list> {
  #[inline]
  pub(crate) fn new(claim: &'list dyn Claim, index: SlotIndex) -> Self {
    Self { claim, index }
  }

  /// Returns the index of the reserved slot.
  #[inline]
  pub const fn index(&self) -> SlotIndex {
    self.index
  }

  /// Records `object` in the slot while keeping it locked.
  ///
  /// A staged object is not reclaimed by producers or `scavenge`, but it is
  /// destroyed when the list is drained or recovered. Staging again replaces
  /// the previous payload without destroying it.
  ///
  /// # Safety
  ///
  /// `destructor` must accept `context` and `object`, and `object` must stay
  /// valid until it is destroyed or the reservation is reset.
  #[inline]
  pub unsafe fn stage(&mut self, object: NonNull<()>, destructor: Destructor, context: *mut ()) {
    self.claim.stage(self.index, object, destructor, context);
  }

  /// Retires `object` into the reserved slot, stamped with the current epoch.
  ///
  /// # Safety
  ///
  /// `destructor` must accept `context` and `object`, and `object` must not
  /// be retired twice.
  #[inline]
  pub unsafe fn publish(self, object: NonNull<()>, destructor: Destructor, context: *mut ()) {
    self.claim.publish(self.index, object, destructor, context);
    mem::forget(self);
  }

  /// Retires a boxed value into the reserved slot.
  #[inline]
  pub fn retire<T>(self, value: Box<T>)
  where
    T: Send + 'static,
  {
    let object: NonNull<()> = NonNull::from(Box::leak(value)).cast();

    // SAFETY: `drop_boxed::<T>` reclaims exactly the box leaked above.
    unsafe {
      self.publish(object, drop_boxed::<T>, ptr::null_mut());
    }
  }

  /// Empties the slot without destroying anything it staged.
  #[inline]
  pub fn reset(self) {
    // Drop performs the reset.
  }

  /// Releases the guard but keeps the slot locked.
  ///
  /// The slot must later be returned with `reset_item`, or it stays out of
  /// rotation for the lifetime of the list.
  #[inline]
  pub fn into_held(self) -> HeldSlot {
    let held: HeldSlot = HeldSlot {
      base: self.claim.base(),
      index: self.index,
    };

    mem::forget(self);

    held
  }
}

impl Debug for Reservation<'_> {
  fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
    f.debug_struct("Reservation").field("index", &self.index).finish()
  }
}

impl Drop for Reservation<'_> {
  #[inline]
  fn drop(&mut self) {
    self.claim.reset(self.index);
  }
}

// -----------------------------------------------------------------------------
// Held Slot
// -----------------------------------------------------------------------------

/// A slot kept locked after its [`Reservation`] was released.
///
/// The only way to hand the slot back is to pass this token to `reset_item`
/// of the list it came from, which consumes it. Dropping the token leaves
/// the slot locked until the list is drained.
#[must_use = "a held slot stays locked until it is passed to `reset_item`"]
pub struct HeldSlot {
  base: usize,
  index: SlotIndex,
}

impl HeldSlot {
  /// Returns the index of the held slot.
  #[inline]
  pub const fn index(&self) -> SlotIndex {
    self.index
  }

  /// Consumes the token for the ring whose slot array starts at `base`.
  ///
  /// # Panics
  ///
  /// Panics if the slot was held in another ring.
  #[inline]
  pub(crate) fn into_index(self, base: usize) -> SlotIndex {
    assert!(self.base == base, "held slot {} belongs to another garbage list", self.index);

    self.index
  }
}

impl Debug for HeldSlot {
  fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
    f.debug_struct("HeldSlot").field("index", &self.index).finish()
  }
}
