use core::fmt::Debug;
use core::fmt::Formatter;
use core::fmt::Result as FmtResult;
use core::ptr;
use core::ptr::NonNull;

use tracing::debug;

use crate::array::Array;
use crate::error::Error;
use crate::oracle::EpochOracle;
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

impl Backing for Array<Slot> {
  #[inline]
  fn slots(&self) -> &[Slot] {
    self.as_slice()
  }

  #[inline]
  fn publish(&self, slot: &Slot, record: Record) {
    slot.store(record);
  }
}

// -----------------------------------------------------------------------------
// Garbage List
// -----------------------------------------------------------------------------

/// A fixed-capacity ring of retired objects awaiting safe reclamation.
///
/// Every retirement claims the next slot of the ring. If that slot still
/// holds an object from an epoch the oracle reports as quiesced, the object
/// is destroyed on the spot; otherwise the producer moves on to the next
/// slot. The list never blocks and never grows: under sustained pressure
/// with no quiesced epochs, producers spin.
///
/// A list starts uninitialized. Every operation other than [`initialize`],
/// [`uninitialize`] and the accessors panics until it is initialized.
///
/// # Examples
///
/// ```
/// use garbage_ring::Config;
/// use garbage_ring::GarbageList;
/// use garbage_ring::oracle::Unprotected;
///
/// let mut list: GarbageList<Unprotected> = GarbageList::new();
///
/// list.initialize(Config::new().oracle(Unprotected::new()).capacity(1024)).unwrap();
/// list.retire(Box::new(vec![1, 2, 3]));
///
/// assert_eq!(list.live(), 1);
/// assert_eq!(list.uninitialize(), 1);
/// ```
///
/// [`initialize`]: GarbageList::initialize
/// [`uninitialize`]: GarbageList::uninitialize
pub struct GarbageList<O>
where
  O: EpochOracle,
{
  ring: Option<Ring<O, Array<Slot>>>,
}

impl<O> GarbageList<O>
where
  O: EpochOracle,
{
  /// Creates an uninitialized list.
  #[inline]
  pub const fn new() -> Self {
    Self { ring: None }
  }

  /// Creates and initializes a list.
  ///
  /// # Errors
  ///
  /// See [`initialize`](GarbageList::initialize).
  #[inline]
  pub fn with_config(config: Config<O>) -> Result<Self, Error> {
    let mut this: Self = Self::new();

    this.initialize(config)?;

    Ok(this)
  }

  /// Allocates the slot array and binds the oracle.
  ///
  /// Initializing an initialized list is a no-op and the config is dropped.
  ///
  /// # Errors
  ///
  /// Returns [`Error::MissingOracle`] or [`Error::InvalidCapacity`] for a bad
  /// config and [`Error::Allocation`] if the slot array cannot be allocated.
  /// The list stays uninitialized on error.
  ///
  /// # Panics
  ///
  /// Panics if the list is already initialized with a different capacity.
  pub fn initialize(&mut self, config: Config<O>) -> Result<(), Error> {
    if let Some(ref ring) = self.ring {
      assert_eq!(
        ring.capacity(),
        config.requested_capacity(),
        "garbage list re-initialized with a different capacity",
      );

      return Ok(());
    }

    let (oracle, capacity): (O, Capacity) = config.validate()?;
    let slots: Array<Slot> = Array::new(capacity, |_| Slot::new())?;

    debug!(capacity = capacity.as_usize(), "initialized garbage list");

    self.ring = Some(Ring::new(oracle, slots));

    Ok(())
  }

  /// Destroys every retired object, safe or not, and frees the slot array.
  ///
  /// Staged reservations are destroyed too. Returns the number of objects
  /// destroyed; calling this on an uninitialized list returns `0`.
  pub fn uninitialize(&mut self) -> usize {
    let Some(mut ring) = self.ring.take() else {
      return 0;
    };

    let destroyed: usize = ring.drain();

    debug!(capacity = ring.capacity(), destroyed, "uninitialized garbage list");

    destroyed
  }

  /// Returns `true` if the list has been initialized.
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

  /// Retires `object`, to be destroyed by `destructor(context, object)` once
  /// its epoch has quiesced.
  ///
  /// May destroy one older object on the calling thread.
  ///
  /// # Safety
  ///
  /// - `destructor` must accept `context` and `object` and be callable from
  ///   any thread.
  /// - `object` must already be unreachable for threads entering a new
  ///   critical section, and must not be retired twice.
  /// - `context` must outlive the list, or its last reclamation.
  ///
  /// # Panics
  ///
  /// Panics if the list is uninitialized.
  #[inline]
  pub unsafe fn push(&self, object: NonNull<()>, destructor: Destructor, context: *mut ()) {
    // SAFETY: Guaranteed by the caller.
    unsafe {
      self.ring().push(object, destructor, context);
    }
  }

  /// Retires a boxed value.
  ///
  /// # Panics
  ///
  /// Panics if the list is uninitialized.
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
  /// # Panics
  ///
  /// Panics if the list is uninitialized.
  #[inline]
  pub fn reserve(&self) -> Reservation<'_> {
    let ring: &Ring<O, Array<Slot>> = self.ring();

    Reservation::new(ring, ring.acquire())
  }

  /// Empties a slot kept locked by [`Reservation::into_held`].
  ///
  /// Nothing staged in the slot is destroyed.
  ///
  /// # Panics
  ///
  /// Panics if the list is uninitialized, if `held` came from another
  /// list, or if the slot is no longer locked.
  #[inline]
  pub fn reset_item(&self, held: HeldSlot) {
    let ring: &Ring<O, Array<Slot>> = self.ring();

    ring.reset(held.into_index(ring.base()));
  }

  /// Sweeps the whole ring and destroys every object whose epoch has
  /// quiesced.
  ///
  /// Returns the number of objects destroyed.
  ///
  /// # Panics
  ///
  /// Panics if the list is uninitialized.
  #[inline]
  pub fn scavenge(&self) -> usize {
    self.ring().scavenge()
  }

  #[inline]
  pub(crate) fn ring(&self) -> &Ring<O, Array<Slot>> {
    match self.ring {
      Some(ref ring) => ring,
      None => panic!("garbage list is not initialized"),
    }
  }
}

impl<O> Default for GarbageList<O>
where
  O: EpochOracle,
{
  #[inline]
  fn default() -> Self {
    Self::new()
  }
}

impl<O> Debug for GarbageList<O>
where
  O: EpochOracle,
{
  fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
    match self.ring {
      Some(ref ring) => f.debug_tuple("GarbageList").field(ring).finish(),
      None => f.write_str("GarbageList(<uninitialized>)"),
    }
  }
}

impl<O> Drop for GarbageList<O>
where
  O: EpochOracle,
{
  fn drop(&mut self) {
    self.uninitialize();
  }
}
