use core::fmt::Debug;
use core::fmt::Formatter;
use core::fmt::Result as FmtResult;
use core::num::NonZeroUsize;

use crate::error::Error;
use crate::slot::SLOT_BYTES;

// -----------------------------------------------------------------------------
// Memory Layout
// -----------------------------------------------------------------------------

/// Alignment of the slot array, in bytes.
///
/// Two slots share each line, and the array never straddles a line at its
/// start, so a slot's 32-byte record is never split across lines.
pub const CACHE_LINE: usize = 64;

const _: () = assert!(
  CACHE_LINE.is_power_of_two(),
  "invalid params: `CACHE_LINE` must be a power of two",
);

const _: () = assert!(
  CACHE_LINE.is_multiple_of(SLOT_BYTES),
  "invalid params: `CACHE_LINE` must hold a whole number of slots",
);

/// Default byte budget of a durable slot array (4 MiB).
pub const DEF_DURABLE_BYTES: usize = 4 * 1024 * 1024;

// -----------------------------------------------------------------------------
// Capacity
// -----------------------------------------------------------------------------

/// A validated slot count.
///
/// Always a non-zero power of two, so a monotonic cursor maps onto a slot
/// with a single mask and never needs a bounds check.
///
/// ```
/// use garbage_ring::Capacity;
///
/// assert_eq!(Capacity::new(1024).unwrap().as_usize(), 1024);
/// assert!(Capacity::new(0).is_err());
/// assert!(Capacity::new(3).is_err());
/// ```
#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Capacity(NonZeroUsize);

impl Capacity {
  /// The smallest capacity: a single slot.
  pub const MIN: Self = Self(NonZeroUsize::MIN);

  /// The default capacity of a volatile list (2¹⁷ slots).
  pub const DEF: Self = Self(NonZeroUsize::new(1 << 17).unwrap());

  /// Validates `value` as a slot count.
  ///
  /// # Errors
  ///
  /// Returns [`Error::InvalidCapacity`] if `value` is zero, not a power of
  /// two, or too large for its slot array to be addressable.
  #[inline]
  pub const fn new(value: usize) -> Result<Self, Error> {
    let Some(nonzero) = NonZeroUsize::new(value) else {
      return Err(Error::InvalidCapacity(value));
    };

    if !nonzero.is_power_of_two() {
      return Err(Error::InvalidCapacity(value));
    }

    match value.checked_mul(SLOT_BYTES) {
      Some(bytes) if bytes <= isize::MAX as usize - CACHE_LINE => Ok(Self(nonzero)),
      _ => Err(Error::InvalidCapacity(value)),
    }
  }

  /// Returns the largest capacity whose slot array fits in `bytes`.
  ///
  /// # Errors
  ///
  /// Returns [`Error::InvalidCapacity`] if `bytes` cannot hold a single slot.
  ///
  /// ```
  /// use garbage_ring::Capacity;
  ///
  /// assert_eq!(Capacity::from_bytes(4 << 20).unwrap().as_usize(), 1 << 17);
  /// assert_eq!(Capacity::from_bytes(100).unwrap().as_usize(), 2);
  /// ```
  #[inline]
  pub const fn from_bytes(bytes: usize) -> Result<Self, Error> {
    let slots: usize = bytes / SLOT_BYTES;

    if slots == 0 {
      return Err(Error::InvalidCapacity(0));
    }

    Self::new(1 << slots.ilog2())
  }

  /// Returns the capacity as a [`usize`].
  #[inline]
  pub const fn as_usize(self) -> usize {
    self.0.get()
  }

  /// Returns the capacity as a [`NonZeroUsize`].
  #[inline]
  pub const fn as_nonzero(self) -> NonZeroUsize {
    self.0
  }

  /// Returns the mask mapping a cursor value onto a slot index.
  #[inline]
  pub const fn mask(self) -> usize {
    self.0.get() - 1
  }

  /// Returns the size of the slot array in bytes.
  #[inline]
  pub const fn bytes(self) -> usize {
    // Bounded by `new`.
    self.0.get() * SLOT_BYTES
  }

  /// Returns the base-2 logarithm of the capacity.
  #[inline]
  pub const fn log2(self) -> u32 {
    self.0.trailing_zeros()
  }
}

impl Debug for Capacity {
  fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
    write!(f, "{:?} (1 << {:?})", self.0, self.log2())
  }
}

impl Default for Capacity {
  #[inline]
  fn default() -> Self {
    Self::DEF
  }
}

impl From<Capacity> for usize {
  #[inline]
  fn from(other: Capacity) -> Self {
    other.as_usize()
  }
}

impl TryFrom<usize> for Capacity {
  type Error = Error;

  #[inline]
  fn try_from(other: usize) -> Result<Self, Self::Error> {
    Self::new(other)
  }
}

// -----------------------------------------------------------------------------
// Config
// -----------------------------------------------------------------------------

/// Initialization parameters for a garbage list.
///
/// Capacity is validated lazily, when the config is consumed by
/// [`GarbageList::initialize`], so that a bad value surfaces as an
/// initialization failure.
///
/// ```
/// use garbage_ring::Config;
/// use garbage_ring::oracle::Unprotected;
///
/// let config: Config<Unprotected> = Config::new()
///   .oracle(Unprotected::new())
///   .capacity(1024);
///
/// assert_eq!(config.requested_capacity(), 1024);
/// ```
///
/// [`GarbageList::initialize`]: crate::list::GarbageList::initialize
#[derive(Clone)]
pub struct Config<O> {
  oracle: Option<O>,
  capacity: usize,
}

impl<O> Config<O> {
  /// Creates a config with no oracle and [`Capacity::DEF`] slots.
  #[inline]
  pub const fn new() -> Self {
    Self {
      oracle: None,
      capacity: Capacity::DEF.as_usize(),
    }
  }

  /// Creates a config sized for [`DEF_DURABLE_BYTES`] of slot records.
  #[inline]
  pub const fn durable() -> Self {
    Self {
      oracle: None,
      capacity: DEF_DURABLE_BYTES / SLOT_BYTES,
    }
  }

  /// Sets the oracle consulted before reclaiming a slot.
  #[inline]
  #[must_use]
  pub fn oracle(mut self, oracle: O) -> Self {
    self.oracle = Some(oracle);
    self
  }

  /// Sets the number of slots. Must be a non-zero power of two.
  #[inline]
  #[must_use]
  pub const fn capacity(mut self, capacity: usize) -> Self {
    self.capacity = capacity;
    self
  }

  /// Returns the slot count as requested, before validation.
  #[inline]
  pub const fn requested_capacity(&self) -> usize {
    self.capacity
  }

  pub(crate) fn validate(self) -> Result<(O, Capacity), Error> {
    let oracle: O = self.oracle.ok_or(Error::MissingOracle)?;
    let capacity: Capacity = Capacity::new(self.capacity)?;

    Ok((oracle, capacity))
  }
}

impl<O> Default for Config<O> {
  #[inline]
  fn default() -> Self {
    Self::new()
  }
}

impl<O> Debug for Config<O> {
  fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
    f.debug_struct("Config")
      .field("oracle", &self.oracle.is_some())
      .field("capacity", &self.capacity)
      .finish()
  }
}
