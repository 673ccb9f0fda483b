//! Error types returned when configuring a garbage list.
//!
//! Only setup can fail. Lost races inside the ring are retried internally and
//! contract violations panic, so neither shows up here.

use thiserror::Error;

/// An error raised while initializing or opening a garbage list.
///
/// The list is left uninitialized whenever one of these is returned, so the
/// call may be retried with corrected parameters.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
  /// No [`EpochOracle`] was supplied in the [`Config`].
  ///
  /// [`Config`]: crate::params::Config
  /// [`EpochOracle`]: crate::oracle::EpochOracle
  #[error("no epoch oracle configured")]
  MissingOracle,
  /// The requested capacity is zero or not a power of two.
  #[error("capacity {0} is not a non-zero power of two")]
  InvalidCapacity(usize),
  /// The slot array could not be allocated.
  #[error("failed to allocate {size} bytes for the slot array")]
  Allocation {
    /// Requested allocation size, in bytes.
    size: usize,
  },
  /// The durable pool could not provide the slot region.
  #[cfg(all(feature = "durable", not(any(loom, shuttle))))]
  #[error(transparent)]
  Pool(#[from] crate::durable::PoolError),
}

impl Error {
  /// Returns `true` if the error stems from invalid configuration rather
  /// than resource exhaustion.
  #[inline]
  pub const fn is_configuration(&self) -> bool {
    matches!(self, Self::MissingOracle | Self::InvalidCapacity(_))
  }
}
