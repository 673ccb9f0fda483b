//! Epoch oracles: the clock and safety predicate behind reclamation.
//!
//! A garbage list never decides on its own that an object is unreachable. It
//! stamps each retired object with the oracle's current epoch and, before
//! reusing the slot, asks the oracle whether that epoch has quiesced.
//!
//! Two oracles ship with the crate:
//!
//! - [`Domain`]: tracks an explicit registry of participants and reports an
//!   epoch safe once every participant has moved past it.
//! - [`Unprotected`]: reports every epoch safe. Only sound when retired
//!   objects have no concurrent readers.
//!
//! Any other epoch manager can be plugged in by implementing
//! [`EpochOracle`].

mod domain;
mod unprotected;

use std::sync::Arc;

pub use self::domain::Domain;
pub use self::domain::Guard;
pub use self::domain::Participant;
pub use self::unprotected::Unprotected;

use crate::slot::Epoch;

/// A source of epochs and of the verdict on when one has quiesced.
///
/// # Contract
///
/// - [`current_epoch`] returns a positive epoch that never decreases. The
///   values `0` and `u64::MAX` are reserved by the garbage list.
/// - [`advance_epoch`] requests a bump of the global epoch. Visibility of the
///   new value is the oracle's responsibility.
/// - [`is_safe_to_reclaim`] returns `true` only if no thread that could have
///   observed data retired in `epoch` is still active. Once `true` for an
///   epoch, it stays `true`.
///
/// Implementations are shared between threads without external locking.
///
/// [`advance_epoch`]: EpochOracle::advance_epoch
/// [`current_epoch`]: EpochOracle::current_epoch
/// [`is_safe_to_reclaim`]: EpochOracle::is_safe_to_reclaim
pub trait EpochOracle {
  /// Returns the current global epoch.
  fn current_epoch(&self) -> Epoch;

  /// Requests that the global epoch be advanced.
  fn advance_epoch(&self);

  /// Returns `true` if objects retired in `epoch` can no longer be observed.
  fn is_safe_to_reclaim(&self, epoch: Epoch) -> bool;
}

impl<O> EpochOracle for &O
where
  O: EpochOracle + ?Sized,
{
  #[inline]
  fn current_epoch(&self) -> Epoch {
    (**self).current_epoch()
  }

  #[inline]
  fn advance_epoch(&self) {
    (**self).advance_epoch();
  }

  #[inline]
  fn is_safe_to_reclaim(&self, epoch: Epoch) -> bool {
    (**self).is_safe_to_reclaim(epoch)
  }
}

impl<O> EpochOracle for Arc<O>
where
  O: EpochOracle + ?Sized,
{
  #[inline]
  fn current_epoch(&self) -> Epoch {
    (**self).current_epoch()
  }

  #[inline]
  fn advance_epoch(&self) {
    (**self).advance_epoch();
  }

  #[inline]
  fn is_safe_to_reclaim(&self, epoch: Epoch) -> bool {
    (**self).is_safe_to_reclaim(epoch)
  }
}

impl<O> EpochOracle for Box<O>
where
  O: EpochOracle + ?Sized,
{
  #[inline]
  fn current_epoch(&self) -> Epoch {
    (**self).current_epoch()
  }

  #[inline]
  fn advance_epoch(&self) {
    (**self).advance_epoch();
  }

  #[inline]
  fn is_safe_to_reclaim(&self, epoch: Epoch) -> bool {
    (**self).is_safe_to_reclaim(epoch)
  }
}
