//! A lock-free ring of retired objects awaiting safe reclamation.
//!
//! `garbage_ring` provides [`GarbageList`], a fixed-capacity ring buffer that
//! lock-free data structures hand unlinked objects to. Each object is stamped
//! with the epoch in which it was retired and destroyed only once an
//! [`EpochOracle`] reports that epoch quiesced, i.e. no thread that might
//! still hold a reference to it remains active.
//!
//! # Overview
//!
//! Retiring an object claims the next slot of the ring. If that slot still
//! holds an older object whose epoch has quiesced, the older object is
//! destroyed on the spot, so reclamation cost is spread across producers and
//! no background thread is needed. Slots whose epoch has not quiesced are
//! skipped. The ring never grows and never blocks.
//!
//! # Usage
//!
//! ```
//! use garbage_ring::Config;
//! use garbage_ring::GarbageList;
//! use garbage_ring::oracle::Domain;
//! use garbage_ring::oracle::EpochOracle;
//!
//! let domain: Domain = Domain::new();
//! let list: GarbageList<&Domain> =
//!   GarbageList::with_config(Config::new().oracle(&domain).capacity(1024)).unwrap();
//!
//! let reader = domain.register();
//! let guard = reader.protect();
//!
//! // Unlinked while `reader` may still be looking at it.
//! list.retire(Box::new(String::from("node")));
//!
//! domain.advance_epoch();
//! assert_eq!(list.scavenge(), 0);
//!
//! drop(guard);
//! assert_eq!(list.scavenge(), 1);
//! ```
//!
//! # Reservations
//!
//! [`GarbageList::reserve`] claims a slot without filling it. The returned
//! [`Reservation`] can stage a payload while the slot stays locked, publish
//! it, or give the slot back. Dropping a reservation gives the slot back.
//!
//! # Durability
//!
//! With the `durable` feature (on by default), [`durable::DurableGarbageList`]
//! keeps its slots in a region lent by a [`durable::Pool`]. Records are
//! published so that a crash leaves every slot either old or new, and
//! [`durable::DurableGarbageList::recover`] destroys whatever a previous run
//! left behind.
//!
//! # Capacity
//!
//! Capacity is a runtime value and must be a non-zero power of two. The
//! volatile default is [`Capacity::DEF`] slots; the durable default budget
//! is [`DEF_DURABLE_BYTES`](config::DEF_DURABLE_BYTES) of slot records.
//!
//! [`EpochOracle`]: crate::oracle::EpochOracle
//! [`GarbageList`]: crate::list::GarbageList
//! [`GarbageList::reserve`]: crate::list::GarbageList::reserve
//! [`Reservation`]: crate::reserve::Reservation
//! [`Capacity::DEF`]: crate::params::Capacity::DEF
//!

#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

mod array;
mod error;
mod list;
mod padded;
mod params;
mod reserve;
mod ring;
mod slot;
mod utils;

pub mod oracle;

#[cfg(all(feature = "durable", not(any(loom, shuttle))))]
#[cfg_attr(docsrs, doc(cfg(feature = "durable")))]
pub mod durable;

pub(crate) use crate::utils::alloc;
pub(crate) use crate::utils::spin;
pub(crate) use crate::utils::sync;

pub mod implementation {
  #![doc = include_str!("../IMPLEMENTATION.md")]
}

pub mod config {
  //! Sizing and initialization parameters.

  pub use crate::params::CACHE_LINE;
  pub use crate::params::Capacity;
  pub use crate::params::Config;
  pub use crate::params::DEF_DURABLE_BYTES;
}

#[doc(inline)]
pub use self::config::Capacity;

#[doc(inline)]
pub use self::config::Config;

pub use self::error::Error;

pub use self::list::GarbageList;

pub use self::reserve::HeldSlot;
pub use self::reserve::Reservation;

pub use self::slot::Destructor;
pub use self::slot::EMPTY;
pub use self::slot::Epoch;
pub use self::slot::LOCKED;
pub use self::slot::SLOT_BYTES;
pub use self::slot::SlotIndex;

#[cfg(all(test, not(any(loom, shuttle))))]
mod tests;
