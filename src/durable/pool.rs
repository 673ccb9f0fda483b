use core::fmt::Debug;
use core::fmt::Formatter;
use core::fmt::Result as FmtResult;
use core::ptr::NonNull;
use std::sync::Arc;

use thiserror::Error;

use crate::alloc::Layout;
use crate::alloc::alloc_zeroed;
use crate::alloc::dealloc;
use crate::sync::Mutex;
use crate::sync::atomic::Ordering::Release;
use crate::sync::atomic::fence;

/// Alignment of regions handed out by [`HeapPool`].
///
/// Deliberately below a cache line, like a general-purpose allocator, so the
/// list has to pad its way to an aligned slot array.
const HEAP_ALIGN: usize = 16;

/// An error raised by a [`Pool`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum PoolError {
  /// The pool already holds a region of another size.
  #[error("pool region holds {existing} bytes, {requested} requested")]
  SizeMismatch {
    /// Requested size, in bytes.
    requested: usize,
    /// Size of the region already in the pool, in bytes.
    existing: usize,
  },
  /// The region is too small for the slot array after alignment.
  #[error("pool region of {len} bytes cannot hold {required} aligned bytes")]
  TooSmall {
    /// Size of the region, in bytes.
    len: usize,
    /// Bytes needed, including alignment padding.
    required: usize,
  },
  /// The region is leased to a list that has not released it.
  #[error("pool region is leased to an open list")]
  InUse,
  /// The pool could not allocate the region.
  #[error("failed to allocate a {size} byte pool region")]
  Allocation {
    /// Requested size, in bytes.
    size: usize,
  },
}

// -----------------------------------------------------------------------------
// Region
// -----------------------------------------------------------------------------

/// A run of durable memory lent out by a [`Pool`].
#[derive(Clone, Copy, Debug)]
pub struct Region {
  base: NonNull<u8>,
  len: usize,
  fresh: bool,
}

impl Region {
  /// Describes `len` bytes of durable memory starting at `base`.
  ///
  /// # Safety
  ///
  /// - `base` must be valid for reads and writes of `len` bytes, aligned to
  ///   at least 8 bytes, for as long as the pool lives.
  /// - If `fresh`, the bytes must be zero.
  /// - If not `fresh`, the bytes must be exactly as the last list that used
  ///   the region left them.
  #[inline]
  pub const unsafe fn new(base: NonNull<u8>, len: usize, fresh: bool) -> Self {
    Self { base, len, fresh }
  }

  /// Returns the first byte of the region.
  #[inline]
  pub const fn base(&self) -> NonNull<u8> {
    self.base
  }

  /// Returns the size of the region in bytes.
  #[inline]
  pub const fn len(&self) -> usize {
    self.len
  }

  /// Returns `true` if the region is zero bytes long.
  #[inline]
  pub const fn is_empty(&self) -> bool {
    self.len == 0
  }

  /// Returns `true` if the region was created by this request.
  #[inline]
  pub const fn is_fresh(&self) -> bool {
    self.fresh
  }
}

// -----------------------------------------------------------------------------
// Pool
// -----------------------------------------------------------------------------

/// A durable allocator holding the slot array of a [`DurableGarbageList`].
///
/// A pool hands out one region per list and keeps its contents across list
/// lifetimes: reopening a list on the same pool yields the same bytes.
///
/// A region is leased from `region` until it is given back with `release`.
/// While leased, no other list may be handed the same bytes.
///
/// [`DurableGarbageList`]: crate::durable::DurableGarbageList
pub trait Pool {
  /// Returns the pool's region of `len` bytes, creating it if needed.
  ///
  /// # Errors
  ///
  /// Returns [`PoolError`] if the region cannot be created, if an existing
  /// region has a different size, or if the region is still leased.
  fn region(&self, len: usize) -> Result<Region, PoolError>;

  /// Makes `len` bytes at `addr`, within a region of this pool, durable.
  fn persist(&self, addr: NonNull<u8>, len: usize);

  /// Ends the lease on `region`. Its contents are kept.
  fn release(&self, region: Region);
}

impl<P> Pool for &P
where
  P: Pool + ?Sized,
{
  #[inline]
  fn region(&self, len: usize) -> Result<Region, PoolError> {
    (**self).region(len)
  }

  #[inline]
  fn persist(&self, addr: NonNull<u8>, len: usize) {
    (**self).persist(addr, len);
  }

  #[inline]
  fn release(&self, region: Region) {
    (**self).release(region);
  }
}

impl<P> Pool for Arc<P>
where
  P: Pool + ?Sized,
{
  #[inline]
  fn region(&self, len: usize) -> Result<Region, PoolError> {
    (**self).region(len)
  }

  #[inline]
  fn persist(&self, addr: NonNull<u8>, len: usize) {
    (**self).persist(addr, len);
  }

  #[inline]
  fn release(&self, region: Region) {
    (**self).release(region);
  }
}

// -----------------------------------------------------------------------------
// Heap Pool
// -----------------------------------------------------------------------------

struct Block {
  base: NonNull<u8>,
  layout: Layout,
  leased: bool,
}

// SAFETY: The block is plain memory owned by the pool.
unsafe impl Send for Block {}

/// A [`Pool`] backed by process memory.
///
/// The region survives any list opened on it and is freed when the pool is
/// dropped. Only one list at a time may hold the region. Abandoning a list
/// with [`DurableGarbageList::abandon`] and reopening it on the same pool
/// reproduces the state a restart would find, within the lifetime of one
/// process. A list that is leaked instead keeps its lease, and the region
/// cannot be opened again.
///
/// ```
/// use garbage_ring::Config;
/// use garbage_ring::durable::DurableGarbageList;
/// use garbage_ring::durable::HeapPool;
/// use garbage_ring::oracle::Unprotected;
///
/// let pool: HeapPool = HeapPool::new();
/// let config = || Config::new().oracle(Unprotected::new()).capacity(64);
///
/// let list = DurableGarbageList::open(config(), &pool).unwrap();
/// list.retire(Box::new(42_u64));
/// list.abandon();
///
/// let mut list = DurableGarbageList::open(config(), &pool).unwrap();
/// assert!(list.needs_recovery());
/// assert_eq!(list.recover(), 1);
/// ```
///
/// [`DurableGarbageList::abandon`]: crate::durable::DurableGarbageList::abandon
pub struct HeapPool {
  block: Mutex<Option<Block>>,
}

impl HeapPool {
  /// Creates a pool with no region.
  pub fn new() -> Self {
    Self {
      block: Mutex::new(None),
    }
  }

  /// Returns the size of the pool's region, if one exists.
  pub fn region_len(&self) -> Option<usize> {
    self.block.lock().as_ref().map(|block| block.layout.size())
  }

  /// Returns `true` while a list holds the pool's region.
  pub fn is_leased(&self) -> bool {
    self.block.lock().as_ref().is_some_and(|block| block.leased)
  }
}

impl Default for HeapPool {
  #[inline]
  fn default() -> Self {
    Self::new()
  }
}

impl Debug for HeapPool {
  fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
    f.debug_struct("HeapPool")
      .field("region_len", &self.region_len())
      .field("leased", &self.is_leased())
      .finish()
  }
}

impl Pool for HeapPool {
  fn region(&self, len: usize) -> Result<Region, PoolError> {
    let mut block = self.block.lock();

    if let Some(ref mut block) = *block {
      if block.leased {
        return Err(PoolError::InUse);
      }

      if block.layout.size() != len {
        return Err(PoolError::SizeMismatch {
          requested: len,
          existing: block.layout.size(),
        });
      }

      block.leased = true;

      // SAFETY: Allocated below with this size and only ever written through
      // a list's slot protocol.
      return Ok(unsafe { Region::new(block.base, len, false) });
    }

    let error: PoolError = PoolError::Allocation { size: len };
    let layout: Layout = Layout::from_size_align(len, HEAP_ALIGN).map_err(|_| error.clone())?;

    if layout.size() == 0 {
      return Err(error);
    }

    // SAFETY: `layout` has non-zero size.
    let raw: *mut u8 = unsafe { alloc_zeroed(layout) };
    let base: NonNull<u8> = NonNull::new(raw).ok_or(error)?;

    *block = Some(Block {
      base,
      layout,
      leased: true,
    });

    // SAFETY: Freshly allocated, zeroed, and owned by the pool until drop.
    Ok(unsafe { Region::new(base, len, true) })
  }

  #[inline]
  fn persist(&self, _addr: NonNull<u8>, _len: usize) {
    // Process memory is as durable as it gets; only ordering matters.
    fence(Release);
  }

  fn release(&self, region: Region) {
    if let Some(ref mut block) = *self.block.lock() {
      debug_assert_eq!(block.base, region.base(), "released a region this pool never leased");

      block.leased = false;
    }
  }
}

impl Drop for HeapPool {
  fn drop(&mut self) {
    if let Some(block) = self.block.lock().take() {
      // SAFETY: Allocated in `region` with `block.layout`.
      unsafe {
        dealloc(block.base.as_ptr(), block.layout);
      }
    }
  }
}
