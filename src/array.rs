//! Cache-aligned slot array allocation.
//!
//! Provides [`Array`], the heap storage behind a volatile garbage list.

use core::mem::MaybeUninit;
use core::ptr::NonNull;
use core::slice;

use crate::alloc::Layout;
use crate::alloc::alloc;
use crate::alloc::dealloc;
use crate::error::Error;
use crate::params::CACHE_LINE;
use crate::params::Capacity;

/// A fixed-size array with cache-line-aligned allocation.
pub(crate) struct Array<T> {
  nonnull: NonNull<T>,
  length: usize,
  layout: Layout,
}

impl<T> Array<T> {
  /// Allocates an array of `capacity` elements, initializing each with
  /// `init`.
  ///
  /// # Errors
  ///
  /// Returns [`Error::Allocation`] if the allocator refuses the request.
  #[inline]
  pub(crate) fn new<F>(capacity: Capacity, init: F) -> Result<Self, Error>
  where
    F: Fn(usize) -> T,
  {
    let length: usize = capacity.as_usize();
    let layout: Layout = Self::layout(length)?;

    // SAFETY: `T` is never zero-sized here and `length` is non-zero, so the
    // layout has non-zero size.
    let raw: *mut u8 = unsafe { alloc(layout) };

    let Some(nonnull) = NonNull::new(raw.cast::<MaybeUninit<T>>()) else {
      return Err(Error::Allocation {
        size: layout.size(),
      });
    };

    let mut index: usize = 0;

    while index < length {
      // SAFETY: `index < length` and the allocation holds `length` elements.
      let uninit: &mut MaybeUninit<T> = unsafe { &mut *nonnull.add(index).as_ptr() };

      uninit.write(init(index));

      index += 1;
    }

    Ok(Self {
      nonnull: nonnull.cast(),
      length,
      layout,
    })
  }

  fn layout(length: usize) -> Result<Layout, Error> {
    let size: usize = length.checked_mul(size_of::<T>()).ok_or(Error::Allocation { size: usize::MAX })?;
    let align: usize = CACHE_LINE.max(align_of::<T>());

    debug_assert!(size != 0, "Array::layout requires a non-zero size");

    Layout::from_size_align(size, align).map_err(|_| Error::Allocation { size })
  }

  #[inline]
  pub(crate) const fn as_slice(&self) -> &[T] {
    // SAFETY: Contiguous allocation of `length` initialized elements.
    unsafe { slice::from_raw_parts(self.nonnull.as_ptr(), self.length) }
  }
}

impl<T> Drop for Array<T> {
  fn drop(&mut self) {
    // SAFETY: All `length` elements were initialized in `new` and are not
    // used after this point.
    unsafe {
      core::ptr::drop_in_place(core::ptr::slice_from_raw_parts_mut(
        self.nonnull.as_ptr(),
        self.length,
      ));
    }

    // SAFETY: Allocated with `self.layout` in `new`.
    unsafe {
      dealloc(self.nonnull.cast().as_ptr(), self.layout);
    }
  }
}

// SAFETY: `Array` owns its elements like a `Box<[T]>`.
unsafe impl<T> Send for Array<T> where T: Send {}

// SAFETY: Shared access only hands out `&[T]`.
unsafe impl<T> Sync for Array<T> where T: Sync {}
