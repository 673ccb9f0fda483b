//! Cache-line padding for the ring cursor.
//!
//! Every producer bumps the cursor, so it gets a cache line to itself rather
//! than sharing one with the oracle reference or the slot pointer.

use core::fmt::Debug;
use core::fmt::Formatter;
use core::fmt::Result;
use core::ops::Deref;

/// Pads and aligns a value to the length of a cache line.
///
/// Alignments follow [`crossbeam-utils`].
///
/// [`crossbeam-utils`]: https://crates.io/crates/crossbeam-utils
#[cfg_attr(
  any(
    target_arch = "x86_64",
    target_arch = "aarch64",
    target_arch = "arm64ec",
    target_arch = "powerpc64",
  ),
  repr(align(128))
)]
#[cfg_attr(
  any(
    target_arch = "arm",
    target_arch = "mips",
    target_arch = "mips32r6",
    target_arch = "mips64",
    target_arch = "mips64r6",
    target_arch = "sparc",
    target_arch = "hexagon",
  ),
  repr(align(32))
)]
#[cfg_attr(target_arch = "s390x", repr(align(256)))]
#[cfg_attr(
  not(any(
    target_arch = "x86_64",
    target_arch = "aarch64",
    target_arch = "arm64ec",
    target_arch = "powerpc64",
    target_arch = "arm",
    target_arch = "mips",
    target_arch = "mips32r6",
    target_arch = "mips64",
    target_arch = "mips64r6",
    target_arch = "sparc",
    target_arch = "hexagon",
    target_arch = "s390x",
  )),
  repr(align(64))
)]
pub(crate) struct CachePadded<T> {
  value: T,
}

impl<T> CachePadded<T> {
  #[inline]
  pub(crate) const fn new(value: T) -> Self {
    Self { value }
  }
}

impl<T> Deref for CachePadded<T> {
  type Target = T;

  #[inline]
  fn deref(&self) -> &T {
    &self.value
  }
}

impl<T> Debug for CachePadded<T>
where
  T: Debug,
{
  fn fmt(&self, f: &mut Formatter<'_>) -> Result {
    Debug::fmt(&self.value, f)
  }
}

#[cfg(test)]
mod tests {
  use core::mem::align_of;
  use core::mem::size_of;

  use crate::padded::CachePadded;

  #[test]
  fn padding_fills_the_line() {
    assert!(align_of::<CachePadded<u8>>().is_power_of_two());
    assert_eq!(
      size_of::<CachePadded<u8>>(),
      align_of::<CachePadded<u8>>(),
      "invalid padding: value does not occupy a whole line",
    );
  }

  #[test]
  fn debug_transparency() {
    let value: usize = 123;
    let padded: CachePadded<usize> = CachePadded::new(value);

    assert_eq!(format!("{padded:?}"), format!("{value:?}"));
  }
}
