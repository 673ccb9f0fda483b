#[cfg(all(loom, shuttle))]
compile_error!("cannot use loom and shuttle at once");

#[cfg(loom)]
pub(crate) mod alloc {
  pub(crate) use ::loom::alloc::Layout;
  pub(crate) use ::loom::alloc::alloc;
  pub(crate) use ::loom::alloc::dealloc;
}

#[cfg(not(loom))]
pub(crate) mod alloc {
  pub(crate) use ::std::alloc::Layout;
  pub(crate) use ::std::alloc::alloc;
  #[cfg(all(feature = "durable", not(shuttle)))]
  pub(crate) use ::std::alloc::alloc_zeroed;
  pub(crate) use ::std::alloc::dealloc;
}

/// Backs off inside a retry loop.
#[cfg(not(any(loom, shuttle)))]
#[inline]
pub(crate) fn spin() {
  ::core::hint::spin_loop();
}

#[cfg(loom)]
#[inline]
pub(crate) fn spin() {
  ::loom::thread::yield_now();
}

#[cfg(shuttle)]
#[inline]
pub(crate) fn spin() {
  ::shuttle::thread::yield_now();
}

#[cfg(not(any(loom, shuttle)))]
pub(crate) mod sync {
  pub(crate) use ::antidote::Mutex;
  pub(crate) use ::std::sync::Arc;

  pub(crate) mod atomic {
    pub(crate) use ::core::sync::atomic::AtomicU64;
    pub(crate) use ::core::sync::atomic::AtomicUsize;
    pub(crate) use ::core::sync::atomic::Ordering;
    #[cfg(feature = "durable")]
    pub(crate) use ::core::sync::atomic::fence;
  }
}

#[cfg(loom)]
pub(crate) mod sync {
  use ::std::sync::PoisonError;

  pub(crate) use ::loom::sync::Arc;

  /// Mirrors the non-poisoning `lock` of [`antidote::Mutex`].
  ///
  /// [`antidote::Mutex`]: https://docs.rs/antidote
  pub(crate) struct Mutex<T> {
    inner: ::loom::sync::Mutex<T>,
  }

  impl<T> Mutex<T> {
    pub(crate) fn new(value: T) -> Self {
      Self {
        inner: ::loom::sync::Mutex::new(value),
      }
    }

    pub(crate) fn lock(&self) -> ::loom::sync::MutexGuard<'_, T> {
      self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
  }

  pub(crate) mod atomic {
    pub(crate) use ::loom::sync::atomic::AtomicU64;
    pub(crate) use ::loom::sync::atomic::AtomicUsize;
    pub(crate) use ::loom::sync::atomic::Ordering;
  }
}

#[cfg(shuttle)]
pub(crate) mod sync {
  use ::std::sync::PoisonError;

  pub(crate) use ::shuttle::sync::Arc;

  /// Mirrors the non-poisoning `lock` of [`antidote::Mutex`].
  ///
  /// [`antidote::Mutex`]: https://docs.rs/antidote
  pub(crate) struct Mutex<T> {
    inner: ::shuttle::sync::Mutex<T>,
  }

  impl<T> Mutex<T> {
    pub(crate) fn new(value: T) -> Self {
      Self {
        inner: ::shuttle::sync::Mutex::new(value),
      }
    }

    pub(crate) fn lock(&self) -> ::shuttle::sync::MutexGuard<'_, T> {
      self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
  }

  pub(crate) mod atomic {
    pub(crate) use ::shuttle::sync::atomic::AtomicU64;
    pub(crate) use ::shuttle::sync::atomic::AtomicUsize;
    pub(crate) use ::shuttle::sync::atomic::Ordering;
  }
}
