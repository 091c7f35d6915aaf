use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard};

/// A suspending, long-term lock for per-buffer and per-inode data.
///
/// Acquiring may need to wait out an in-progress disk read or another
/// thread's multi-step update; the calling thread yields instead of
/// spinning. `std::sync::Mutex` already does exactly this
/// when contended, so this is a named wrapper rather than a hand-rolled
/// condition variable loop.
pub struct SleepLock<T> {
    name: &'static str,
    inner: Mutex<T>,
}

impl<T> SleepLock<T> {
    pub const fn new(name: &'static str, data: T) -> Self {
        Self {
            name,
            inner: Mutex::new(data),
        }
    }

    /// Acquires the lock, suspending the caller while it is held
    /// elsewhere.
    pub fn lock(&self) -> SleepLockGuard<'_, T> {
        let guard = self
            .inner
            .lock()
            .unwrap_or_else(|_| panic!("sleep lock '{}' poisoned", self.name));
        SleepLockGuard { guard }
    }

    /// Whether some thread currently holds the lock. Approximate (there
    /// is an inherent race between checking and acting on the answer);
    /// intended for debug assertions, not for synchronization.
    pub fn holding(&self) -> bool {
        self.inner.try_lock().is_err()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

pub struct SleepLockGuard<'a, T> {
    guard: MutexGuard<'a, T>,
}

impl<T> SleepLockGuard<'_, T> {
    /// Releases the lock. Equivalent to dropping the guard; spelled out
    /// because call sites read more like the source material's explicit
    /// `release`/`unlock` calls this way.
    pub fn release(self) {
        drop(self);
    }
}

impl<T> Deref for SleepLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for SleepLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
