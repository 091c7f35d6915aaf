use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard};

/// A non-suspending lock for short critical sections.
///
/// Built over `std::sync::Mutex`: on this platform there is no
/// meaningful difference between "busy wait" and "suspend" at the OS
/// level, but keeping a distinct type documents which discipline a
/// given piece of state follows and gives every instance a
/// debug name for panic messages.
pub struct SpinLock<T> {
    name: &'static str,
    inner: Mutex<T>,
}

impl<T> SpinLock<T> {
    pub const fn new(name: &'static str, data: T) -> Self {
        Self {
            name,
            inner: Mutex::new(data),
        }
    }

    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let guard = self
            .inner
            .lock()
            .unwrap_or_else(|_| panic!("spin lock '{}' poisoned", self.name));
        SpinLockGuard { guard }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

pub struct SpinLockGuard<'a, T> {
    guard: MutexGuard<'a, T>,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
