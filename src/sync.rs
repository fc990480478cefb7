//! Locking primitives without lock poisoning.
//!
//! The pool reports panics in work functions through the affected unit's
//! outcome, so the poisoning machinery of [`std::sync`] is redundant here and
//! would only turn an already-reported panic into a second, unrelated one.
//! These wrappers recover the guard from a poisoned lock and carry on.

use std::{
    ops::{Deref, DerefMut},
    sync,
};

pub(crate) struct Mutex<T: ?Sized> {
    inner: sync::Mutex<T>,
}

impl<T> Mutex<T> {
    pub(crate) const fn new(t: T) -> Mutex<T> {
        Self {
            inner: sync::Mutex::new(t),
        }
    }
}

impl<T: ?Sized> Mutex<T> {
    pub(crate) fn lock(&self) -> MutexGuard<'_, T> {
        let guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        };

        MutexGuard { inner: guard }
    }
}

pub(crate) struct MutexGuard<'a, T: ?Sized + 'a> {
    inner: sync::MutexGuard<'a, T>,
}

impl<'a, T: ?Sized + 'a> Deref for MutexGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<'a, T: ?Sized + 'a> DerefMut for MutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

#[derive(Default)]
pub(crate) struct Condvar {
    inner: sync::Condvar,
}

impl Condvar {
    pub(crate) const fn new() -> Condvar {
        Self {
            inner: sync::Condvar::new(),
        }
    }

    pub(crate) fn wait_while<'a, T, F>(
        &self,
        guard: MutexGuard<'a, T>,
        condition: F,
    ) -> MutexGuard<'a, T>
    where
        F: FnMut(&mut T) -> bool,
    {
        let guard = match self.inner.wait_while(guard.inner, condition) {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        };
        MutexGuard { inner: guard }
    }

    pub(crate) fn notify_all(&self) {
        self.inner.notify_all();
    }
}

pub(crate) struct RwLock<T: ?Sized> {
    inner: sync::RwLock<T>,
}

impl<T> RwLock<T> {
    pub(crate) const fn new(t: T) -> RwLock<T> {
        Self {
            inner: sync::RwLock::new(t),
        }
    }
}

impl<T: ?Sized> RwLock<T> {
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, T> {
        let guard = match self.inner.read() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        };
        RwLockReadGuard { inner: guard }
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, T> {
        let guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        };
        RwLockWriteGuard { inner: guard }
    }
}

pub(crate) struct RwLockReadGuard<'a, T: ?Sized + 'a> {
    inner: sync::RwLockReadGuard<'a, T>,
}

impl<'a, T: ?Sized> Deref for RwLockReadGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

pub(crate) struct RwLockWriteGuard<'a, T: ?Sized + 'a> {
    inner: sync::RwLockWriteGuard<'a, T>,
}

impl<'a, T: ?Sized> Deref for RwLockWriteGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<'a, T: ?Sized> DerefMut for RwLockWriteGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{catch_unwind, AssertUnwindSafe};

    use super::*;

    #[test]
    fn mutex_survives_a_panicking_holder() {
        let mutex = Mutex::new(0);
        catch_unwind(AssertUnwindSafe(|| {
            let _guard = mutex.lock();
            panic!("poisoned");
        }))
        .unwrap_err();
        *mutex.lock() += 1;
        assert_eq!(*mutex.lock(), 1);
    }

    #[test]
    fn rwlock_survives_a_panicking_writer() {
        let lock = RwLock::new(0);
        catch_unwind(AssertUnwindSafe(|| {
            let _guard = lock.write();
            panic!("poisoned");
        }))
        .unwrap_err();
        assert_eq!(*lock.read(), 0);
    }
}
