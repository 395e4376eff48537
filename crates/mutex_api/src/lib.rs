//! A simple mutex API.
#![cfg_attr(not(feature = "std"), no_std)]

use core::ops::DerefMut;

/// A mutex.
pub trait Mutex {
    /// The type of the data that the mutex protects.
    type Data;

    /// The type of the guard that the `lock` method returns.
    type Guard<'a>: DerefMut<Target = Self::Data>
    where
        Self: 'a;

    /// Creates a new mutex.
    fn new(data: Self::Data) -> Self;

    /// Locks the mutex.
    fn lock(&self) -> Self::Guard<'_>;
}

/// A mutex paired with its own condition variable, the way a kernel's sleep
/// queue is always tied to the lock it sleeps under.
///
/// Kept as one trait (rather than a separate `Mutex` + `CondVar` pair)
/// because `wait` must hand back a guard of the exact same lock it consumed;
/// splitting the two into independent traits would let a caller mix
/// incompatible guard types, which a combined monitor rules out by
/// construction.
pub trait Monitor {
    /// The type of the data that the monitor protects.
    type Data;

    /// The type of the guard that `lock` and `wait` return.
    type Guard<'a>: DerefMut<Target = Self::Data>
    where
        Self: 'a;

    /// Creates a new monitor.
    fn new(data: Self::Data) -> Self;

    /// Locks the monitor.
    fn lock(&self) -> Self::Guard<'_>;

    /// Atomically unlocks `guard` and blocks the calling thread until
    /// [`Monitor::notify_all`] is called, then relocks and returns the guard.
    ///
    /// Spurious wakeups are allowed: callers must re-check their condition in
    /// a loop.
    fn wait<'a>(&'a self, guard: Self::Guard<'a>) -> Self::Guard<'a>;

    /// Wakes every thread currently blocked in [`Monitor::wait`] on this
    /// monitor.
    fn notify_all(&self);
}

#[cfg(feature = "std")]
mod std_impl {
    use std::sync::{self, Condvar};

    use crate::{Monitor, Mutex};

    /// A [`Mutex`] backed by [`std::sync::Mutex`].
    pub struct StdMutex<T>(sync::Mutex<T>);

    pub struct StdMutexGuard<'a, T>(sync::MutexGuard<'a, T>);

    impl<T> Mutex for StdMutex<T> {
        type Data = T;
        type Guard<'a>
            = StdMutexGuard<'a, T>
        where
            Self: 'a;

        fn new(data: Self::Data) -> Self {
            Self(sync::Mutex::new(data))
        }

        fn lock(&self) -> Self::Guard<'_> {
            StdMutexGuard(self.0.lock().unwrap_or_else(sync::PoisonError::into_inner))
        }
    }

    impl<T> core::ops::Deref for StdMutexGuard<'_, T> {
        type Target = T;

        fn deref(&self) -> &Self::Target {
            &self.0
        }
    }

    impl<T> core::ops::DerefMut for StdMutexGuard<'_, T> {
        fn deref_mut(&mut self) -> &mut Self::Target {
            &mut self.0
        }
    }

    /// A [`Monitor`] backed by a [`std::sync::Mutex`] and [`std::sync::Condvar`].
    pub struct StdMonitor<T> {
        mutex: sync::Mutex<T>,
        condvar: Condvar,
    }

    pub struct StdMonitorGuard<'a, T>(Option<sync::MutexGuard<'a, T>>, &'a Condvar);

    impl<T> Monitor for StdMonitor<T> {
        type Data = T;
        type Guard<'a>
            = StdMonitorGuard<'a, T>
        where
            Self: 'a;

        fn new(data: Self::Data) -> Self {
            Self {
                mutex: sync::Mutex::new(data),
                condvar: Condvar::new(),
            }
        }

        fn lock(&self) -> Self::Guard<'_> {
            StdMonitorGuard(
                Some(self.mutex.lock().unwrap_or_else(sync::PoisonError::into_inner)),
                &self.condvar,
            )
        }

        fn wait<'a>(&'a self, mut guard: Self::Guard<'a>) -> Self::Guard<'a> {
            let inner = guard.0.take().expect("guard already consumed");
            let inner = self
                .condvar
                .wait(inner)
                .unwrap_or_else(sync::PoisonError::into_inner);
            StdMonitorGuard(Some(inner), &self.condvar)
        }

        fn notify_all(&self) {
            self.condvar.notify_all();
        }
    }

    impl<T> core::ops::Deref for StdMonitorGuard<'_, T> {
        type Target = T;

        fn deref(&self) -> &Self::Target {
            self.0.as_ref().expect("guard already consumed")
        }
    }

    impl<T> core::ops::DerefMut for StdMonitorGuard<'_, T> {
        fn deref_mut(&mut self) -> &mut Self::Target {
            self.0.as_mut().expect("guard already consumed")
        }
    }
}

#[cfg(feature = "std")]
pub use std_impl::{StdMonitor, StdMonitorGuard, StdMutex, StdMutexGuard};
