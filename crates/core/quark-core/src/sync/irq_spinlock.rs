//! Interrupt-safe spin lock.
//!
//! Disables interrupts before acquiring the inner spinlock and restores
//! the previous interrupt state on release. Every acquisition is
//! interrupt-safe, so data shared with interrupt handlers (such as a core's
//! run queues, which the timer tick touches) can live behind it without the
//! caller having to pick the right mode.

use core::ops::{Deref, DerefMut};

use super::spinlock::{SpinLock, SpinLockIrqGuard};

/// A spin lock that disables interrupts while held.
pub struct IrqSpinLock<T> {
    inner: SpinLock<T>,
}

impl<T> IrqSpinLock<T> {
    /// Creates a new unlocked `IrqSpinLock`.
    pub const fn new(value: T) -> Self {
        Self {
            inner: SpinLock::new(value),
        }
    }

    /// Creates a new unlocked `IrqSpinLock` with a name for diagnostics.
    pub const fn named(name: &'static str, value: T) -> Self {
        Self {
            inner: SpinLock::named(name, value),
        }
    }

    /// Disables interrupts and acquires the lock.
    pub fn lock(&self) -> IrqSpinLockGuard<'_, T> {
        IrqSpinLockGuard {
            inner: self.inner.lock_irqsave(),
        }
    }

    /// Attempts to acquire the lock without spinning.
    ///
    /// The interrupt state is unchanged if the lock is busy.
    pub fn try_lock(&self) -> Option<IrqSpinLockGuard<'_, T>> {
        self.inner
            .try_lock_irqsave()
            .map(|inner| IrqSpinLockGuard { inner })
    }

    /// Returns `true` if the lock is currently held.
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    /// Returns a mutable reference to the data through exclusive access.
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}

/// RAII guard for [`IrqSpinLock`]. Restores interrupt state on drop.
pub struct IrqSpinLockGuard<'a, T> {
    inner: SpinLockIrqGuard<'a, T>,
}

impl<T> Deref for IrqSpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> DerefMut for IrqSpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}
