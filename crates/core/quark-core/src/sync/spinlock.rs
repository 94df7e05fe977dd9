//! Spin-based mutual exclusion lock.
//!
//! Uses test-and-test-and-set (TTAS) to reduce cache-line contention. The
//! same lock can be taken in two modes:
//!
//! - [`SpinLock::lock`]: plain acquisition. Only valid when no interrupt
//!   handler on this CPU can want the same lock (for example because the
//!   caller has masked preemption and the lock is never touched from IRQ
//!   context).
//! - [`SpinLock::lock_irqsave`]: disables interrupts on the current CPU
//!   first and restores the previous state when the guard drops.
//!
//! Critical sections are expected to be short. Callers must never block,
//! yield or switch context while holding either kind of guard.

use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch;

/// A spin-based mutual exclusion lock.
///
/// Const-constructable so it can be placed in `static` items.
pub struct SpinLock<T> {
    locked: AtomicBool,
    name: &'static str,
    data: UnsafeCell<T>,
}

// SAFETY: The SpinLock ensures exclusive access to `T` via atomic operations.
// `T: Send` is required because the data may be accessed from different threads.
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Creates a new unlocked `SpinLock` wrapping `value`.
    pub const fn new(value: T) -> Self {
        Self::named("<unnamed>", value)
    }

    /// Creates a new unlocked `SpinLock` with a name for diagnostics.
    pub const fn named(name: &'static str, value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            name,
            data: UnsafeCell::new(value),
        }
    }

    /// Returns the diagnostic name given at construction.
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Acquires the lock, spinning until it becomes available.
    ///
    /// Interrupts are left as they are.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        self.acquire();
        SpinLockGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    /// Attempts to acquire the lock without spinning.
    ///
    /// Returns `Some(guard)` if the lock was acquired, `None` if it was
    /// already held.
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        if self.try_acquire() {
            Some(SpinLockGuard {
                lock: self,
                _not_send: PhantomData,
            })
        } else {
            None
        }
    }

    /// Disables interrupts on the current CPU, then acquires the lock.
    ///
    /// The previous interrupt state is restored after the lock is released.
    pub fn lock_irqsave(&self) -> SpinLockIrqGuard<'_, T> {
        let saved_flags = arch::irq_save();
        self.acquire();
        SpinLockIrqGuard {
            lock: self,
            saved_flags,
            _not_send: PhantomData,
        }
    }

    /// Interrupt-safe variant of [`try_lock`](Self::try_lock).
    ///
    /// On failure the interrupt state is restored before returning.
    pub fn try_lock_irqsave(&self) -> Option<SpinLockIrqGuard<'_, T>> {
        let saved_flags = arch::irq_save();
        if self.try_acquire() {
            Some(SpinLockIrqGuard {
                lock: self,
                saved_flags,
                _not_send: PhantomData,
            })
        } else {
            arch::irq_restore(saved_flags);
            None
        }
    }

    /// Returns `true` if the lock is currently held by anyone.
    ///
    /// Only useful for assertions; the answer may be stale immediately.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Returns a mutable reference to the data through exclusive access.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    fn try_acquire(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn acquire(&self) {
        loop {
            if self
                .locked
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }

            // TTAS: spin on a read (shared cache line) until it looks free.
            while self.locked.load(Ordering::Relaxed) {
                arch::cpu_relax();
            }
        }
    }

    fn release(&self) {
        self.locked.store(false, Ordering::Release);
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// RAII guard for a plain [`SpinLock`] acquisition.
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
    _not_send: PhantomData<*const ()>,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: The guard guarantees exclusive access while it exists.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: The guard guarantees exclusive access while it exists.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

/// RAII guard for an interrupt-safe [`SpinLock`] acquisition.
///
/// Releases the lock, then restores the saved interrupt state. Must be
/// dropped on the CPU that created it, which `!Send` enforces.
pub struct SpinLockIrqGuard<'a, T> {
    lock: &'a SpinLock<T>,
    saved_flags: u64,
    _not_send: PhantomData<*const ()>,
}

impl<T> Deref for SpinLockIrqGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: The guard guarantees exclusive access while it exists.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinLockIrqGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: The guard guarantees exclusive access while it exists.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinLockIrqGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release();
        arch::irq_restore(self.saved_flags);
    }
}
