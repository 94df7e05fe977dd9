//! Synchronization primitives for the kernel.
//!
//! Provides [`SpinLock`], [`IrqSpinLock`] and [`Once`], all suitable for use
//! in `static` items and usable before any allocator or scheduler exists.

mod irq_spinlock;
mod once;
mod spinlock;

pub use irq_spinlock::{IrqSpinLock, IrqSpinLockGuard};
pub use once::Once;
pub use spinlock::{SpinLock, SpinLockGuard, SpinLockIrqGuard};
