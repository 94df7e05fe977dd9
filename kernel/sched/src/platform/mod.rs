//! Hardware seam of the scheduler.
//!
//! Everything the scheduler needs from the machine goes through
//! [`Platform`]: CPU discovery, stack preparation, the register-level
//! continuation swap, address-space activation, reschedule IPIs, a
//! monotonic counter and the low-power wait. The kernel provides the real
//! implementation; tests provide scripted ones.

#[cfg(test)]
pub(crate) mod mock;

use quark_core::id::CpuId;

use crate::process::AddressSpace;
use crate::thread::{Continuation, Thread, ThreadEntry};

/// Machine services consumed by the scheduler.
pub trait Platform: Send + Sync {
    /// Returns the CPU executing the caller.
    fn current_cpu(&self) -> CpuId;

    /// Returns the number of CPUs, each of which gets a scheduler.
    fn cpu_count(&self) -> usize;

    /// Allocates a stack of `stack_size` bytes and builds a continuation
    /// that starts `entry(arg)` with interrupts enabled.
    ///
    /// Returns `None` if the memory could not be allocated.
    fn prepare_continuation(
        &self,
        entry: ThreadEntry,
        arg: usize,
        stack_size: usize,
    ) -> Option<Continuation>;

    /// Saves the running context into `from`'s continuation and resumes
    /// `to`'s. Returns when `from` is next switched to.
    ///
    /// # Safety
    ///
    /// Called with interrupts disabled on the current CPU. `from` must be
    /// the thread whose context is executing, and `to` must have a valid
    /// continuation that is not executing on any CPU. Both threads stay
    /// alive for the duration of the switch.
    unsafe fn switch_context(&self, from: &Thread, to: &Thread);

    /// Makes `space` the active address space on the current CPU.
    fn activate_address_space(&self, space: AddressSpace);

    /// Asks `cpu` to run its reschedule entry point soon.
    fn send_reschedule_ipi(&self, cpu: CpuId);

    /// Returns a monotonic counter used for load measurement.
    fn timestamp(&self) -> u64;

    /// Waits for the next interrupt in a low-power state.
    fn wait_for_interrupt(&self);

    /// Frees the resources behind a terminated thread's continuation.
    ///
    /// Called once the thread has switched out for the last time. The
    /// default does nothing.
    fn reclaim_continuation(&self, thread: &Thread) {
        let _ = thread;
    }
}
