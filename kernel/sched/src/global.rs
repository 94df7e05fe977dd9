//! The kernel-wide scheduler instance.
//!
//! Boot code builds the [`Kernel`] once with [`init`]; interrupt handlers and
//! subsystems then reach it through the free functions here. Entry points
//! that run from interrupt context or the idle path silently do nothing
//! before `init`, fallible ones report [`SchedError::NotInitialized`].

use alloc::sync::Arc;

use quark_core::kinfo;
use quark_core::sync::Once;

use crate::config::SchedConfig;
use crate::error::SchedError;
use crate::kernel::{Kernel, PreemptGuard};
use crate::mutex::{AcquireMode, MutexId};
use crate::platform::Platform;
use crate::process::Process;
use crate::thread::{Priority, Thread, ThreadEntry};

static KERNEL: Once<Kernel> = Once::new();

/// Builds the global kernel instance.
///
/// # Errors
///
/// [`SchedError::Busy`] if it already exists, otherwise as for
/// [`Kernel::new`].
pub fn init(config: SchedConfig, platform: Arc<dyn Platform>) -> Result<&'static Kernel, SchedError> {
    if KERNEL.is_initialized() {
        return Err(SchedError::Busy);
    }
    let kernel = Kernel::new(config, platform)?;
    KERNEL.set(kernel).map_err(|_| SchedError::Busy)?;
    kinfo!("sched: global instance ready");
    kernel_ref()
}

/// Returns the global instance if [`init`] has run.
pub fn try_kernel() -> Option<&'static Kernel> {
    KERNEL.get()
}

fn kernel_ref() -> Result<&'static Kernel, SchedError> {
    KERNEL.get().ok_or(SchedError::NotInitialized)
}

/// See [`Kernel::create_kernel_thread`].
///
/// # Errors
///
/// [`SchedError::NotInitialized`] before [`init`].
pub fn create_kernel_thread(
    name: &'static str,
    entry: ThreadEntry,
    arg: usize,
    priority: Priority,
) -> Result<Arc<Thread>, SchedError> {
    kernel_ref()?.create_kernel_thread(name, entry, arg, priority)
}

/// See [`Kernel::spawn_kernel_thread`].
///
/// # Errors
///
/// [`SchedError::NotInitialized`] before [`init`].
pub fn spawn_kernel_thread(
    name: &'static str,
    entry: ThreadEntry,
    arg: usize,
    priority: Priority,
) -> Result<Arc<Thread>, SchedError> {
    kernel_ref()?.spawn_kernel_thread(name, entry, arg, priority)
}

/// See [`Kernel::run`].
///
/// # Errors
///
/// [`SchedError::NotInitialized`] before [`init`].
pub fn run(thread: &Arc<Thread>) -> Result<(), SchedError> {
    kernel_ref()?.run(thread).map(|_| ())
}

/// See [`Kernel::yield_now`].
pub fn yield_now() {
    if let Some(kernel) = try_kernel() {
        kernel.yield_now();
    }
}

/// See [`Kernel::mask`].
pub fn mask() {
    if let Some(kernel) = try_kernel() {
        kernel.mask();
    }
}

/// See [`Kernel::unmask`].
pub fn unmask() {
    if let Some(kernel) = try_kernel() {
        kernel.unmask();
    }
}

/// See [`Kernel::preempt_guard`]. `None` before [`init`].
pub fn preempt_guard() -> Option<PreemptGuard<'static>> {
    try_kernel().map(Kernel::preempt_guard)
}

/// Timer interrupt entry point.
pub fn timer_tick() -> bool {
    try_kernel().is_some_and(Kernel::timer_tick)
}

/// Reschedule IPI entry point.
pub fn reschedule_ipi() -> bool {
    try_kernel().is_some_and(Kernel::reschedule_ipi)
}

/// See [`Kernel::set_priority`].
///
/// # Errors
///
/// [`SchedError::NotInitialized`] before [`init`].
pub fn set_priority(thread: &Arc<Thread>, priority: Priority) -> Result<(), SchedError> {
    kernel_ref()?.set_priority(thread, priority)
}

/// See [`Kernel::terminate`].
///
/// # Errors
///
/// [`SchedError::NotInitialized`] before [`init`].
pub fn terminate(thread: &Arc<Thread>) -> Result<Option<Arc<Process>>, SchedError> {
    kernel_ref()?.terminate(thread)
}

/// See [`Kernel::sleep_current`].
///
/// # Errors
///
/// [`SchedError::NotInitialized`] before [`init`].
pub fn sleep_current() -> Result<(), SchedError> {
    kernel_ref()?.sleep_current()
}

/// See [`Kernel::wake`].
///
/// # Errors
///
/// [`SchedError::NotInitialized`] before [`init`].
pub fn wake(thread: &Arc<Thread>) -> Result<(), SchedError> {
    kernel_ref()?.wake(thread)
}

/// See [`Kernel::mutex_create`].
///
/// # Errors
///
/// [`SchedError::NotInitialized`] before [`init`].
pub fn mutex_create() -> Result<MutexId, SchedError> {
    kernel_ref()?.mutex_create()
}

/// See [`Kernel::mutex_acquire`].
///
/// # Errors
///
/// [`SchedError::NotInitialized`] before [`init`].
pub fn mutex_acquire(id: MutexId, mode: AcquireMode) -> Result<(), SchedError> {
    kernel_ref()?.mutex_acquire(id, mode)
}

/// See [`Kernel::mutex_release`].
///
/// # Errors
///
/// [`SchedError::NotInitialized`] before [`init`].
pub fn mutex_release(id: MutexId) -> Result<(), SchedError> {
    kernel_ref()?.mutex_release(id)
}

/// See [`Kernel::mutex_destroy`].
///
/// # Errors
///
/// [`SchedError::NotInitialized`] before [`init`].
pub fn mutex_destroy(id: MutexId) -> Result<(), SchedError> {
    kernel_ref()?.mutex_destroy(id)
}
