//! Kernel threads.
//!
//! Threads owned by the kernel pseudo-process. They run in the kernel
//! address space, so switching between two of them never touches the MMU.

use alloc::sync::Arc;

use crate::error::SchedError;
use crate::kernel::Kernel;
use crate::thread::{Priority, Thread, ThreadEntry, ThreadMeta};

impl Kernel {
    /// Creates a kernel thread without running it.
    ///
    /// # Errors
    ///
    /// As for [`Kernel::create_thread`].
    pub fn create_kernel_thread(
        &self,
        name: &'static str,
        entry: ThreadEntry,
        arg: usize,
        priority: Priority,
    ) -> Result<Arc<Thread>, SchedError> {
        let meta = ThreadMeta::new(name).with_priority(priority);
        self.create_thread(self.kernel_process(), meta, entry, arg)
    }

    /// Creates a kernel thread and places it on a core.
    ///
    /// # Errors
    ///
    /// As for [`Kernel::create_thread`].
    pub fn spawn_kernel_thread(
        &self,
        name: &'static str,
        entry: ThreadEntry,
        arg: usize,
        priority: Priority,
    ) -> Result<Arc<Thread>, SchedError> {
        self.spawn_kernel_thread_with(ThreadMeta::new(name).with_priority(priority), entry, arg)
    }

    /// Creates a kernel thread from explicit metadata and places it.
    ///
    /// # Errors
    ///
    /// As for [`Kernel::create_thread`].
    pub fn spawn_kernel_thread_with(
        &self,
        meta: ThreadMeta,
        entry: ThreadEntry,
        arg: usize,
    ) -> Result<Arc<Thread>, SchedError> {
        let thread = self.create_thread(self.kernel_process(), meta, entry, arg)?;
        self.run(&thread)?;
        Ok(thread)
    }
}
