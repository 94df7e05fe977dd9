//! Processes: lifetime owners of threads and an address space.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use quark_core::id::{Pid, ThreadId};
use quark_core::sync::SpinLock;

use crate::error::SchedError;
use crate::thread::Thread;

/// Opaque handle of an address space (for example a page-table root).
///
/// Supplied by the memory subsystem; the scheduler only passes it to
/// [`Platform::activate_address_space`](crate::Platform::activate_address_space).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressSpace(usize);

impl AddressSpace {
    /// The kernel's address space.
    pub const KERNEL: Self = Self(0);

    /// Wraps a platform-specific root value.
    pub const fn new(root: usize) -> Self {
        Self(root)
    }

    /// Returns the platform-specific root value.
    pub const fn root(self) -> usize {
        self.0
    }
}

/// A process.
///
/// Holds the strong reference to each of its threads until the thread
/// terminates. Once the last thread is gone the process is reported to the
/// caller of [`Kernel::terminate`](crate::Kernel::terminate) for teardown.
pub struct Process {
    pid: Pid,
    name: &'static str,
    address_space: AddressSpace,
    threads: SpinLock<Vec<Arc<Thread>>>,
}

impl Process {
    pub(crate) const fn new(pid: Pid, name: &'static str, address_space: AddressSpace) -> Self {
        Self {
            pid,
            name,
            address_space,
            threads: SpinLock::named("process.threads", Vec::new()),
        }
    }

    /// Returns the process ID.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Returns the process name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the address space handle.
    pub fn address_space(&self) -> AddressSpace {
        self.address_space
    }

    /// Returns `true` for the kernel pseudo-process.
    pub fn is_kernel(&self) -> bool {
        self.pid == Pid::KERNEL
    }

    /// Returns the number of live threads.
    pub fn thread_count(&self) -> usize {
        self.threads.lock_irqsave().len()
    }

    /// Returns the IDs of the live threads, in creation order.
    pub fn thread_ids(&self) -> Vec<ThreadId> {
        self.threads.lock_irqsave().iter().map(|t| t.id()).collect()
    }

    /// Registers a new thread.
    pub(crate) fn add_thread(&self, thread: Arc<Thread>) -> Result<(), SchedError> {
        let mut threads = self.threads.lock_irqsave();
        threads
            .try_reserve(1)
            .map_err(|_| SchedError::OutOfMemory)?;
        threads.push(thread);
        Ok(())
    }

    /// Drops the process's reference to `id`. Returns the number of threads
    /// left, or `None` if the thread was not registered here.
    pub(crate) fn remove_thread(&self, id: ThreadId) -> Option<usize> {
        let mut threads = self.threads.lock_irqsave();
        let pos = threads.iter().position(|t| t.id() == id)?;
        // Dropped after the lock is released.
        let removed = threads.remove(pos);
        let left = threads.len();
        drop(threads);
        drop(removed);
        Some(left)
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("name", &self.name)
            .field("address_space", &self.address_space)
            .field("threads", &self.thread_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::{Continuation, ThreadMeta};

    fn thread_in(process: &Arc<Process>, id: u64) -> Arc<Thread> {
        Arc::new(Thread::new(
            ThreadId::new(id),
            &ThreadMeta::new("t"),
            process,
            Continuation::adopted(),
        ))
    }

    #[test]
    fn kernel_process_identity() {
        let p = Process::new(Pid::KERNEL, "kernel", AddressSpace::KERNEL);
        assert!(p.is_kernel());
        assert_eq!(p.address_space().root(), 0);
        assert_eq!(p.thread_count(), 0);
    }

    #[test]
    fn add_and_remove_threads() {
        let p = Arc::new(Process::new(Pid::new(3), "init", AddressSpace::new(0x4000)));
        assert!(!p.is_kernel());
        let a = thread_in(&p, 1);
        let b = thread_in(&p, 2);
        p.add_thread(Arc::clone(&a)).unwrap();
        p.add_thread(Arc::clone(&b)).unwrap();
        assert_eq!(p.thread_ids(), [ThreadId::new(1), ThreadId::new(2)]);
        assert_eq!(a.address_space(), AddressSpace::new(0x4000));

        assert_eq!(p.remove_thread(ThreadId::new(1)), Some(1));
        assert_eq!(p.remove_thread(ThreadId::new(1)), None);
        assert_eq!(p.remove_thread(ThreadId::new(2)), Some(0));
    }

    #[test]
    fn thread_outlives_process_reference() {
        let p = Arc::new(Process::new(Pid::new(1), "short", AddressSpace::new(1)));
        let t = thread_in(&p, 9);
        drop(p);
        assert!(t.process().is_none());
        assert_eq!(t.pid(), Pid::new(1));
    }
}
