//! Blocking kernel mutexes.
//!
//! A mutex is FREE, HELD with no waiters, or HELD with a FIFO queue of
//! WAITING threads. Release hands ownership straight to the head waiter, so
//! the mutex stays HELD across the hand-off and wake order equals block
//! order.
//!
//! Mutexes live in a [`MutexTable`] and are addressed by generation-checked
//! [`MutexId`]s; a handle to a destroyed mutex is rejected rather than
//! aliasing a newer one. Every blocked thread is also listed in the
//! [`WaitRegistry`] for diagnostics.
//!
//! # Lock ordering
//!
//! table → mutex → registry → core. The table lock is never held while a
//! mutex is acquired or released, only for lookup and destruction.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use quark_core::id::ThreadId;
use quark_core::sync::SpinLock;
use quark_core::{kdebug, kwarn};

use crate::error::SchedError;
use crate::thread::{Thread, ThreadState};

/// Handle of a mutex in the kernel mutex table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutexId {
    index: u32,
    generation: u32,
}

impl MutexId {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Returns the table slot.
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Returns the slot generation the handle was issued for.
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for MutexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.index, self.generation)
    }
}

/// Whether an acquisition may suspend the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireMode {
    /// Wait until the mutex is handed over.
    Blocking,
    /// Fail with [`SchedError::WouldBlock`] if the mutex is held.
    NonBlocking,
}

/// Observable state of a mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexState {
    /// Not held.
    Free,
    /// Held with an empty wait queue.
    Held,
    /// Held with at least one waiter.
    Contended,
}

/// Outcome of [`KernelMutex::acquire_or_enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Acquired {
    /// The caller owns the mutex now.
    Immediately,
    /// The caller is WAITING in the queue and must suspend.
    Enqueued,
}

struct MutexInner {
    free: bool,
    owner: Option<ThreadId>,
    waiters: VecDeque<Arc<Thread>>,
}

/// A blocking mutual-exclusion lock.
///
/// The owner is recorded for diagnostics; release does not check it.
pub struct KernelMutex {
    id: MutexId,
    inner: SpinLock<MutexInner>,
}

impl KernelMutex {
    fn new(id: MutexId) -> Self {
        Self {
            id,
            inner: SpinLock::named(
                "kmutex",
                MutexInner {
                    free: true,
                    owner: None,
                    waiters: VecDeque::new(),
                },
            ),
        }
    }

    /// Returns the handle of this mutex.
    pub fn id(&self) -> MutexId {
        self.id
    }

    /// Returns the current state.
    pub fn state(&self) -> MutexState {
        let inner = self.inner.lock_irqsave();
        if inner.free {
            MutexState::Free
        } else if inner.waiters.is_empty() {
            MutexState::Held
        } else {
            MutexState::Contended
        }
    }

    /// Returns the owning thread, if held.
    pub fn owner(&self) -> Option<ThreadId> {
        self.inner.lock_irqsave().owner
    }

    /// Returns the waiters in wake order.
    pub fn waiters(&self) -> Vec<ThreadId> {
        self.inner
            .lock_irqsave()
            .waiters
            .iter()
            .map(|t| t.id())
            .collect()
    }

    /// Returns the number of waiters.
    pub fn waiter_count(&self) -> usize {
        self.inner.lock_irqsave().waiters.len()
    }

    /// Takes the mutex for `thread`, or queues it.
    ///
    /// On `Enqueued` the thread is WAITING, linked to this mutex and listed
    /// in `registry`; the caller must suspend it.
    pub(crate) fn acquire_or_enqueue(
        &self,
        thread: &Arc<Thread>,
        mode: AcquireMode,
        registry: &WaitRegistry,
    ) -> Result<Acquired, SchedError> {
        let mut inner = self.inner.lock_irqsave();
        if inner.free {
            inner.free = false;
            inner.owner = Some(thread.id());
            return Ok(Acquired::Immediately);
        }
        if mode == AcquireMode::NonBlocking {
            return Err(SchedError::WouldBlock);
        }
        // The idle thread must always be runnable.
        if thread.is_idle() {
            return Err(SchedError::InvalidArgument);
        }
        inner
            .waiters
            .try_reserve(1)
            .map_err(|_| SchedError::OutOfMemory)?;
        registry.insert(thread.id(), self.id)?;
        thread.link_mutex(self.id);
        thread.set_state(ThreadState::Waiting);
        inner.waiters.push_back(Arc::clone(thread));
        kdebug!("mutex {}: thread {} waiting", self.id, thread.id());
        Ok(Acquired::Enqueued)
    }

    /// Hands the mutex to the head waiter, or frees it.
    ///
    /// Returns the new owner, which the caller must make READY. The caller
    /// has masked local preemption, so the plain lock is enough.
    pub(crate) fn release_to_next(
        &self,
        registry: &WaitRegistry,
    ) -> Result<Option<Arc<Thread>>, SchedError> {
        let mut inner = self.inner.lock();
        if inner.free {
            kwarn!("mutex {}: release while free", self.id);
            return Err(SchedError::InvalidArgument);
        }
        let Some(next) = inner.waiters.pop_front() else {
            inner.free = true;
            inner.owner = None;
            return Ok(None);
        };
        registry.remove(next.id());
        let linked = next.unlink_mutex();
        debug_assert_eq!(linked, Some(self.id));
        inner.owner = Some(next.id());
        kdebug!("mutex {}: handed to thread {}", self.id, next.id());
        Ok(Some(next))
    }

    fn is_free(&self) -> bool {
        self.inner.lock_irqsave().free
    }
}

impl fmt::Debug for KernelMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelMutex")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("owner", &self.owner())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Waiting registry
// ---------------------------------------------------------------------------

/// A thread blocked on a mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitRecord {
    /// The blocked thread.
    pub thread: ThreadId,
    /// The mutex it waits on.
    pub mutex: MutexId,
}

/// Every thread currently blocked on any mutex, in block order.
pub struct WaitRegistry {
    records: SpinLock<Vec<WaitRecord>>,
}

impl WaitRegistry {
    /// Creates an empty registry.
    pub const fn new() -> Self {
        Self {
            records: SpinLock::named("wait.registry", Vec::new()),
        }
    }

    /// Called with the mutex lock held.
    fn insert(&self, thread: ThreadId, mutex: MutexId) -> Result<(), SchedError> {
        let mut records = self.records.lock();
        records
            .try_reserve(1)
            .map_err(|_| SchedError::OutOfMemory)?;
        records.push(WaitRecord { thread, mutex });
        Ok(())
    }

    /// Called with the mutex lock held.
    fn remove(&self, thread: ThreadId) {
        let mut records = self.records.lock();
        if let Some(pos) = records.iter().position(|r| r.thread == thread) {
            records.remove(pos);
        }
    }

    /// Returns a copy of the registry.
    pub fn snapshot(&self) -> Vec<WaitRecord> {
        self.records.lock_irqsave().clone()
    }

    /// Returns the number of blocked threads.
    pub fn len(&self) -> usize {
        self.records.lock_irqsave().len()
    }

    /// Returns `true` if no thread is blocked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for WaitRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Mutex table
// ---------------------------------------------------------------------------

struct Slot {
    generation: u32,
    mutex: Option<Arc<KernelMutex>>,
}

struct TableInner {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

/// Owner of all kernel mutexes.
pub struct MutexTable {
    inner: SpinLock<TableInner>,
    capacity: usize,
}

impl MutexTable {
    /// Creates a table holding at most `capacity` live mutexes.
    pub const fn new(capacity: usize) -> Self {
        Self {
            inner: SpinLock::named(
                "mutex.table",
                TableInner {
                    slots: Vec::new(),
                    free: Vec::new(),
                },
            ),
            capacity,
        }
    }

    /// Creates a FREE mutex.
    ///
    /// # Errors
    ///
    /// [`SchedError::OutOfMemory`] if the table is full.
    pub fn create(&self) -> Result<MutexId, SchedError> {
        let mut table = self.inner.lock_irqsave();
        if let Some(index) = table.free.pop() {
            let slot = &mut table.slots[index as usize];
            let id = MutexId::new(index, slot.generation);
            slot.mutex = Some(Arc::new(KernelMutex::new(id)));
            return Ok(id);
        }
        if table.slots.len() >= self.capacity {
            return Err(SchedError::OutOfMemory);
        }
        let index = u32::try_from(table.slots.len()).map_err(|_| SchedError::OutOfMemory)?;
        table
            .slots
            .try_reserve(1)
            .map_err(|_| SchedError::OutOfMemory)?;
        // The free list can hold every slot, so destroy never allocates.
        let missing = (table.slots.len() + 1).saturating_sub(table.free.len());
        table
            .free
            .try_reserve(missing)
            .map_err(|_| SchedError::OutOfMemory)?;
        let id = MutexId::new(index, 0);
        table.slots.push(Slot {
            generation: 0,
            mutex: Some(Arc::new(KernelMutex::new(id))),
        });
        Ok(id)
    }

    /// Looks up a live mutex.
    ///
    /// # Errors
    ///
    /// [`SchedError::InvalidArgument`] for a destroyed or unknown handle.
    pub fn get(&self, id: MutexId) -> Result<Arc<KernelMutex>, SchedError> {
        let table = self.inner.lock_irqsave();
        table
            .slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.mutex.clone())
            .ok_or(SchedError::InvalidArgument)
    }

    /// Destroys a FREE mutex. The handle is invalid afterwards.
    ///
    /// # Errors
    ///
    /// [`SchedError::Busy`] if the mutex is held;
    /// [`SchedError::InvalidArgument`] for a stale handle.
    pub fn destroy(&self, id: MutexId) -> Result<(), SchedError> {
        let mut table = self.inner.lock_irqsave();
        let slot = table
            .slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .ok_or(SchedError::InvalidArgument)?;
        let mutex = slot.mutex.as_ref().ok_or(SchedError::InvalidArgument)?;
        if !mutex.is_free() {
            return Err(SchedError::Busy);
        }
        // A FREE mutex never has waiters.
        let removed = slot.mutex.take();
        slot.generation = slot.generation.wrapping_add(1);
        table.free.push(id.index);
        drop(table);
        drop(removed);
        Ok(())
    }

    /// Returns the number of live mutexes.
    pub fn live(&self) -> usize {
        let table = self.inner.lock_irqsave();
        table.slots.len() - table.free.len()
    }
}
